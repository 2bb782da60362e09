// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Append-only activity log fed by every state-changing coordinator action.

use std::sync::Arc;

use crate::models::{Activity, TaskStatus};
use crate::store::{Store, StoreError};

/// Actor token for coordinator-originated events.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// Stable uppercase action labels.
pub mod actions {
    use super::TaskStatus;

    pub const TASK_CREATED: &str = "TASK_CREATED";
    pub const ESCROW_HELD: &str = "ESCROW_HELD";
    pub const BID_SUBMITTED: &str = "BID_SUBMITTED";
    pub const BID_ACCEPTED: &str = "BID_ACCEPTED";
    pub const WORK_SUBMITTED: &str = "WORK_SUBMITTED";
    pub const PAYMENT_SETTLED: &str = "PAYMENT_SETTLED";
    pub const SETTLEMENT_FAILED: &str = "SETTLEMENT_FAILED";
    pub const REFUND_PROCESSED: &str = "REFUND_PROCESSED";

    /// `STATUS_CHANGED_TO_<X>` for admin status overrides.
    pub fn status_changed(status: TaskStatus) -> String {
        format!(
            "STATUS_CHANGED_TO_{}",
            status.as_str().to_uppercase().replace('-', "_")
        )
    }
}

#[derive(Clone)]
pub struct ActivityRecorder {
    store: Arc<dyn Store>,
}

impl ActivityRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        actor_id: &str,
        task_id: &str,
        action: impl Into<String>,
    ) -> Result<Activity, StoreError> {
        self.store
            .append_activity(actor_id, task_id, action.into())
            .await
    }
}
