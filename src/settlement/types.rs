// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::escrow::EscrowError;
use crate::store::StoreError;

/// Side-effect actions the dispatcher executes, at most one in flight per
/// task, FIFO within a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SettlementAction {
    /// Release escrow to the winning worker, then queue a reputation update.
    Settle,
    /// Refund escrow to the depositor.
    Refund,
    /// Apply a settlement outcome to the worker's record and identity node.
    UpdateReputation { worker_id: String, success: bool },
}

impl SettlementAction {
    pub fn label(&self) -> &'static str {
        match self {
            SettlementAction::Settle => "settle",
            SettlementAction::Refund => "refund",
            SettlementAction::UpdateReputation { .. } => "update-reputation",
        }
    }
}

/// A queued dispatcher item. Persisted by the store so a crash between a
/// committed transition and its side effect does not lose work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementJob {
    pub id: String,
    pub task_id: String,
    pub action: SettlementAction,
    pub enqueued_at: DateTime<Utc>,
}

impl SettlementJob {
    pub fn new(task_id: impl Into<String>, action: SettlementAction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            action,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("escrow backend error: {0}")]
    Escrow(#[from] EscrowError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("task {0} has no assigned worker to pay")]
    NoAssignedWorker(String),
    #[error("worker {0} is not a registered agent")]
    UnknownWorker(String),
}
