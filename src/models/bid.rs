// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A worker's offer on a posting. At most one bid per job ever carries
/// `accepted = true`; the store enforces that with a compare-and-set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub id: String,
    pub job_id: String,
    pub worker_id: String,
    pub worker_handle: String,
    /// Freeform pitch from the worker; opaque structured text.
    pub message: String,
    pub relevance_score: u8,
    pub estimated_time: String,
    pub proposed_amount: u64,
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}
