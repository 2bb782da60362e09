// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only activity entry. Immutable after write; per-task timestamps are
/// monotonically non-decreasing in commit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    /// Worker id, the reserved `SYSTEM` token, or a settlement-backend token.
    pub actor_id: String,
    pub task_id: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}
