// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_REPUTATION: u8 = 50;
pub const MAX_REPUTATION: u8 = 100;

/// A worker agent, upserted by handle. Reputation stays clamped to [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub handle: String,
    pub wallet: String,
    pub role: String,
    pub skills: Vec<String>,
    pub description: String,
    pub reputation: u8,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub active: bool,
    pub max_liability: u64,
    pub identity_registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_node: Option<String>,
    /// Extra attributes supplied at registration, written through to the
    /// identity record unchanged.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra_attributes: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Apply a settlement outcome: bump the counters and move reputation by
    /// +2 on success, -5 on failure, clamped to [0, 100].
    pub fn apply_settlement_outcome(&mut self, success: bool) {
        if success {
            self.tasks_completed += 1;
            self.reputation = self.reputation.saturating_add(2).min(MAX_REPUTATION);
        } else {
            self.tasks_failed += 1;
            self.reputation = self.reputation.saturating_sub(5);
        }
        self.updated_at = Utc::now();
    }
}

/// Fields accepted on agent upsert. Everything except the handle is optional
/// so a repeated registration can refresh a subset of fields.
#[derive(Debug, Clone, Default)]
pub struct AgentUpsert {
    pub wallet: Option<String>,
    pub role: Option<String>,
    pub skills: Option<Vec<String>>,
    pub description: Option<String>,
    pub active: Option<bool>,
    pub max_liability: Option<u64>,
    pub extra_attributes: HashMap<String, String>,
}
