// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle. Transitions are owned by the state machine; nothing else
/// mutates `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Review,
    Settlement,
    Completed,
    Reversed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Review => "review",
            TaskStatus::Settlement => "settlement",
            TaskStatus::Completed => "completed",
            TaskStatus::Reversed => "reversed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Reversed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escrow lifecycle: pending -> held -> released | refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscrowStatus {
    None,
    Pending,
    Held,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::None => "none",
            EscrowStatus::Pending => "pending",
            EscrowStatus::Held => "held",
            EscrowStatus::Released => "released",
            EscrowStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-level settlement reference, stored verbatim on the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Transaction hash or channel settlement id.
    pub reference: String,
    /// Block or sequence number the backend assigned.
    pub block: u64,
    /// Human-viewable URL for the settlement.
    pub url: String,
}

/// A worker's submitted result. The payload is opaque to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkResult {
    pub worker_id: String,
    pub result: serde_json::Value,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub budget: u64,
    pub status: TaskStatus,
    /// Canonical wallet of the poster. Only this wallet may accept bids or
    /// request a refund.
    pub creator: String,
    pub assigned_agents: Vec<String>,
    pub work_results: Vec<WorkResult>,
    pub escrow_amount: u64,
    pub escrow_status: EscrowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow_receipt: Option<Receipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_ref: Option<Receipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// The worker that won the posting, once a bid has been accepted.
    pub fn winning_worker(&self) -> Option<&str> {
        self.assigned_agents.first().map(String::as_str)
    }

    pub fn has_result_from(&self, worker_id: &str) -> bool {
        self.work_results.iter().any(|r| r.worker_id == worker_id)
    }
}
