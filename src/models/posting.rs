// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingStatus {
    Open,
    Assigned,
    Closed,
}

impl PostingStatus {
    /// Posting status mirrors the task: open while the task is open, assigned
    /// while work is underway, closed once the task is terminal.
    pub fn mirror_of(task_status: TaskStatus) -> Self {
        if task_status.is_terminal() {
            PostingStatus::Closed
        } else if task_status == TaskStatus::Open {
            PostingStatus::Open
        } else {
            PostingStatus::Assigned
        }
    }
}

/// The world-readable face of a task on the job board. Exactly one posting
/// exists per task; the two reference each other by id and share a lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPosting {
    pub id: String,
    pub task_id: String,
    /// Denormalized from the task for authorization checks.
    pub creator: String,
    pub title: String,
    pub description: String,
    pub budget: u64,
    pub required_skills: Vec<String>,
    pub status: PostingStatus,
    pub posted_at: DateTime<Utc>,
}
