// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Typed repository for marketplace records.
//!
//! The coordinator only ever talks to the `Store` trait; `MemoryStore` backs
//! tests and `memory://` deployments, `FileStore` adds write-through JSON
//! snapshots for `file://` deployments. Writes to a single task are
//! serialized by a per-task keyed mutex held for the whole transactional
//! update.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    Activity, Agent, AgentUpsert, Bid, EscrowStatus, JobPosting, PostingStatus, Task, TaskStatus,
};
use crate::settlement::types::SettlementJob;
use crate::state_machine::{SideEffect, TransitionError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("a bid on job {0} has already been accepted")]
    AlreadyAccepted(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store io failure: {0}")]
    Io(String),
}

/// Transactional task mutation: runs against the current record under the
/// task's lock and commits only when it returns a valid transition.
pub type TaskMutation =
    Box<dyn FnOnce(&Task) -> Result<(Task, Vec<SideEffect>), TransitionError> + Send>;

/// In-place agent mutation, applied atomically.
pub type AgentMutation = Box<dyn FnOnce(&mut Agent) + Send>;

#[async_trait]
pub trait Store: Send + Sync {
    // Agents -------------------------------------------------------------
    /// Idempotent by handle. Inserts assign default reputation 50, zeroed
    /// counters and an unregistered identity; repeats merge the given fields.
    async fn upsert_agent(&self, handle: &str, fields: AgentUpsert) -> Result<Agent, StoreError>;
    async fn get_agent(&self, id: &str) -> Result<Agent, StoreError>;
    async fn find_agent_by_handle(&self, handle: &str) -> Result<Option<Agent>, StoreError>;
    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError>;
    async fn update_agent(&self, id: &str, mutation: AgentMutation) -> Result<Agent, StoreError>;

    // Tasks --------------------------------------------------------------
    async fn create_task(&self, task: Task) -> Result<Task, StoreError>;
    async fn get_task(&self, id: &str) -> Result<Task, StoreError>;
    async fn list_tasks_by_creator(&self, wallet: &str) -> Result<Vec<Task>, StoreError>;
    async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError>;
    async fn list_tasks_by_escrow_status(
        &self,
        status: EscrowStatus,
    ) -> Result<Vec<Task>, StoreError>;
    async fn update_task_transactional(
        &self,
        id: &str,
        mutation: TaskMutation,
    ) -> Result<(Task, Vec<SideEffect>), StoreError>;

    // Postings -----------------------------------------------------------
    async fn create_posting(&self, posting: JobPosting) -> Result<JobPosting, StoreError>;
    async fn get_posting(&self, id: &str) -> Result<JobPosting, StoreError>;
    async fn find_posting_by_task(&self, task_id: &str) -> Result<Option<JobPosting>, StoreError>;
    async fn list_postings(&self) -> Result<Vec<JobPosting>, StoreError>;
    async fn update_posting_status(
        &self,
        id: &str,
        status: PostingStatus,
    ) -> Result<JobPosting, StoreError>;

    // Bids ---------------------------------------------------------------
    async fn append_bid(&self, bid: Bid) -> Result<Bid, StoreError>;
    async fn get_bid(&self, id: &str) -> Result<Bid, StoreError>;
    async fn list_bids_by_job(&self, job_id: &str) -> Result<Vec<Bid>, StoreError>;
    /// Compare-and-set: fails with `AlreadyAccepted` when any bid on the same
    /// job is already accepted.
    async fn mark_bid_accepted(&self, bid_id: &str) -> Result<Bid, StoreError>;

    // Activity -----------------------------------------------------------
    /// Timestamps are assigned inside the append so entries for one task are
    /// monotonically non-decreasing in commit order.
    async fn append_activity(
        &self,
        actor_id: &str,
        task_id: &str,
        action: String,
    ) -> Result<Activity, StoreError>;
    /// Newest-first activity across the given tasks, capped at `limit`.
    async fn list_activity_by_tasks(
        &self,
        task_ids: &[String],
        limit: usize,
    ) -> Result<Vec<Activity>, StoreError>;

    // Settlement queue ---------------------------------------------------
    async fn append_settlement_job(&self, job: SettlementJob) -> Result<(), StoreError>;
    async fn pending_settlement_jobs(&self) -> Result<Vec<SettlementJob>, StoreError>;
    async fn remove_settlement_job(&self, id: &str) -> Result<(), StoreError>;
}
