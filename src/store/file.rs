// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Write-through file persistence over `MemoryStore`.
//!
//! Every committed mutation snapshots the full state to a JSON file via a
//! temp-file rename, so a restarted coordinator resumes from the last commit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

use super::{AgentMutation, MemoryStore, Store, StoreError, TaskMutation};
use crate::models::{
    Activity, Agent, AgentUpsert, Bid, EscrowStatus, JobPosting, PostingStatus, Task, TaskStatus,
};
use crate::settlement::types::SettlementJob;
use crate::state_machine::SideEffect;

const STATE_FILE: &str = "marketplace-state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
    pub postings: Vec<JobPosting>,
    pub bids: Vec<Bid>,
    pub activity: Vec<Activity>,
    pub settlement_jobs: Vec<SettlementJob>,
}

pub struct FileStore {
    inner: MemoryStore,
    path: PathBuf,
    persist_lock: Mutex<()>,
}

fn io_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::Io(err.to_string())
}

impl FileStore {
    /// Open (or create) a file-backed store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;
        let path = dir.join(STATE_FILE);

        let inner = MemoryStore::new();
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: StoreSnapshot =
                    serde_json::from_slice(&bytes).map_err(io_err)?;
                inner.import(snapshot).await;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(e)),
        }

        Ok(Self {
            inner,
            path,
            persist_lock: Mutex::new(()),
        })
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.inner.export().await;
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(io_err)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn upsert_agent(&self, handle: &str, fields: AgentUpsert) -> Result<Agent, StoreError> {
        let agent = self.inner.upsert_agent(handle, fields).await?;
        self.persist().await?;
        Ok(agent)
    }

    async fn get_agent(&self, id: &str) -> Result<Agent, StoreError> {
        self.inner.get_agent(id).await
    }

    async fn find_agent_by_handle(&self, handle: &str) -> Result<Option<Agent>, StoreError> {
        self.inner.find_agent_by_handle(handle).await
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        self.inner.list_agents().await
    }

    async fn update_agent(&self, id: &str, mutation: AgentMutation) -> Result<Agent, StoreError> {
        let agent = self.inner.update_agent(id, mutation).await?;
        self.persist().await?;
        Ok(agent)
    }

    async fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        let task = self.inner.create_task(task).await?;
        self.persist().await?;
        Ok(task)
    }

    async fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        self.inner.get_task(id).await
    }

    async fn list_tasks_by_creator(&self, wallet: &str) -> Result<Vec<Task>, StoreError> {
        self.inner.list_tasks_by_creator(wallet).await
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        self.inner.list_tasks_by_status(status).await
    }

    async fn list_tasks_by_escrow_status(
        &self,
        status: EscrowStatus,
    ) -> Result<Vec<Task>, StoreError> {
        self.inner.list_tasks_by_escrow_status(status).await
    }

    async fn update_task_transactional(
        &self,
        id: &str,
        mutation: TaskMutation,
    ) -> Result<(Task, Vec<SideEffect>), StoreError> {
        let committed = self.inner.update_task_transactional(id, mutation).await?;
        self.persist().await?;
        Ok(committed)
    }

    async fn create_posting(&self, posting: JobPosting) -> Result<JobPosting, StoreError> {
        let posting = self.inner.create_posting(posting).await?;
        self.persist().await?;
        Ok(posting)
    }

    async fn get_posting(&self, id: &str) -> Result<JobPosting, StoreError> {
        self.inner.get_posting(id).await
    }

    async fn find_posting_by_task(&self, task_id: &str) -> Result<Option<JobPosting>, StoreError> {
        self.inner.find_posting_by_task(task_id).await
    }

    async fn list_postings(&self) -> Result<Vec<JobPosting>, StoreError> {
        self.inner.list_postings().await
    }

    async fn update_posting_status(
        &self,
        id: &str,
        status: PostingStatus,
    ) -> Result<JobPosting, StoreError> {
        let posting = self.inner.update_posting_status(id, status).await?;
        self.persist().await?;
        Ok(posting)
    }

    async fn append_bid(&self, bid: Bid) -> Result<Bid, StoreError> {
        let bid = self.inner.append_bid(bid).await?;
        self.persist().await?;
        Ok(bid)
    }

    async fn get_bid(&self, id: &str) -> Result<Bid, StoreError> {
        self.inner.get_bid(id).await
    }

    async fn list_bids_by_job(&self, job_id: &str) -> Result<Vec<Bid>, StoreError> {
        self.inner.list_bids_by_job(job_id).await
    }

    async fn mark_bid_accepted(&self, bid_id: &str) -> Result<Bid, StoreError> {
        let bid = self.inner.mark_bid_accepted(bid_id).await?;
        self.persist().await?;
        Ok(bid)
    }

    async fn append_activity(
        &self,
        actor_id: &str,
        task_id: &str,
        action: String,
    ) -> Result<Activity, StoreError> {
        let entry = self.inner.append_activity(actor_id, task_id, action).await?;
        self.persist().await?;
        Ok(entry)
    }

    async fn list_activity_by_tasks(
        &self,
        task_ids: &[String],
        limit: usize,
    ) -> Result<Vec<Activity>, StoreError> {
        self.inner.list_activity_by_tasks(task_ids, limit).await
    }

    async fn append_settlement_job(&self, job: SettlementJob) -> Result<(), StoreError> {
        self.inner.append_settlement_job(job).await?;
        self.persist().await
    }

    async fn pending_settlement_jobs(&self) -> Result<Vec<SettlementJob>, StoreError> {
        self.inner.pending_settlement_jobs().await
    }

    async fn remove_settlement_job(&self, id: &str) -> Result<(), StoreError> {
        self.inner.remove_settlement_job(id).await?;
        self.persist().await
    }
}
