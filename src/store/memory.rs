// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-memory store. Default backend and the substitute used by every test.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AgentMutation, Store, StoreError, TaskMutation};
use crate::models::agent::DEFAULT_REPUTATION;
use crate::models::{
    wallets_equal, Activity, Agent, AgentUpsert, Bid, EscrowStatus, JobPosting, PostingStatus,
    Task, TaskStatus,
};
use crate::settlement::types::SettlementJob;
use crate::state_machine::SideEffect;
use crate::utils::KeyedLocks;

#[derive(Default)]
struct AgentBook {
    by_id: HashMap<String, Agent>,
    by_handle: HashMap<String, String>,
}

#[derive(Default)]
struct BidBook {
    by_id: HashMap<String, Bid>,
    by_job: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct ActivityBook {
    entries: Vec<Activity>,
    last_per_task: HashMap<String, DateTime<Utc>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    agents: Arc<RwLock<AgentBook>>,
    tasks: Arc<RwLock<HashMap<String, Task>>>,
    postings: Arc<RwLock<HashMap<String, JobPosting>>>,
    bids: Arc<RwLock<BidBook>>,
    activity: Arc<RwLock<ActivityBook>>,
    settlement_jobs: Arc<RwLock<Vec<SettlementJob>>>,
    task_locks: KeyedLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn export(&self) -> super::file::StoreSnapshot {
        super::file::StoreSnapshot {
            agents: self.agents.read().await.by_id.values().cloned().collect(),
            tasks: self.tasks.read().await.values().cloned().collect(),
            postings: self.postings.read().await.values().cloned().collect(),
            bids: self.bids.read().await.by_id.values().cloned().collect(),
            activity: self.activity.read().await.entries.clone(),
            settlement_jobs: self.settlement_jobs.read().await.clone(),
        }
    }

    pub(crate) async fn import(&self, snapshot: super::file::StoreSnapshot) {
        let mut agents = self.agents.write().await;
        for agent in snapshot.agents {
            agents.by_handle.insert(agent.handle.clone(), agent.id.clone());
            agents.by_id.insert(agent.id.clone(), agent);
        }
        drop(agents);

        let mut tasks = self.tasks.write().await;
        for task in snapshot.tasks {
            tasks.insert(task.id.clone(), task);
        }
        drop(tasks);

        let mut postings = self.postings.write().await;
        for posting in snapshot.postings {
            postings.insert(posting.id.clone(), posting);
        }
        drop(postings);

        let mut bids = self.bids.write().await;
        for bid in snapshot.bids {
            bids.by_job
                .entry(bid.job_id.clone())
                .or_default()
                .push(bid.id.clone());
            bids.by_id.insert(bid.id.clone(), bid);
        }
        drop(bids);

        let mut activity = self.activity.write().await;
        let book = &mut *activity;
        for entry in snapshot.activity {
            let last = book
                .last_per_task
                .entry(entry.task_id.clone())
                .or_insert(entry.timestamp);
            if entry.timestamp > *last {
                *last = entry.timestamp;
            }
            book.entries.push(entry);
        }
        drop(activity);

        *self.settlement_jobs.write().await = snapshot.settlement_jobs;
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_agent(&self, handle: &str, fields: AgentUpsert) -> Result<Agent, StoreError> {
        let mut book = self.agents.write().await;
        let now = Utc::now();

        if let Some(id) = book.by_handle.get(handle).cloned() {
            let agent = book
                .by_id
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(format!("agent {id}")))?;
            if let Some(wallet) = fields.wallet {
                agent.wallet = wallet;
            }
            if let Some(role) = fields.role {
                agent.role = role;
            }
            if let Some(skills) = fields.skills {
                agent.skills = skills;
            }
            if let Some(description) = fields.description {
                agent.description = description;
            }
            if let Some(active) = fields.active {
                agent.active = active;
            }
            if let Some(max_liability) = fields.max_liability {
                agent.max_liability = max_liability;
            }
            agent.extra_attributes.extend(fields.extra_attributes);
            agent.updated_at = now;
            return Ok(agent.clone());
        }

        let agent = Agent {
            id: Uuid::new_v4().to_string(),
            handle: handle.to_string(),
            wallet: fields.wallet.unwrap_or_default(),
            role: fields.role.unwrap_or_else(|| "worker".to_string()),
            skills: fields.skills.unwrap_or_default(),
            description: fields.description.unwrap_or_default(),
            reputation: DEFAULT_REPUTATION,
            tasks_completed: 0,
            tasks_failed: 0,
            active: fields.active.unwrap_or(true),
            max_liability: fields.max_liability.unwrap_or(0),
            identity_registered: false,
            identity_node: None,
            extra_attributes: fields.extra_attributes,
            created_at: now,
            updated_at: now,
        };
        book.by_handle.insert(handle.to_string(), agent.id.clone());
        book.by_id.insert(agent.id.clone(), agent.clone());
        Ok(agent)
    }

    async fn get_agent(&self, id: &str) -> Result<Agent, StoreError> {
        self.agents
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("agent {id}")))
    }

    async fn find_agent_by_handle(&self, handle: &str) -> Result<Option<Agent>, StoreError> {
        let book = self.agents.read().await;
        Ok(book
            .by_handle
            .get(handle)
            .and_then(|id| book.by_id.get(id))
            .cloned())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let mut agents: Vec<Agent> = self.agents.read().await.by_id.values().cloned().collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(agents)
    }

    async fn update_agent(&self, id: &str, mutation: AgentMutation) -> Result<Agent, StoreError> {
        let mut book = self.agents.write().await;
        let agent = book
            .by_id
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("agent {id}")))?;
        mutation(agent);
        agent.updated_at = Utc::now();
        Ok(agent.clone())
    }

    async fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Conflict(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))
    }

    async fn list_tasks_by_creator(&self, wallet: &str) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| wallets_equal(&t.creator, wallet))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn list_tasks_by_escrow_status(
        &self,
        status: EscrowStatus,
    ) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.escrow_status == status)
            .cloned()
            .collect())
    }

    async fn update_task_transactional(
        &self,
        id: &str,
        mutation: TaskMutation,
    ) -> Result<(Task, Vec<SideEffect>), StoreError> {
        let _guard = self.task_locks.acquire(id).await;

        let current = self
            .tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;

        let (next, effects) = mutation(&current)?;

        self.tasks.write().await.insert(id.to_string(), next.clone());
        Ok((next, effects))
    }

    async fn create_posting(&self, posting: JobPosting) -> Result<JobPosting, StoreError> {
        let mut postings = self.postings.write().await;
        if postings.values().any(|p| p.task_id == posting.task_id) {
            return Err(StoreError::Conflict(format!(
                "task {} already has a posting",
                posting.task_id
            )));
        }
        postings.insert(posting.id.clone(), posting.clone());
        Ok(posting)
    }

    async fn get_posting(&self, id: &str) -> Result<JobPosting, StoreError> {
        self.postings
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))
    }

    async fn find_posting_by_task(&self, task_id: &str) -> Result<Option<JobPosting>, StoreError> {
        Ok(self
            .postings
            .read()
            .await
            .values()
            .find(|p| p.task_id == task_id)
            .cloned())
    }

    async fn list_postings(&self) -> Result<Vec<JobPosting>, StoreError> {
        let mut postings: Vec<JobPosting> =
            self.postings.read().await.values().cloned().collect();
        postings.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        Ok(postings)
    }

    async fn update_posting_status(
        &self,
        id: &str,
        status: PostingStatus,
    ) -> Result<JobPosting, StoreError> {
        let mut postings = self.postings.write().await;
        let posting = postings
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        posting.status = status;
        Ok(posting.clone())
    }

    async fn append_bid(&self, bid: Bid) -> Result<Bid, StoreError> {
        let mut book = self.bids.write().await;
        book.by_job
            .entry(bid.job_id.clone())
            .or_default()
            .push(bid.id.clone());
        book.by_id.insert(bid.id.clone(), bid.clone());
        Ok(bid)
    }

    async fn get_bid(&self, id: &str) -> Result<Bid, StoreError> {
        self.bids
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("bid {id}")))
    }

    async fn list_bids_by_job(&self, job_id: &str) -> Result<Vec<Bid>, StoreError> {
        let book = self.bids.read().await;
        let ids = book.by_job.get(job_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| book.by_id.get(id))
            .cloned()
            .collect())
    }

    async fn mark_bid_accepted(&self, bid_id: &str) -> Result<Bid, StoreError> {
        // Single write lock over the bid book makes this a compare-and-set:
        // the sibling scan and the flag flip are atomic.
        let mut book = self.bids.write().await;
        let job_id = book
            .by_id
            .get(bid_id)
            .map(|b| b.job_id.clone())
            .ok_or_else(|| StoreError::NotFound(format!("bid {bid_id}")))?;

        let siblings = book.by_job.get(&job_id).cloned().unwrap_or_default();
        if siblings
            .iter()
            .filter_map(|id| book.by_id.get(id))
            .any(|b| b.accepted)
        {
            return Err(StoreError::AlreadyAccepted(job_id));
        }

        let bid = book
            .by_id
            .get_mut(bid_id)
            .ok_or_else(|| StoreError::NotFound(format!("bid {bid_id}")))?;
        bid.accepted = true;
        Ok(bid.clone())
    }

    async fn append_activity(
        &self,
        actor_id: &str,
        task_id: &str,
        action: String,
    ) -> Result<Activity, StoreError> {
        let mut book = self.activity.write().await;

        // Clamp to the task's previous timestamp so per-task activity stays
        // monotonic even if the wall clock steps backwards.
        let mut timestamp = Utc::now();
        if let Some(last) = book.last_per_task.get(task_id) {
            if *last > timestamp {
                timestamp = *last;
            }
        }

        let entry = Activity {
            id: Uuid::new_v4().to_string(),
            actor_id: actor_id.to_string(),
            task_id: task_id.to_string(),
            action,
            timestamp,
        };
        book.last_per_task.insert(task_id.to_string(), timestamp);
        book.entries.push(entry.clone());
        Ok(entry)
    }

    async fn list_activity_by_tasks(
        &self,
        task_ids: &[String],
        limit: usize,
    ) -> Result<Vec<Activity>, StoreError> {
        let book = self.activity.read().await;
        let mut entries: Vec<Activity> = book
            .entries
            .iter()
            .filter(|a| task_ids.iter().any(|id| id == &a.task_id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn append_settlement_job(&self, job: SettlementJob) -> Result<(), StoreError> {
        self.settlement_jobs.write().await.push(job);
        Ok(())
    }

    async fn pending_settlement_jobs(&self) -> Result<Vec<SettlementJob>, StoreError> {
        Ok(self.settlement_jobs.read().await.clone())
    }

    async fn remove_settlement_job(&self, id: &str) -> Result<(), StoreError> {
        self.settlement_jobs.write().await.retain(|j| j.id != id);
        Ok(())
    }
}
