// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Settlement dispatcher.
//!
//! Consumes `(taskId, action)` items with three guarantees: at most one
//! in-flight action per task, FIFO among actions for the same task, and
//! parallelism across tasks bounded by `MAX_CONCURRENT_SETTLEMENTS`. Escrow
//! release and refund happen here and nowhere else.
//!
//! The dispatcher owns its own context: once a job is enqueued it runs to
//! completion regardless of the originating client. Jobs are persisted
//! through the store and re-armed by `recover` after a restart.

use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::types::{SettlementAction, SettlementError, SettlementJob};
use crate::activity::{actions, ActivityRecorder};
use crate::config::CoordinatorConfig;
use crate::escrow::{self, task_escrow_key_hex, EscrowAdapter, EscrowError};
use crate::identity::{self, reputation_attributes, IdentityAdapter, NodeRef};
use crate::models::{EscrowStatus, Receipt, Task, TaskStatus};
use crate::state_machine::{transition, SideEffect, TaskEvent};
use crate::store::{Store, StoreError};

const IDLE_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrent: usize,
    pub retry_max: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub escrow_deadline: Duration,
    pub identity_deadline: Duration,
    pub identity_retry_max: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            retry_max: 5,
            retry_base: Duration::from_millis(500),
            retry_cap: Duration::from_secs(30),
            escrow_deadline: Duration::from_secs(30),
            identity_deadline: Duration::from_secs(15),
            identity_retry_max: 3,
        }
    }
}

impl From<&CoordinatorConfig> for DispatcherConfig {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_settlements,
            retry_max: config.escrow_retry_max,
            retry_base: config.escrow_retry_base,
            escrow_deadline: config.escrow_call_timeout,
            identity_deadline: config.identity_call_timeout,
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct QueueState {
    per_task: HashMap<String, VecDeque<SettlementJob>>,
    /// Task ids with queued work, in arrival order.
    ready: VecDeque<String>,
    in_flight: HashSet<String>,
}

pub struct SettlementDispatcher {
    store: Arc<dyn Store>,
    escrow: Arc<dyn EscrowAdapter>,
    identity: Arc<dyn IdentityAdapter>,
    activity: ActivityRecorder,
    config: DispatcherConfig,
    queue: Mutex<QueueState>,
    notify: Notify,
    semaphore: Arc<Semaphore>,
}

/// Marks a task as in flight for the guard's lifetime.
struct SlotGuard<'a> {
    dispatcher: &'a SettlementDispatcher,
    task_id: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut queue = self
            .dispatcher
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        queue.in_flight.remove(&self.task_id);
        drop(queue);
        self.dispatcher.notify.notify_waiters();
    }
}

impl SettlementDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        escrow: Arc<dyn EscrowAdapter>,
        identity: Arc<dyn IdentityAdapter>,
        config: DispatcherConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            activity: ActivityRecorder::new(Arc::clone(&store)),
            store,
            escrow,
            identity,
            config,
            queue: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            semaphore,
        }
    }

    pub fn escrow_backend_token(&self) -> &'static str {
        self.escrow.backend_token()
    }

    /// Durably enqueue an action for a task.
    pub async fn enqueue(
        &self,
        task_id: &str,
        action: SettlementAction,
    ) -> Result<(), StoreError> {
        let job = SettlementJob::new(task_id, action);
        self.store.append_settlement_job(job.clone()).await?;
        self.push_local(job);
        Ok(())
    }

    fn push_local(&self, job: SettlementJob) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let task_id = job.task_id.clone();
        queue.per_task.entry(task_id.clone()).or_default().push_back(job);
        if !queue.ready.contains(&task_id) {
            queue.ready.push_back(task_id);
        }
        drop(queue);
        self.notify.notify_waiters();
    }

    /// Pop the next job whose task is not already in flight, marking the task
    /// busy. Tasks with queued work stay in the ready ring.
    fn next_ready_job(&self) -> Option<SettlementJob> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        for _ in 0..queue.ready.len() {
            let task_id = match queue.ready.pop_front() {
                Some(id) => id,
                None => return None,
            };
            if queue.in_flight.contains(&task_id) {
                queue.ready.push_back(task_id);
                continue;
            }
            let job = queue.per_task.get_mut(&task_id).and_then(VecDeque::pop_front);
            match job {
                Some(job) => {
                    let drained = queue
                        .per_task
                        .get(&task_id)
                        .map(VecDeque::is_empty)
                        .unwrap_or(true);
                    if drained {
                        queue.per_task.remove(&task_id);
                    } else {
                        queue.ready.push_back(task_id.clone());
                    }
                    queue.in_flight.insert(task_id);
                    return Some(job);
                }
                None => {
                    queue.per_task.remove(&task_id);
                }
            }
        }
        None
    }

    fn has_queued(&self, task_id: &str, pred: impl Fn(&SettlementAction) -> bool) -> bool {
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue
            .per_task
            .get(task_id)
            .map(|jobs| jobs.iter().any(|j| pred(&j.action)))
            .unwrap_or(false)
    }

    /// Wait until no other action is in flight for the task, then hold the
    /// slot. Used by creator-awaited refunds and force-closes so they
    /// serialize with queued settlements.
    async fn claim_task_slot(&self, task_id: &str) -> SlotGuard<'_> {
        loop {
            {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                if !queue.in_flight.contains(task_id) {
                    queue.in_flight.insert(task_id.to_string());
                    return SlotGuard {
                        dispatcher: self,
                        task_id: task_id.to_string(),
                    };
                }
            }
            let _ = tokio::time::timeout(IDLE_POLL, self.notify.notified()).await;
        }
    }

    /// Spawn the worker pool. Jobs for distinct tasks run in parallel up to
    /// the concurrency bound.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let permit = match dispatcher.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let job = loop {
                    if let Some(job) = dispatcher.next_ready_job() {
                        break job;
                    }
                    let _ = tokio::time::timeout(IDLE_POLL, dispatcher.notify.notified()).await;
                };
                let worker = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    worker.process(job).await;
                    drop(permit);
                });
            }
        })
    }

    /// Process queued jobs inline until the queue is empty. Test harness and
    /// recovery helper; production uses `spawn`.
    pub async fn run_until_idle(&self) {
        while let Some(job) = self.next_ready_job() {
            self.process(job).await;
        }
    }

    async fn process(&self, job: SettlementJob) {
        let slot = SlotGuard {
            dispatcher: self,
            task_id: job.task_id.clone(),
        };

        let outcome = match &job.action {
            SettlementAction::Settle => self.settle(&job.task_id).await,
            SettlementAction::Refund => self.refund_inner(&job.task_id).await.map(|_| ()),
            SettlementAction::UpdateReputation { worker_id, success } => {
                self.update_reputation(worker_id, *success).await
            }
        };
        if let Err(e) = outcome {
            error!(
                "settlement job {} for task {} failed: {e}",
                job.action.label(),
                job.task_id
            );
        }
        if let Err(e) = self.store.remove_settlement_job(&job.id).await {
            warn!("failed to remove settlement job {}: {e}", job.id);
        }
        drop(slot);
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .retry_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.config.retry_cap);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.config.retry_base.as_millis() as u64);
        capped + Duration::from_millis(jitter_ms)
    }

    async fn release_with_retry(
        &self,
        task_id: &str,
        recipient: &str,
    ) -> Result<Receipt, EscrowError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match escrow::with_deadline(
                self.config.escrow_deadline,
                self.escrow.release(task_id, recipient),
            )
            .await
            {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_transient() && attempt < self.config.retry_max => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "escrow release for task {task_id} unavailable (attempt {attempt}/{}): {e}; retrying in {delay:?}",
                        self.config.retry_max
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn refund_with_retry(&self, task_id: &str) -> Result<Receipt, EscrowError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match escrow::with_deadline(self.config.escrow_deadline, self.escrow.refund(task_id))
                .await
            {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_transient() && attempt < self.config.retry_max => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "escrow refund for task {task_id} unavailable (attempt {attempt}/{}): {e}; retrying in {delay:?}",
                        self.config.retry_max
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn settle(&self, task_id: &str) -> Result<(), SettlementError> {
        let task = self.store.get_task(task_id).await?;
        if task.status != TaskStatus::Settlement || task.escrow_status != EscrowStatus::Held {
            // Recovery can re-arm a task that already settled; nothing to do.
            debug!(
                "skipping settle for task {task_id}: {}/{}",
                task.status, task.escrow_status
            );
            return Ok(());
        }

        let worker_id = task
            .winning_worker()
            .ok_or_else(|| SettlementError::NoAssignedWorker(task_id.to_string()))?
            .to_string();
        let agent = self
            .store
            .get_agent(&worker_id)
            .await
            .map_err(|_| SettlementError::UnknownWorker(worker_id.clone()))?;

        match self.release_with_retry(task_id, &agent.wallet).await {
            Ok(receipt) => self.commit_settlement(task_id, receipt).await,
            Err(EscrowError::AlreadySettled(_)) => {
                // A prior release landed but the transition never committed
                // (crash window). Reconcile from the backend's view.
                match self.escrow.query(task_id).await {
                    Ok(state) if state.released => {
                        let receipt = Receipt {
                            reference: task_escrow_key_hex(task_id),
                            block: 0,
                            url: String::new(),
                        };
                        self.commit_settlement(task_id, receipt).await
                    }
                    _ => self.park_settlement(task_id).await,
                }
            }
            Err(e) => {
                warn!("escrow release for task {task_id} gave up: {e}");
                self.park_settlement(task_id).await
            }
        }
    }

    async fn commit_settlement(
        &self,
        task_id: &str,
        receipt: Receipt,
    ) -> Result<(), SettlementError> {
        let event_receipt = receipt.clone();
        let (task, effects) = self
            .store
            .update_task_transactional(
                task_id,
                Box::new(move |t| {
                    let event = TaskEvent::SettlementSucceeded {
                        receipt: event_receipt,
                    };
                    transition(t, &event)
                }),
            )
            .await?;
        self.activity
            .record(self.escrow.backend_token(), task_id, actions::PAYMENT_SETTLED)
            .await?;
        self.apply_effects(&task, effects).await?;
        info!(
            "settled task {task_id}: escrow released in {}",
            receipt.reference
        );
        Ok(())
    }

    async fn park_settlement(&self, task_id: &str) -> Result<(), SettlementError> {
        self.store
            .update_task_transactional(
                task_id,
                Box::new(|t| transition(t, &TaskEvent::SettlementFailed)),
            )
            .await?;
        self.activity
            .record(
                self.escrow.backend_token(),
                task_id,
                actions::SETTLEMENT_FAILED,
            )
            .await?;
        Ok(())
    }

    async fn refund_inner(&self, task_id: &str) -> Result<(Task, Receipt), SettlementError> {
        let task = self.store.get_task(task_id).await?;
        let caller = task.creator.clone();
        let receipt = self.refund_with_retry(task_id).await?;

        let event_receipt = receipt.clone();
        let (task, effects) = self
            .store
            .update_task_transactional(
                task_id,
                Box::new(move |t| {
                    let event = TaskEvent::RefundRequested {
                        caller_wallet: caller,
                        receipt: event_receipt,
                    };
                    transition(t, &event)
                }),
            )
            .await?;
        self.activity
            .record(
                self.escrow.backend_token(),
                task_id,
                actions::REFUND_PROCESSED,
            )
            .await?;
        self.apply_effects(&task, effects).await?;
        Ok((task, receipt))
    }

    /// Creator-awaited refund. Runs through the task's dispatcher slot so it
    /// serializes with queued settlements; failures bubble to the caller.
    pub async fn execute_refund(
        &self,
        task_id: &str,
        caller_wallet: &str,
    ) -> Result<(Task, Receipt), SettlementError> {
        let _slot = self.claim_task_slot(task_id).await;

        // Re-check under the slot: a settlement may have landed while the
        // request waited.
        let current = self.store.get_task(task_id).await?;
        let probe = TaskEvent::RefundRequested {
            caller_wallet: caller_wallet.to_string(),
            receipt: Receipt {
                reference: String::new(),
                block: 0,
                url: String::new(),
            },
        };
        if let Err(e) = transition(&current, &probe) {
            return Err(SettlementError::Store(StoreError::InvalidTransition(e)));
        }

        self.refund_inner(task_id).await
    }

    /// Admin force-close of a task under review: refund plus a failure
    /// reputation update for the assigned worker.
    pub async fn execute_force_close(&self, task_id: &str) -> Result<Task, SettlementError> {
        let _slot = self.claim_task_slot(task_id).await;

        // Probe before touching the backend: a refund on an illegal
        // transition would move funds the task record still considers held.
        let current = self.store.get_task(task_id).await?;
        let probe = TaskEvent::ForceClose {
            receipt: Receipt {
                reference: String::new(),
                block: 0,
                url: String::new(),
            },
        };
        if let Err(e) = transition(&current, &probe) {
            return Err(SettlementError::Store(StoreError::InvalidTransition(e)));
        }

        let receipt = self.refund_with_retry(task_id).await?;
        let event_receipt = receipt.clone();
        let (task, effects) = self
            .store
            .update_task_transactional(
                task_id,
                Box::new(move |t| {
                    let event = TaskEvent::ForceClose {
                        receipt: event_receipt,
                    };
                    transition(t, &event)
                }),
            )
            .await?;
        self.activity
            .record(
                self.escrow.backend_token(),
                task_id,
                actions::REFUND_PROCESSED,
            )
            .await?;
        self.apply_effects(&task, effects).await?;
        Ok(task)
    }

    /// Execute the synchronous side effects of a transition and queue the
    /// asynchronous ones.
    pub async fn apply_effects(
        &self,
        task: &Task,
        effects: Vec<SideEffect>,
    ) -> Result<(), StoreError> {
        for effect in effects {
            match effect {
                SideEffect::SetPostingStatus(status) => {
                    if let Some(posting) = self.store.find_posting_by_task(&task.id).await? {
                        self.store.update_posting_status(&posting.id, status).await?;
                    }
                }
                SideEffect::EnqueueSettlement => {
                    self.enqueue(&task.id, SettlementAction::Settle).await?;
                }
                SideEffect::EnqueueReputation { worker_id, success } => {
                    self.enqueue(
                        &task.id,
                        SettlementAction::UpdateReputation { worker_id, success },
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn update_reputation(
        &self,
        worker_id: &str,
        success: bool,
    ) -> Result<(), SettlementError> {
        let agent = self
            .store
            .update_agent(
                worker_id,
                Box::new(move |a| a.apply_settlement_outcome(success)),
            )
            .await?;
        debug!(
            "reputation for {} now {} ({} completed / {} failed)",
            agent.handle, agent.reputation, agent.tasks_completed, agent.tasks_failed
        );

        let node = match &agent.identity_node {
            Some(node) => NodeRef(node.clone()),
            None => {
                debug!("agent {} has no identity node; skipping attribute sync", agent.handle);
                return Ok(());
            }
        };

        // Identity failure is non-fatal: bounded retries, then log and move on.
        let attributes = reputation_attributes(&agent);
        for attempt in 1..=self.config.identity_retry_max {
            match identity::with_deadline(
                self.config.identity_deadline,
                self.identity.update_attributes(&node, &attributes),
            )
            .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.config.identity_retry_max => {
                    warn!(
                        "identity update for {} failed (attempt {attempt}): {e}",
                        agent.handle
                    );
                    sleep(self.config.retry_base).await;
                }
                Err(e) => {
                    warn!(
                        "identity update for {} abandoned after {attempt} attempts: {e}",
                        agent.handle
                    );
                }
            }
        }
        Ok(())
    }

    /// Restart recovery: re-arm persisted jobs, enqueue settlements for tasks
    /// stranded in `settlement`, and confirm custodial deposits that were
    /// interrupted before the transition committed.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let mut restored = 0;

        for job in self.store.pending_settlement_jobs().await? {
            debug!(
                "re-arming persisted settlement job {} for task {}",
                job.action.label(),
                job.task_id
            );
            self.push_local(job);
            restored += 1;
        }

        for task in self.store.list_tasks_by_status(TaskStatus::Settlement).await? {
            if task.escrow_status != EscrowStatus::Held {
                continue;
            }
            if self.has_queued(&task.id, |a| matches!(a, SettlementAction::Settle)) {
                continue;
            }
            info!("recovering stranded settlement for task {}", task.id);
            self.enqueue(&task.id, SettlementAction::Settle).await?;
            restored += 1;
        }

        if self.escrow.is_custodial() {
            for task in self
                .store
                .list_tasks_by_escrow_status(EscrowStatus::Pending)
                .await?
            {
                if task.status != TaskStatus::Open {
                    continue;
                }
                match self.escrow.query(&task.id).await {
                    Ok(state) if !state.released && !state.refunded => {
                        let receipt = Receipt {
                            reference: task_escrow_key_hex(&task.id),
                            block: 0,
                            url: String::new(),
                        };
                        let committed = self
                            .store
                            .update_task_transactional(
                                &task.id,
                                Box::new(move |t| {
                                    transition(t, &TaskEvent::DepositConfirmed { receipt })
                                }),
                            )
                            .await;
                        if committed.is_ok() {
                            self.activity
                                .record(crate::activity::SYSTEM_ACTOR, &task.id, actions::ESCROW_HELD)
                                .await?;
                            info!("recovered pending escrow for task {}", task.id);
                            restored += 1;
                        }
                    }
                    Ok(_) => {}
                    Err(EscrowError::NotFound(_)) => {}
                    Err(e) => warn!("escrow query failed during recovery for {}: {e}", task.id),
                }
            }
        }

        Ok(restored)
    }
}
