// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Task transition relation.
//!
//! `transition` is a pure function from `(Task, Event)` to the updated task
//! plus the side effects the caller must execute. It never touches the store
//! or the adapters; handlers commit the returned task through
//! `Store::update_task_transactional` and hand the effects to the dispatcher.

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::models::{
    wallets_equal, EscrowStatus, PostingStatus, Receipt, Task, TaskStatus, WorkResult,
};

#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Escrow deposit recorded or verified; the receipt is stored verbatim.
    DepositConfirmed { receipt: Receipt },
    /// Creator accepted a bid; the winning worker joins the task.
    AcceptBid { worker_id: String },
    /// The assigned worker submitted a result.
    SubmitWork { worker_id: String, result: Value },
    /// Escrow release confirmed by the backend.
    SettlementSucceeded { receipt: Receipt },
    /// Release retries exhausted; the task is parked for manual action.
    SettlementFailed,
    /// Creator-requested refund confirmed by the backend.
    RefundRequested {
        caller_wallet: String,
        receipt: Receipt,
    },
    /// Admin close of a task under review; refund confirmed by the backend.
    ForceClose { receipt: Receipt },
    /// Admin assignment override.
    AssignOverride { worker_id: String },
    /// Admin dispute hold.
    ReviewOverride,
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::DepositConfirmed { .. } => "DepositConfirmed",
            TaskEvent::AcceptBid { .. } => "AcceptBid",
            TaskEvent::SubmitWork { .. } => "SubmitWork",
            TaskEvent::SettlementSucceeded { .. } => "SettlementSucceeded",
            TaskEvent::SettlementFailed => "SettlementFailed",
            TaskEvent::RefundRequested { .. } => "RefundRequested",
            TaskEvent::ForceClose { .. } => "ForceClose",
            TaskEvent::AssignOverride { .. } => "AssignOverride",
            TaskEvent::ReviewOverride => "ReviewOverride",
        }
    }
}

/// Work the caller must carry out after the transition commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    SetPostingStatus(PostingStatus),
    EnqueueSettlement,
    EnqueueReputation { worker_id: String, success: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{event} is not a legal transition while the task is {status}/{escrow}")]
    InvalidTransition {
        event: &'static str,
        status: TaskStatus,
        escrow: EscrowStatus,
    },
    #[error("only the task creator may request a refund")]
    NotCreator,
}

fn rejected(task: &Task, event: &TaskEvent) -> TransitionError {
    TransitionError::InvalidTransition {
        event: event.name(),
        status: task.status,
        escrow: task.escrow_status,
    }
}

/// Apply `event` to `task`. Any event not legal for the current
/// `(status, escrowStatus)` pair is rejected with `InvalidTransition`.
pub fn transition(task: &Task, event: &TaskEvent) -> Result<(Task, Vec<SideEffect>), TransitionError> {
    let mut next = task.clone();
    let mut effects = Vec::new();

    match event {
        TaskEvent::DepositConfirmed { receipt } => {
            if task.status != TaskStatus::Open || task.escrow_status != EscrowStatus::Pending {
                return Err(rejected(task, event));
            }
            next.escrow_status = EscrowStatus::Held;
            next.escrow_receipt = Some(receipt.clone());
        }
        TaskEvent::AcceptBid { worker_id } => {
            if task.status != TaskStatus::Open || task.escrow_status != EscrowStatus::Held {
                return Err(rejected(task, event));
            }
            next.status = TaskStatus::InProgress;
            next.assigned_agents.push(worker_id.clone());
            effects.push(SideEffect::SetPostingStatus(PostingStatus::mirror_of(next.status)));
        }
        TaskEvent::SubmitWork { worker_id, result } => {
            if task.status != TaskStatus::InProgress || task.escrow_status != EscrowStatus::Held {
                return Err(rejected(task, event));
            }
            next.status = TaskStatus::Settlement;
            next.work_results.push(WorkResult {
                worker_id: worker_id.clone(),
                result: result.clone(),
                submitted_at: Utc::now(),
            });
            effects.push(SideEffect::EnqueueSettlement);
        }
        TaskEvent::SettlementSucceeded { receipt } => {
            if task.status != TaskStatus::Settlement || task.escrow_status != EscrowStatus::Held {
                return Err(rejected(task, event));
            }
            next.status = TaskStatus::Completed;
            next.escrow_status = EscrowStatus::Released;
            next.settlement_ref = Some(receipt.clone());
            next.settled_at = Some(Utc::now());
            effects.push(SideEffect::SetPostingStatus(PostingStatus::mirror_of(next.status)));
            if let Some(worker) = task.winning_worker() {
                effects.push(SideEffect::EnqueueReputation {
                    worker_id: worker.to_string(),
                    success: true,
                });
            }
        }
        TaskEvent::SettlementFailed => {
            if task.status != TaskStatus::Settlement || task.escrow_status != EscrowStatus::Held {
                return Err(rejected(task, event));
            }
            next.status = TaskStatus::Review;
        }
        TaskEvent::RefundRequested {
            caller_wallet,
            receipt,
        } => {
            let refundable =
                matches!(task.status, TaskStatus::Open | TaskStatus::InProgress)
                    && task.escrow_status == EscrowStatus::Held;
            if !refundable {
                return Err(rejected(task, event));
            }
            if !wallets_equal(caller_wallet, &task.creator) {
                return Err(TransitionError::NotCreator);
            }
            next.status = TaskStatus::Reversed;
            next.escrow_status = EscrowStatus::Refunded;
            next.settlement_ref = Some(receipt.clone());
            next.settled_at = Some(Utc::now());
            effects.push(SideEffect::SetPostingStatus(PostingStatus::mirror_of(next.status)));
        }
        TaskEvent::ForceClose { receipt } => {
            if task.status != TaskStatus::Review || task.escrow_status != EscrowStatus::Held {
                return Err(rejected(task, event));
            }
            next.status = TaskStatus::Reversed;
            next.escrow_status = EscrowStatus::Refunded;
            next.settlement_ref = Some(receipt.clone());
            next.settled_at = Some(Utc::now());
            effects.push(SideEffect::SetPostingStatus(PostingStatus::mirror_of(next.status)));
            if let Some(worker) = task.winning_worker() {
                effects.push(SideEffect::EnqueueReputation {
                    worker_id: worker.to_string(),
                    success: false,
                });
            }
        }
        TaskEvent::AssignOverride { worker_id } => {
            if task.status != TaskStatus::Open || task.escrow_status != EscrowStatus::Held {
                return Err(rejected(task, event));
            }
            next.status = TaskStatus::InProgress;
            next.assigned_agents.push(worker_id.clone());
            effects.push(SideEffect::SetPostingStatus(PostingStatus::mirror_of(next.status)));
        }
        TaskEvent::ReviewOverride => {
            if task.status != TaskStatus::InProgress || task.escrow_status != EscrowStatus::Held {
                return Err(rejected(task, event));
            }
            next.status = TaskStatus::Review;
        }
    }

    next.updated_at = Utc::now();
    Ok((next, effects))
}
