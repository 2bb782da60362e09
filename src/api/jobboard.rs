// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Job board endpoints: posting creation, escrow confirmation, bidding and
//! bid acceptance.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::errors::ApiError;
use super::server::AppState;
use crate::activity::{actions, SYSTEM_ACTOR};
use crate::escrow;
use crate::models::{
    canonical_wallet, wallets_equal, Bid, EscrowStatus, JobPosting, PostingStatus, Task,
    TaskStatus,
};
use crate::state_machine::{transition, TaskEvent};

/// A posting joined with its bids and the escrow view of its task.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobBoardEntry {
    #[serde(flatten)]
    pub posting: JobPosting,
    pub bids: Vec<Bid>,
    pub task_status: TaskStatus,
    pub escrow_status: EscrowStatus,
}

async fn board_entry(state: &AppState, posting: JobPosting) -> Result<JobBoardEntry, ApiError> {
    let task = state.store.get_task(&posting.task_id).await?;
    let bids = state.store.list_bids_by_job(&posting.id).await?;
    Ok(JobBoardEntry {
        posting,
        bids,
        task_status: task.status,
        escrow_status: task.escrow_status,
    })
}

pub async fn list_jobboard(
    State(state): State<AppState>,
) -> Result<Json<Vec<JobBoardEntry>>, ApiError> {
    let postings = state.store.list_postings().await?;
    let entries = try_join_all(
        postings
            .into_iter()
            .map(|posting| board_entry(&state, posting)),
    )
    .await?;
    Ok(Json(entries))
}

pub async fn posting_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobBoardEntry>, ApiError> {
    let posting = state.store.get_posting(&id).await?;
    Ok(Json(board_entry(&state, posting).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub budget: u64,
    #[serde(default)]
    pub required_skills: Vec<String>,
    pub creator_wallet: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub task: Task,
    pub posting: JobPosting,
}

/// Create a task plus its posting. On custodial escrow backends the deposit
/// happens here and the task comes back with escrow already held; on
/// verifying backends it stays pending until `confirm-escrow`.
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::Validation("title is required".to_string()));
    }
    if req.budget == 0 {
        return Err(ApiError::Validation("budget must be greater than zero".to_string()));
    }
    let creator = canonical_wallet(&req.creator_wallet)?;
    let now = Utc::now();

    let mut task = Task {
        id: Uuid::new_v4().to_string(),
        title: req.title.trim().to_string(),
        description: req.description.clone(),
        budget: req.budget,
        status: TaskStatus::Open,
        creator: creator.clone(),
        assigned_agents: vec![],
        work_results: vec![],
        escrow_amount: req.budget,
        escrow_status: EscrowStatus::Pending,
        escrow_receipt: None,
        settlement_ref: None,
        settled_at: None,
        created_at: now,
        updated_at: now,
    };
    let posting = JobPosting {
        id: Uuid::new_v4().to_string(),
        task_id: task.id.clone(),
        creator: creator.clone(),
        title: task.title.clone(),
        description: req.description,
        budget: req.budget,
        required_skills: req.required_skills,
        status: PostingStatus::Open,
        posted_at: now,
    };

    let task_id = task.id.clone();
    state.store.create_task(task.clone()).await?;
    let posting = state.store.create_posting(posting).await?;
    state
        .activity
        .record(SYSTEM_ACTOR, &task_id, actions::TASK_CREATED)
        .await?;

    if state.escrow.is_custodial() {
        match escrow::with_deadline(
            state.escrow_deadline,
            state.escrow.deposit(&task_id, req.budget, &creator),
        )
        .await
        {
            Ok(receipt) => {
                let (confirmed, _) = state
                    .store
                    .update_task_transactional(
                        &task_id,
                        Box::new(move |t| {
                            transition(t, &TaskEvent::DepositConfirmed { receipt })
                        }),
                    )
                    .await?;
                state
                    .activity
                    .record(SYSTEM_ACTOR, &task_id, actions::ESCROW_HELD)
                    .await?;
                task = confirmed;
            }
            Err(e) => {
                // The task survives with escrow pending; recovery or a retry
                // can complete the deposit.
                warn!("custodial deposit for task {task_id} failed: {e}");
            }
        }
    }

    Ok((StatusCode::CREATED, Json(CreateJobResponse { task, posting })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmEscrowRequest {
    pub external_ref: String,
    pub depositor_wallet: String,
}

/// Attest a deposit the poster's wallet made directly against the backend.
pub async fn confirm_escrow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ConfirmEscrowRequest>,
) -> Result<Json<Task>, ApiError> {
    let posting = state.store.get_posting(&id).await?;
    let task = state.store.get_task(&posting.task_id).await?;
    let depositor = canonical_wallet(&req.depositor_wallet)?;

    if task.escrow_status != EscrowStatus::Pending {
        return Err(ApiError::Conflict(format!(
            "escrow for task {} is already {}",
            task.id, task.escrow_status
        )));
    }

    let receipt = escrow::with_deadline(
        state.escrow_deadline,
        state.escrow.verify_deposit(
            &task.id,
            &req.external_ref,
            &depositor,
            task.escrow_amount,
        ),
    )
    .await?;

    let (task, _) = state
        .store
        .update_task_transactional(
            &posting.task_id,
            Box::new(move |t| transition(t, &TaskEvent::DepositConfirmed { receipt })),
        )
        .await?;
    state
        .activity
        .record(SYSTEM_ACTOR, &task.id, actions::ESCROW_HELD)
        .await?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBidRequest {
    pub worker_id: String,
    pub worker_handle: String,
    #[serde(default)]
    pub message: String,
    pub relevance_score: u8,
    #[serde(default)]
    pub estimated_time: String,
    #[serde(default)]
    pub proposed_amount: u64,
}

pub async fn submit_bid(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SubmitBidRequest>,
) -> Result<(StatusCode, Json<Bid>), ApiError> {
    if req.relevance_score > 100 {
        return Err(ApiError::Validation(
            "relevanceScore must be between 0 and 100".to_string(),
        ));
    }

    let posting = state.store.get_posting(&id).await?;
    if posting.status != PostingStatus::Open {
        return Err(ApiError::Conflict(format!(
            "job {} is no longer open for bids",
            posting.id
        )));
    }
    // The bidder must be a registered agent.
    state.store.get_agent(&req.worker_id).await?;

    let bid = Bid {
        id: Uuid::new_v4().to_string(),
        job_id: posting.id.clone(),
        worker_id: req.worker_id.clone(),
        worker_handle: req.worker_handle,
        message: req.message,
        relevance_score: req.relevance_score,
        estimated_time: req.estimated_time,
        proposed_amount: req.proposed_amount,
        accepted: false,
        created_at: Utc::now(),
    };
    let bid = state.store.append_bid(bid).await?;
    state
        .activity
        .record(&req.worker_id, &posting.task_id, actions::BID_SUBMITTED)
        .await?;
    Ok((StatusCode::CREATED, Json(bid)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptBidRequest {
    pub bid_id: String,
    pub caller_wallet: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptBidResponse {
    pub task: Task,
    pub bid: Bid,
}

/// Creator accepts a bid. The accepted flag is a compare-and-set: of two
/// concurrent accepts, exactly one wins and the other sees a conflict. Losing
/// bids are rejected implicitly and never mutated.
pub async fn accept_bid(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AcceptBidRequest>,
) -> Result<Json<AcceptBidResponse>, ApiError> {
    let posting = state.store.get_posting(&id).await?;
    let task = state.store.get_task(&posting.task_id).await?;

    let caller = canonical_wallet(&req.caller_wallet)?;
    if !wallets_equal(&caller, &task.creator) {
        return Err(ApiError::Authorization(
            "only the job creator may accept a bid".to_string(),
        ));
    }

    let bid = state.store.get_bid(&req.bid_id).await?;
    if bid.job_id != posting.id {
        return Err(ApiError::Validation(format!(
            "bid {} does not belong to job {}",
            bid.id, posting.id
        )));
    }

    // Dry-run the transition so an illegal accept never flips the CAS flag.
    let event = TaskEvent::AcceptBid {
        worker_id: bid.worker_id.clone(),
    };
    transition(&task, &event)?;

    let bid = state.store.mark_bid_accepted(&bid.id).await?;

    let (task, effects) = state
        .store
        .update_task_transactional(&posting.task_id, Box::new(move |t| transition(t, &event)))
        .await?;
    state.dispatcher.apply_effects(&task, effects).await?;
    state
        .activity
        .record(&bid.worker_id, &task.id, actions::BID_ACCEPTED)
        .await?;

    Ok(Json(AcceptBidResponse { task, bid }))
}
