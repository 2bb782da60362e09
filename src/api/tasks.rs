// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Task endpoints: creator-scoped listings, result submission, refunds, the
//! admin status override and the activity feed.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ApiError;
use super::server::AppState;
use crate::activity::{actions, SYSTEM_ACTOR};
use crate::models::{
    canonical_wallet, wallets_equal, Activity, EscrowStatus, Receipt, Task, TaskStatus,
    WorkResult,
};
use crate::state_machine::{transition, TaskEvent};

/// Feed length for `GET /tasks/activity/feed`.
const ACTIVITY_FEED_LIMIT: usize = 30;

#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    pub address: Option<String>,
}

/// Task as served to clients. Work results are visible only to the creator;
/// everyone else gets a boolean.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub budget: u64,
    pub status: TaskStatus,
    pub creator: String,
    pub assigned_agents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_results: Option<Vec<WorkResult>>,
    pub has_results: bool,
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

impl TaskView {
    pub fn from_task(task: Task, include_results: bool) -> Self {
        let has_results = !task.work_results.is_empty();
        Self {
            id: task.id,
            title: task.title,
            description: task.description,
            budget: task.budget,
            status: task.status,
            creator: task.creator,
            assigned_agents: task.assigned_agents,
            work_results: include_results.then_some(task.work_results),
            has_results,
            escrow_amount: task.escrow_amount,
            escrow_status: task.escrow_status,
            escrow_receipt: task.escrow_receipt,
            settlement_ref: task.settlement_ref,
            settled_at: task.settled_at,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Creator's tasks. The address is required; listings are never global.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<Vec<TaskView>>, ApiError> {
    let address = query
        .address
        .ok_or_else(|| ApiError::Validation("address query parameter is required".to_string()))?;
    let wallet = canonical_wallet(&address)?;
    let tasks = state.store.list_tasks_by_creator(&wallet).await?;
    Ok(Json(
        tasks
            .into_iter()
            .map(|t| TaskView::from_task(t, true))
            .collect(),
    ))
}

pub async fn task_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<TaskView>, ApiError> {
    let task = state.store.get_task(&id).await?;
    let is_creator = match query.address {
        Some(address) => wallets_equal(&address, &task.creator),
        None => false,
    };
    Ok(Json(TaskView::from_task(task, is_creator)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideStatusRequest {
    pub status: TaskStatus,
    pub agent_id: Option<String>,
}

/// Admin status override. Three moves are recognized: manual assignment
/// (open -> in-progress with an agent), dispute hold (in-progress -> review)
/// and force-close (review -> reversed, refunding escrow and recording a
/// failure for the assigned worker).
pub async fn override_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<OverrideStatusRequest>,
) -> Result<Json<TaskView>, ApiError> {
    let task = match req.status {
        TaskStatus::InProgress => {
            let worker_id = req.agent_id.ok_or_else(|| {
                ApiError::Validation("agentId is required to assign a task".to_string())
            })?;
            state.store.get_agent(&worker_id).await?;
            let (task, effects) = state
                .store
                .update_task_transactional(
                    &id,
                    Box::new(move |t| transition(t, &TaskEvent::AssignOverride { worker_id })),
                )
                .await?;
            state.dispatcher.apply_effects(&task, effects).await?;
            task
        }
        TaskStatus::Review => {
            let (task, effects) = state
                .store
                .update_task_transactional(
                    &id,
                    Box::new(|t| transition(t, &TaskEvent::ReviewOverride)),
                )
                .await?;
            state.dispatcher.apply_effects(&task, effects).await?;
            task
        }
        TaskStatus::Reversed => state.dispatcher.execute_force_close(&id).await?,
        other => {
            return Err(ApiError::Validation(format!(
                "status {other} cannot be set by override"
            )));
        }
    };

    state
        .activity
        .record(SYSTEM_ACTOR, &id, actions::status_changed(task.status))
        .await?;
    Ok(Json(TaskView::from_task(task, true)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitWorkRequest {
    pub worker_id: String,
    pub result: serde_json::Value,
}

/// Assigned worker submits a result; the task enters settlement and the
/// dispatcher takes over. Resubmission by the same worker is a no-op, so a
/// retried request cannot double-settle.
pub async fn submit_work(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SubmitWorkRequest>,
) -> Result<Json<TaskView>, ApiError> {
    let task = state.store.get_task(&id).await?;
    if !task.assigned_agents.iter().any(|w| w == &req.worker_id) {
        return Err(ApiError::Authorization(
            "worker is not assigned to this task".to_string(),
        ));
    }

    if task.has_result_from(&req.worker_id) && task.status != TaskStatus::InProgress {
        return Ok(Json(TaskView::from_task(task, false)));
    }

    let event = TaskEvent::SubmitWork {
        worker_id: req.worker_id.clone(),
        result: req.result,
    };
    let (task, effects) = state
        .store
        .update_task_transactional(&id, Box::new(move |t| transition(t, &event)))
        .await?;
    state
        .activity
        .record(&req.worker_id, &id, actions::WORK_SUBMITTED)
        .await?;
    state.dispatcher.apply_effects(&task, effects).await?;

    Ok(Json(TaskView::from_task(task, false)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub caller_wallet: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub task: TaskView,
    pub receipt: Receipt,
}

/// Creator-requested refund. Escrow must be held; the call is awaited so a
/// backend failure bubbles to the creator, who retries.
pub async fn refund_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, ApiError> {
    let caller = canonical_wallet(&req.caller_wallet)?;
    let task = state.store.get_task(&id).await?;

    if !wallets_equal(&caller, &task.creator) {
        return Err(ApiError::Authorization(
            "only the task creator may request a refund".to_string(),
        ));
    }
    if task.escrow_status != EscrowStatus::Held {
        return Err(ApiError::Validation(format!(
            "escrow is {} for task {}; only held escrow can be refunded",
            task.escrow_status, task.id
        )));
    }

    let (task, receipt) = state.dispatcher.execute_refund(&id, &caller).await?;
    Ok(Json(RefundResponse {
        task: TaskView::from_task(task, true),
        receipt,
    }))
}

/// Creator's activity feed: newest entries across their tasks.
pub async fn activity_feed(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<Vec<Activity>>, ApiError> {
    let address = query
        .address
        .ok_or_else(|| ApiError::Validation("address query parameter is required".to_string()))?;
    let wallet = canonical_wallet(&address)?;

    let task_ids: Vec<String> = state
        .store
        .list_tasks_by_creator(&wallet)
        .await?
        .into_iter()
        .map(|t| t.id)
        .collect();
    let entries = state
        .store
        .list_activity_by_tasks(&task_ids, ACTIVITY_FEED_LIMIT)
        .await?;
    Ok(Json(entries))
}
