// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Task endpoint tests: listing scope, result redaction, work submission,
//! refunds, admin overrides and the activity feed.

use axum::http::StatusCode;
use fabstir_marketplace_node::escrow::EscrowAdapter;
use fabstir_marketplace_node::models::{EscrowStatus, TaskStatus};
use fabstir_marketplace_node::store::Store;
use serde_json::json;

use crate::support::{TestMarket, CREATOR, OTHER_WALLET, WORKER_WALLET};

/// Drive a job to in-progress with one accepted bid; returns
/// `(worker_id, job_id, task_id)`.
async fn assigned_job(market: &TestMarket) -> (String, String, String) {
    let worker = market.register_worker("summariser", WORKER_WALLET).await;
    let (job_id, task_id) = market.create_job("Summarize", 100, CREATOR).await;
    let bid_id = market.place_bid(&job_id, &worker, "summariser").await;
    let (status, _) = market.accept_bid(&job_id, &bid_id, CREATOR).await;
    assert_eq!(status, StatusCode::OK);
    (worker, job_id, task_id)
}

#[tokio::test]
async fn task_listing_requires_and_scopes_by_address() {
    let market = TestMarket::custodial();
    market.create_job("Mine", 100, CREATOR).await;
    market.create_job("Theirs", 100, OTHER_WALLET).await;

    let (status, _) = market.get("/tasks").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, tasks) = market.get(&format!("/tasks?address={CREATOR}")).await;
    assert_eq!(status, StatusCode::OK);
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["title"], "Mine");
}

#[tokio::test]
async fn work_results_are_redacted_for_non_creators() {
    let market = TestMarket::custodial();
    let (worker, _, task_id) = assigned_job(&market).await;
    let (status, _) = market.submit_work(&task_id, &worker).await;
    assert_eq!(status, StatusCode::OK);

    // Creator sees the payload.
    let (_, task) = market.get(&format!("/tasks/{task_id}?address={CREATOR}")).await;
    assert_eq!(task["hasResults"], true);
    assert_eq!(task["workResults"][0]["result"]["summary"], "all done");

    // Anyone else gets the boolean only.
    let (_, task) = market
        .get(&format!("/tasks/{task_id}?address={OTHER_WALLET}"))
        .await;
    assert_eq!(task["hasResults"], true);
    assert!(task.get("workResults").is_none());

    // Same without a caller address.
    let (_, task) = market.get(&format!("/tasks/{task_id}")).await;
    assert!(task.get("workResults").is_none());
}

#[tokio::test]
async fn only_assigned_workers_may_submit() {
    let market = TestMarket::custodial();
    let (_, _, task_id) = assigned_job(&market).await;

    let (status, _) = market.submit_work(&task_id, "someone-else").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unassigned_worker_cannot_submit_before_acceptance() {
    let market = TestMarket::custodial();
    let worker = market.register_worker("summariser", WORKER_WALLET).await;
    let (_, task_id) = market.create_job("Summarize", 100, CREATOR).await;

    let (status, _) = market.submit_work(&task_id, &worker).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn refund_authorization_and_escrow_guard() {
    let market = TestMarket::verifying();
    let (job_id, task_id) = market.create_job("Summarize", 100, CREATOR).await;

    // Escrow pending: 400.
    let (status, _) = market
        .post(
            &format!("/tasks/{task_id}/refund"),
            json!({ "callerWallet": CREATOR }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    market.escrow.seed_deposit(&task_id, CREATOR, 100).await;
    market
        .post(
            &format!("/jobboard/{job_id}/confirm-escrow"),
            json!({ "externalRef": "0xdeposit", "depositorWallet": CREATOR }),
        )
        .await;

    // Non-creator: 403.
    let (status, _) = market
        .post(
            &format!("/tasks/{task_id}/refund"),
            json!({ "callerWallet": OTHER_WALLET }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = market
        .post(
            &format!("/tasks/{task_id}/refund"),
            json!({ "callerWallet": CREATOR }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["status"], "reversed");
    assert_eq!(body["task"]["escrowStatus"], "refunded");
    assert!(body["receipt"]["reference"].as_str().is_some());
    assert_eq!(market.count_label(&task_id, "REFUND_PROCESSED").await, 1);
}

#[tokio::test]
async fn refund_while_in_progress_reverses_the_task() {
    let market = TestMarket::custodial();
    let (_, job_id, task_id) = assigned_job(&market).await;

    let (status, body) = market
        .post(
            &format!("/tasks/{task_id}/refund"),
            json!({ "callerWallet": CREATOR }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["status"], "reversed");

    // Posting closed with it.
    let (_, detail) = market.get(&format!("/jobboard/{job_id}")).await;
    assert_eq!(detail["status"], "closed");

    // A second refund attempt is rejected: escrow is no longer held.
    let (status, _) = market
        .post(
            &format!("/tasks/{task_id}/refund"),
            json!({ "callerWallet": CREATOR }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_override_assign_review_force_close() {
    let market = TestMarket::custodial();
    let worker = market.register_worker("summariser", WORKER_WALLET).await;
    let (_, task_id) = market.create_job("Summarize", 100, CREATOR).await;

    // Manual assignment needs an agent id.
    let (status, _) = market
        .patch(
            &format!("/tasks/{task_id}/status"),
            json!({ "status": "in-progress" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, task) = market
        .patch(
            &format!("/tasks/{task_id}/status"),
            json!({ "status": "in-progress", "agentId": worker }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "in-progress");
    assert_eq!(task["assignedAgents"][0], worker);

    let (status, task) = market
        .patch(
            &format!("/tasks/{task_id}/status"),
            json!({ "status": "review" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "review");

    let (status, task) = market
        .patch(
            &format!("/tasks/{task_id}/status"),
            json!({ "status": "reversed" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "reversed");
    assert_eq!(task["escrowStatus"], "refunded");

    let labels = market.activity_labels(&task_id).await;
    assert!(labels.contains(&"STATUS_CHANGED_TO_IN_PROGRESS".to_string()));
    assert!(labels.contains(&"STATUS_CHANGED_TO_REVIEW".to_string()));
    assert!(labels.contains(&"STATUS_CHANGED_TO_REVERSED".to_string()));
    assert!(labels.contains(&"REFUND_PROCESSED".to_string()));

    // The failure reputation lands once the dispatcher drains.
    market.settle_now().await;
    let agent = market.state.store.get_agent(&worker).await.unwrap();
    assert_eq!(agent.reputation, 45);
    assert_eq!(agent.tasks_failed, 1);
}

#[tokio::test]
async fn force_close_outside_review_leaves_escrow_untouched() {
    let market = TestMarket::custodial();
    let (_, _, task_id) = assigned_job(&market).await;

    // In-progress is not force-closable; the backend must not refund.
    let (status, _) = market
        .patch(
            &format!("/tasks/{task_id}/status"),
            json!({ "status": "reversed" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let task = market.state.store.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.escrow_status, EscrowStatus::Held);

    let escrow_state = market.escrow.query(&task_id).await.unwrap();
    assert!(!escrow_state.refunded);
    assert!(!escrow_state.released);
}

#[tokio::test]
async fn completed_status_cannot_be_forced() {
    let market = TestMarket::custodial();
    let (_, task_id) = market.create_job("Summarize", 100, CREATOR).await;
    let (status, _) = market
        .patch(
            &format!("/tasks/{task_id}/status"),
            json!({ "status": "completed" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn activity_feed_is_scoped_and_newest_first() {
    let market = TestMarket::custodial();
    let (_, task_id) = market.create_job("Mine", 100, CREATOR).await;
    market.create_job("Theirs", 100, OTHER_WALLET).await;

    let (status, _) = market.get("/tasks/activity/feed").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, feed) = market
        .get(&format!("/tasks/activity/feed?address={CREATOR}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let entries = feed.as_array().unwrap();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| e["taskId"] == task_id.as_str()));

    let mut prev: Option<chrono::DateTime<chrono::Utc>> = None;
    for entry in entries {
        let ts = entry["timestamp"]
            .as_str()
            .unwrap()
            .parse::<chrono::DateTime<chrono::Utc>>()
            .unwrap();
        if let Some(prev) = prev {
            assert!(ts <= prev, "feed must be newest first");
        }
        prev = Some(ts);
    }
}
