// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Dispatcher tests: settlement, retry behavior, reputation updates and the
//! failure path into review.

use axum::http::StatusCode;
use fabstir_marketplace_node::escrow::EscrowAdapter;
use fabstir_marketplace_node::identity::IdentityAdapter;
use fabstir_marketplace_node::store::Store;
use serde_json::json;

use crate::support::{TestMarket, CREATOR, WORKER_WALLET};

/// Drive a job to the settlement queue; returns `(worker_id, task_id)`.
async fn submitted_job(market: &TestMarket) -> (String, String) {
    let worker = market.register_worker("summariser", WORKER_WALLET).await;
    let (job_id, task_id) = market.create_job("Summarize", 100, CREATOR).await;
    let bid_id = market.place_bid(&job_id, &worker, "summariser").await;
    let (status, _) = market.accept_bid(&job_id, &bid_id, CREATOR).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = market.submit_work(&task_id, &worker).await;
    assert_eq!(status, StatusCode::OK);
    (worker, task_id)
}

#[tokio::test]
async fn settlement_releases_escrow_and_updates_reputation() {
    let market = TestMarket::custodial();
    let (worker, task_id) = submitted_job(&market).await;

    // Committed into settlement before the dispatcher runs.
    let (_, task) = market.get(&format!("/tasks/{task_id}?address={CREATOR}")).await;
    assert_eq!(task["status"], "settlement");
    assert_eq!(task["escrowStatus"], "held");

    market.settle_now().await;

    let (_, task) = market.get(&format!("/tasks/{task_id}?address={CREATOR}")).await;
    assert_eq!(task["status"], "completed");
    assert_eq!(task["escrowStatus"], "released");
    assert!(task["settlementRef"]["reference"].as_str().is_some());
    assert!(task["settledAt"].as_str().is_some());

    assert_eq!(market.count_label(&task_id, "WORK_SUBMITTED").await, 1);
    assert_eq!(market.count_label(&task_id, "PAYMENT_SETTLED").await, 1);

    // Reputation: +2 on success, counters bumped, identity attributes synced.
    let agent = market.state.store.get_agent(&worker).await.unwrap();
    assert_eq!(agent.reputation, 52);
    assert_eq!(agent.tasks_completed, 1);
    assert_eq!(agent.tasks_failed, 0);

    let record = market.identity.lookup("summariser").await.unwrap();
    assert_eq!(record.attributes.get("reputation").map(String::as_str), Some("52"));
    assert_eq!(
        record.attributes.get("tasksCompleted").map(String::as_str),
        Some("1")
    );

    // Escrow actually released on the backend.
    let escrow_state = market.escrow.query(&task_id).await.unwrap();
    assert!(escrow_state.released);
    assert!(!escrow_state.refunded);
}

#[tokio::test]
async fn flapping_backend_settles_exactly_once() {
    let market = TestMarket::custodial();
    let (_, task_id) = submitted_job(&market).await;

    // Three transient faults, then success (retry budget is five).
    market.escrow.inject_unavailable(3).await;
    market.settle_now().await;

    let (_, task) = market.get(&format!("/tasks/{task_id}?address={CREATOR}")).await;
    assert_eq!(task["status"], "completed");
    assert_eq!(market.count_label(&task_id, "PAYMENT_SETTLED").await, 1);
    assert_eq!(market.count_label(&task_id, "SETTLEMENT_FAILED").await, 0);
}

#[tokio::test]
async fn exhausted_retries_park_the_task_in_review() {
    let market = TestMarket::custodial();
    let (worker, task_id) = submitted_job(&market).await;

    // Five faults exhaust the default retry budget.
    market.escrow.inject_unavailable(5).await;
    market.settle_now().await;

    let (_, task) = market.get(&format!("/tasks/{task_id}?address={CREATOR}")).await;
    assert_eq!(task["status"], "review");
    assert_eq!(task["escrowStatus"], "held");
    assert_eq!(market.count_label(&task_id, "SETTLEMENT_FAILED").await, 1);
    assert_eq!(market.count_label(&task_id, "PAYMENT_SETTLED").await, 0);

    // No reputation movement on the failure path.
    let agent = market.state.store.get_agent(&worker).await.unwrap();
    assert_eq!(agent.reputation, 50);

    // Manual force-close refunds and records the failure.
    let (status, task) = market
        .patch(
            &format!("/tasks/{task_id}/status"),
            json!({ "status": "reversed" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["escrowStatus"], "refunded");

    market.settle_now().await;
    let agent = market.state.store.get_agent(&worker).await.unwrap();
    assert_eq!(agent.reputation, 45);
    assert_eq!(agent.tasks_failed, 1);
}

#[tokio::test]
async fn repeated_work_submission_settles_at_most_once() {
    let market = TestMarket::custodial();
    let (worker, task_id) = submitted_job(&market).await;

    // Identical resubmission while queued: no-op.
    let (status, _) = market.submit_work(&task_id, &worker).await;
    assert_eq!(status, StatusCode::OK);

    market.settle_now().await;

    // And again after completion.
    let (status, _) = market.submit_work(&task_id, &worker).await;
    assert_eq!(status, StatusCode::OK);
    market.settle_now().await;

    assert_eq!(market.count_label(&task_id, "PAYMENT_SETTLED").await, 1);

    let agent = market.state.store.get_agent(&worker).await.unwrap();
    assert_eq!(agent.tasks_completed, 1);
}

#[tokio::test]
async fn identity_outage_does_not_block_settlement() {
    let market = TestMarket::custodial();
    let (worker, task_id) = submitted_job(&market).await;

    // All identity attempts fail; settlement still completes.
    market.identity.inject_unavailable(10).await;
    market.settle_now().await;

    let (_, task) = market.get(&format!("/tasks/{task_id}?address={CREATOR}")).await;
    assert_eq!(task["status"], "completed");

    let agent = market.state.store.get_agent(&worker).await.unwrap();
    assert_eq!(agent.reputation, 52);
}

#[tokio::test]
async fn refund_failure_bubbles_and_can_be_retried() {
    let market = TestMarket::custodial();
    let (_, task_id) = market.create_job("Summarize", 100, CREATOR).await;

    // Refund retries are exhausted and the failure reaches the caller.
    market.escrow.inject_unavailable(5).await;
    let (status, body) = market
        .post(
            &format!("/tasks/{task_id}/refund"),
            json!({ "callerWallet": CREATOR }),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().is_some());

    // The task is untouched; the creator retries and succeeds.
    let (_, task) = market.get(&format!("/tasks/{task_id}?address={CREATOR}")).await;
    assert_eq!(task["status"], "open");
    assert_eq!(task["escrowStatus"], "held");

    let (status, _) = market
        .post(
            &format!("/tasks/{task_id}/refund"),
            json!({ "callerWallet": CREATOR }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(market.count_label(&task_id, "REFUND_PROCESSED").await, 1);
}
