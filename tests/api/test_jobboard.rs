// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Job board tests: posting lifecycle, escrow confirmation, bidding and bid
//! acceptance authorization and conflicts.

use axum::http::StatusCode;
use serde_json::json;

use crate::support::{TestMarket, CREATOR, OTHER_WALLET, WORKER_WALLET};

#[tokio::test]
async fn zero_budget_is_rejected() {
    let market = TestMarket::custodial();
    let (status, body) = market
        .post(
            "/jobboard",
            json!({ "title": "Summarize", "budget": 0, "creatorWallet": CREATOR }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("budget"));
}

#[tokio::test]
async fn custodial_create_holds_escrow_immediately() {
    let market = TestMarket::custodial();
    let (_, task_id) = market.create_job("Summarize", 100, CREATOR).await;

    let (_, task) = market.get(&format!("/tasks/{task_id}?address={CREATOR}")).await;
    assert_eq!(task["status"], "open");
    assert_eq!(task["escrowStatus"], "held");
    assert!(task["escrowReceipt"]["reference"].as_str().is_some());

    let labels = market.activity_labels(&task_id).await;
    assert!(labels.contains(&"TASK_CREATED".to_string()));
    assert!(labels.contains(&"ESCROW_HELD".to_string()));
}

#[tokio::test]
async fn verifying_create_stays_pending_until_confirmed() {
    let market = TestMarket::verifying();
    let (job_id, task_id) = market.create_job("Summarize", 100, CREATOR).await;

    let (_, task) = market.get(&format!("/tasks/{task_id}?address={CREATOR}")).await;
    assert_eq!(task["escrowStatus"], "pending");

    // No deposit on the backend yet.
    let (status, _) = market
        .post(
            &format!("/jobboard/{job_id}/confirm-escrow"),
            json!({ "externalRef": "0xdeposit", "depositorWallet": CREATOR }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    market.escrow.seed_deposit(&task_id, CREATOR, 100).await;
    let (status, task) = market
        .post(
            &format!("/jobboard/{job_id}/confirm-escrow"),
            json!({ "externalRef": "0xdeposit", "depositorWallet": CREATOR }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["escrowStatus"], "held");
    assert_eq!(task["escrowReceipt"]["reference"], "0xdeposit");
    assert_eq!(market.count_label(&task_id, "ESCROW_HELD").await, 1);
}

#[tokio::test]
async fn confirm_escrow_rejects_mismatches() {
    let market = TestMarket::verifying();
    let (job_id, task_id) = market.create_job("Summarize", 100, CREATOR).await;

    // Wrong amount on the backend.
    market.escrow.seed_deposit(&task_id, CREATOR, 60).await;
    let (status, body) = market
        .post(
            &format!("/jobboard/{job_id}/confirm-escrow"),
            json!({ "externalRef": "0xdeposit", "depositorWallet": CREATOR }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("amount"));

    // Right amount, wrong depositor.
    market.escrow.seed_deposit(&task_id, OTHER_WALLET, 100).await;
    let (status, body) = market
        .post(
            &format!("/jobboard/{job_id}/confirm-escrow"),
            json!({ "externalRef": "0xdeposit", "depositorWallet": CREATOR }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("depositor"));
}

#[tokio::test]
async fn jobboard_is_world_readable_with_bids_and_escrow() {
    let market = TestMarket::custodial();
    let worker = market.register_worker("summariser", WORKER_WALLET).await;
    let (job_id, _) = market.create_job("Summarize", 100, CREATOR).await;
    market.place_bid(&job_id, &worker, "summariser").await;

    let (status, board) = market.get("/jobboard").await;
    assert_eq!(status, StatusCode::OK);
    let entries = board.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["creator"], CREATOR);
    assert_eq!(entries[0]["escrowStatus"], "held");
    assert_eq!(entries[0]["bids"].as_array().unwrap().len(), 1);

    let (status, detail) = market.get(&format!("/jobboard/{job_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["bids"][0]["relevanceScore"], 80);
}

#[tokio::test]
async fn bid_validation_and_activity() {
    let market = TestMarket::custodial();
    let worker = market.register_worker("summariser", WORKER_WALLET).await;
    let (job_id, task_id) = market.create_job("Summarize", 100, CREATOR).await;

    let (status, _) = market
        .post(
            &format!("/jobboard/{job_id}/bid"),
            json!({
                "workerId": worker,
                "workerHandle": "summariser",
                "relevanceScore": 101,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unregistered worker cannot bid.
    let (status, _) = market
        .post(
            &format!("/jobboard/{job_id}/bid"),
            json!({
                "workerId": "ghost",
                "workerHandle": "ghost",
                "relevanceScore": 10,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    market.place_bid(&job_id, &worker, "summariser").await;
    assert_eq!(market.count_label(&task_id, "BID_SUBMITTED").await, 1);
}

#[tokio::test]
async fn accept_requires_the_creator_wallet() {
    let market = TestMarket::custodial();
    let worker = market.register_worker("summariser", WORKER_WALLET).await;
    let (job_id, task_id) = market.create_job("Summarize", 100, CREATOR).await;
    let bid_id = market.place_bid(&job_id, &worker, "summariser").await;

    let (status, _) = market.accept_bid(&job_id, &bid_id, OTHER_WALLET).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Task unchanged.
    let (_, task) = market.get(&format!("/tasks/{task_id}?address={CREATOR}")).await;
    assert_eq!(task["status"], "open");

    // Creator wallet matches case-insensitively.
    let caller = CREATOR.to_uppercase().replace("0X", "0x");
    let (status, body) = market.accept_bid(&job_id, &bid_id, &caller).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["status"], "in-progress");
    assert_eq!(body["bid"]["accepted"], true);

    let (_, board) = market.get(&format!("/jobboard/{job_id}")).await;
    assert_eq!(board["status"], "assigned");
    assert_eq!(market.count_label(&task_id, "BID_ACCEPTED").await, 1);
}

#[tokio::test]
async fn second_accept_sees_conflict() {
    let market = TestMarket::custodial();
    let worker_a = market.register_worker("summariser", WORKER_WALLET).await;
    let worker_b = market.register_worker("translator", OTHER_WALLET).await;
    let (job_id, _) = market.create_job("Summarize", 100, CREATOR).await;
    let bid_a = market.place_bid(&job_id, &worker_a, "summariser").await;
    let bid_b = market.place_bid(&job_id, &worker_b, "translator").await;

    let (status, _) = market.accept_bid(&job_id, &bid_a, CREATOR).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = market.accept_bid(&job_id, &bid_b, CREATOR).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Exactly one accepted bid, and bids on assigned jobs are refused.
    let (_, detail) = market.get(&format!("/jobboard/{job_id}")).await;
    let accepted: Vec<_> = detail["bids"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|b| b["accepted"] == true)
        .collect();
    assert_eq!(accepted.len(), 1);

    let (status, _) = market
        .post(
            &format!("/jobboard/{job_id}/bid"),
            json!({
                "workerId": worker_b,
                "workerHandle": "translator",
                "relevanceScore": 50,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn accept_requires_held_escrow() {
    let market = TestMarket::verifying();
    let worker = market.register_worker("summariser", WORKER_WALLET).await;
    let (job_id, _) = market.create_job("Summarize", 100, CREATOR).await;
    let bid_id = market.place_bid(&job_id, &worker, "summariser").await;

    // Escrow still pending: the transition is illegal and the bid stays
    // unaccepted.
    let (status, _) = market.accept_bid(&job_id, &bid_id, CREATOR).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, detail) = market.get(&format!("/jobboard/{job_id}")).await;
    assert_eq!(detail["bids"][0]["accepted"], false);
}
