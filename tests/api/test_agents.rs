// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Agent endpoint tests: upsert idempotency, identity registration, patching
//! and the identity lookup passthrough.

use axum::http::StatusCode;
use fabstir_marketplace_node::identity::IdentityAdapter;
use serde_json::json;

use crate::support::{TestMarket, WORKER_WALLET};

#[tokio::test]
async fn create_agent_returns_defaults() {
    let market = TestMarket::custodial();
    let (status, body) = market
        .post(
            "/agents",
            json!({
                "handle": "summariser",
                "wallet": WORKER_WALLET,
                "role": "worker",
                "skills": ["text-summarization"],
                "maxLiability": 500,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["handle"], "summariser");
    assert_eq!(body["reputation"], 50);
    assert_eq!(body["tasksCompleted"], 0);
    assert_eq!(body["tasksFailed"], 0);
    assert_eq!(body["identityRegistered"], true);
    assert!(body["identityNode"].as_str().is_some());
}

#[tokio::test]
async fn upsert_same_handle_reuses_agent_and_registers_once() {
    let market = TestMarket::custodial();
    let first = market.register_worker("summariser", WORKER_WALLET).await;
    let second = market.register_worker("summariser", WORKER_WALLET).await;

    assert_eq!(first, second);
    assert_eq!(market.identity.registered_count().await, 1);

    let (_, agents) = market.get("/agents").await;
    assert_eq!(agents.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn identity_outage_defers_registration() {
    let market = TestMarket::custodial();
    market.identity.inject_unavailable(1).await;

    let (status, body) = market
        .post(
            "/agents",
            json!({ "handle": "summariser", "wallet": WORKER_WALLET }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["identityRegistered"], false);
    assert_eq!(market.identity.registered_count().await, 0);

    // The next upsert completes the registration.
    let (_, body) = market
        .post(
            "/agents",
            json!({ "handle": "summariser", "wallet": WORKER_WALLET }),
        )
        .await;
    assert_eq!(body["identityRegistered"], true);
    assert_eq!(market.identity.registered_count().await, 1);
}

#[tokio::test]
async fn invalid_wallet_is_rejected() {
    let market = TestMarket::custodial();
    let (status, body) = market
        .post("/agents", json!({ "handle": "x", "wallet": "not-a-wallet" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("wallet"));
}

#[tokio::test]
async fn unknown_attribute_keys_reach_the_identity_record() {
    let market = TestMarket::custodial();
    let (status, _) = market
        .post(
            "/agents",
            json!({
                "handle": "summariser",
                "wallet": WORKER_WALLET,
                "customKey": "custom-value",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let record = market.identity.lookup("summariser").await.unwrap();
    assert_eq!(
        record.attributes.get("customKey").map(String::as_str),
        Some("custom-value")
    );
}

#[tokio::test]
async fn patch_agent_mutates_fields() {
    let market = TestMarket::custodial();
    let id = market.register_worker("summariser", WORKER_WALLET).await;

    let (status, body) = market
        .patch(
            &format!("/agents/{id}"),
            json!({ "active": false, "role": "reviewer" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);
    assert_eq!(body["role"], "reviewer");
}

#[tokio::test]
async fn patch_unknown_agent_is_404() {
    let market = TestMarket::custodial();
    let (status, _) = market
        .patch("/agents/missing-id", json!({ "active": false }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn identity_lookup_passthrough() {
    let market = TestMarket::custodial();
    market.register_worker("summariser", WORKER_WALLET).await;

    let (status, body) = market.get("/identity/lookup/summariser").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attributes"]["role"], "worker");
    assert_eq!(body["attributes"]["skills"], "text-summarization");

    let (status, _) = market.get("/identity/lookup/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
