// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Shared test harness: a fully simulated marketplace driven through the
//! router, plus direct handles on the store and adapters for assertions.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use fabstir_marketplace_node::api::{create_app, AppState};
use fabstir_marketplace_node::escrow::SimulatedEscrow;
use fabstir_marketplace_node::identity::SimulatedIdentity;
use fabstir_marketplace_node::store::Store;

pub const CREATOR: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const OTHER_WALLET: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const WORKER_WALLET: &str = "0x1111111111111111111111111111111111111111";

pub struct TestMarket {
    pub app: Router,
    pub state: AppState,
    pub escrow: SimulatedEscrow,
    pub identity: SimulatedIdentity,
}

impl TestMarket {
    /// Custodial escrow: job creation deposits and holds immediately.
    pub fn custodial() -> Self {
        let (state, escrow, identity) = AppState::simulated();
        Self {
            app: create_app(state.clone()),
            state,
            escrow,
            identity,
        }
    }

    /// Verifying escrow: deposits are seeded out of band and attested via
    /// `confirm-escrow`.
    pub fn verifying() -> Self {
        let (state, escrow, identity) = AppState::simulated_verifying();
        Self {
            app: create_app(state.clone()),
            state,
            escrow,
            identity,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, Some(body)).await
    }

    /// Register a worker agent, returning its id.
    pub async fn register_worker(&self, handle: &str, wallet: &str) -> String {
        let (status, body) = self
            .post(
                "/agents",
                json!({
                    "handle": handle,
                    "wallet": wallet,
                    "role": "worker",
                    "skills": ["text-summarization"],
                    "maxLiability": 500,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "agent upsert failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    /// Create a job, returning `(job_id, task_id)`.
    pub async fn create_job(&self, title: &str, budget: u64, creator: &str) -> (String, String) {
        let (status, body) = self
            .post(
                "/jobboard",
                json!({
                    "title": title,
                    "description": "test job",
                    "budget": budget,
                    "requiredSkills": ["text-summarization"],
                    "creatorWallet": creator,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "job creation failed: {body}");
        (
            body["posting"]["id"].as_str().unwrap().to_string(),
            body["task"]["id"].as_str().unwrap().to_string(),
        )
    }

    pub async fn place_bid(&self, job_id: &str, worker_id: &str, handle: &str) -> String {
        let (status, body) = self
            .post(
                &format!("/jobboard/{job_id}/bid"),
                json!({
                    "workerId": worker_id,
                    "workerHandle": handle,
                    "message": "I can do this",
                    "relevanceScore": 80,
                    "estimatedTime": "1h",
                    "proposedAmount": 80,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "bid failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn accept_bid(&self, job_id: &str, bid_id: &str, caller: &str) -> (StatusCode, Value) {
        self.post(
            &format!("/jobboard/{job_id}/accept"),
            json!({ "bidId": bid_id, "callerWallet": caller }),
        )
        .await
    }

    pub async fn submit_work(&self, task_id: &str, worker_id: &str) -> (StatusCode, Value) {
        self.post(
            &format!("/tasks/{task_id}/work"),
            json!({ "workerId": worker_id, "result": { "summary": "all done" } }),
        )
        .await
    }

    /// Drain the settlement queue inline.
    pub async fn settle_now(&self) {
        self.state.dispatcher.run_until_idle().await;
    }

    pub async fn activity_labels(&self, task_id: &str) -> Vec<String> {
        self.state
            .store
            .list_activity_by_tasks(&[task_id.to_string()], 100)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.action)
            .collect()
    }

    pub async fn count_label(&self, task_id: &str, label: &str) -> usize {
        self.activity_labels(task_id)
            .await
            .iter()
            .filter(|a| a.as_str() == label)
            .count()
    }
}
