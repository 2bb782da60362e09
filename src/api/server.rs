// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! HTTP surface of the coordinator.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use super::{agents, jobboard, tasks};
use crate::activity::ActivityRecorder;
use crate::escrow::{EscrowAdapter, SimulatedEscrow};
use crate::identity::{IdentityAdapter, SimulatedIdentity};
use crate::settlement::{DispatcherConfig, SettlementDispatcher};
use crate::store::{MemoryStore, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub escrow: Arc<dyn EscrowAdapter>,
    pub identity: Arc<dyn IdentityAdapter>,
    pub dispatcher: Arc<SettlementDispatcher>,
    pub activity: ActivityRecorder,
    pub escrow_deadline: Duration,
    pub identity_deadline: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        escrow: Arc<dyn EscrowAdapter>,
        identity: Arc<dyn IdentityAdapter>,
        dispatcher: Arc<SettlementDispatcher>,
        escrow_deadline: Duration,
        identity_deadline: Duration,
    ) -> Self {
        Self {
            activity: ActivityRecorder::new(Arc::clone(&store)),
            store,
            escrow,
            identity,
            dispatcher,
            escrow_deadline,
            identity_deadline,
        }
    }

    fn simulated_with(escrow: SimulatedEscrow) -> (Self, SimulatedEscrow, SimulatedIdentity) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let identity = SimulatedIdentity::new();

        let escrow_dyn: Arc<dyn EscrowAdapter> = Arc::new(escrow.clone());
        let identity_dyn: Arc<dyn IdentityAdapter> = Arc::new(identity.clone());
        let dispatcher = Arc::new(SettlementDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&escrow_dyn),
            Arc::clone(&identity_dyn),
            DispatcherConfig {
                retry_base: Duration::from_millis(5),
                retry_cap: Duration::from_millis(50),
                ..Default::default()
            },
        ));

        let state = Self::new(
            store,
            escrow_dyn,
            identity_dyn,
            dispatcher,
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        (state, escrow, identity)
    }

    /// Fully simulated state: in-memory store, custodial simulated escrow and
    /// simulated identity. Returned adapter handles share state with the app.
    pub fn simulated() -> (Self, SimulatedEscrow, SimulatedIdentity) {
        Self::simulated_with(SimulatedEscrow::new())
    }

    /// Same, but with the verifying escrow shape: deposits must be seeded on
    /// the simulator and attested through `confirm-escrow`.
    pub fn simulated_verifying() -> (Self, SimulatedEscrow, SimulatedIdentity) {
        Self::simulated_with(SimulatedEscrow::verifying())
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/agents", get(agents::list_agents).post(agents::create_agent))
        .route("/agents/:id", patch(agents::patch_agent))
        .route(
            "/jobboard",
            get(jobboard::list_jobboard).post(jobboard::create_job),
        )
        .route("/jobboard/:id", get(jobboard::posting_detail))
        .route("/jobboard/:id/confirm-escrow", post(jobboard::confirm_escrow))
        .route("/jobboard/:id/bid", post(jobboard::submit_bid))
        .route("/jobboard/:id/accept", post(jobboard::accept_bid))
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/activity/feed", get(tasks::activity_feed))
        .route("/tasks/:id", get(tasks::task_detail))
        .route("/tasks/:id/status", patch(tasks::override_status))
        .route("/tasks/:id/work", post(tasks::submit_work))
        .route("/tasks/:id/refund", post(tasks::refund_task))
        .route("/identity/lookup/:handle", get(agents::lookup_identity))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health_handler(State(_state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
    }))
}

pub async fn start_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("marketplace coordinator listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
