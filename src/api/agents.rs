// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Worker agent endpoints and the identity passthrough.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

use super::errors::ApiError;
use super::server::AppState;
use crate::identity::{self, agent_attributes, IdentityRecord};
use crate::models::{canonical_wallet, Agent, AgentUpsert};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    pub handle: String,
    pub wallet: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub max_liability: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
    /// Unknown keys pass through to the identity record unchanged.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn stringify(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

pub async fn list_agents(State(state): State<AppState>) -> Result<Json<Vec<Agent>>, ApiError> {
    Ok(Json(state.store.list_agents().await?))
}

/// Upsert a worker by handle. First insert also registers the handle with the
/// identity backend; a registration failure is deferred, not fatal.
pub async fn create_agent(
    State(state): State<AppState>,
    Json(req): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<Agent>), ApiError> {
    let handle = req.handle.trim().to_string();
    if handle.is_empty() {
        return Err(ApiError::Validation("handle is required".to_string()));
    }
    let wallet = canonical_wallet(&req.wallet)?;

    let extra_attributes: HashMap<String, String> = req
        .extra
        .into_iter()
        .map(|(key, value)| (key, stringify(value)))
        .collect();

    let mut agent = state
        .store
        .upsert_agent(
            &handle,
            AgentUpsert {
                wallet: Some(wallet),
                role: req.role,
                skills: Some(req.skills),
                description: req.description,
                active: None,
                max_liability: req.max_liability,
                extra_attributes,
            },
        )
        .await?;

    if !agent.identity_registered {
        let attributes = agent_attributes(&agent);
        match identity::with_deadline(
            state.identity_deadline,
            state.identity.register(&agent.handle, &agent.wallet, &attributes),
        )
        .await
        {
            Ok(node) => {
                agent = state
                    .store
                    .update_agent(
                        &agent.id,
                        Box::new(move |a| {
                            a.identity_registered = true;
                            a.identity_node = Some(node.0);
                        }),
                    )
                    .await?;
            }
            Err(e) => {
                warn!("identity registration for {} deferred: {e}", agent.handle);
            }
        }
    }

    Ok((StatusCode::CREATED, Json(agent)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchAgentRequest {
    pub wallet: Option<String>,
    pub role: Option<String>,
    pub skills: Option<Vec<String>>,
    pub description: Option<String>,
    pub active: Option<bool>,
    pub max_liability: Option<u64>,
}

pub async fn patch_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PatchAgentRequest>,
) -> Result<Json<Agent>, ApiError> {
    let wallet = match req.wallet {
        Some(raw) => Some(canonical_wallet(&raw)?),
        None => None,
    };

    let agent = state
        .store
        .update_agent(
            &id,
            Box::new(move |a| {
                if let Some(wallet) = wallet {
                    a.wallet = wallet;
                }
                if let Some(role) = req.role {
                    a.role = role;
                }
                if let Some(skills) = req.skills {
                    a.skills = skills;
                }
                if let Some(description) = req.description {
                    a.description = description;
                }
                if let Some(active) = req.active {
                    a.active = active;
                }
                if let Some(max_liability) = req.max_liability {
                    a.max_liability = max_liability;
                }
            }),
        )
        .await?;
    Ok(Json(agent))
}

pub async fn lookup_identity(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Json<IdentityRecord>, ApiError> {
    let record = identity::with_deadline(
        state.identity_deadline,
        state.identity.lookup(&handle),
    )
    .await?;
    Ok(Json(record))
}
