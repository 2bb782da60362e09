// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Name-service identity for worker agents.
//!
//! Every worker owns a globally readable record under the configured parent
//! namespace (for example `summariser` under `acn.eth`). Text attributes on
//! the record carry role, skills and the reputation counters, rewritten on
//! every settlement.

pub mod onchain;
pub mod simulated;

pub use onchain::EnsIdentity;
pub use simulated::SimulatedIdentity;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::models::Agent;

/// Attribute keys written verbatim to the identity record.
pub mod attrs {
    pub const ROLE: &str = "role";
    pub const SKILLS: &str = "skills";
    pub const REPUTATION: &str = "reputation";
    pub const TASKS_COMPLETED: &str = "tasksCompleted";
    pub const TASKS_FAILED: &str = "tasksFailed";
    pub const DESCRIPTION: &str = "description";

    pub const ALL: [&str; 6] = [
        ROLE,
        SKILLS,
        REPUTATION,
        TASKS_COMPLETED,
        TASKS_FAILED,
        DESCRIPTION,
    ];
}

/// Backend-level handle for an identity record, used to address attribute
/// updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef(pub String);

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub node: NodeRef,
    pub wallet: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity node {0} is not registered")]
    NotRegistered(String),
    #[error("no identity record for handle {0}")]
    NotFound(String),
    #[error("identity backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityAdapter: Send + Sync {
    /// Idempotent by handle: an already-registered handle returns the
    /// existing node with no effect.
    async fn register(
        &self,
        handle: &str,
        wallet: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<NodeRef, IdentityError>;

    /// Batched attribute write. Unknown keys are written through unchanged.
    async fn update_attributes(
        &self,
        node: &NodeRef,
        attributes: &HashMap<String, String>,
    ) -> Result<(), IdentityError>;

    async fn lookup(&self, handle: &str) -> Result<IdentityRecord, IdentityError>;
}

/// Full attribute map for an agent, used at registration.
pub fn agent_attributes(agent: &Agent) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(attrs::ROLE.to_string(), agent.role.clone());
    map.insert(attrs::SKILLS.to_string(), agent.skills.join(","));
    map.insert(attrs::REPUTATION.to_string(), agent.reputation.to_string());
    map.insert(
        attrs::TASKS_COMPLETED.to_string(),
        agent.tasks_completed.to_string(),
    );
    map.insert(
        attrs::TASKS_FAILED.to_string(),
        agent.tasks_failed.to_string(),
    );
    map.insert(attrs::DESCRIPTION.to_string(), agent.description.clone());
    for (key, value) in &agent.extra_attributes {
        map.insert(key.clone(), value.clone());
    }
    map
}

/// The subset rewritten on every settlement.
pub fn reputation_attributes(agent: &Agent) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(attrs::REPUTATION.to_string(), agent.reputation.to_string());
    map.insert(
        attrs::TASKS_COMPLETED.to_string(),
        agent.tasks_completed.to_string(),
    );
    map.insert(
        attrs::TASKS_FAILED.to_string(),
        agent.tasks_failed.to_string(),
    );
    map
}

/// Bound an identity call by the request deadline.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, IdentityError>
where
    F: Future<Output = Result<T, IdentityError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(IdentityError::Unavailable(format!(
            "call exceeded {}ms deadline",
            deadline.as_millis()
        ))),
    }
}
