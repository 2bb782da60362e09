// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-memory identity backend with deterministic node refs.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{IdentityAdapter, IdentityError, IdentityRecord, NodeRef};

#[derive(Default)]
struct SimState {
    records: HashMap<String, IdentityRecord>,
    unavailable_budget: u32,
}

#[derive(Clone, Default)]
pub struct SimulatedIdentity {
    state: Arc<RwLock<SimState>>,
}

fn node_for(handle: &str) -> NodeRef {
    let digest = Sha256::digest(format!("identity:{handle}").as_bytes());
    NodeRef(format!("0x{}", hex::encode(digest)))
}

impl SimulatedIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: the next `count` calls fail with a transient fault.
    pub async fn inject_unavailable(&self, count: u32) {
        self.state.write().await.unavailable_budget = count;
    }

    /// Test hook: how many handles are registered.
    pub async fn registered_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    async fn consume_fault(&self) -> Result<(), IdentityError> {
        let mut state = self.state.write().await;
        if state.unavailable_budget > 0 {
            state.unavailable_budget -= 1;
            return Err(IdentityError::Unavailable(
                "simulated backend flap".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityAdapter for SimulatedIdentity {
    async fn register(
        &self,
        handle: &str,
        wallet: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<NodeRef, IdentityError> {
        self.consume_fault().await?;
        let mut state = self.state.write().await;
        if let Some(existing) = state.records.get(handle) {
            return Ok(existing.node.clone());
        }
        let node = node_for(handle);
        state.records.insert(
            handle.to_string(),
            IdentityRecord {
                node: node.clone(),
                wallet: wallet.to_string(),
                attributes: attributes.clone(),
            },
        );
        Ok(node)
    }

    async fn update_attributes(
        &self,
        node: &NodeRef,
        attributes: &HashMap<String, String>,
    ) -> Result<(), IdentityError> {
        self.consume_fault().await?;
        let mut state = self.state.write().await;
        let record = state
            .records
            .values_mut()
            .find(|r| &r.node == node)
            .ok_or_else(|| IdentityError::NotRegistered(node.0.clone()))?;
        for (key, value) in attributes {
            record.attributes.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn lookup(&self, handle: &str) -> Result<IdentityRecord, IdentityError> {
        self.consume_fault().await?;
        self.state
            .read()
            .await
            .records
            .get(handle)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(handle.to_string()))
    }
}
