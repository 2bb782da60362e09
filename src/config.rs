// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Environment configuration for the coordinator.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowBackend {
    Onchain,
    Channel,
    Simulated,
}

impl FromStr for EscrowBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onchain" => Ok(EscrowBackend::Onchain),
            "channel" => Ok(EscrowBackend::Channel),
            "simulated" => Ok(EscrowBackend::Simulated),
            other => Err(anyhow!("unknown escrow backend: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub port: u16,
    pub store_uri: String,
    pub escrow_backend: EscrowBackend,
    pub escrow_signer: Option<String>,
    pub escrow_contract: Option<String>,
    pub escrow_rpc: String,
    pub escrow_chain_id: u64,
    pub identity_backend_url: Option<String>,
    pub identity_signer: Option<String>,
    pub identity_parent_namespace: String,
    pub max_concurrent_settlements: usize,
    pub escrow_retry_max: u32,
    pub escrow_retry_base: Duration,
    pub escrow_call_timeout: Duration,
    pub identity_call_timeout: Duration,
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            store_uri: "memory://".to_string(),
            escrow_backend: EscrowBackend::Simulated,
            escrow_signer: None,
            escrow_contract: None,
            escrow_rpc: "http://localhost:8545".to_string(),
            escrow_chain_id: 84532,
            identity_backend_url: None,
            identity_signer: None,
            identity_parent_namespace: "acn.eth".to_string(),
            max_concurrent_settlements: 8,
            escrow_retry_max: 5,
            escrow_retry_base: Duration::from_millis(500),
            escrow_call_timeout: Duration::from_secs(30),
            identity_call_timeout: Duration::from_secs(15),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            port: parsed("PORT", defaults.port)?,
            store_uri: env::var("STORE_URI").unwrap_or(defaults.store_uri),
            escrow_backend: parsed("ESCROW_BACKEND", defaults.escrow_backend)
                .context("ESCROW_BACKEND must be onchain, channel or simulated")?,
            escrow_signer: env::var("ESCROW_SIGNER").ok(),
            escrow_contract: env::var("ESCROW_CONTRACT").ok(),
            escrow_rpc: env::var("ESCROW_RPC").unwrap_or(defaults.escrow_rpc),
            escrow_chain_id: parsed("ESCROW_CHAIN_ID", defaults.escrow_chain_id)?,
            identity_backend_url: env::var("IDENTITY_BACKEND_URL").ok(),
            identity_signer: env::var("IDENTITY_SIGNER").ok(),
            identity_parent_namespace: env::var("IDENTITY_PARENT_NAMESPACE")
                .unwrap_or(defaults.identity_parent_namespace),
            max_concurrent_settlements: parsed(
                "MAX_CONCURRENT_SETTLEMENTS",
                defaults.max_concurrent_settlements,
            )?,
            escrow_retry_max: parsed("ESCROW_RETRY_MAX", defaults.escrow_retry_max)?,
            escrow_retry_base: Duration::from_millis(parsed(
                "ESCROW_RETRY_BASE_MS",
                defaults.escrow_retry_base.as_millis() as u64,
            )?),
            escrow_call_timeout: defaults.escrow_call_timeout,
            identity_call_timeout: defaults.identity_call_timeout,
        })
    }
}
