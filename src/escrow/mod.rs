// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Escrow backends behind one adapter interface.
//!
//! Two deployment shapes: custodial (the coordinator signs deposits itself)
//! and verifying (the poster's wallet deposited; the coordinator attests the
//! deposit, then releases or refunds). `ESCROW_BACKEND` picks the variant:
//! `onchain` (verifying), `channel` (custodial hub), `simulated`
//! (custodial, deterministic receipts for tests).

pub mod channel;
pub mod onchain;
pub mod simulated;

pub use channel::ChannelEscrow;
pub use onchain::OnchainEscrow;
pub use simulated::SimulatedEscrow;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::models::Receipt;

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("insufficient funds for escrow deposit")]
    InsufficientFunds,
    #[error("deposit already recorded for task {0}")]
    AlreadyDeposited(String),
    #[error("no escrow deposit found for task {0}")]
    NotFound(String),
    #[error("deposit amount mismatch: expected {expected}, found {actual}")]
    AmountMismatch { expected: u64, actual: u64 },
    #[error("depositor mismatch: expected {expected}, found {actual}")]
    DepositorMismatch { expected: String, actual: String },
    #[error("escrow is not held for task {0}")]
    NotHeld(String),
    #[error("escrow already settled for task {0}")]
    AlreadySettled(String),
    #[error("operation not supported by the {0} escrow backend")]
    Unsupported(&'static str),
    #[error("escrow backend unavailable: {0}")]
    Unavailable(String),
}

impl EscrowError {
    /// Transient faults are the only retryable class.
    pub fn is_transient(&self) -> bool {
        matches!(self, EscrowError::Unavailable(_))
    }
}

/// Backend view of a task's escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowState {
    pub depositor: String,
    pub amount: u64,
    pub released: bool,
    pub refunded: bool,
}

#[async_trait]
pub trait EscrowAdapter: Send + Sync {
    /// Actor token recorded on settlement activity entries.
    fn backend_token(&self) -> &'static str;

    /// Whether the coordinator performs deposits itself at job creation.
    fn is_custodial(&self) -> bool;

    /// Custodial variant only.
    async fn deposit(
        &self,
        task_id: &str,
        amount: u64,
        depositor: &str,
    ) -> Result<Receipt, EscrowError>;

    /// Verifying variant: attest a deposit the poster's wallet produced.
    async fn verify_deposit(
        &self,
        task_id: &str,
        external_ref: &str,
        expected_depositor: &str,
        expected_amount: u64,
    ) -> Result<Receipt, EscrowError>;

    async fn release(&self, task_id: &str, recipient: &str) -> Result<Receipt, EscrowError>;

    async fn refund(&self, task_id: &str) -> Result<Receipt, EscrowError>;

    async fn query(&self, task_id: &str) -> Result<EscrowState, EscrowError>;
}

/// Deterministic, collision-free mapping from a task id to the fixed-width
/// key the backends index by.
pub fn task_escrow_key(task_id: &str) -> [u8; 32] {
    ethers::utils::keccak256(task_id.as_bytes())
}

pub fn task_escrow_key_hex(task_id: &str) -> String {
    format!("0x{}", hex::encode(task_escrow_key(task_id)))
}

/// Bound an adapter call by the request deadline. Elapsed deadlines surface
/// as a transient backend fault.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, EscrowError>
where
    F: Future<Output = Result<T, EscrowError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(EscrowError::Unavailable(format!(
            "call exceeded {}ms deadline",
            deadline.as_millis()
        ))),
    }
}
