// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-memory escrow with deterministic receipts. Backs tests and the
//! `simulated` deployment variant.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{EscrowAdapter, EscrowError, EscrowState};
use crate::models::{wallets_equal, Receipt};

#[derive(Debug, Clone)]
struct SimDeposit {
    depositor: String,
    amount: u64,
    released: bool,
    refunded: bool,
}

#[derive(Default)]
struct SimState {
    deposits: HashMap<String, SimDeposit>,
    sequence: u64,
    /// Remaining calls that should report a transient fault.
    unavailable_budget: u32,
}

#[derive(Clone, Default)]
pub struct SimulatedEscrow {
    state: Arc<RwLock<SimState>>,
    verifying: bool,
}

fn sim_receipt(op: &str, task_id: &str, sequence: u64) -> Receipt {
    let digest = Sha256::digest(format!("{op}:{task_id}").as_bytes());
    let reference = format!("0x{}", hex::encode(digest));
    Receipt {
        url: format!("https://sim.escrow/tx/{reference}"),
        reference,
        block: sequence,
    }
}

impl SimulatedEscrow {
    /// Custodial simulator: the coordinator records deposits itself.
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifying simulator: deposits must be seeded (as if a wallet made
    /// them) and attested through `verify_deposit`.
    pub fn verifying() -> Self {
        Self {
            state: Arc::default(),
            verifying: true,
        }
    }

    /// Test hook: pretend a wallet deposited out of band.
    pub async fn seed_deposit(&self, task_id: &str, depositor: &str, amount: u64) {
        let mut state = self.state.write().await;
        state.deposits.insert(
            task_id.to_string(),
            SimDeposit {
                depositor: depositor.to_string(),
                amount,
                released: false,
                refunded: false,
            },
        );
    }

    /// Test hook: the next `count` calls fail with a transient fault.
    pub async fn inject_unavailable(&self, count: u32) {
        self.state.write().await.unavailable_budget = count;
    }

    async fn consume_fault(&self) -> Result<(), EscrowError> {
        let mut state = self.state.write().await;
        if state.unavailable_budget > 0 {
            state.unavailable_budget -= 1;
            return Err(EscrowError::Unavailable(
                "simulated backend flap".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EscrowAdapter for SimulatedEscrow {
    fn backend_token(&self) -> &'static str {
        "escrow-simulated"
    }

    fn is_custodial(&self) -> bool {
        !self.verifying
    }

    async fn deposit(
        &self,
        task_id: &str,
        amount: u64,
        depositor: &str,
    ) -> Result<Receipt, EscrowError> {
        self.consume_fault().await?;
        let mut state = self.state.write().await;
        if state.deposits.contains_key(task_id) {
            return Err(EscrowError::AlreadyDeposited(task_id.to_string()));
        }
        state.sequence += 1;
        let sequence = state.sequence;
        state.deposits.insert(
            task_id.to_string(),
            SimDeposit {
                depositor: depositor.to_string(),
                amount,
                released: false,
                refunded: false,
            },
        );
        Ok(sim_receipt("deposit", task_id, sequence))
    }

    async fn verify_deposit(
        &self,
        task_id: &str,
        external_ref: &str,
        expected_depositor: &str,
        expected_amount: u64,
    ) -> Result<Receipt, EscrowError> {
        self.consume_fault().await?;
        let mut state = self.state.write().await;
        let deposit = state
            .deposits
            .get(task_id)
            .cloned()
            .ok_or_else(|| EscrowError::NotFound(task_id.to_string()))?;

        if deposit.amount != expected_amount {
            return Err(EscrowError::AmountMismatch {
                expected: expected_amount,
                actual: deposit.amount,
            });
        }
        if !wallets_equal(&deposit.depositor, expected_depositor) {
            return Err(EscrowError::DepositorMismatch {
                expected: expected_depositor.to_string(),
                actual: deposit.depositor,
            });
        }

        state.sequence += 1;
        Ok(Receipt {
            reference: external_ref.to_string(),
            block: state.sequence,
            url: format!("https://sim.escrow/tx/{external_ref}"),
        })
    }

    async fn release(&self, task_id: &str, _recipient: &str) -> Result<Receipt, EscrowError> {
        self.consume_fault().await?;
        let mut state = self.state.write().await;
        state.sequence += 1;
        let sequence = state.sequence;
        let deposit = state
            .deposits
            .get_mut(task_id)
            .ok_or_else(|| EscrowError::NotHeld(task_id.to_string()))?;
        if deposit.released || deposit.refunded {
            return Err(EscrowError::AlreadySettled(task_id.to_string()));
        }
        deposit.released = true;
        Ok(sim_receipt("release", task_id, sequence))
    }

    async fn refund(&self, task_id: &str) -> Result<Receipt, EscrowError> {
        self.consume_fault().await?;
        let mut state = self.state.write().await;
        state.sequence += 1;
        let sequence = state.sequence;
        let deposit = state
            .deposits
            .get_mut(task_id)
            .ok_or_else(|| EscrowError::NotHeld(task_id.to_string()))?;
        if deposit.released || deposit.refunded {
            return Err(EscrowError::AlreadySettled(task_id.to_string()));
        }
        deposit.refunded = true;
        Ok(sim_receipt("refund", task_id, sequence))
    }

    async fn query(&self, task_id: &str) -> Result<EscrowState, EscrowError> {
        let state = self.state.read().await;
        let deposit = state
            .deposits
            .get(task_id)
            .ok_or_else(|| EscrowError::NotFound(task_id.to_string()))?;
        Ok(EscrowState {
            depositor: deposit.depositor.clone(),
            amount: deposit.amount,
            released: deposit.released,
            refunded: deposit.refunded,
        })
    }
}
