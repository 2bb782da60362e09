// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Off-chain payment-channel escrow.
//!
//! Talks to a settlement hub over HTTP. The hub keys channels by the same
//! fixed-width task key the contract uses, so the two backends are
//! interchangeable behind the adapter.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{task_escrow_key_hex, EscrowAdapter, EscrowError, EscrowState};
use crate::models::Receipt;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubSettlement {
    settlement_id: String,
    sequence: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubChannel {
    depositor: String,
    amount: u64,
    released: bool,
    refunded: bool,
}

pub struct ChannelEscrow {
    http: reqwest::Client,
    base_url: String,
}

fn unavailable(err: impl std::fmt::Display) -> EscrowError {
    EscrowError::Unavailable(err.to_string())
}

impl ChannelEscrow {
    pub fn new(base_url: impl Into<String>) -> Result<Self, EscrowError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(unavailable)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn channel_url(&self, task_id: &str) -> String {
        format!("{}/channels/{}", self.base_url, task_escrow_key_hex(task_id))
    }

    fn settlement_receipt(&self, settlement: HubSettlement) -> Receipt {
        Receipt {
            url: format!("{}/settlements/{}", self.base_url, settlement.settlement_id),
            reference: settlement.settlement_id,
            block: settlement.sequence,
        }
    }

    async fn read_settlement(
        &self,
        task_id: &str,
        response: reqwest::Response,
        conflict: fn(String) -> EscrowError,
    ) -> Result<Receipt, EscrowError> {
        match response.status() {
            StatusCode::OK => {
                let settlement: HubSettlement = response.json().await.map_err(unavailable)?;
                Ok(self.settlement_receipt(settlement))
            }
            StatusCode::PAYMENT_REQUIRED => Err(EscrowError::InsufficientFunds),
            StatusCode::NOT_FOUND => Err(EscrowError::NotHeld(task_id.to_string())),
            StatusCode::CONFLICT => Err(conflict(task_id.to_string())),
            status => Err(EscrowError::Unavailable(format!(
                "settlement hub returned {status}"
            ))),
        }
    }
}

#[async_trait]
impl EscrowAdapter for ChannelEscrow {
    fn backend_token(&self) -> &'static str {
        "escrow-channel"
    }

    fn is_custodial(&self) -> bool {
        true
    }

    async fn deposit(
        &self,
        task_id: &str,
        amount: u64,
        depositor: &str,
    ) -> Result<Receipt, EscrowError> {
        let response = self
            .http
            .post(format!("{}/deposit", self.channel_url(task_id)))
            .json(&json!({ "amount": amount, "depositor": depositor }))
            .send()
            .await
            .map_err(unavailable)?;
        self.read_settlement(task_id, response, EscrowError::AlreadyDeposited)
            .await
    }

    async fn verify_deposit(
        &self,
        task_id: &str,
        external_ref: &str,
        expected_depositor: &str,
        expected_amount: u64,
    ) -> Result<Receipt, EscrowError> {
        let state = self.query(task_id).await?;
        if state.amount != expected_amount {
            return Err(EscrowError::AmountMismatch {
                expected: expected_amount,
                actual: state.amount,
            });
        }
        if !crate::models::wallets_equal(&state.depositor, expected_depositor) {
            return Err(EscrowError::DepositorMismatch {
                expected: expected_depositor.to_string(),
                actual: state.depositor,
            });
        }
        Ok(Receipt {
            url: format!("{}/settlements/{external_ref}", self.base_url),
            reference: external_ref.to_string(),
            block: 0,
        })
    }

    async fn release(&self, task_id: &str, recipient: &str) -> Result<Receipt, EscrowError> {
        let response = self
            .http
            .post(format!("{}/release", self.channel_url(task_id)))
            .json(&json!({ "recipient": recipient }))
            .send()
            .await
            .map_err(unavailable)?;
        self.read_settlement(task_id, response, EscrowError::AlreadySettled)
            .await
    }

    async fn refund(&self, task_id: &str) -> Result<Receipt, EscrowError> {
        let response = self
            .http
            .post(format!("{}/refund", self.channel_url(task_id)))
            .send()
            .await
            .map_err(unavailable)?;
        self.read_settlement(task_id, response, EscrowError::AlreadySettled)
            .await
    }

    async fn query(&self, task_id: &str) -> Result<EscrowState, EscrowError> {
        let response = self
            .http
            .get(self.channel_url(task_id))
            .send()
            .await
            .map_err(unavailable)?;
        match response.status() {
            StatusCode::OK => {
                let channel: HubChannel = response.json().await.map_err(unavailable)?;
                Ok(EscrowState {
                    depositor: channel.depositor,
                    amount: channel.amount,
                    released: channel.released,
                    refunded: channel.refunded,
                })
            }
            StatusCode::NOT_FOUND => Err(EscrowError::NotFound(task_id.to_string())),
            status => Err(EscrowError::Unavailable(format!(
                "settlement hub returned {status}"
            ))),
        }
    }
}
