// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! On-chain escrow contract adapter.
//!
//! Runs in the verifying shape by default: posters deposit from their own
//! wallets and the coordinator attests the deposit, then signs release and
//! refund transactions with `ESCROW_SIGNER`. Custodial deposits are available
//! when a signer is configured.

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tracing::info;

use super::{task_escrow_key, EscrowAdapter, EscrowError, EscrowState};
use crate::models::{wallets_equal, Receipt};

abigen!(
    MarketplaceEscrowContract,
    r#"[
        function deposit(bytes32 taskKey, address depositor) external payable
        function release(bytes32 taskKey, address recipient) external
        function refund(bytes32 taskKey) external
        function getDeposit(bytes32 taskKey) external view returns (address, uint256, bool, bool)
    ]"#
);

type ReadClient = Provider<Http>;
type WriteClient = SignerMiddleware<Arc<Provider<Http>>, LocalWallet>;

pub struct OnchainEscrow {
    provider: Arc<Provider<Http>>,
    reader: MarketplaceEscrowContract<ReadClient>,
    writer: Option<MarketplaceEscrowContract<WriteClient>>,
    signer_address: Option<Address>,
    chain_id: u64,
}

fn unavailable(err: impl std::fmt::Display) -> EscrowError {
    EscrowError::Unavailable(err.to_string())
}

fn parse_wallet(raw: &str) -> Result<Address, EscrowError> {
    raw.parse::<Address>()
        .map_err(|_| EscrowError::Unavailable(format!("invalid wallet address: {raw}")))
}

fn tx_url(chain_id: u64, reference: &str) -> String {
    match chain_id {
        8453 => format!("https://basescan.org/tx/{reference}"),
        84532 => format!("https://sepolia.basescan.org/tx/{reference}"),
        5611 => format!("https://testnet.opbnbscan.com/tx/{reference}"),
        _ => format!("https://blockscan.com/tx/{reference}"),
    }
}

impl OnchainEscrow {
    /// Connect to the escrow contract, verifying the RPC endpoint serves the
    /// configured chain.
    pub async fn connect(
        rpc_url: &str,
        contract: Address,
        chain_id: u64,
        signer_key: Option<&str>,
    ) -> Result<Self, EscrowError> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(unavailable)?;
        let provider = Arc::new(provider);

        let reported = provider.get_chainid().await.map_err(unavailable)?;
        if reported.as_u64() != chain_id {
            return Err(EscrowError::Unavailable(format!(
                "chain id mismatch: expected {chain_id}, rpc reports {reported}"
            )));
        }

        let reader = MarketplaceEscrowContract::new(contract, Arc::clone(&provider));

        let (writer, signer_address) = match signer_key {
            Some(key) => {
                let wallet = key
                    .parse::<LocalWallet>()
                    .map_err(|e| EscrowError::Unavailable(format!("invalid signer key: {e}")))?
                    .with_chain_id(chain_id);
                let address = wallet.address();
                let middleware = Arc::new(SignerMiddleware::new(Arc::clone(&provider), wallet));
                info!("escrow signer configured: {address:#x}");
                (
                    Some(MarketplaceEscrowContract::new(contract, middleware)),
                    Some(address),
                )
            }
            None => (None, None),
        };

        Ok(Self {
            provider,
            reader,
            writer,
            signer_address,
            chain_id,
        })
    }

    fn writer(&self) -> Result<&MarketplaceEscrowContract<WriteClient>, EscrowError> {
        self.writer
            .as_ref()
            .ok_or(EscrowError::Unsupported("onchain"))
    }

    async fn fetch_deposit(
        &self,
        task_id: &str,
    ) -> Result<(Address, U256, bool, bool), EscrowError> {
        self.reader
            .get_deposit(task_escrow_key(task_id))
            .call()
            .await
            .map_err(unavailable)
    }

    fn receipt_from_tx(
        &self,
        tx: &ethers::types::TransactionReceipt,
    ) -> Receipt {
        let reference = format!("{:#x}", tx.transaction_hash);
        Receipt {
            url: tx_url(self.chain_id, &reference),
            block: tx.block_number.map(|b| b.as_u64()).unwrap_or(0),
            reference,
        }
    }
}

#[async_trait]
impl EscrowAdapter for OnchainEscrow {
    fn backend_token(&self) -> &'static str {
        "escrow-onchain"
    }

    fn is_custodial(&self) -> bool {
        false
    }

    async fn deposit(
        &self,
        task_id: &str,
        amount: u64,
        depositor: &str,
    ) -> Result<Receipt, EscrowError> {
        let writer = self.writer()?;
        let depositor = parse_wallet(depositor)?;

        let (_, existing, _, _) = self.fetch_deposit(task_id).await?;
        if !existing.is_zero() {
            return Err(EscrowError::AlreadyDeposited(task_id.to_string()));
        }

        if let Some(signer) = self.signer_address {
            let balance = self
                .provider
                .get_balance(signer, None)
                .await
                .map_err(unavailable)?;
            if balance < U256::from(amount) {
                return Err(EscrowError::InsufficientFunds);
            }
        }

        let tx = writer
            .deposit(task_escrow_key(task_id), depositor)
            .value(U256::from(amount))
            .send()
            .await
            .map_err(unavailable)?
            .await
            .map_err(unavailable)?
            .ok_or_else(|| EscrowError::Unavailable("deposit transaction dropped".to_string()))?;

        Ok(self.receipt_from_tx(&tx))
    }

    async fn verify_deposit(
        &self,
        task_id: &str,
        external_ref: &str,
        expected_depositor: &str,
        expected_amount: u64,
    ) -> Result<Receipt, EscrowError> {
        let hash: H256 = external_ref
            .parse()
            .map_err(|_| EscrowError::NotFound(task_id.to_string()))?;

        let tx = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| EscrowError::NotFound(task_id.to_string()))?;
        if tx.status != Some(1u64.into()) {
            return Err(EscrowError::NotFound(task_id.to_string()));
        }

        let (depositor, amount, _, _) = self.fetch_deposit(task_id).await?;
        if amount.is_zero() {
            return Err(EscrowError::NotFound(task_id.to_string()));
        }
        if amount != U256::from(expected_amount) {
            return Err(EscrowError::AmountMismatch {
                expected: expected_amount,
                actual: amount.as_u64(),
            });
        }
        let actual = format!("{depositor:#x}");
        if !wallets_equal(&actual, expected_depositor) {
            return Err(EscrowError::DepositorMismatch {
                expected: expected_depositor.to_string(),
                actual,
            });
        }

        let reference = format!("{hash:#x}");
        Ok(Receipt {
            url: tx_url(self.chain_id, &reference),
            block: tx.block_number.map(|b| b.as_u64()).unwrap_or(0),
            reference,
        })
    }

    async fn release(&self, task_id: &str, recipient: &str) -> Result<Receipt, EscrowError> {
        let writer = self.writer()?;
        let recipient = parse_wallet(recipient)?;

        let (_, amount, released, refunded) = self.fetch_deposit(task_id).await?;
        if amount.is_zero() {
            return Err(EscrowError::NotHeld(task_id.to_string()));
        }
        if released || refunded {
            return Err(EscrowError::AlreadySettled(task_id.to_string()));
        }

        let tx = writer
            .release(task_escrow_key(task_id), recipient)
            .send()
            .await
            .map_err(unavailable)?
            .await
            .map_err(unavailable)?
            .ok_or_else(|| EscrowError::Unavailable("release transaction dropped".to_string()))?;

        info!(
            "released escrow for task {task_id} in tx {:#x}",
            tx.transaction_hash
        );
        Ok(self.receipt_from_tx(&tx))
    }

    async fn refund(&self, task_id: &str) -> Result<Receipt, EscrowError> {
        let writer = self.writer()?;

        let (_, amount, released, refunded) = self.fetch_deposit(task_id).await?;
        if amount.is_zero() {
            return Err(EscrowError::NotHeld(task_id.to_string()));
        }
        if released || refunded {
            return Err(EscrowError::AlreadySettled(task_id.to_string()));
        }

        let tx = writer
            .refund(task_escrow_key(task_id))
            .send()
            .await
            .map_err(unavailable)?
            .await
            .map_err(unavailable)?
            .ok_or_else(|| EscrowError::Unavailable("refund transaction dropped".to_string()))?;

        Ok(self.receipt_from_tx(&tx))
    }

    async fn query(&self, task_id: &str) -> Result<EscrowState, EscrowError> {
        let (depositor, amount, released, refunded) = self.fetch_deposit(task_id).await?;
        if amount.is_zero() {
            return Err(EscrowError::NotFound(task_id.to_string()));
        }
        Ok(EscrowState {
            depositor: format!("{depositor:#x}"),
            amount: amount.as_u64(),
            released,
            refunded,
        })
    }
}
