// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{anyhow, bail, Context, Result};
use ethers::types::Address;
use fabstir_marketplace_node::{
    api::{start_server, AppState},
    config::{CoordinatorConfig, EscrowBackend},
    escrow::{ChannelEscrow, EscrowAdapter, OnchainEscrow, SimulatedEscrow},
    identity::{EnsIdentity, IdentityAdapter, SimulatedIdentity},
    settlement::{DispatcherConfig, SettlementDispatcher},
    store::{FileStore, MemoryStore, Store},
};
use std::{env, sync::Arc};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let config = CoordinatorConfig::from_env()?;
    info!("starting marketplace coordinator on port {}", config.port);

    let store: Arc<dyn Store> = if let Some(dir) = config.store_uri.strip_prefix("file://") {
        info!("using file store at {dir}");
        Arc::new(FileStore::open(dir).await?)
    } else if config.store_uri.is_empty() || config.store_uri.starts_with("memory://") {
        info!("using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        bail!("unsupported STORE_URI: {}", config.store_uri);
    };

    let escrow: Arc<dyn EscrowAdapter> = match config.escrow_backend {
        EscrowBackend::Simulated => {
            info!("escrow backend: simulated");
            Arc::new(SimulatedEscrow::new())
        }
        EscrowBackend::Channel => {
            info!("escrow backend: payment channel hub at {}", config.escrow_rpc);
            Arc::new(ChannelEscrow::new(config.escrow_rpc.clone())?)
        }
        EscrowBackend::Onchain => {
            let contract: Address = config
                .escrow_contract
                .as_deref()
                .context("ESCROW_CONTRACT is required for the onchain backend")?
                .parse()
                .map_err(|_| anyhow!("invalid ESCROW_CONTRACT address"))?;
            info!(
                "escrow backend: contract {contract:#x} on chain {} via {}",
                config.escrow_chain_id, config.escrow_rpc
            );
            Arc::new(
                OnchainEscrow::connect(
                    &config.escrow_rpc,
                    contract,
                    config.escrow_chain_id,
                    config.escrow_signer.as_deref(),
                )
                .await?,
            )
        }
    };

    let identity: Arc<dyn IdentityAdapter> =
        match (&config.identity_backend_url, &config.identity_signer) {
            (Some(url), Some(key)) => {
                info!(
                    "identity backend: {} under {}",
                    url, config.identity_parent_namespace
                );
                Arc::new(EnsIdentity::connect(url, key, &config.identity_parent_namespace).await?)
            }
            _ => {
                info!("identity backend not configured; using simulated identity");
                Arc::new(SimulatedIdentity::new())
            }
        };

    let dispatcher = Arc::new(SettlementDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&escrow),
        Arc::clone(&identity),
        DispatcherConfig::from(&config),
    ));

    let recovered = dispatcher.recover().await?;
    if recovered > 0 {
        info!("recovered {recovered} settlement actions from the last run");
    }
    dispatcher.spawn();

    let state = AppState::new(
        store,
        escrow,
        identity,
        dispatcher,
        config.escrow_call_timeout,
        config.identity_call_timeout,
    );
    start_server(state, config.port).await
}
