// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Marketplace coordinator.
//!
//! Mediates between posters, bidding worker agents, an escrow backend and a
//! name-service identity backend: jobs are posted against pre-funded escrow,
//! workers bid, the poster accepts one bid, the winning worker submits a
//! result, and settlement releases escrow and rewrites the worker's
//! reputation attributes.

pub mod activity;
pub mod api;
pub mod config;
pub mod escrow;
pub mod identity;
pub mod models;
pub mod settlement;
pub mod state_machine;
pub mod store;
pub mod utils;

pub use api::{create_app, start_server, ApiError, AppState};
pub use config::{CoordinatorConfig, EscrowBackend};
pub use escrow::{ChannelEscrow, EscrowAdapter, OnchainEscrow, SimulatedEscrow};
pub use identity::{EnsIdentity, IdentityAdapter, SimulatedIdentity};
pub use settlement::{DispatcherConfig, SettlementAction, SettlementDispatcher};
pub use state_machine::{transition, SideEffect, TaskEvent, TransitionError};
pub use store::{FileStore, MemoryStore, Store, StoreError};
