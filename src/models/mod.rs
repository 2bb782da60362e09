// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Marketplace domain entities shared by the store, the state machine and the
//! HTTP surface.

pub mod activity;
pub mod agent;
pub mod bid;
pub mod posting;
pub mod task;

pub use activity::Activity;
pub use agent::{Agent, AgentUpsert};
pub use bid::Bid;
pub use posting::{JobPosting, PostingStatus};
pub use task::{EscrowStatus, Receipt, Task, TaskStatus, WorkResult};

use ethers::types::Address;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid wallet address: {0}")]
pub struct InvalidWallet(pub String);

/// Canonicalize a wallet to lowercase 0x-prefixed hex. Wallets are opaque
/// 20-byte values; all comparisons happen on the canonical form.
pub fn canonical_wallet(raw: &str) -> Result<String, InvalidWallet> {
    let addr: Address = raw
        .trim()
        .parse()
        .map_err(|_| InvalidWallet(raw.to_string()))?;
    Ok(format!("{:#x}", addr))
}

/// Case-insensitive wallet equality.
pub fn wallets_equal(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
