// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! ENS-backed identity adapter.
//!
//! Worker handles become subnodes of `IDENTITY_PARENT_NAMESPACE`; attributes
//! live as resolver text records. Writes for one handle are serialized by a
//! keyed lock so concurrent reputation updates linearize.

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use ethers::utils::keccak256;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::{attrs, IdentityAdapter, IdentityError, IdentityRecord, NodeRef};
use crate::utils::KeyedLocks;

/// The canonical ENS registry deployment, shared across mainnet and testnets.
const DEFAULT_REGISTRY: &str = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e";

abigen!(
    NameRegistry,
    r#"[
        function owner(bytes32 node) external view returns (address)
        function resolver(bytes32 node) external view returns (address)
        function setSubnodeRecord(bytes32 node, bytes32 label, address owner, address resolver, uint64 ttl) external
    ]"#
);

abigen!(
    NameResolver,
    r#"[
        function addr(bytes32 node) external view returns (address)
        function setAddr(bytes32 node, address a) external
        function text(bytes32 node, string key) external view returns (string)
        function setText(bytes32 node, string key, string value) external
    ]"#
);

type WriteClient = SignerMiddleware<Arc<Provider<Http>>, LocalWallet>;

/// EIP-137 name hash.
pub fn namehash(name: &str) -> [u8; 32] {
    let mut node = [0u8; 32];
    if name.is_empty() {
        return node;
    }
    for label in name.split('.').rev() {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&node);
        buf[32..].copy_from_slice(&label_hash);
        node = keccak256(buf);
    }
    node
}

pub struct EnsIdentity {
    registry: NameRegistry<WriteClient>,
    resolver: NameResolver<WriteClient>,
    resolver_address: Address,
    owner_address: Address,
    parent: String,
    parent_node: [u8; 32],
    handle_locks: KeyedLocks,
}

fn unavailable(err: impl std::fmt::Display) -> IdentityError {
    IdentityError::Unavailable(err.to_string())
}

impl EnsIdentity {
    /// Connect to the name service and resolve the parent namespace's
    /// resolver, which all subnodes share.
    pub async fn connect(
        rpc_url: &str,
        signer_key: &str,
        parent_namespace: &str,
    ) -> Result<Self, IdentityError> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(unavailable)?;
        let provider = Arc::new(provider);

        let chain_id = provider.get_chainid().await.map_err(unavailable)?;
        let wallet = signer_key
            .parse::<LocalWallet>()
            .map_err(|e| IdentityError::Unavailable(format!("invalid signer key: {e}")))?
            .with_chain_id(chain_id.as_u64());
        let owner_address = wallet.address();
        let client = Arc::new(SignerMiddleware::new(provider, wallet));

        let registry_address: Address = DEFAULT_REGISTRY
            .parse()
            .map_err(|_| IdentityError::Unavailable("bad registry address".to_string()))?;
        let registry = NameRegistry::new(registry_address, Arc::clone(&client));

        let parent_node = namehash(parent_namespace);
        let resolver_address = registry
            .resolver(parent_node)
            .call()
            .await
            .map_err(unavailable)?;
        if resolver_address == Address::zero() {
            return Err(IdentityError::Unavailable(format!(
                "parent namespace {parent_namespace} has no resolver"
            )));
        }
        let resolver = NameResolver::new(resolver_address, client);

        info!(
            "identity adapter bound to {parent_namespace} (resolver {resolver_address:#x})"
        );
        Ok(Self {
            registry,
            resolver,
            resolver_address,
            owner_address,
            parent: parent_namespace.to_string(),
            parent_node,
            handle_locks: KeyedLocks::new(),
        })
    }

    fn child_node(&self, handle: &str) -> [u8; 32] {
        namehash(&format!("{handle}.{}", self.parent))
    }

    fn node_ref(node: [u8; 32]) -> NodeRef {
        NodeRef(format!("0x{}", hex::encode(node)))
    }

    fn node_from_ref(node: &NodeRef) -> Result<[u8; 32], IdentityError> {
        let raw = node.0.trim_start_matches("0x");
        let bytes = hex::decode(raw).map_err(|_| IdentityError::NotRegistered(node.0.clone()))?;
        bytes
            .try_into()
            .map_err(|_| IdentityError::NotRegistered(node.0.clone()))
    }

    async fn node_owner(&self, node: [u8; 32]) -> Result<Address, IdentityError> {
        self.registry.owner(node).call().await.map_err(unavailable)
    }

    async fn write_texts(
        &self,
        node: [u8; 32],
        attributes: &HashMap<String, String>,
    ) -> Result<(), IdentityError> {
        // Deterministic key order keeps nonce assignment stable.
        let ordered: BTreeMap<_, _> = attributes.iter().collect();
        for (key, value) in ordered {
            self.resolver
                .set_text(node, key.clone(), value.clone())
                .send()
                .await
                .map_err(unavailable)?
                .await
                .map_err(unavailable)?;
            debug!("set text {key} on node 0x{}", hex::encode(node));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityAdapter for EnsIdentity {
    async fn register(
        &self,
        handle: &str,
        wallet: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<NodeRef, IdentityError> {
        let _guard = self.handle_locks.acquire(handle).await;

        let node = self.child_node(handle);
        if self.node_owner(node).await? != Address::zero() {
            return Ok(Self::node_ref(node));
        }

        self.registry
            .set_subnode_record(
                self.parent_node,
                keccak256(handle.as_bytes()),
                self.owner_address,
                self.resolver_address,
                0,
            )
            .send()
            .await
            .map_err(unavailable)?
            .await
            .map_err(unavailable)?;

        let wallet_addr: Address = wallet
            .parse()
            .map_err(|_| IdentityError::Unavailable(format!("invalid wallet: {wallet}")))?;
        self.resolver
            .set_addr(node, wallet_addr)
            .send()
            .await
            .map_err(unavailable)?
            .await
            .map_err(unavailable)?;

        self.write_texts(node, attributes).await?;

        info!("registered identity {handle}.{}", self.parent);
        Ok(Self::node_ref(node))
    }

    async fn update_attributes(
        &self,
        node: &NodeRef,
        attributes: &HashMap<String, String>,
    ) -> Result<(), IdentityError> {
        let _guard = self.handle_locks.acquire(&node.0).await;

        let raw = Self::node_from_ref(node)?;
        if self.node_owner(raw).await? == Address::zero() {
            return Err(IdentityError::NotRegistered(node.0.clone()));
        }
        self.write_texts(raw, attributes).await
    }

    async fn lookup(&self, handle: &str) -> Result<IdentityRecord, IdentityError> {
        let node = self.child_node(handle);
        if self.node_owner(node).await? == Address::zero() {
            return Err(IdentityError::NotFound(handle.to_string()));
        }

        let wallet = self.resolver.addr(node).call().await.map_err(unavailable)?;

        let mut attributes = HashMap::new();
        for key in attrs::ALL {
            let value = self
                .resolver
                .text(node, key.to_string())
                .call()
                .await
                .map_err(unavailable)?;
            if !value.is_empty() {
                attributes.insert(key.to_string(), value);
            }
        }

        Ok(IdentityRecord {
            node: Self::node_ref(node),
            wallet: format!("{wallet:#x}"),
            attributes,
        })
    }
}
