//! The chain-database capability the builder reads through, plus an
//! in-memory implementation for tests and harnesses.
//!
//! Beyond trie nodes, the builder needs two kinds of raw reads: the
//! secure-key preimage table (leaf key back to address) and code blobs by
//! code hash. Both live in the chain's key-value store.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use ethereum_types::Address;
use keccak_hash::keccak;
use mpt_view::store::{MemoryNodeStore, NodeStore, NodeStoreMut, StoreError};
use parking_lot::RwLock;

/// Prefix under which secure tries record `keccak256(key) -> key`
/// preimages.
pub const SECURE_KEY_PREFIX: &[u8] = b"secure-key-";

/// Read access to the chain database: trie nodes plus raw key-value reads.
pub trait ChainStore: NodeStore {
    /// Reads a raw value from the chain's key-value store. Absence is not an
    /// error.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;
}

/// The preimage-table key for a trie leaf key.
pub fn secure_key(leaf_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(SECURE_KEY_PREFIX.len() + leaf_key.len());
    key.extend_from_slice(SECURE_KEY_PREFIX);
    key.extend_from_slice(leaf_key);
    key
}

/// A shared, in-memory chain store.
#[derive(Clone, Debug, Default)]
pub struct MemoryChainStore {
    nodes: MemoryNodeStore,
    kv: Arc<RwLock<HashMap<Vec<u8>, Bytes>>>,
}

impl MemoryChainStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The node half of the store, for trie construction.
    pub fn nodes(&self) -> &MemoryNodeStore {
        &self.nodes
    }

    /// Registers the secure-key preimage of `address`.
    pub fn insert_address_preimage(&self, address: Address) {
        let leaf_key = keccak(address.as_bytes());
        self.kv.write().insert(
            secure_key(leaf_key.as_bytes()),
            Bytes::copy_from_slice(address.as_bytes()),
        );
    }

    /// Stores a code blob under its hash and returns that hash.
    pub fn insert_code(&self, code: Vec<u8>) -> ethereum_types::H256 {
        let hash = keccak(&code);
        self.kv
            .write()
            .insert(hash.as_bytes().to_vec(), Bytes::from(code));
        hash
    }
}

impl NodeStore for MemoryChainStore {
    fn node(&self, hash: ethereum_types::H256) -> Result<Bytes, StoreError> {
        self.nodes.node(hash)
    }
}

impl NodeStoreMut for MemoryChainStore {
    fn insert_node(&self, hash: ethereum_types::H256, blob: Bytes) {
        self.nodes.insert_node(hash, blob);
    }
}

impl ChainStore for MemoryChainStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        Ok(self.kv.read().get(key).cloned())
    }
}

impl<S: ChainStore + ?Sized> ChainStore for &S {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        (**self).get(key)
    }
}

impl<S: ChainStore + ?Sized> ChainStore for Arc<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        (**self).get(key)
    }
}
