//! The content-addressed read capability that backs every trie view, plus an
//! in-memory implementation for tests and harnesses.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use ethereum_types::H256;
use parking_lot::RwLock;
use thiserror::Error;

/// An error encountered when reading from a node store.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum StoreError {
    /// The requested node is not present.
    #[error("node {0:x} is not present in the node store")]
    NotFound(H256),

    /// The backing store failed in some store-specific way.
    #[error("node store backend failure: {0}")]
    Backend(String),
}

/// Read access to trie nodes stored under their Keccak-256 hash.
///
/// Implementations are expected to be cheap to call repeatedly; a walk reads
/// one node per step.
pub trait NodeStore {
    /// Reads the RLP encoding of the node stored under `hash`.
    fn node(&self, hash: H256) -> Result<Bytes, StoreError>;
}

/// Write access for populating a node store.
pub trait NodeStoreMut: NodeStore {
    /// Stores a node's RLP encoding under its hash.
    fn insert_node(&self, hash: H256, blob: Bytes);
}

/// A shared, in-memory node store.
#[derive(Clone, Debug, Default)]
pub struct MemoryNodeStore {
    nodes: Arc<RwLock<HashMap<H256, Bytes>>>,
}

impl MemoryNodeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of nodes held.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether the store holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeStore for MemoryNodeStore {
    fn node(&self, hash: H256) -> Result<Bytes, StoreError> {
        self.nodes
            .read()
            .get(&hash)
            .cloned()
            .ok_or(StoreError::NotFound(hash))
    }
}

impl NodeStoreMut for MemoryNodeStore {
    fn insert_node(&self, hash: H256, blob: Bytes) {
        self.nodes.write().insert(hash, blob);
    }
}

impl<S: NodeStore + ?Sized> NodeStore for &S {
    fn node(&self, hash: H256) -> Result<Bytes, StoreError> {
        (**self).node(hash)
    }
}

impl<S: NodeStore + ?Sized> NodeStore for Arc<S> {
    fn node(&self, hash: H256) -> Result<Bytes, StoreError> {
        (**self).node(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryNodeStore::new();
        let hash = H256::repeat_byte(0xab);
        let blob = Bytes::from_static(&[0xc0]);

        assert_eq!(store.node(hash), Err(StoreError::NotFound(hash)));

        store.insert_node(hash, blob.clone());
        assert_eq!(store.node(hash), Ok(blob));
        assert_eq!(store.len(), 1);
    }
}
