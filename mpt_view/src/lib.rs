//! Read-only views over Ethereum Merkle-Patricia tries backed by a
//! content-addressed node store.
//!
//! Unlike in-memory trie libraries, nothing here owns trie data: a
//! [`TrieView`][view::TrieView] is a root hash plus a borrowed
//! [`NodeStore`][store::NodeStore], and nodes are fetched and decoded on
//! demand as a walk progresses. The crate provides:
//! - [`nibbles`]: nibble paths and the hex-prefix ("compact") codec,
//! - [`node`]: the RLP codec for stored trie nodes,
//! - [`store`]: the content-addressed read capability,
//! - [`view`]: pre-order node iteration with subtree-skip control,
//! - [`difference`]: iteration over the nodes of one trie that are absent
//!   from another,
//! - [`trie_builder`]: bottom-up construction of tries into a store.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod difference;
pub mod nibbles;
pub mod node;
pub mod store;
pub mod trie_builder;
pub mod view;

#[cfg(test)]
pub(crate) mod testing_utils;

use ethereum_types::H256;
use hex_literal::hex;

/// The root hash of an empty trie: `keccak256(rlp(""))`.
pub const EMPTY_TRIE_ROOT: H256 = H256(hex!(
    "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
));

/// An error encountered while walking a trie view.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ViewError {
    /// A node read from the backing store failed.
    #[error(transparent)]
    Store(#[from] store::StoreError),

    /// A stored blob did not decode as a trie node.
    #[error(transparent)]
    Decode(#[from] node::NodeDecodeError),
}
