//! Iteration over the nodes of one trie that are absent from another.
//!
//! The stream yields every node reachable in trie `b` whose hash does not
//! appear at the same structural position in trie `a`. When the two walks
//! meet a position where both sides carry the same (non-zero) hash, the
//! entire subtree is provably identical and both cursors skip it. Leaves
//! emitted by the stream are exactly "new or changed" with respect to `a`.

use std::cmp::Ordering;

use bytes::Bytes;
use ethereum_types::H256;

use crate::nibbles::Nibble;
use crate::store::NodeStore;
use crate::view::NodeIterator;
use crate::ViewError;

/// A walk over the nodes of `b` that `a` does not have.
///
/// Accessors mirror [`NodeIterator`] and describe the current node of `b`.
#[derive(Debug)]
pub struct DifferenceIterator<'s, S: NodeStore + ?Sized> {
    a: NodeIterator<'s, S>,
    b: NodeIterator<'s, S>,
    a_done: bool,
}

impl<'s, S: NodeStore + ?Sized> DifferenceIterator<'s, S> {
    /// Builds the difference stream `b - a`.
    pub fn new(a: NodeIterator<'s, S>, b: NodeIterator<'s, S>) -> Result<Self, ViewError> {
        let mut a = a;
        let a_done = !a.next(true)?;

        Ok(Self { a, b, a_done })
    }

    /// Advances to the next node of `b` that is missing from `a`.
    pub fn next(&mut self) -> Result<bool, ViewError> {
        // Invariants: `b` advances at least once per call, and on entry `a`'s
        // position is never before `b`'s.
        if !self.b.next(true)? {
            return Ok(false);
        }

        if self.a_done {
            // Everything left in `b` is new.
            return Ok(true);
        }

        loop {
            match compare_positions(&self.a, &self.b) {
                Ordering::Less => {
                    // `b` has moved past `a`; catch `a` up.
                    if !self.a.next(true)? {
                        self.a_done = true;
                        return Ok(true);
                    }
                }
                Ordering::Greater => {
                    // `b` is at a node `a` has not got.
                    return Ok(true);
                }
                Ordering::Equal => {
                    // Identical nodes. Hashed ones prove their whole subtree
                    // equal; inline ones must still be entered.
                    let descend = self.b.hash().is_zero();
                    if !self.b.next(descend)? {
                        return Ok(false);
                    }
                    if !self.a.next(descend)? {
                        self.a_done = true;
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// The path of the current node.
    pub fn path(&self) -> &[Nibble] {
        self.b.path()
    }

    /// The hash of the current node; zero for inline nodes.
    pub fn hash(&self) -> H256 {
        self.b.hash()
    }

    /// Whether the current node is a leaf.
    pub fn leaf(&self) -> bool {
        self.b.leaf()
    }

    /// The key bytes of the current leaf, terminator stripped.
    pub fn leaf_key(&self) -> Option<Vec<u8>> {
        self.b.leaf_key()
    }

    /// The value bytes of the current leaf.
    pub fn leaf_blob(&self) -> Option<Bytes> {
        self.b.leaf_blob()
    }

    /// The raw RLP encoding of the current node.
    pub fn node_blob(&self) -> Option<Bytes> {
        self.b.node_blob()
    }

    /// The Merkle proof of the current node against `b`'s root, root first.
    pub fn proof(&self) -> Vec<Bytes> {
        self.b.proof()
    }
}

/// Orders two walk positions the way the pre-order walk emits them: by path,
/// then leafness, then hash, then leaf payload.
fn compare_positions<S: NodeStore + ?Sized>(
    a: &NodeIterator<'_, S>,
    b: &NodeIterator<'_, S>,
) -> Ordering {
    a.path()
        .cmp(b.path())
        .then_with(|| match (a.leaf(), b.leaf()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => Ordering::Equal,
        })
        .then_with(|| a.hash().cmp(&b.hash()))
        .then_with(|| a.leaf_blob().cmp(&b.leaf_blob()))
}
