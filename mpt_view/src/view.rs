//! Read-only trie views and the pre-order node iterator.

use bytes::Bytes;
use ethereum_types::H256;
use log::trace;

use crate::nibbles::{Nibble, NibblePath};
use crate::node::{decode_node, Node, NodeRef};
use crate::store::NodeStore;
use crate::{ViewError, EMPTY_TRIE_ROOT};

/// A read-only trie rooted at a known hash, backed by a borrowed node store.
#[derive(Debug)]
pub struct TrieView<'s, S: NodeStore + ?Sized> {
    root: H256,
    store: &'s S,
}

impl<'s, S: NodeStore + ?Sized> TrieView<'s, S> {
    /// Opens the trie rooted at `root`.
    ///
    /// Fails with [`StoreError::NotFound`][crate::store::StoreError::NotFound]
    /// if the root node is absent from the store. The canonical empty root is
    /// always openable.
    pub fn open(root: H256, store: &'s S) -> Result<Self, ViewError> {
        if root != EMPTY_TRIE_ROOT {
            store.node(root)?;
        }

        Ok(Self { root, store })
    }

    /// The root hash this view was opened at.
    pub fn root(&self) -> H256 {
        self.root
    }

    /// Returns a pre-order iterator over every node of the trie.
    pub fn iter(&self) -> NodeIterator<'s, S> {
        NodeIterator {
            store: self.store,
            root: self.root,
            stack: Vec::new(),
            started: false,
        }
    }

    /// Returns an iterator positioned at the first node whose path is not
    /// before `start`. An empty `start` is equivalent to [`Self::iter`].
    pub fn iter_from(&self, start: &[Nibble]) -> Result<NodeIterator<'s, S>, ViewError> {
        let mut it = self.iter();
        if start.is_empty() {
            return Ok(it);
        }

        while it.next(true)? {
            if it.path() >= start {
                break;
            }
        }
        Ok(it)
    }

    /// Looks up the value stored under `key` (key bytes, not nibbles).
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, ViewError> {
        if self.root == EMPTY_TRIE_ROOT {
            return Ok(None);
        }

        let nibbles = NibblePath::from_keybytes(key);
        let mut remaining = nibbles.as_slice();
        let mut node = decode_node(&self.store.node(self.root)?)?;

        loop {
            match node {
                Node::Empty => return Ok(None),
                Node::Leaf { path, value } => {
                    return Ok(match path.without_terminator() == remaining {
                        true => Some(value),
                        false => None,
                    })
                }
                Node::Extension { path, child } => {
                    let prefix = path.as_slice();
                    if !remaining.starts_with(prefix) {
                        return Ok(None);
                    }
                    remaining = &remaining[prefix.len()..];
                    node = self.resolve_ref(&child)?;
                }
                Node::Branch { children, value } => match remaining.split_first() {
                    None => return Ok(value),
                    Some((nibble, rest)) => {
                        remaining = rest;
                        match &children[*nibble as usize] {
                            NodeRef::Empty => return Ok(None),
                            child => node = self.resolve_ref(child)?,
                        }
                    }
                },
            }
        }
    }

    fn resolve_ref(&self, r: &NodeRef) -> Result<Node, ViewError> {
        let blob = match r {
            NodeRef::Hash(h) => self.store.node(*h)?,
            NodeRef::Inline(raw) => raw.clone(),
            NodeRef::Empty => return Ok(Node::Empty),
        };
        Ok(decode_node(&blob)?)
    }
}

/// One suspended node on the iterator's walk stack.
#[derive(Clone, Debug)]
struct IterEntry {
    node: Node,
    /// The node's raw RLP encoding.
    blob: Bytes,
    /// The node's hash; zero for inline nodes.
    hash: H256,
    /// The full path of the node. Leaves carry their key nibbles and the
    /// terminator; branches and extensions sit at the path consumed to reach
    /// them.
    path: NibblePath,
    /// The next child slot to visit when descending resumes. Branches use
    /// `0..=16` (16 is the value slot); extensions use `0..=1`.
    next_child: usize,
}

/// A pre-order walk over every reachable node of a trie.
///
/// This is deliberately not a [`std::iter::Iterator`]: each advance takes a
/// `descend` flag that controls whether the current node's subtree is entered
/// or skipped, and a store read can fail mid-walk.
#[derive(Debug)]
pub struct NodeIterator<'s, S: NodeStore + ?Sized> {
    store: &'s S,
    root: H256,
    stack: Vec<IterEntry>,
    started: bool,
}

impl<S: NodeStore + ?Sized> NodeIterator<'_, S> {
    /// Advances to the next node in pre-order and reports whether one exists.
    /// With `descend` false, the current node's children are skipped.
    pub fn next(&mut self, descend: bool) -> Result<bool, ViewError> {
        if !self.started {
            self.started = true;
            if self.root == EMPTY_TRIE_ROOT {
                return Ok(false);
            }

            let root = self.resolve(NodeRef::Hash(self.root), NibblePath::new())?;
            self.stack.push(root);
            return Ok(true);
        }

        if self.stack.is_empty() {
            return Ok(false);
        }

        if descend {
            if let Some(child) = self.next_child_of_top()? {
                self.stack.push(child);
                return Ok(true);
            }
        }

        // The current subtree is exhausted (or skipped); climb until a parent
        // has an unvisited child.
        self.stack.pop();
        while !self.stack.is_empty() {
            if let Some(child) = self.next_child_of_top()? {
                self.stack.push(child);
                return Ok(true);
            }
            self.stack.pop();
        }

        Ok(false)
    }

    /// The path of the current node. Empty once the walk is exhausted.
    pub fn path(&self) -> &[Nibble] {
        self.stack.last().map(|e| e.path.as_slice()).unwrap_or(&[])
    }

    /// The hash of the current node; zero for inline nodes.
    pub fn hash(&self) -> H256 {
        self.stack.last().map(|e| e.hash).unwrap_or_default()
    }

    /// Whether the current node is a leaf.
    pub fn leaf(&self) -> bool {
        matches!(
            self.stack.last(),
            Some(IterEntry {
                node: Node::Leaf { .. },
                ..
            })
        )
    }

    /// The key bytes of the current leaf, terminator stripped.
    pub fn leaf_key(&self) -> Option<Vec<u8>> {
        match self.stack.last() {
            Some(IterEntry {
                node: Node::Leaf { .. },
                path,
                ..
            }) => path.to_keybytes().ok(),
            _ => None,
        }
    }

    /// The value bytes of the current leaf.
    pub fn leaf_blob(&self) -> Option<Bytes> {
        match self.stack.last() {
            Some(IterEntry {
                node: Node::Leaf { value, .. },
                ..
            }) => Some(value.clone()),
            _ => None,
        }
    }

    /// The raw RLP encoding of the current node.
    pub fn node_blob(&self) -> Option<Bytes> {
        self.stack.last().map(|e| e.blob.clone())
    }

    /// The Merkle proof of the current node: the encodings of every hashed
    /// node on the path from the root to it, root first. Inline nodes are
    /// embedded in their parents and carry no entry of their own.
    pub fn proof(&self) -> Vec<Bytes> {
        self.stack
            .iter()
            .filter(|e| !e.hash.is_zero())
            .map(|e| e.blob.clone())
            .collect()
    }

    /// Pulls the next unvisited child out of the node on top of the stack.
    fn next_child_of_top(&mut self) -> Result<Option<IterEntry>, ViewError> {
        enum Pending {
            Ref(NodeRef, NibblePath),
            BranchValue(Bytes, NibblePath),
            None,
        }

        let top = self.stack.last_mut().expect("walk stack is non-empty");
        let pending = match &top.node {
            Node::Empty | Node::Leaf { .. } => Pending::None,
            Node::Extension { path, child } => match top.next_child {
                0 => {
                    top.next_child = 1;
                    let mut p = top.path.clone();
                    p.extend(path);
                    Pending::Ref(child.clone(), p)
                }
                _ => Pending::None,
            },
            Node::Branch { children, value } => {
                let mut found = Pending::None;
                while top.next_child <= 16 {
                    let slot = top.next_child;
                    top.next_child += 1;

                    if slot == 16 {
                        if let Some(v) = value {
                            let mut p = top.path.clone();
                            p.push_terminator();
                            found = Pending::BranchValue(v.clone(), p);
                        }
                        break;
                    }

                    if children[slot] != NodeRef::Empty {
                        let mut p = top.path.clone();
                        p.push(slot as Nibble);
                        found = Pending::Ref(children[slot].clone(), p);
                        break;
                    }
                }
                found
            }
        };

        match pending {
            Pending::None => Ok(None),
            Pending::Ref(r, path) => Ok(Some(self.resolve(r, path)?)),
            Pending::BranchValue(value, path) => Ok(Some(IterEntry {
                node: Node::Leaf {
                    path: {
                        let mut p = NibblePath::new();
                        p.push_terminator();
                        p
                    },
                    value: value.clone(),
                },
                blob: value,
                hash: H256::zero(),
                path,
                next_child: 0,
            })),
        }
    }

    /// Reads and decodes the node behind `r`, addressed at `path`.
    fn resolve(&self, r: NodeRef, path: NibblePath) -> Result<IterEntry, ViewError> {
        let (blob, hash) = match r {
            NodeRef::Hash(h) => (self.store.node(h)?, h),
            NodeRef::Inline(raw) => (raw, H256::zero()),
            NodeRef::Empty => (Bytes::from_static(&rlp::NULL_RLP), H256::zero()),
        };

        let node = decode_node(&blob)?;
        let path = match &node {
            Node::Leaf { path: key, .. } => {
                let mut p = path;
                p.extend(key);
                p
            }
            _ => path,
        };

        trace!("trie walk at {path:x} (hash: {hash:x})");
        Ok(IterEntry {
            node,
            blob,
            hash,
            path,
            next_child: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use keccak_hash::keccak;

    use super::*;
    use crate::store::{MemoryNodeStore, NodeStore, NodeStoreMut, StoreError};
    use crate::testing_utils::{common_setup, small_trie_entries};
    use crate::trie_builder::build_trie;

    #[test]
    fn open_fails_for_a_missing_root() {
        common_setup();
        let store = MemoryNodeStore::new();
        let missing = H256::repeat_byte(0x77);

        match TrieView::open(missing, &store) {
            Err(ViewError::Store(StoreError::NotFound(h))) => assert_eq!(h, missing),
            other => panic!("expected a missing-root failure, got {other:?}"),
        }
    }

    #[test]
    fn empty_trie_yields_nothing() {
        common_setup();
        let store = MemoryNodeStore::new();
        let view = TrieView::open(EMPTY_TRIE_ROOT, &store).unwrap();

        let mut it = view.iter();
        assert!(!it.next(true).unwrap());
        assert!(!it.leaf());
    }

    #[test]
    fn walk_yields_leaves_in_key_order() {
        common_setup();
        let store = MemoryNodeStore::new();
        let entries = small_trie_entries();
        let root = build_trie(entries.clone(), &store);

        let view = TrieView::open(root, &store).unwrap();
        let mut it = view.iter();

        let mut leaves = Vec::new();
        while it.next(true).unwrap() {
            if it.leaf() {
                leaves.push((
                    H256::from_slice(&it.leaf_key().unwrap()),
                    it.leaf_blob().unwrap().to_vec(),
                ));
            }
        }

        let mut expected = entries;
        expected.sort_by_key(|(k, _)| *k);
        assert_eq!(leaves, expected);
    }

    #[test]
    fn get_finds_every_inserted_value() {
        common_setup();
        let store = MemoryNodeStore::new();
        let entries = small_trie_entries();
        let root = build_trie(entries.clone(), &store);

        let view = TrieView::open(root, &store).unwrap();
        for (k, v) in &entries {
            assert_eq!(view.get(k.as_bytes()).unwrap(), Some(Bytes::from(v.clone())));
        }
        assert_eq!(view.get(H256::repeat_byte(0xee).as_bytes()).unwrap(), None);
    }

    #[test]
    fn skipping_the_root_subtree_ends_the_walk() {
        common_setup();
        let store = MemoryNodeStore::new();
        let root = build_trie(small_trie_entries(), &store);

        let view = TrieView::open(root, &store).unwrap();
        let mut it = view.iter();

        assert!(it.next(true).unwrap());
        assert_eq!(it.hash(), root);
        assert!(!it.next(false).unwrap());
    }

    #[test]
    fn proofs_link_back_to_the_root() {
        common_setup();
        let store = MemoryNodeStore::new();
        let entries = small_trie_entries();
        let root = build_trie(entries, &store);

        let view = TrieView::open(root, &store).unwrap();
        let mut it = view.iter();
        while it.next(true).unwrap() {
            if !it.leaf() {
                continue;
            }

            let proof = it.proof();
            assert!(!proof.is_empty());
            assert_eq!(keccak(&proof[0]), root);

            // Every non-root proof node is committed to by its predecessor.
            for pair in proof.windows(2) {
                let child_hash = keccak(&pair[1]);
                let parent = &pair[0];
                assert!(
                    parent
                        .windows(32)
                        .any(|w| w == child_hash.as_bytes()),
                    "parent does not commit to child"
                );
            }
        }
    }

    #[test]
    fn iter_from_skips_earlier_paths() {
        common_setup();
        let store = MemoryNodeStore::new();
        let entries = small_trie_entries();
        let root = build_trie(entries.clone(), &store);

        let mut sorted = entries;
        sorted.sort_by_key(|(k, _)| *k);
        let mid_key = sorted[sorted.len() / 2].0;
        let start = NibblePath::from_keybytes(mid_key.as_bytes());

        let view = TrieView::open(root, &store).unwrap();
        let mut it = view.iter_from(start.as_slice()).unwrap();

        let mut leaves = Vec::new();
        loop {
            if it.leaf() {
                leaves.push(H256::from_slice(&it.leaf_key().unwrap()));
            }
            if !it.next(true).unwrap() {
                break;
            }
        }

        let expected: Vec<H256> = sorted
            .iter()
            .map(|(k, _)| *k)
            .filter(|k| *k >= mid_key)
            .collect();
        assert_eq!(leaves, expected);
    }

    #[test]
    fn store_failures_surface_mid_walk() {
        common_setup();
        let store = MemoryNodeStore::new();
        let entries = small_trie_entries();
        let root = build_trie(entries, &store);

        // Rebuild into a second store holding only the root node.
        let partial = MemoryNodeStore::new();
        partial.insert_node(root, store.node(root).unwrap());

        let view = TrieView::open(root, &partial).unwrap();
        let mut it = view.iter();

        let mut outcome = Ok(true);
        while let Ok(true) = outcome {
            outcome = it.next(true);
        }
        assert!(matches!(
            outcome,
            Err(ViewError::Store(StoreError::NotFound(_)))
        ));
    }
}
