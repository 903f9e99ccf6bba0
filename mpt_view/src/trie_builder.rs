//! Bottom-up construction of Merkle-Patricia tries into a node store.
//!
//! This is the write half of the crate: given a set of key/value pairs, build
//! the canonical trie over them, persist every hashed node into a
//! [`NodeStoreMut`], and hand back the root hash for a [`TrieView`] to open.
//! Construction is bottom-up over the sorted keys rather than by repeated
//! insertion, which keeps the node encodings single-pass.
//!
//! [`TrieView`]: crate::view::TrieView

use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::keccak;
use log::trace;
use rlp::RlpStream;

use crate::nibbles::{Nibble, NibblePath};
use crate::store::NodeStoreMut;
use crate::EMPTY_TRIE_ROOT;

/// The encoding of a freshly built node: either hashed and persisted, or
/// small enough (< 32 bytes) to be embedded in its parent.
#[derive(Clone, Debug)]
enum EncodedNode {
    Raw(Bytes),
    Hashed(H256),
}

/// Builds the trie over `entries` into `store` and returns its root hash.
///
/// Keys are 32-byte trie keys (already hashed for secure tries); values are
/// stored verbatim, so callers RLP-encode them first. Duplicate keys collapse
/// to a single entry. The root node is always persisted under its hash, even
/// when its encoding is under 32 bytes.
pub fn build_trie<S, I>(entries: I, store: &S) -> H256
where
    S: NodeStoreMut + ?Sized,
    I: IntoIterator<Item = (H256, Vec<u8>)>,
{
    let mut sorted: Vec<(NibblePath, Bytes)> = entries
        .into_iter()
        .map(|(k, v)| (NibblePath::from_keybytes(k.as_bytes()), Bytes::from(v)))
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted.dedup_by(|a, b| a.0 == b.0);

    if sorted.is_empty() {
        return EMPTY_TRIE_ROOT;
    }

    let root = encode_subtrie(&sorted, 0, store);
    let root_hash = match root {
        EncodedNode::Hashed(h) => h,
        EncodedNode::Raw(blob) => {
            let h = keccak(&blob);
            store.insert_node(h, blob);
            h
        }
    };

    trace!("built trie with root {root_hash:x}");
    root_hash
}

/// Encodes the subtrie over `entries`, all of which share their first
/// `depth` nibbles.
fn encode_subtrie<S: NodeStoreMut + ?Sized>(
    entries: &[(NibblePath, Bytes)],
    depth: usize,
    store: &S,
) -> EncodedNode {
    if entries.len() == 1 {
        let (path, value) = &entries[0];
        let mut key = NibblePath::from(&path.as_slice()[depth..]);
        key.push_terminator();

        let mut stream = RlpStream::new_list(2);
        stream.append(&key.to_hex_prefix());
        stream.append(&value.as_ref());
        return persist(stream.out().freeze(), store);
    }

    // The keys are sorted, so the shared prefix of the first and last entry
    // is shared by all of them.
    let first = entries[0].0.as_slice();
    let last = entries[entries.len() - 1].0.as_slice();
    let mut split = depth;
    while split < first.len() && split < last.len() && first[split] == last[split] {
        split += 1;
    }

    if split > depth {
        let child = encode_branch(entries, split, store);

        let mut stream = RlpStream::new_list(2);
        stream.append(&NibblePath::from(&first[depth..split]).to_hex_prefix());
        append_child(&mut stream, child);
        return persist(stream.out().freeze(), store);
    }

    encode_branch(entries, depth, store)
}

/// Encodes a branch node over `entries`, which diverge at nibble `depth`.
fn encode_branch<S: NodeStoreMut + ?Sized>(
    entries: &[(NibblePath, Bytes)],
    depth: usize,
    store: &S,
) -> EncodedNode {
    // A key that ends exactly here becomes the branch value. Sorting places
    // it first.
    let (value, entries) = match entries[0].0.len() == depth {
        true => (Some(&entries[0].1), &entries[1..]),
        false => (None, entries),
    };

    let mut stream = RlpStream::new_list(17);
    let mut i = 0;
    for nibble in 0..16 as Nibble {
        let start = i;
        while i < entries.len() && entries[i].0.as_slice()[depth] == nibble {
            i += 1;
        }

        match start == i {
            true => {
                stream.append_empty_data();
            }
            false => {
                let child = encode_subtrie(&entries[start..i], depth + 1, store);
                append_child(&mut stream, child);
            }
        }
    }
    match value {
        Some(v) => stream.append(&v.as_ref()),
        None => stream.append_empty_data(),
    };

    persist(stream.out().freeze(), store)
}

fn append_child(stream: &mut RlpStream, child: EncodedNode) {
    match child {
        EncodedNode::Raw(blob) => stream.append_raw(&blob, 1),
        EncodedNode::Hashed(h) => stream.append(&h.as_bytes()),
    };
}

/// Hashes and stores encodings of 32 bytes or more; smaller encodings are
/// embedded in their parent.
fn persist<S: NodeStoreMut + ?Sized>(blob: Bytes, store: &S) -> EncodedNode {
    match blob.len() < 32 {
        true => EncodedNode::Raw(blob),
        false => {
            let h = keccak(&blob);
            store.insert_node(h, blob);
            EncodedNode::Hashed(h)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use eth_trie::{EthTrie, MemoryDB, Trie};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::store::MemoryNodeStore;
    use crate::testing_utils::common_setup;

    /// Computes the same root through `eth_trie` as an independent check.
    fn reference_root(entries: &[(H256, Vec<u8>)]) -> H256 {
        let memdb = Arc::new(MemoryDB::new(true));
        let mut trie = EthTrie::new(memdb);
        for (k, v) in entries {
            trie.insert(k.as_bytes(), v).unwrap();
        }
        H256(trie.root_hash().unwrap().0)
    }

    fn random_entries(n: usize, seed: u64) -> Vec<(H256, Vec<u8>)> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let key = H256(rng.gen());
                let len = rng.gen_range(1..=32);
                let value: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                (key, value)
            })
            .collect()
    }

    #[test]
    fn empty_trie_has_the_canonical_empty_root() {
        common_setup();
        let store = MemoryNodeStore::new();
        assert_eq!(build_trie(Vec::new(), &store), EMPTY_TRIE_ROOT);
        assert!(store.is_empty());
    }

    #[test]
    fn single_entry_matches_reference() {
        common_setup();
        let entries = vec![(H256::repeat_byte(0x11), vec![0xab; 40])];

        let store = MemoryNodeStore::new();
        assert_eq!(
            build_trie(entries.clone(), &store),
            reference_root(&entries)
        );
    }

    #[test]
    fn random_tries_match_reference() {
        common_setup();
        for seed in 0..4 {
            let entries = random_entries(64, seed);
            let store = MemoryNodeStore::new();

            assert_eq!(
                build_trie(entries.clone(), &store),
                reference_root(&entries),
                "seed {seed}"
            );
        }
    }

    #[test]
    fn small_values_produce_inline_nodes_and_still_match() {
        common_setup();
        // One-byte values keep most leaf encodings under 32 bytes.
        let mut rng = StdRng::seed_from_u64(0xbeef);
        let entries: Vec<(H256, Vec<u8>)> =
            (0..32).map(|_| (H256(rng.gen()), vec![rng.gen()])).collect();

        let store = MemoryNodeStore::new();
        assert_eq!(
            build_trie(entries.clone(), &store),
            reference_root(&entries)
        );
    }
}
