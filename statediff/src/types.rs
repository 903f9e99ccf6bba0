//! The output types of the diff builder and their wire encoding.
//!
//! The wire form is RLP. An [`AccountDiff`] encodes as
//! `[key, value, storage]`, extended with `[.., proof, path]` when paths and
//! proofs were requested; a [`StorageDiff`] likewise. A [`StateDiff`] encodes
//! as `[block_number, block_hash, updated_accounts]` — the shape subscribers
//! receive — with [`StateDiff::encode_full`] as the five-list variant that
//! keeps the created/deleted partitions for persistence sinks.

use ethereum_types::{H256, U256};
use mpt_view::nibbles::NibblePath;
use rlp::{Encodable, RlpStream};
use serde::{Deserialize, Serialize};

/// Which side of the comparison an account landed on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum DiffKind {
    /// Present only in the new trie.
    Created,
    /// Present in both tries with differing leaves.
    Updated,
    /// Present only in the old trie.
    Deleted,
}

impl DiffKind {
    /// The action name persistence sinks record.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffKind::Created => "created",
            DiffKind::Updated => "updated",
            DiffKind::Deleted => "deleted",
        }
    }
}

/// An old/new pair for one account field. One side is absent when the
/// account only exists on one side of the comparison.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct FieldDiff<T> {
    /// The field's value in the old state, if the account existed there.
    pub old_value: Option<T>,
    /// The field's value in the new state, if the account exists there.
    pub new_value: Option<T>,
}

impl<T> FieldDiff<T> {
    /// A field of a created account: new side only.
    pub fn created(new: T) -> Self {
        Self {
            old_value: None,
            new_value: Some(new),
        }
    }

    /// A field of a deleted account: old side only.
    pub fn deleted(old: T) -> Self {
        Self {
            old_value: Some(old),
            new_value: None,
        }
    }

    /// A field of an updated account: both sides.
    pub fn updated(old: T, new: T) -> Self {
        Self {
            old_value: Some(old),
            new_value: Some(new),
        }
    }
}

/// One storage slot's change, or (with `leaf` false) a changed internal node
/// of the storage trie.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct StorageDiff {
    /// Whether this entry is a slot (leaf) rather than an internal node.
    pub leaf: bool,
    /// The slot's trie key: `keccak256(slot number)`. Empty for internal
    /// nodes.
    pub key: Vec<u8>,
    /// The slot's RLP-encoded word in the old state, if it existed there.
    pub old_value: Option<Vec<u8>>,
    /// The slot's RLP-encoded word in the new state. For internal nodes,
    /// the node's encoding.
    pub new_value: Option<Vec<u8>>,
    /// The slot's terminated nibble path, when paths and proofs were
    /// requested.
    pub path: Option<NibblePath>,
    /// Merkle proof against the storage root, root first, when requested.
    pub proof: Option<Vec<Vec<u8>>>,
}

impl StorageDiff {
    /// The value the wire encoding carries: the new side when present,
    /// otherwise the old.
    pub fn wire_value(&self) -> &[u8] {
        self.new_value
            .as_deref()
            .or(self.old_value.as_deref())
            .unwrap_or_default()
    }
}

impl Encodable for StorageDiff {
    fn rlp_append(&self, s: &mut RlpStream) {
        let with_paths = self.path.is_some() && self.proof.is_some();
        s.begin_list(match with_paths {
            false => 2,
            true => 4,
        });
        s.append(&self.key);
        s.append(&self.wire_value());
        if with_paths {
            append_proof_and_path(s, self.proof.as_deref(), self.path.as_ref());
        }
    }
}

/// One account's change, or (with `leaf` false) a changed internal node of
/// the state trie.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct AccountDiff {
    /// Which side of the comparison the account landed on.
    pub kind: Option<DiffKind>,
    /// Whether this entry is an account leaf rather than an internal node.
    pub leaf: bool,
    /// The account's trie key: `keccak256(address)`. Empty for internal
    /// nodes.
    pub key: Vec<u8>,
    /// The RLP-encoded account (new side when it exists, otherwise old).
    /// For internal nodes, the node's encoding.
    pub value: Vec<u8>,
    /// Nonce on each side of the comparison.
    pub nonce: FieldDiff<u64>,
    /// Balance on each side of the comparison.
    pub balance: FieldDiff<U256>,
    /// Storage root on each side of the comparison.
    pub contract_root: FieldDiff<H256>,
    /// Code hash on each side of the comparison.
    pub code_hash: FieldDiff<H256>,
    /// The account's code, fetched for created accounts; empty otherwise.
    pub code: Vec<u8>,
    /// The account's terminated nibble path, when paths and proofs were
    /// requested.
    pub path: Option<NibblePath>,
    /// Merkle proof against the state root, root first, when requested.
    pub proof: Option<Vec<Vec<u8>>>,
    /// Per-slot changes of the account's storage trie.
    pub storage: Vec<StorageDiff>,
}

impl Encodable for AccountDiff {
    fn rlp_append(&self, s: &mut RlpStream) {
        let with_paths = self.path.is_some() && self.proof.is_some();
        s.begin_list(match with_paths {
            false => 3,
            true => 5,
        });
        s.append(&self.key);
        s.append(&self.value);
        s.append_list(&self.storage);
        if with_paths {
            append_proof_and_path(s, self.proof.as_deref(), self.path.as_ref());
        }
    }
}

fn append_proof_and_path(s: &mut RlpStream, proof: Option<&[Vec<u8>]>, path: Option<&NibblePath>) {
    let proof = proof.unwrap_or_default();
    s.begin_list(proof.len());
    for node in proof {
        s.append(node);
    }

    let path = path.map(|p| p.as_slice().to_vec()).unwrap_or_default();
    s.append(&path);
}

/// The block-level change set.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct StateDiff {
    /// The diffed block's number.
    pub block_number: U256,
    /// The diffed block's hash.
    pub block_hash: H256,
    /// Accounts present only in the new trie.
    pub created_accounts: Vec<AccountDiff>,
    /// Accounts present only in the old trie.
    pub deleted_accounts: Vec<AccountDiff>,
    /// Accounts present in both tries with differing state.
    pub updated_accounts: Vec<AccountDiff>,
}

impl StateDiff {
    /// Whether the diff records no changes at all.
    pub fn is_empty(&self) -> bool {
        self.created_accounts.is_empty()
            && self.deleted_accounts.is_empty()
            && self.updated_accounts.is_empty()
    }

    /// The full five-field encoding, keeping the created/deleted partitions.
    pub fn encode_full(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(5);
        s.append(&self.block_number);
        s.append(&self.block_hash);
        s.append_list(&self.created_accounts);
        s.append_list(&self.deleted_accounts);
        s.append_list(&self.updated_accounts);
        s.out().to_vec()
    }
}

/// The wire form subscribers receive: `[block_number, block_hash,
/// updated_accounts]`.
impl Encodable for StateDiff {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.block_number);
        s.append(&self.block_hash);
        s.append_list(&self.updated_accounts);
    }
}

/// The packaged data sent to subscribers.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Payload {
    /// The RLP encoding of a [`StateDiff`].
    #[serde(rename = "stateDiff")]
    pub state_diff_rlp: Vec<u8>,
}

impl Payload {
    /// Encodes a diff into its subscriber payload.
    pub fn encode(diff: &StateDiff) -> Self {
        Self {
            state_diff_rlp: rlp::encode(diff).to_vec(),
        }
    }

    /// Whether the payload carries nothing.
    pub fn is_empty(&self) -> bool {
        self.state_diff_rlp.is_empty()
    }
}
