//! The account record as stored in state-trie leaves.

use ethereum_types::{H256, U256};
use hex_literal::hex;
use rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

/// Keccak-256 of empty input; the code hash of accounts that carry no code.
pub const EMPTY_CODE_HASH: H256 = H256(hex!(
    "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
));

/// An Ethereum account, RLP-encoded into a state-trie leaf.
#[derive(
    RlpEncodable, RlpDecodable, Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize,
)]
pub struct Account {
    /// Number of transactions sent from this account.
    pub nonce: u64,
    /// Balance in the chain's base unit.
    pub balance: U256,
    /// Root hash of the account's storage trie.
    pub storage_root: H256,
    /// Keccak-256 of the account's code.
    pub code_hash: H256,
}

impl Account {
    /// Decodes an account from a state-trie leaf blob.
    pub fn decode(blob: &[u8]) -> Result<Self, rlp::DecoderError> {
        rlp::decode(blob)
    }

    /// The account's RLP encoding, as it appears in a leaf.
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Whether the account carries code.
    pub fn has_code(&self) -> bool {
        self.code_hash != EMPTY_CODE_HASH
    }
}
