//! A four-block chain fixture: a bank account funding transfers at block 1,
//! a contract created with one initialized slot at block 2, and four touched
//! slots at block 3. State and storage tries for every block live in one
//! shared in-memory chain store.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::str::FromStr;

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use mpt_view::trie_builder::build_trie;
use mpt_view::EMPTY_TRIE_ROOT;
use statediff::account::{Account, EMPTY_CODE_HASH};
use statediff::store::MemoryChainStore;

pub const BANK_ADDRESS: &str = "71562b71999873db5b286df957af199ec94617f7";
pub const ACCOUNT1_ADDRESS: &str = "703c4b2bd70c169f5717101caee543299fc946c7";
pub const CONTRACT_ADDRESS: &str = "ae9bea628c4ce503dcfd7e305cab4e29e7476592";

pub const BANK_FUNDS: u64 = 100_000_000;
pub const TRANSFER_AMOUNT: u64 = 10_000;
pub const MINING_REWARD: u64 = 2_000_000_000_000_000_000;

#[derive(Clone, Copy, Debug)]
pub struct TestBlock {
    pub number: U256,
    pub hash: H256,
    pub state_root: H256,
}

pub struct TestChain {
    pub store: MemoryChainStore,
    pub blocks: Vec<TestBlock>,
    pub bank: Address,
    pub account1: Address,
    pub burn: Address,
    pub contract: Address,
    pub code: Vec<u8>,
    pub code_hash: H256,
    /// The contract's storage roots at blocks 2 and 3.
    pub storage_roots: (H256, H256),
    /// Account states per block, for assertions.
    pub accounts: Vec<BTreeMap<Address, Account>>,
}

pub fn address(hex: &str) -> Address {
    Address::from_str(hex).unwrap()
}

pub fn leaf_key(address: Address) -> Vec<u8> {
    keccak(address.as_bytes()).as_bytes().to_vec()
}

pub fn slot_key(slot: u64) -> H256 {
    keccak(H256::from_low_u64_be(slot).as_bytes())
}

pub fn slot_value(word: u64) -> Vec<u8> {
    rlp::encode(&word).to_vec()
}

fn state_root(store: &MemoryChainStore, accounts: &BTreeMap<Address, Account>) -> H256 {
    build_trie(
        accounts
            .iter()
            .map(|(address, account)| (keccak(address.as_bytes()), account.encode())),
        store,
    )
}

fn plain_account(nonce: u64, balance: u64) -> Account {
    Account {
        nonce,
        balance: U256::from(balance),
        storage_root: EMPTY_TRIE_ROOT,
        code_hash: EMPTY_CODE_HASH,
    }
}

impl TestChain {
    pub fn new() -> Self {
        let store = MemoryChainStore::new();

        let bank = address(BANK_ADDRESS);
        let account1 = address(ACCOUNT1_ADDRESS);
        let burn = Address::zero();
        let contract = address(CONTRACT_ADDRESS);
        for a in [bank, account1, burn, contract] {
            store.insert_address_preimage(a);
        }

        let code = vec![0x60, 0x80, 0x60, 0x40, 0x52, 0x00];
        let code_hash = store.insert_code(code.clone());

        // Block 2 initializes slot 3; block 3 touches slots 0 through 3.
        let storage_root_2 = build_trie(
            vec![(slot_key(3), slot_value(1))],
            &store,
        );
        let storage_root_3 = build_trie(
            vec![
                (slot_key(0), slot_value(9)),
                (slot_key(1), slot_value(4)),
                (slot_key(2), slot_value(2)),
                (slot_key(3), slot_value(3)),
            ],
            &store,
        );

        // Block 0: the bank alone.
        let block0: BTreeMap<Address, Account> =
            [(bank, plain_account(0, BANK_FUNDS))].into_iter().collect();

        // Block 1: the bank transfers to account1; the miner's burn address
        // is credited.
        let mut block1 = block0.clone();
        block1.insert(bank, plain_account(1, BANK_FUNDS - TRANSFER_AMOUNT));
        block1.insert(account1, plain_account(0, TRANSFER_AMOUNT));
        block1.insert(burn, plain_account(0, MINING_REWARD));

        // Block 2: account1 deploys the contract.
        let mut block2 = block1.clone();
        block2.insert(account1, plain_account(1, TRANSFER_AMOUNT));
        block2.insert(
            contract,
            Account {
                nonce: 1,
                balance: U256::zero(),
                storage_root: storage_root_2,
                code_hash,
            },
        );

        // Block 3: only the contract's storage changes.
        let mut block3 = block2.clone();
        block3.insert(
            contract,
            Account {
                nonce: 1,
                balance: U256::zero(),
                storage_root: storage_root_3,
                code_hash,
            },
        );

        let accounts = vec![block0, block1, block2, block3];
        let blocks = accounts
            .iter()
            .enumerate()
            .map(|(number, accounts)| TestBlock {
                number: U256::from(number),
                hash: H256::repeat_byte(0xb0 + number as u8),
                state_root: state_root(&store, accounts),
            })
            .collect();

        Self {
            store,
            blocks,
            bank,
            account1,
            burn,
            contract,
            code,
            code_hash,
            storage_roots: (storage_root_2, storage_root_3),
            accounts,
        }
    }

    pub fn account_at(&self, block: usize, address: Address) -> Account {
        self.accounts[block][&address]
    }
}
