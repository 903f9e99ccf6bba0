//! The state-diff builder.
//!
//! Given the parent and head state roots, the builder walks both tries with
//! a difference iterator in each direction. The leaves surfaced by the
//! old-to-new walk are the creations set, those surfaced by new-to-old the
//! deletions set; addresses present in both were updated, and their storage
//! tries are diffed recursively. A leaf's address is recovered through the
//! chain database's secure-key preimage table.

use std::collections::{HashMap, HashSet};

use ethereum_types::{Address, H256, U256};
use mpt_view::difference::DifferenceIterator;
use mpt_view::nibbles::NibblePath;
use mpt_view::view::TrieView;
use mpt_view::ViewError;
use thiserror::Error;
use tracing::{debug, trace};

use crate::account::Account;
use crate::config::{Config, ConfigError};
use crate::store::{secure_key, ChainStore};
use crate::types::{AccountDiff, DiffKind, FieldDiff, StateDiff, StorageDiff};

/// Stores the result of diff construction. Returns a [`StateDiffError`]
/// upon failure.
pub type StateDiffResult<T> = Result<T, StateDiffError>;

/// An error that fails the whole diff for a block.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum StateDiffError {
    /// A state root could not be opened against the node store.
    #[error("failed to open state trie {root:x}: {source}")]
    TrieOpen {
        /// The root that failed to open.
        root: H256,
        /// The store failure behind it.
        #[source]
        source: ViewError,
    },

    /// A trie walk failed mid-stream.
    #[error(transparent)]
    View(#[from] ViewError),

    /// A leaf path had no address preimage in the chain database.
    #[error("no address preimage for leaf key 0x{}", hex::encode(.leaf_key))]
    PreimageMissing {
        /// The leaf key whose preimage is absent.
        leaf_key: Vec<u8>,
    },

    /// A state leaf blob did not decode as an account.
    #[error("failed to decode account leaf 0x{}: {source}", hex::encode(.leaf_key))]
    AccountDecode {
        /// The leaf key whose blob failed to decode.
        leaf_key: Vec<u8>,
        /// The RLP failure behind it.
        #[source]
        source: rlp::DecoderError,
    },

    /// The configuration could not be interpreted.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A node-store lookup failed.
    #[error(transparent)]
    Store(#[from] mpt_view::store::StoreError),
}

/// A collected diff leaf: the decoded account plus everything needed to
/// build its [`AccountDiff`] later.
#[derive(Clone, Debug)]
struct DiffLeaf {
    account: Account,
    leaf_key: Vec<u8>,
    path: Option<NibblePath>,
    proof: Option<Vec<Vec<u8>>>,
}

type AccountsMap = HashMap<Address, DiffLeaf>;

/// Builds [`StateDiff`]s over a chain store.
#[derive(Debug)]
pub struct Builder<S> {
    store: S,
    watched_addresses: HashSet<Address>,
    paths_and_proofs: bool,
    intermediate_nodes: bool,
}

impl<S: ChainStore> Builder<S> {
    /// Creates a builder over `store` with the given options.
    pub fn new(store: S, config: &Config) -> StateDiffResult<Self> {
        Ok(Self {
            store,
            watched_addresses: config.watched_address_set()?,
            paths_and_proofs: config.paths_and_proofs,
            intermediate_nodes: config.intermediate_nodes,
        })
    }

    /// Builds the diff between the tries at `old_root` and `new_root`.
    ///
    /// Identical roots produce a diff with empty lists but the given block
    /// number and hash.
    pub fn build_state_diff(
        &self,
        old_root: H256,
        new_root: H256,
        block_number: U256,
        block_hash: H256,
    ) -> StateDiffResult<StateDiff> {
        debug!(%block_number, "building state diff from {old_root:x} to {new_root:x}");

        let old_trie = self.open(old_root)?;
        let new_trie = self.open(new_root)?;

        // Leaves reachable in new but not old are creations; the reverse
        // walk finds deletions. The intersection was updated.
        let (mut creations, mut created_nodes) = self.collect_diff_accounts(&old_trie, &new_trie)?;
        let (mut deletions, mut deleted_nodes) = self.collect_diff_accounts(&new_trie, &old_trie)?;

        self.retain_watched(&mut creations);
        self.retain_watched(&mut deletions);

        let mut updated_keys: Vec<Address> = creations
            .keys()
            .filter(|addr| deletions.contains_key(addr))
            .copied()
            .collect();
        updated_keys.sort_unstable();

        let updated_accounts =
            self.build_diff_incremental(&mut creations, &mut deletions, &updated_keys)?;
        let mut created_accounts = self.build_diff_eventual(creations, DiffKind::Created)?;
        let mut deleted_accounts = self.build_diff_eventual(deletions, DiffKind::Deleted)?;

        created_accounts.append(&mut created_nodes);
        deleted_accounts.append(&mut deleted_nodes);

        Ok(StateDiff {
            block_number,
            block_hash,
            created_accounts,
            deleted_accounts,
            updated_accounts,
        })
    }

    fn open(&self, root: H256) -> StateDiffResult<TrieView<'_, S>> {
        TrieView::open(root, &self.store).map_err(|source| StateDiffError::TrieOpen { root, source })
    }

    /// Walks `diff(a, b)` and decodes every emitted leaf into an account,
    /// keyed by its resolved address. Changed internal nodes are returned
    /// alongside when configured.
    fn collect_diff_accounts(
        &self,
        a: &TrieView<'_, S>,
        b: &TrieView<'_, S>,
    ) -> StateDiffResult<(AccountsMap, Vec<AccountDiff>)> {
        let mut accounts = AccountsMap::new();
        let mut nodes = Vec::new();

        let mut it = DifferenceIterator::new(a.iter(), b.iter())?;
        while it.next()? {
            trace!(
                "diff node at {} (hash {:x})",
                NibblePath::from(it.path()),
                it.hash()
            );

            if it.leaf() {
                let leaf_key = it.leaf_key().ok_or_else(|| StateDiffError::PreimageMissing {
                    leaf_key: it.path().to_vec(),
                })?;
                let address = self.address_by_leaf_key(&leaf_key)?;

                let blob = it.leaf_blob().unwrap_or_default();
                let account = Account::decode(&blob).map_err(|source| {
                    StateDiffError::AccountDecode {
                        leaf_key: leaf_key.clone(),
                        source,
                    }
                })?;

                trace!(?address, ?account, "decoded diff leaf");
                accounts.insert(
                    address,
                    DiffLeaf {
                        account,
                        leaf_key,
                        path: self
                            .paths_and_proofs
                            .then(|| NibblePath::from(it.path())),
                        proof: self
                            .paths_and_proofs
                            .then(|| it.proof().iter().map(|p| p.to_vec()).collect()),
                    },
                );
            } else if self.intermediate_nodes && !it.hash().is_zero() {
                nodes.push(AccountDiff {
                    kind: None,
                    leaf: false,
                    value: it.node_blob().unwrap_or_default().to_vec(),
                    path: self.paths_and_proofs.then(|| NibblePath::from(it.path())),
                    proof: self
                        .paths_and_proofs
                        .then(|| it.proof().iter().map(|p| p.to_vec()).collect()),
                    ..Default::default()
                });
            }
        }

        Ok((accounts, nodes))
    }

    /// Resolves a leaf key back to its address through the preimage table.
    fn address_by_leaf_key(&self, leaf_key: &[u8]) -> StateDiffResult<Address> {
        let preimage = self
            .store
            .get(&secure_key(leaf_key))?
            .ok_or_else(|| StateDiffError::PreimageMissing {
                leaf_key: leaf_key.to_vec(),
            })?;

        Ok(Address::from_slice(&preimage))
    }

    /// Builds the updated-account diffs and removes the addresses from both
    /// collection maps.
    fn build_diff_incremental(
        &self,
        creations: &mut AccountsMap,
        deletions: &mut AccountsMap,
        updated_keys: &[Address],
    ) -> StateDiffResult<Vec<AccountDiff>> {
        let mut diffs = Vec::with_capacity(updated_keys.len());

        for address in updated_keys {
            let new = creations.remove(address).expect("address from creations");
            let old = deletions.remove(address).expect("address from deletions");

            let storage =
                self.build_storage_diffs_incremental(old.account.storage_root, new.account.storage_root)?;

            diffs.push(AccountDiff {
                kind: Some(DiffKind::Updated),
                leaf: true,
                key: new.leaf_key,
                value: new.account.encode(),
                nonce: FieldDiff::updated(old.account.nonce, new.account.nonce),
                balance: FieldDiff::updated(old.account.balance, new.account.balance),
                contract_root: FieldDiff::updated(
                    old.account.storage_root,
                    new.account.storage_root,
                ),
                code_hash: FieldDiff::updated(old.account.code_hash, new.account.code_hash),
                code: Vec::new(),
                path: new.path,
                proof: new.proof,
                storage,
            });
        }

        Ok(diffs)
    }

    /// Builds one-sided diffs for accounts that only exist on one side of
    /// the comparison.
    fn build_diff_eventual(
        &self,
        accounts: AccountsMap,
        kind: DiffKind,
    ) -> StateDiffResult<Vec<AccountDiff>> {
        let mut entries: Vec<(Address, DiffLeaf)> = accounts.into_iter().collect();
        entries.sort_unstable_by_key(|(address, _)| *address);

        let mut diffs = Vec::with_capacity(entries.len());
        for (_, leaf) in entries {
            let storage = self.build_storage_diffs_eventual(leaf.account.storage_root, kind)?;

            let code = match kind {
                // Deleted accounts carry no code; created ones may.
                DiffKind::Deleted => Vec::new(),
                _ => self
                    .store
                    .get(leaf.account.code_hash.as_bytes())?
                    .map(|code| code.to_vec())
                    .unwrap_or_default(),
            };

            let is_deleted = matches!(kind, DiffKind::Deleted);

            diffs.push(AccountDiff {
                kind: Some(kind),
                leaf: true,
                key: leaf.leaf_key,
                value: leaf.account.encode(),
                nonce: if is_deleted {
                    FieldDiff::deleted(leaf.account.nonce)
                } else {
                    FieldDiff::created(leaf.account.nonce)
                },
                balance: if is_deleted {
                    FieldDiff::deleted(leaf.account.balance)
                } else {
                    FieldDiff::created(leaf.account.balance)
                },
                contract_root: if is_deleted {
                    FieldDiff::deleted(leaf.account.storage_root)
                } else {
                    FieldDiff::created(leaf.account.storage_root)
                },
                code_hash: if is_deleted {
                    FieldDiff::deleted(leaf.account.code_hash)
                } else {
                    FieldDiff::created(leaf.account.code_hash)
                },
                code,
                path: leaf.path,
                proof: leaf.proof,
                storage,
            });
        }

        Ok(diffs)
    }

    /// Walks a single storage trie and emits every slot one-sided: new
    /// values for a created account, old values for a deleted one.
    fn build_storage_diffs_eventual(
        &self,
        storage_root: H256,
        kind: DiffKind,
    ) -> StateDiffResult<Vec<StorageDiff>> {
        trace!("eventual storage diff at root {storage_root:x}");
        let trie = self.open(storage_root)?;

        let mut diffs = Vec::new();
        let mut it = trie.iter();
        while it.next(true)? {
            if it.leaf() {
                let value = it.leaf_blob().unwrap_or_default().to_vec();
                let (old_value, new_value) = match kind {
                    DiffKind::Deleted => (Some(value), None),
                    _ => (None, Some(value)),
                };

                diffs.push(StorageDiff {
                    leaf: true,
                    key: it.leaf_key().unwrap_or_default(),
                    old_value,
                    new_value,
                    path: self.paths_and_proofs.then(|| NibblePath::from(it.path())),
                    proof: self
                        .paths_and_proofs
                        .then(|| it.proof().iter().map(|p| p.to_vec()).collect()),
                });
            } else if self.intermediate_nodes && !it.hash().is_zero() {
                diffs.push(self.intermediate_storage_diff(
                    it.node_blob().unwrap_or_default().to_vec(),
                    it.path(),
                    it.proof(),
                ));
            }
        }

        Ok(diffs)
    }

    /// Diffs two versions of one account's storage trie. A slot with no old
    /// value was created within the updated account.
    fn build_storage_diffs_incremental(
        &self,
        old_root: H256,
        new_root: H256,
    ) -> StateDiffResult<Vec<StorageDiff>> {
        trace!("incremental storage diff {old_root:x} -> {new_root:x}");
        let old_trie = self.open(old_root)?;
        let new_trie = self.open(new_root)?;

        let mut diffs = Vec::new();
        let mut it = DifferenceIterator::new(old_trie.iter(), new_trie.iter())?;
        while it.next()? {
            if it.leaf() {
                let key = it.leaf_key().unwrap_or_default();
                let old_value = old_trie.get(&key)?.map(|v| v.to_vec());

                diffs.push(StorageDiff {
                    leaf: true,
                    key,
                    old_value,
                    new_value: it.leaf_blob().map(|v| v.to_vec()),
                    path: self.paths_and_proofs.then(|| NibblePath::from(it.path())),
                    proof: self
                        .paths_and_proofs
                        .then(|| it.proof().iter().map(|p| p.to_vec()).collect()),
                });
            } else if self.intermediate_nodes && !it.hash().is_zero() {
                diffs.push(self.intermediate_storage_diff(
                    it.node_blob().unwrap_or_default().to_vec(),
                    it.path(),
                    it.proof(),
                ));
            }
        }

        Ok(diffs)
    }

    fn intermediate_storage_diff(
        &self,
        blob: Vec<u8>,
        path: &[u8],
        proof: Vec<bytes::Bytes>,
    ) -> StorageDiff {
        StorageDiff {
            leaf: false,
            key: Vec::new(),
            old_value: None,
            new_value: Some(blob),
            path: self.paths_and_proofs.then(|| NibblePath::from(path)),
            proof: self
                .paths_and_proofs
                .then(|| proof.iter().map(|p| p.to_vec()).collect()),
        }
    }

    /// Drops unwatched addresses. An empty watch list keeps everything.
    fn retain_watched(&self, accounts: &mut AccountsMap) {
        if self.watched_addresses.is_empty() {
            return;
        }
        accounts.retain(|address, _| self.watched_addresses.contains(address));
    }
}
