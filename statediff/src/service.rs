//! The subscription-driven service loop.
//!
//! One spawned task owns the loop: it subscribes to the chain's state-change
//! stream and, for every event, filters the touched accounts by the watched
//! set, packages them into an RLP payload, and fans the payload out through
//! the [`Registry`]. Diffs here are built straight from the event's modified
//! accounts; the trie-walking [`Builder`][crate::builder::Builder] is for
//! historical construction.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use ethereum_types::{Address, H256, U256};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::config::{Config, ConfigError};
use crate::registry::{Registry, ServiceError, Subscription, SubscriptionId};
use crate::types::{AccountDiff, Payload, StateDiff, StorageDiff};

/// The block a state-change event belongs to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BlockDescriptor {
    /// Block number.
    pub number: U256,
    /// Block hash.
    pub hash: H256,
    /// Hash of the parent block.
    pub parent_hash: H256,
    /// Root of the block's state trie.
    pub state_root: H256,
}

/// One account as modified within a block.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModifiedAccount {
    /// The account's post-block state.
    pub account: Account,
    /// The storage slots written, keyed by slot key.
    pub storage: HashMap<H256, H256>,
}

/// A state-change notification from the chain.
#[derive(Clone, Debug, Default)]
pub struct StateChangeEvent {
    /// The block that produced the changes.
    pub block: BlockDescriptor,
    /// Every account the block touched.
    pub state_changes: HashMap<Address, ModifiedAccount>,
}

/// The handle a chain hands back for its state-change stream. A message on
/// `errors` terminates the loop.
#[derive(Debug)]
pub struct StateChangeSubscription {
    /// The event stream itself.
    pub events: mpsc::Receiver<StateChangeEvent>,
    /// Out-of-band upstream failures.
    pub errors: mpsc::Receiver<String>,
}

/// The capability the service needs from the chain node.
pub trait Blockchain: Send + Sync + 'static {
    /// Subscribes to state-change events for every new head block.
    fn subscribe_state_changes(&self) -> StateChangeSubscription;
}

/// The state-diffing service.
#[derive(Debug)]
pub struct Service<B> {
    blockchain: B,
    registry: Registry,
    watched_addresses: HashSet<Address>,
    quit: watch::Sender<bool>,
}

impl<B: Blockchain> Service<B> {
    /// Creates a service over `blockchain` with the given options.
    pub fn new(blockchain: B, config: &Config) -> Result<Self, ConfigError> {
        let (quit, _) = watch::channel(false);
        Ok(Self {
            blockchain,
            registry: Registry::new(),
            watched_addresses: config.watched_address_set()?,
            quit,
        })
    }

    /// Registers a subscriber under `id`.
    pub fn subscribe(
        &self,
        id: SubscriptionId,
        payload_chan: mpsc::Sender<Payload>,
        quit_chan: mpsc::Sender<bool>,
    ) {
        self.registry.subscribe(
            id,
            Subscription {
                payload_chan,
                quit_chan,
            },
        );
    }

    /// Removes the subscriber under `id`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ServiceError> {
        self.registry.unsubscribe(id)
    }

    /// The registry, for observing subscription state.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Spawns the event loop on its own task.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        info!("starting statediff service");
        let service = Arc::clone(self);
        tokio::spawn(async move { service.run().await })
    }

    /// Signals the loop to drain and exit.
    pub fn stop(&self) {
        info!("stopping statediff service");
        self.quit.send_replace(true);
    }

    async fn run(&self) {
        let StateChangeSubscription {
            mut events,
            mut errors,
        } = self.blockchain.subscribe_state_changes();
        let mut quit = self.quit.subscribe();
        if *quit.borrow_and_update() {
            // Stopped before the loop ever ran.
            self.registry.close();
            return;
        }

        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("state change stream ended; breaking loop");
                        self.registry.close();
                        return;
                    }
                },
                upstream_err = errors.recv() => {
                    warn!(?upstream_err, "error from state change subscription; breaking loop");
                    self.registry.close();
                    return;
                }
                _ = quit.changed() => {
                    info!("quitting the statediffing process");
                    self.registry.close();
                    return;
                }
            }
        }
    }

    fn handle_event(&self, event: StateChangeEvent) {
        let block_number = event.block.number;
        debug!(%block_number, "state change event received");

        // No subscribers, no diff work.
        if !self.registry.has_subscribers() {
            debug!(%block_number, "no subscribers; skipping state diff processing");
            return;
        }

        let state_changes = filter_by_watched_addresses(event.state_changes, &self.watched_addresses);

        match process_state_changes(state_changes, &event.block) {
            // Send a payload to subscribers only if it isn't empty.
            Some(payload) => self.registry.send(payload),
            None => debug!(%block_number, "empty state diff; nothing to send"),
        }
    }
}

/// Drops changes to addresses outside the watched set. An empty set passes
/// everything through.
fn filter_by_watched_addresses(
    state_changes: HashMap<Address, ModifiedAccount>,
    watched: &HashSet<Address>,
) -> HashMap<Address, ModifiedAccount> {
    match watched.is_empty() {
        true => state_changes,
        false => state_changes
            .into_iter()
            .filter(|(address, _)| watched.contains(address))
            .collect(),
    }
}

/// Builds the payload for one event from its modified accounts. Returns
/// `None` when nothing remains after filtering.
fn process_state_changes(
    state_changes: HashMap<Address, ModifiedAccount>,
    block: &BlockDescriptor,
) -> Option<Payload> {
    let mut account_diffs: Vec<AccountDiff> = state_changes
        .into_iter()
        .map(|(address, modified)| build_account_diff(address, modified))
        .collect();

    if account_diffs.is_empty() {
        return None;
    }
    account_diffs.sort_unstable_by(|a, b| a.key.cmp(&b.key));

    let state_diff = StateDiff {
        block_number: block.number,
        block_hash: block.hash,
        updated_accounts: account_diffs,
        ..Default::default()
    };

    Some(Payload::encode(&state_diff))
}

/// Packages one modified account. Keys are the raw address and slot keys;
/// values are RLP.
fn build_account_diff(address: Address, modified: ModifiedAccount) -> AccountDiff {
    let mut storage: Vec<StorageDiff> = modified
        .storage
        .into_iter()
        .map(|(key, value)| StorageDiff {
            leaf: true,
            key: key.as_bytes().to_vec(),
            old_value: None,
            new_value: Some(rlp::encode(&value.as_bytes()).to_vec()),
            path: None,
            proof: None,
        })
        .collect();
    storage.sort_unstable_by(|a, b| a.key.cmp(&b.key));

    AccountDiff {
        kind: None,
        leaf: true,
        key: address.as_bytes().to_vec(),
        value: modified.account.encode(),
        storage,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modified(nonce: u64, slots: &[(H256, H256)]) -> ModifiedAccount {
        ModifiedAccount {
            account: Account {
                nonce,
                ..Default::default()
            },
            storage: slots.iter().copied().collect(),
        }
    }

    #[test]
    fn empty_changes_produce_no_payload() {
        let block = BlockDescriptor::default();
        assert_eq!(process_state_changes(HashMap::new(), &block), None);
    }

    #[test]
    fn payloads_decode_back_to_the_event_content() {
        let address = Address::repeat_byte(0x0a);
        let slot_key = H256::repeat_byte(0x01);
        let slot_value = H256::from_low_u64_be(3);

        let mut changes = HashMap::new();
        changes.insert(address, modified(5, &[(slot_key, slot_value)]));

        let block = BlockDescriptor {
            number: U256::from(12),
            hash: H256::repeat_byte(0xbb),
            ..Default::default()
        };

        let payload = process_state_changes(changes, &block).unwrap();
        let rlp = rlp::Rlp::new(&payload.state_diff_rlp);
        assert_eq!(rlp.val_at::<U256>(0).unwrap(), U256::from(12));

        let accounts = rlp.at(2).unwrap();
        assert_eq!(accounts.item_count().unwrap(), 1);
        let account = accounts.at(0).unwrap();
        assert_eq!(account.at(0).unwrap().data().unwrap(), address.as_bytes());
        assert_eq!(
            Account::decode(account.at(1).unwrap().data().unwrap())
                .unwrap()
                .nonce,
            5
        );

        let storage = account.at(2).unwrap();
        assert_eq!(storage.item_count().unwrap(), 1);
        let slot = storage.at(0).unwrap();
        assert_eq!(slot.at(0).unwrap().data().unwrap(), slot_key.as_bytes());
        assert_eq!(
            slot.at(1).unwrap().data().unwrap(),
            rlp::encode(&slot_value.as_bytes()).to_vec()
        );
    }

    #[test]
    fn the_watched_filter_drops_other_addresses() {
        let watched_address = Address::repeat_byte(0x0a);
        let other_address = Address::repeat_byte(0x0b);

        let mut changes = HashMap::new();
        changes.insert(watched_address, modified(1, &[]));
        changes.insert(other_address, modified(2, &[]));

        let watched = HashSet::from([watched_address]);
        let filtered = filter_by_watched_addresses(changes.clone(), &watched);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key(&watched_address));

        let unfiltered = filter_by_watched_addresses(changes, &HashSet::new());
        assert_eq!(unfiltered.len(), 2);
    }
}
