//! Block-by-block Ethereum state diffs.
//!
//! A chain node's canonical state is a Merkle-Patricia trie of accounts, each
//! carrying its own storage sub-trie. For every new head block this crate can
//! produce a [`StateDiff`][types::StateDiff]: the accounts created, deleted,
//! and updated between the block's parent and the block itself, down to
//! individual storage slots.
//!
//! Two ways in:
//! - [`builder::Builder`] walks the parent and head state tries directly
//!   (through [`mpt_view`]'s difference iterator) and classifies every
//!   changed leaf. Use this for historical or offline construction.
//! - [`service::Service`] consumes the chain's state-change event stream,
//!   encodes each diff as an RLP [`Payload`][types::Payload], and fans it out
//!   to subscribers, evicting any that stop reading.
//!
//! The chain itself is abstracted behind small capabilities: a
//! [`ChainStore`][store::ChainStore] for trie nodes, address preimages, and
//! code, and a [`Blockchain`][service::Blockchain] for the event stream.

#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]

pub mod account;
pub mod api;
pub mod builder;
pub mod config;
pub mod extractor;
pub mod registry;
pub mod service;
pub mod store;
pub mod types;

pub use account::Account;
pub use builder::{Builder, StateDiffError};
pub use config::Config;
pub use service::Service;
pub use types::{AccountDiff, Payload, StateDiff, StorageDiff};

/// Size of the channel buffering state-change events from the chain.
pub const STATE_CHANGE_EVENT_CHAN_SIZE: usize = 20000;
