//! Offline extraction: build the diff between two blocks and hand it to a
//! persistence sink.

use anyhow::Result;
use tracing::debug;

use crate::builder::Builder;
use crate::service::BlockDescriptor;
use crate::store::ChainStore;
use crate::types::StateDiff;

/// A persistence sink for finished diffs. CSV, IPLD, and SQL writers all
/// plug in here.
pub trait Publisher {
    /// Records one diff.
    fn publish(&self, diff: &StateDiff) -> Result<()>;
}

/// Builds and publishes the diff for each processed block.
#[derive(Debug)]
pub struct Extractor<S, P> {
    builder: Builder<S>,
    publisher: P,
}

impl<S: ChainStore, P: Publisher> Extractor<S, P> {
    /// Pairs a builder with a sink.
    pub fn new(builder: Builder<S>, publisher: P) -> Self {
        Self { builder, publisher }
    }

    /// Diffs `current` against its parent and publishes the result.
    pub fn extract(&self, parent: &BlockDescriptor, current: &BlockDescriptor) -> Result<()> {
        debug!(block_number = %current.number, "extracting state diff");

        let diff = self.builder.build_state_diff(
            parent.state_root,
            current.state_root,
            current.number,
            current.hash,
        )?;
        self.publisher.publish(&diff)
    }
}
