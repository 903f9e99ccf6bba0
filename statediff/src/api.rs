//! The RPC-facing surface of the service.
//!
//! Wire plumbing belongs to the hosting node's RPC framework; this module
//! only fixes the namespace and gives that framework a subscribe/unsubscribe
//! façade that manages channel allocation and id issuance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::registry::{ServiceError, SubscriptionId};
use crate::service::{Blockchain, Service};
use crate::types::Payload;

/// The namespace the service's methods are exposed under.
pub const API_NAME: &str = "statediff";

/// The API version.
pub const API_VERSION: &str = "0.0.1";

/// Capacity of the payload channel handed to each new subscriber.
pub const PAYLOAD_CHAN_SIZE: usize = 128;

/// The public statediff API.
#[derive(Debug)]
pub struct StateDiffApi<B> {
    service: Arc<Service<B>>,
    next_id: AtomicU64,
}

impl<B: Blockchain> StateDiffApi<B> {
    /// Wraps a running service.
    pub fn new(service: Arc<Service<B>>) -> Self {
        Self {
            service,
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates a subscription and returns its id together with the payload
    /// and quit receivers the subscriber reads.
    pub fn subscribe(
        &self,
    ) -> (
        SubscriptionId,
        mpsc::Receiver<Payload>,
        mpsc::Receiver<bool>,
    ) {
        let (payload_tx, payload_rx) = mpsc::channel(PAYLOAD_CHAN_SIZE);
        let (quit_tx, quit_rx) = mpsc::channel(1);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.service.subscribe(id, payload_tx, quit_tx);

        (id, payload_rx, quit_rx)
    }

    /// Ends the subscription under `id`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ServiceError> {
        self.service.unsubscribe(id)
    }
}
