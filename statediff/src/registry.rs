//! The subscription registry: one mutex-guarded map of subscribers plus an
//! atomic gate recording whether anyone is listening.
//!
//! The gate is flipped only under compare-and-swap so that the
//! begin/halt-processing log lines fire exactly once per transition, however
//! many subscribe/unsubscribe calls race.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::types::Payload;

/// Identifies one subscriber for the lifetime of its subscription.
pub type SubscriptionId = u64;

/// One subscriber's channels.
#[derive(Clone, Debug)]
pub struct Subscription {
    /// Receives encoded diff payloads. Sends never block; a subscriber that
    /// stops draining this channel is evicted.
    pub payload_chan: mpsc::Sender<Payload>,
    /// Receives a best-effort `true` when the service ends the subscription.
    pub quit_chan: mpsc::Sender<bool>,
}

/// An error surfaced by registry operations.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ServiceError {
    /// `unsubscribe` was called with an id that has no subscription.
    #[error("cannot unsubscribe; subscription for id {0} does not exist")]
    UnknownSubscription(SubscriptionId),
}

/// The process-wide map of active subscriptions.
#[derive(Debug, Default)]
pub struct Registry {
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    subscribers: AtomicI32,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a subscription under `id`, replacing any previous holder of
    /// the id.
    pub fn subscribe(&self, id: SubscriptionId, subscription: Subscription) {
        info!(id, "subscribing to the statediff service");
        if self
            .subscribers
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("state diff subscription received; beginning processing");
        }
        self.subscriptions.lock().insert(id, subscription);
    }

    /// Removes the subscription under `id`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ServiceError> {
        info!(id, "unsubscribing from the statediff service");
        let mut subscriptions = self.subscriptions.lock();
        subscriptions
            .remove(&id)
            .ok_or(ServiceError::UnknownSubscription(id))?;

        if subscriptions.is_empty() {
            self.halt_processing();
        }
        Ok(())
    }

    /// Whether any subscriber is registered. The loop skips diff work
    /// entirely while this is false.
    pub fn has_subscribers(&self) -> bool {
        self.subscribers.load(Ordering::Acquire) == 1
    }

    /// The number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Whether no subscriptions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fans `payload` out to every subscription without blocking. A
    /// subscription whose channel is not ready is signalled to quit
    /// (best-effort) and evicted; the system does not buffer to let it
    /// catch up.
    pub fn send(&self, payload: Payload) {
        let mut subscriptions = self.subscriptions.lock();

        subscriptions.retain(|id, subscription| {
            match subscription.payload_chan.try_send(payload.clone()) {
                Ok(()) => {
                    debug!(id, "sent state diff payload to subscription");
                    true
                }
                Err(_) => {
                    info!(id, "unable to send payload to subscription; evicting");
                    if subscription.quit_chan.try_send(true).is_err() {
                        info!(id, "unable to signal quit to subscription");
                    }
                    false
                }
            }
        });

        // If eviction emptied the registry, halt processing.
        if subscriptions.is_empty() {
            self.halt_processing();
        }
    }

    /// Ends every subscription: best-effort quit signal, then removal.
    pub fn close(&self) {
        let mut subscriptions = self.subscriptions.lock();
        for (id, subscription) in subscriptions.drain() {
            match subscription.quit_chan.try_send(true) {
                Ok(()) => info!(id, "closed subscription"),
                Err(_) => info!(id, "unable to signal quit to subscription"),
            }
        }
        self.halt_processing();
    }

    fn halt_processing(&self) {
        if self
            .subscribers
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("no more subscriptions; halting state diff processing");
        }
    }
}
