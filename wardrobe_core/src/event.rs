//! Event and notification channels.
//!
//! - [`EventBus`]: fan-out of equip events. Each subscriber owns a receiver;
//!   dropping it unsubscribes.
//! - [`RebuildSignal`]: "the avatar was rebuilt" notification owned by the host.
//!   Controllers that defer releases flush them when it fires.

use tokio::sync::{mpsc, watch};

use crate::{asset::AssetId, error::EquipError};

/// Notification published by an equip controller.
#[derive(Debug, Clone, PartialEq)]
pub enum EquipEvent<S> {
    Equipped { slot: S, id: AssetId },
    Unequipped { slot: S, id: AssetId },
    Rejected { slot: S, id: AssetId, reason: EquipError },
}

/// Typed event fan-out.
pub struct EventBus<E> {
    subscribers: Vec<mpsc::UnboundedSender<E>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Drop the receiver to unsubscribe.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Sends `event` to every subscriber, pruning closed ones.
    pub fn publish(&mut self, event: &E) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drops every sender; receivers observe end of stream.
    pub fn close(&mut self) {
        self.subscribers.clear();
    }
}

/// Host-side rebuild notifier.
pub struct RebuildSignal {
    tx: watch::Sender<u64>,
}

impl Default for RebuildSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl RebuildSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Announces a completed rebuild.
    pub fn notify(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Number of rebuilds announced so far.
    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Subscribes to rebuilds announced after this call.
    pub fn subscribe(&self) -> RebuildSubscription {
        RebuildSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A controller's end of a [`RebuildSignal`]. Dropping it unsubscribes.
pub struct RebuildSubscription {
    rx: watch::Receiver<u64>,
}

impl RebuildSubscription {
    /// Whether a rebuild happened since the last call. Clears the flag.
    pub fn take_pending(&mut self) -> bool {
        match self.rx.has_changed() {
            Ok(true) => {
                self.rx.borrow_and_update();
                true
            }
            _ => false,
        }
    }

    /// Waits for the next rebuild. Returns false once the signal is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
