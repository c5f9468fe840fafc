use std::sync::Arc;

use octomerge_sync::messages::{MapMessage, NeighborMaps};
use tokio::sync::watch;

/// Single-slot mailbox holding only the most recent value.
///
/// Posting replaces whatever was there, so several updates between two reads
/// collapse into one. Clones share the slot but track "new" independently.
#[derive(Debug)]
pub struct Mailbox<T> {
    sender: watch::Sender<Option<Arc<T>>>,
    receiver: watch::Receiver<Option<Arc<T>>>,
}

impl<T> Mailbox<T> {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(None);

        Self { sender, receiver }
    }

    pub fn post(&self, value: T) {
        let _previous = self.sender.send_replace(Some(Arc::new(value)));
    }

    /// Returns the latest value if it was posted after the previous call.
    pub fn take_if_new(&mut self) -> Option<Arc<T>> {
        if !self.receiver.has_changed().unwrap_or(false) {
            return None;
        }

        self.receiver.borrow_and_update().clone()
    }

    #[must_use]
    pub fn latest(&self) -> Option<Arc<T>> {
        self.receiver.borrow().clone()
    }
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The two inbound streams a merge cycle consumes.
#[derive(Clone, Debug, Default)]
pub struct Inputs {
    /// Snapshots of this agent's own map
    pub self_map: Mailbox<MapMessage>,
    /// Diff arrays gathered from peers
    pub neighbors: Mailbox<NeighborMaps>,
}

impl Inputs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether either mailbox received something since the last call.
    pub fn take_new(&mut self) -> bool {
        let self_map = self.self_map.take_if_new().is_some();
        let neighbors = self.neighbors.take_if_new().is_some();

        self_map || neighbors
    }
}
