//! In-process broadcast channel shared by the tracker and the agent link.
//!
//! Every participant sees every message, including its own. Receivers tell
//! messages apart by the envelope's `source` tag.

use crate::error::{Result, SyncError};
use crate::transport::protocol::Envelope;
use tokio::sync::broadcast;

/// Default channel capacity
pub const BUS_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<Envelope>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to all current subscribers. Fails only when nobody listens.
    pub fn publish(&self, envelope: Envelope) -> Result<()> {
        self.sender
            .send(envelope)
            .map(|_| ())
            .map_err(|_| SyncError::Channel("no listeners on the agent bus".into()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(BUS_CHANNEL_SIZE)
    }
}
