//! Request/reply over the agent bus.
//!
//! [`TransportBridge`] publishes a request envelope and waits for the one
//! reply that answers it. Replies are routed through a table of pending
//! requests keyed by correlation id; a request that sees no reply within the
//! timeout fails with [`SyncError::AgentUnavailable`]. Nothing is retried here.

pub mod bus;
pub mod process;
pub mod protocol;

use crate::error::{Result, SyncError};
use crate::model::RawRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

pub use bus::LocalBus;
pub use process::AgentProcess;
pub use protocol::{
    decode_chunk, ChunkDescriptor, Counter, Dialect, Envelope, Manifest, MessageKind, Request,
    AGENT_SOURCE, TRACKER_SOURCE,
};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1500);

/// The two questions the sync path asks the agent.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn manifest_since(&self, identity: &str, since: i64) -> Result<Manifest>;

    async fn chunk_by_index(&self, identity: &str, index: u32) -> Result<Vec<RawRecord>>;
}

struct PendingRequest {
    identity: String,
    expect: MessageKind,
    reply: oneshot::Sender<Value>,
}

#[derive(Default)]
struct PendingTable {
    // Ordered by id, so the oldest request comes first
    entries: BTreeMap<u64, PendingRequest>,
}

impl PendingTable {
    /// Remove and return the request an inbound envelope answers, if any.
    ///
    /// An envelope must come from the agent, name the request's identity and
    /// carry the expected reply type. Without a correlation id it answers the
    /// oldest request that fits.
    fn take_match(&mut self, envelope: &Envelope) -> Option<PendingRequest> {
        if !envelope.is_from_agent() {
            return None;
        }
        let fits =
            |p: &PendingRequest| p.identity == envelope.identity && p.expect == envelope.kind;

        let id = match envelope.correlation_id {
            Some(id) => self.entries.get(&id).filter(|p| fits(*p)).map(|_| id),
            None => self
                .entries
                .iter()
                .find(|(_, p)| fits(*p))
                .map(|(id, _)| *id),
        }?;
        self.entries.remove(&id)
    }
}

/// Drops the pending entry when the waiting request finishes, however it ends.
struct PendingGuard<'a> {
    table: &'a Mutex<PendingTable>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.lock().entries.remove(&self.id);
    }
}

pub struct TransportBridge {
    bus: LocalBus,
    pending: Arc<Mutex<PendingTable>>,
    next_id: AtomicU64,
    timeout: Duration,
    dispatcher: JoinHandle<()>,
}

impl TransportBridge {
    /// Attach to `bus`. Must be called inside a tokio runtime.
    pub fn new(bus: LocalBus, timeout: Duration) -> Self {
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let mut rx = bus.subscribe();
        let table = Arc::clone(&pending);

        let dispatcher = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        let matched = table.lock().take_match(&envelope);
                        if let Some(request) = matched {
                            let _ = request.reply.send(envelope.payload);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Agent bus lagged, {} messages dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            bus,
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            dispatcher,
        }
    }

    /// Number of requests currently waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Send one request and wait for its reply payload.
    pub async fn request(&self, request: Request, identity: &str) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        self.pending.lock().entries.insert(
            id,
            PendingRequest {
                identity: identity.to_string(),
                expect: request.reply_kind(),
                reply: tx,
            },
        );
        let _guard = PendingGuard {
            table: self.pending.as_ref(),
            id,
        };

        self.bus.publish(Envelope::request(&request, identity, id))?;
        tracing::debug!(identity, correlation_id = id, "Sent {}", request.kind().as_str());

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(SyncError::Channel("reply dispatcher stopped".into())),
            Err(_) => {
                tracing::debug!(
                    identity,
                    "No reply to {} within {:?}",
                    request.kind().as_str(),
                    self.timeout
                );
                Err(SyncError::AgentUnavailable {
                    request: request.kind().as_str(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

impl Drop for TransportBridge {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[async_trait]
impl AgentClient for TransportBridge {
    async fn manifest_since(&self, identity: &str, since: i64) -> Result<Manifest> {
        let payload = self
            .request(Request::ManifestSince { since }, identity)
            .await?;
        Manifest::decode(&payload)
    }

    async fn chunk_by_index(&self, identity: &str, index: u32) -> Result<Vec<RawRecord>> {
        let payload = self
            .request(Request::ChunkByIndex { index }, identity)
            .await?;
        decode_chunk(&payload, index)
    }
}
