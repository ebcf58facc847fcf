//! Incremental sync of practice-problem submissions from a local observer
//! agent into a local store.
//!
//! The agent answers two questions over a broadcast bus: "what is available
//! since timestamp `t`" (a [`Manifest`](transport::Manifest) of chunks) and
//! "give me chunk `i`". [`SyncEngine`] pulls new chunks and merges them,
//! [`BackgroundPoller`] runs it on a schedule and [`SyncMonitor`] reports
//! progress while an agent is still catching up.

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod store;
pub mod sync;
pub mod transport;

pub use config::Config;
pub use error::{Result, StoreError, SyncError};
pub use events::{EventBus, SyncEvent};
pub use model::{CatalogEntry, LocalFields, RawRecord, Record, RecordKey};
pub use store::Repository;
pub use sync::{
    BackgroundPoller, CatalogSyncer, PollOutcome, SyncEngine, SyncMonitor, SyncProgress,
    SyncReport, SyncStack,
};
pub use transport::{AgentClient, TransportBridge};
