//! Agent protocol message types.
//!
//! Every message is an [`Envelope`] carried as one JSON object. On a byte
//! stream the framing is one envelope per line.
//!
//! Two requests exist, each with one reply type:
//!
//! ```text
//! manifest_since { since }  ->  manifest { chunks: [{index, from, to}], total?, totalSynced? }
//! chunk_by_index { index }  ->  chunk    { data: [RawRecord] }
//! ```
//!
//! The manifest counters changed shape over the agent's lifetime, and the
//! shape itself says which dialect the agent speaks (see [`Dialect`]).

use crate::error::{Result, SyncError};
use crate::model::RawRecord;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Source tag on messages we publish
pub const TRACKER_SOURCE: &str = "tracker";

/// Source tag the agent puts on its replies
pub const AGENT_SOURCE: &str = "agent";

/// Upper bound on a single framed line (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    ManifestSince,
    ChunkByIndex,
    Manifest,
    Chunk,
}

impl MessageKind {
    /// Reply type expected for a request type, `None` for replies.
    pub fn reply_kind(self) -> Option<Self> {
        match self {
            Self::ManifestSince => Some(Self::Manifest),
            Self::ChunkByIndex => Some(Self::Chunk),
            Self::Manifest | Self::Chunk => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManifestSince => "manifest_since",
            Self::ChunkByIndex => "chunk_by_index",
            Self::Manifest => "manifest",
            Self::Chunk => "chunk",
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub source: String,
    pub identity: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<u64>,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn request(request: &Request, identity: &str, correlation_id: u64) -> Self {
        Self {
            source: TRACKER_SOURCE.to_string(),
            identity: identity.to_string(),
            kind: request.kind(),
            correlation_id: Some(correlation_id),
            payload: request.payload(identity),
        }
    }

    pub fn is_from_agent(&self) -> bool {
        self.source == AGENT_SOURCE
    }
}

/// A request the tracker sends to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    ManifestSince { since: i64 },
    ChunkByIndex { index: u32 },
}

impl Request {
    pub fn kind(&self) -> MessageKind {
        match self {
            Request::ManifestSince { .. } => MessageKind::ManifestSince,
            Request::ChunkByIndex { .. } => MessageKind::ChunkByIndex,
        }
    }

    pub fn reply_kind(&self) -> MessageKind {
        match self {
            Request::ManifestSince { .. } => MessageKind::Manifest,
            Request::ChunkByIndex { .. } => MessageKind::Chunk,
        }
    }

    fn payload(&self, identity: &str) -> Value {
        match self {
            Request::ManifestSince { since } => json!({ "identity": identity, "since": since }),
            Request::ChunkByIndex { index } => json!({ "identity": identity, "index": index }),
        }
    }
}

// =============================================================================
// MANIFEST
// =============================================================================

/// One page of records available from the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub index: u32,
    #[serde(default)]
    pub from: i64,
    #[serde(default)]
    pub to: i64,
}

/// A manifest counter, keeping the JSON shape it arrived in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Counter {
    Absent,
    Null,
    Number(f64),
    /// Present, but neither null nor a number
    Other,
}

impl Counter {
    fn read(map: &Map<String, Value>, field: &str) -> Self {
        match map.get(field) {
            None => Counter::Absent,
            Some(Value::Null) => Counter::Null,
            Some(Value::Number(n)) => n.as_f64().map(Counter::Number).unwrap_or(Counter::Other),
            Some(_) => Counter::Other,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Counter::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Which generation of the agent protocol produced a manifest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dialect {
    /// Neither counter is sent
    Legacy,
    /// A counter is null: agent present, its own sync has not started
    Pending,
    /// Both counters are numbers
    Active { total: f64, synced: f64 },
    /// Any other combination
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub chunks: Vec<ChunkDescriptor>,
    pub total: Counter,
    pub total_synced: Counter,
}

impl Manifest {
    pub fn decode(payload: &Value) -> Result<Self> {
        let map = payload
            .as_object()
            .ok_or_else(|| SyncError::Protocol("manifest payload is not an object".into()))?;

        let chunks = match map.get("chunks") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    serde_json::from_value::<ChunkDescriptor>(item.clone()).map_err(|e| {
                        SyncError::Protocol(format!("invalid chunk descriptor {item}: {e}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(SyncError::Protocol(format!(
                    "manifest chunks is not an array: {other}"
                )))
            }
        };

        Ok(Self {
            chunks,
            total: Counter::read(map, "total"),
            total_synced: Counter::read(map, "totalSynced"),
        })
    }

    pub fn dialect(&self) -> Dialect {
        match (self.total, self.total_synced) {
            (Counter::Absent, Counter::Absent) => Dialect::Legacy,
            (Counter::Null, _) | (_, Counter::Null) => Dialect::Pending,
            (Counter::Number(total), Counter::Number(synced)) => Dialect::Active { total, synced },
            _ => Dialect::Unknown,
        }
    }

    /// Chunks in processing order (ascending index).
    pub fn ordered_chunks(&self) -> Vec<ChunkDescriptor> {
        let mut chunks = self.chunks.clone();
        chunks.sort_by_key(|c| c.index);
        chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

// =============================================================================
// CHUNK
// =============================================================================

/// Decode a chunk reply. Entries that do not parse as records are dropped
/// with a warning; a missing `data` field is an empty chunk.
pub fn decode_chunk(payload: &Value, index: u32) -> Result<Vec<RawRecord>> {
    let data = match payload.get("data") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(SyncError::Protocol(format!(
                "chunk {index} data is not an array: {other}"
            )))
        }
    };

    let mut records = Vec::with_capacity(data.len());
    for item in data {
        match serde_json::from_value::<RawRecord>(item.clone()) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(chunk = index, "Dropping malformed record: {}", e),
        }
    }
    Ok(records)
}

// =============================================================================
// Framing
// =============================================================================

/// Read one envelope. Returns `Ok(None)` at end of stream.
pub async fn read_frame<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<Option<Envelope>> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = r.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        if n > MAX_FRAME_SIZE {
            return Err(SyncError::Protocol(format!("frame too large: {} bytes", n)));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| SyncError::Protocol(format!("invalid envelope: {e}")));
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, envelope: &Envelope) -> Result<()> {
    let mut line = serde_json::to_vec(envelope)
        .map_err(|e| SyncError::Protocol(format!("cannot encode envelope: {e}")))?;
    line.push(b'\n');
    w.write_all(&line).await?;
    w.flush().await?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
