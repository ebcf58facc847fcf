//! Scripted agent that answers on a `LocalBus` the way a real agent would.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracksync::transport::{Envelope, LocalBus, MessageKind, AGENT_SOURCE};
use tracksync::{CatalogEntry, Config, LocalFields, RawRecord, Repository};

pub struct AgentState {
    pub identity: String,
    pub records: Vec<RawRecord>,
    pub chunk_size: usize,
    /// Extra manifest fields, e.g. `total` / `totalSynced`
    pub counters: Map<String, Value>,
    /// Reply with the request's correlation id
    pub echo_correlation: bool,
    pub manifest_requests: usize,
    pub chunk_requests: usize,
    /// `since` of the last manifest request; chunk indexes refer to it
    last_since: i64,
}

pub struct FixtureAgent {
    pub state: Arc<Mutex<AgentState>>,
    task: JoinHandle<()>,
}

impl FixtureAgent {
    pub fn attach(bus: &LocalBus, identity: &str, records: Vec<RawRecord>) -> Self {
        let state = Arc::new(Mutex::new(AgentState {
            identity: identity.to_string(),
            records,
            chunk_size: 2,
            counters: Map::new(),
            echo_correlation: true,
            manifest_requests: 0,
            chunk_requests: 0,
            last_since: 0,
        }));

        let mut rx = bus.subscribe();
        let bus = bus.clone();
        let shared = Arc::clone(&state);
        let task = tokio::spawn(async move {
            loop {
                let envelope = match rx.recv().await {
                    Ok(envelope) => envelope,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if envelope.is_from_agent() {
                    continue;
                }
                let reply = shared.lock().answer(&envelope);
                if let Some(reply) = reply {
                    let _ = bus.publish(reply);
                }
            }
        });

        Self { state, task }
    }

    pub fn push(&self, record: RawRecord) {
        self.state.lock().records.push(record);
    }

    pub fn set_counters(&self, counters: Value) {
        if let Value::Object(map) = counters {
            self.state.lock().counters = map;
        }
    }

    pub fn manifest_requests(&self) -> usize {
        self.state.lock().manifest_requests
    }

    pub fn chunk_requests(&self) -> usize {
        self.state.lock().chunk_requests
    }
}

impl Drop for FixtureAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl AgentState {
    fn pending_since(&self, since: i64) -> Vec<&RawRecord> {
        let mut newer: Vec<_> = self.records.iter().filter(|r| r.timestamp > since).collect();
        newer.sort_by_key(|r| r.timestamp);
        newer
    }

    fn answer(&mut self, request: &Envelope) -> Option<Envelope> {
        if request.identity != self.identity {
            return None;
        }

        let (kind, payload) = match request.kind {
            MessageKind::ManifestSince => {
                self.manifest_requests += 1;
                let since = request.payload["since"].as_i64().unwrap_or(0);
                self.last_since = since;
                let pending = self.pending_since(since);
                let chunks: Vec<Value> = pending
                    .chunks(self.chunk_size)
                    .enumerate()
                    .map(|(i, page)| {
                        json!({
                            "index": i,
                            "from": page[0].timestamp,
                            "to": page[page.len() - 1].timestamp,
                        })
                    })
                    .collect();
                let mut manifest = Map::new();
                manifest.insert("chunks".into(), Value::Array(chunks));
                manifest.extend(self.counters.clone());
                (MessageKind::Manifest, Value::Object(manifest))
            }
            MessageKind::ChunkByIndex => {
                self.chunk_requests += 1;
                let index = request.payload["index"].as_u64().unwrap_or(0) as usize;
                let page: Vec<Value> = self
                    .pending_since(self.last_since)
                    .chunks(self.chunk_size)
                    .nth(index)
                    .unwrap_or(&[])
                    .iter()
                    .map(|r| serde_json::to_value(r).unwrap())
                    .collect();
                (MessageKind::Chunk, json!({ "data": page }))
            }
            MessageKind::Manifest | MessageKind::Chunk => return None,
        };

        Some(Envelope {
            source: AGENT_SOURCE.to_string(),
            identity: request.identity.clone(),
            kind,
            correlation_id: if self.echo_correlation {
                request.correlation_id
            } else {
                None
            },
            payload,
        })
    }
}

pub fn record(item: &str, timestamp: i64) -> RawRecord {
    RawRecord {
        item_id: item.to_string(),
        timestamp,
        status: "Accepted".to_string(),
        language: "rust".to_string(),
        runtime: Some("1 ms".to_string()),
        memory: None,
        local: LocalFields::default(),
    }
}

pub fn catalog(items: &[&str]) -> Vec<CatalogEntry> {
    items
        .iter()
        .map(|item| CatalogEntry {
            item_id: item.to_string(),
            title: item.replace('-', " "),
            difficulty: "Medium".to_string(),
            tags: vec![],
            description: None,
            created_at: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
        })
        .collect()
}

pub fn seed_catalog(repo: &Repository, items: &[&str]) {
    repo.store_catalog(&catalog(items), Utc::now()).unwrap();
}

/// Config with a short request timeout so missing replies fail fast.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.agent.request_timeout_ms = 200;
    config
}
