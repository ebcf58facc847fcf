//! Test doubles for the sync components.

use crate::error::{Result, SyncError};
use crate::model::{CatalogEntry, LocalFields, RawRecord};
use crate::store::Repository;
use crate::sync::catalog::{CatalogSource, CatalogSyncer, DEFAULT_STALENESS};
use crate::sync::engine::SyncEngine;
use crate::transport::{AgentClient, Manifest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub(crate) fn raw(item: &str, ts: i64) -> RawRecord {
    RawRecord {
        item_id: item.into(),
        timestamp: ts,
        status: "Accepted".into(),
        language: "rust".into(),
        runtime: None,
        memory: None,
        local: LocalFields::default(),
    }
}

pub(crate) fn entry(item: &str) -> CatalogEntry {
    CatalogEntry {
        item_id: item.into(),
        title: item.to_uppercase(),
        difficulty: "Easy".into(),
        tags: vec![],
        description: None,
        created_at: DateTime::from_timestamp(1_000, 0).unwrap(),
    }
}

/// Agent that answers from in-memory state.
///
/// A `None` manifest makes every manifest request time out.
#[derive(Default)]
pub(crate) struct ScriptedAgent {
    pub manifest: Mutex<Option<Value>>,
    pub chunks: Mutex<HashMap<u32, Vec<RawRecord>>>,
    pub failing_chunk: Mutex<Option<u32>>,
    /// Manifest requests wait for `release`
    pub hang: AtomicBool,
    pub release: Notify,
    pub manifest_calls: AtomicUsize,
    pub chunk_calls: AtomicUsize,
}

impl ScriptedAgent {
    pub(crate) fn with_manifest(manifest: Value) -> Self {
        let agent = Self::default();
        *agent.manifest.lock() = Some(manifest);
        agent
    }

    pub(crate) fn set_chunk(&self, index: u32, records: Vec<RawRecord>) {
        self.chunks.lock().insert(index, records);
    }

    pub(crate) fn manifest_calls(&self) -> usize {
        self.manifest_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn chunk_calls(&self) -> usize {
        self.chunk_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn manifest_since(&self, _identity: &str, _since: i64) -> Result<Manifest> {
        self.manifest_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        let manifest = self.manifest.lock().clone();
        match manifest {
            Some(payload) => Manifest::decode(&payload),
            None => Err(SyncError::AgentUnavailable {
                request: "manifest_since",
                timeout: Duration::from_millis(1),
            }),
        }
    }

    async fn chunk_by_index(&self, _identity: &str, index: u32) -> Result<Vec<RawRecord>> {
        self.chunk_calls.fetch_add(1, Ordering::SeqCst);
        if *self.failing_chunk.lock() == Some(index) {
            return Err(SyncError::Protocol(format!("chunk {index} unreadable")));
        }
        Ok(self.chunks.lock().get(&index).cloned().unwrap_or_default())
    }
}

/// Serves a fixed list, optionally failing or waiting for a release.
pub(crate) struct FakeSource {
    pub entries: Mutex<Vec<CatalogEntry>>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub gate: Option<Arc<Notify>>,
}

impl FakeSource {
    pub(crate) fn new(entries: Vec<CatalogEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            gate: None,
        }
    }
}

#[async_trait]
impl CatalogSource for FakeSource {
    async fn fetch_all(&self) -> anyhow::Result<Vec<CatalogEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("503 Service Unavailable");
        }
        Ok(self.entries.lock().clone())
    }
}

/// Engine over an in-memory repository whose catalog already holds `items`.
pub(crate) fn engine_with(agent: Arc<ScriptedAgent>, items: &[&str]) -> SyncEngine {
    let repo = Repository::in_memory();
    let stored: Vec<_> = items.iter().map(|id| entry(id)).collect();
    repo.store_catalog(&stored, Utc::now()).unwrap();
    let catalog = CatalogSyncer::new(
        Arc::new(FakeSource::new(vec![])),
        repo.clone(),
        DEFAULT_STALENESS,
    );
    SyncEngine::new(agent, repo, catalog)
}
