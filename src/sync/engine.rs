//! One incremental sync pass.
//!
//! A pass asks the agent for the manifest since the stored watermark, pulls
//! every chunk in ascending index order and merges each record into the
//! repository. The watermark is written once, after the last chunk, so a pass
//! that fails halfway is simply repeated from the old watermark next time.
//! Records merged before the failure stay stored; merging them again is
//! harmless.

use crate::error::Result;
use crate::model::{CatalogEntry, RawRecord, Record, RecordKey};
use crate::store::Repository;
use crate::sync::catalog::{CatalogSyncer, RefreshMode};
use crate::transport::AgentClient;
use std::sync::Arc;
use std::time::Instant;

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records inserted or merged
    pub merged: usize,
    /// Records dropped because their catalog entry could not be found
    pub skipped: usize,
    pub chunks: usize,
    /// Watermark after the pass
    pub watermark: i64,
}

#[derive(Clone)]
pub struct SyncEngine {
    agent: Arc<dyn AgentClient>,
    repo: Repository,
    catalog: CatalogSyncer,
}

/// Catalog lookups within one pass.
struct Resolver<'a> {
    catalog: &'a CatalogSyncer,
    forced: bool,
}

impl Resolver<'_> {
    /// Find the entry for `item_id`, forcing one catalog refresh per pass on
    /// the first miss.
    async fn resolve(&mut self, item_id: &str) -> Result<Option<CatalogEntry>> {
        if let Some(entry) = self.catalog.lookup(item_id)? {
            return Ok(Some(entry));
        }
        if self.forced {
            return Ok(None);
        }
        self.forced = true;
        tracing::debug!("No catalog entry for {}, refreshing catalog", item_id);
        self.catalog.refresh(RefreshMode::Force).await;
        self.catalog.lookup(item_id)
    }
}

impl SyncEngine {
    pub fn new(agent: Arc<dyn AgentClient>, repo: Repository, catalog: CatalogSyncer) -> Self {
        Self {
            agent,
            repo,
            catalog,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn catalog(&self) -> &CatalogSyncer {
        &self.catalog
    }

    /// Run one pass for `identity`.
    ///
    /// Errors from the agent, including [`SyncError::AgentUnavailable`],
    /// end the pass and are returned unchanged.
    ///
    /// [`SyncError::AgentUnavailable`]: crate::error::SyncError::AgentUnavailable
    pub async fn sync(&self, identity: &str) -> Result<SyncReport> {
        let start = Instant::now();
        let since = self.repo.watermark(identity)?;
        let manifest = self.agent.manifest_since(identity, since).await?;

        let mut report = SyncReport {
            watermark: since,
            ..Default::default()
        };
        if manifest.is_empty() {
            tracing::debug!("Nothing new for {} since {}", identity, since);
            return Ok(report);
        }

        let mut resolver = Resolver {
            catalog: &self.catalog,
            forced: false,
        };
        let mut newest: Option<i64> = None;

        for chunk in manifest.ordered_chunks() {
            let records = self.agent.chunk_by_index(identity, chunk.index).await?;
            tracing::debug!(
                "Chunk {} ({}..{}): {} records",
                chunk.index,
                chunk.from,
                chunk.to,
                records.len()
            );
            report.chunks += 1;

            for raw in records {
                match self.merge_one(identity, raw, &mut resolver).await? {
                    Some(ts) => {
                        report.merged += 1;
                        newest = Some(newest.map_or(ts, |n| n.max(ts)));
                    }
                    None => report.skipped += 1,
                }
            }
        }

        if let Some(newest) = newest {
            report.watermark = self.repo.advance_watermark(identity, newest)?;
        }

        tracing::info!(
            "Synced {}: {} merged, {} skipped across {} chunks in {:.2?} (watermark {})",
            identity,
            report.merged,
            report.skipped,
            report.chunks,
            start.elapsed(),
            report.watermark
        );
        Ok(report)
    }

    /// Merge one record. Returns its timestamp, or `None` when it was skipped.
    async fn merge_one(
        &self,
        identity: &str,
        raw: RawRecord,
        resolver: &mut Resolver<'_>,
    ) -> Result<Option<i64>> {
        let Some(entry) = resolver.resolve(&raw.item_id).await? else {
            tracing::warn!(
                "Skipping record {}@{}: item not in catalog",
                raw.item_id,
                raw.timestamp
            );
            return Ok(None);
        };

        let key = RecordKey::new(raw.item_id.clone(), raw.timestamp);
        let existing = self.repo.record(identity, &key)?;
        let merged = Record::merge(existing, raw, &entry);
        self.repo.upsert_record(identity, &merged)?;
        Ok(Some(merged.timestamp))
    }
}
