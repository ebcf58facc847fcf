//! Reference catalog refresh.
//!
//! [`CatalogSyncer`] fetches the whole catalog from a [`CatalogSource`] and
//! writes the entries created since the last refresh, together with the new
//! refresh time, in one batch. At most one refresh runs at a time: callers
//! that arrive while one is in flight await that same operation.
//!
//! Failures are logged and leave the stored catalog as it was. The next
//! staleness check or catalog miss tries again.

use crate::error::SyncError;
use crate::model::CatalogEntry;
use crate::store::Repository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default age after which the catalog is refetched
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(24 * 60 * 60);

/// Bulk catalog endpoint.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<CatalogEntry>>;
}

/// Fetches the catalog as a JSON array with a single GET.
pub struct HttpCatalogSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCatalogSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("tracksync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn fetch_all(&self) -> Result<Vec<CatalogEntry>> {
        let entries = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()
            .with_context(|| format!("GET {}", self.url))?
            .json::<Vec<CatalogEntry>>()
            .await
            .context("Invalid catalog body")?;
        Ok(entries)
    }
}

/// Stands in when no catalog endpoint is configured; every fetch fails.
pub struct UnconfiguredSource;

#[async_trait]
impl CatalogSource for UnconfiguredSource {
    async fn fetch_all(&self) -> Result<Vec<CatalogEntry>> {
        anyhow::bail!("catalog.url is not configured")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Refetch only when the catalog is older than the staleness threshold
    IfStale,
    /// Refetch now; also admits entries missing locally regardless of age
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Catalog was young enough, nothing fetched
    Fresh,
    Refreshed { added: usize },
    Failed(String),
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// The refresh callers currently join, tagged so a finished operation only
/// clears its own entry.
struct InFlight {
    generation: u64,
    operation: SharedRefresh,
}

struct Inner {
    source: Arc<dyn CatalogSource>,
    repo: Repository,
    staleness: TimeDelta,
    next_generation: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
}

#[derive(Clone)]
pub struct CatalogSyncer {
    inner: Arc<Inner>,
}

impl CatalogSyncer {
    pub fn new(source: Arc<dyn CatalogSource>, repo: Repository, staleness: Duration) -> Self {
        let staleness = TimeDelta::from_std(staleness).unwrap_or(TimeDelta::MAX);
        Self {
            inner: Arc::new(Inner {
                source,
                repo,
                staleness,
                next_generation: AtomicU64::new(0),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Refresh the catalog, or join the refresh already in flight.
    pub async fn refresh(&self, mode: RefreshMode) -> RefreshOutcome {
        let operation = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(running) => {
                    tracing::debug!("Joining catalog refresh in flight");
                    running.operation.clone()
                }
                None => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let operation = async move {
                        let outcome = inner.run(mode, Utc::now()).await;
                        let mut slot = inner.in_flight.lock();
                        if slot.as_ref().is_some_and(|f| f.generation == generation) {
                            slot.take();
                        }
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        generation,
                        operation: operation.clone(),
                    });
                    operation
                }
            }
        };
        operation.await
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Forget any in-flight refresh, so the next call starts a new one. The
    /// forgotten refresh still runs to completion for the callers awaiting it.
    pub fn reset(&self) {
        self.inner.in_flight.lock().take();
    }

    pub fn lookup(&self, item_id: &str) -> crate::error::Result<Option<CatalogEntry>> {
        Ok(self.inner.repo.catalog_entry(item_id)?)
    }
}

impl Inner {
    async fn run(&self, mode: RefreshMode, now: DateTime<Utc>) -> RefreshOutcome {
        let last = match self.repo.catalog_refreshed_at() {
            Ok(last) => last,
            Err(e) => {
                tracing::warn!("Cannot read catalog refresh time: {}", e);
                return RefreshOutcome::Failed(e.to_string());
            }
        };

        if mode == RefreshMode::IfStale {
            if let Some(last) = last {
                if now.signed_duration_since(last) <= self.staleness {
                    tracing::debug!("Catalog is fresh (refreshed {})", last);
                    return RefreshOutcome::Fresh;
                }
            }
        }

        let entries = match self.source.fetch_all().await {
            Ok(entries) => entries,
            Err(e) => {
                let err = SyncError::CatalogFetch(format!("{:#}", e));
                tracing::warn!("{}, keeping current catalog", err);
                return RefreshOutcome::Failed(err.to_string());
            }
        };
        let fetched = entries.len();

        let mut admitted = Vec::new();
        for entry in entries {
            let newer = last.map_or(true, |last| entry.created_at > last);
            let admit = newer
                || (mode == RefreshMode::Force
                    && matches!(self.repo.catalog_entry(&entry.item_id), Ok(None)));
            if admit {
                admitted.push(entry);
            }
        }

        if let Err(e) = self.repo.store_catalog(&admitted, now) {
            tracing::warn!("Cannot store catalog, keeping current catalog: {}", e);
            return RefreshOutcome::Failed(e.to_string());
        }

        tracing::info!(
            "Catalog refreshed: {} fetched, {} written",
            fetched,
            admitted.len()
        );
        RefreshOutcome::Refreshed {
            added: admitted.len(),
        }
    }
}
