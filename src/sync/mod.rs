//! Sync components and the wiring that assembles them from a [`Config`].

pub mod catalog;
pub mod engine;
pub mod monitor;
pub mod poller;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{CatalogSource, CatalogSyncer, HttpCatalogSource, RefreshMode, RefreshOutcome};
pub use engine::{SyncEngine, SyncReport};
pub use monitor::{ManifestCheck, SyncMonitor, SyncProgress, SyncStatus};
pub use poller::{BackgroundPoller, FixedIdentity, IdentityResolver, PollOutcome};

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::events::EventBus;
use crate::store::{FjallStore, Repository};
use crate::transport::{AgentClient, AgentProcess, LocalBus, TransportBridge};

/// Everything one running tracker needs, built from a [`Config`].
pub struct SyncStack {
    pub bus: LocalBus,
    pub bridge: Arc<TransportBridge>,
    pub repo: Repository,
    pub catalog: CatalogSyncer,
    pub engine: SyncEngine,
    pub events: EventBus,
    store: Option<Arc<FjallStore>>,
    agent: Option<AgentProcess>,
}

impl SyncStack {
    /// Open the on-disk store, attach the bridge and spawn the agent command
    /// if one is configured.
    pub async fn open(config: &Config) -> Result<Self> {
        let dir = config.data_dir();
        let store = Arc::new(
            FjallStore::open(&dir)
                .with_context(|| format!("Failed to open store at {}", dir.display()))?,
        );
        let repo = Repository::new(store.clone());

        let mut stack = Self::with_repository(config, repo)?;
        stack.store = Some(store);

        if !config.agent.command.is_empty() {
            stack.agent = Some(AgentProcess::spawn(&config.agent.command, &stack.bus).await?);
        } else {
            tracing::debug!("No agent command configured; requests will time out");
        }
        Ok(stack)
    }

    /// Build the stack over an existing repository without spawning an agent.
    /// Something else must answer on [`SyncStack::bus`].
    pub fn with_repository(config: &Config, repo: Repository) -> Result<Self> {
        let bus = LocalBus::new(config.agent.channel_capacity);
        let bridge = Arc::new(TransportBridge::new(bus.clone(), config.request_timeout()));

        let source: Arc<dyn CatalogSource> = match &config.catalog.url {
            Some(url) => Arc::new(HttpCatalogSource::new(url.clone())?),
            None => Arc::new(catalog::UnconfiguredSource),
        };
        let catalog = CatalogSyncer::new(source, repo.clone(), config.staleness());
        let agent: Arc<dyn AgentClient> = bridge.clone();
        let engine = SyncEngine::new(agent, repo.clone(), catalog.clone());

        Ok(Self {
            bus,
            bridge,
            repo,
            catalog,
            engine,
            events: EventBus::default(),
            store: None,
            agent: None,
        })
    }

    pub fn poller(&self, identity: Arc<dyn IdentityResolver>, config: &Config) -> BackgroundPoller {
        BackgroundPoller::new(
            self.engine.clone(),
            identity,
            self.events.clone(),
            config.poll_interval(),
        )
    }

    pub fn monitor(&self) -> SyncMonitor {
        SyncMonitor::new(self.bridge.clone(), self.engine.clone())
    }

    /// Stop the agent process and flush the store.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(agent) = self.agent.take() {
            agent.shutdown().await?;
        }
        if let Some(store) = &self.store {
            store.persist().context("Failed to flush store")?;
        }
        Ok(())
    }
}
