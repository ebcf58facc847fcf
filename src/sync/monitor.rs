//! Sync status for onboarding screens.
//!
//! [`SyncMonitor`] reads the full manifest (since 0) and turns the dialect
//! the agent speaks into a [`SyncProgress`]. The caller decides how often to
//! poll. Neither method returns an error: failures are folded into the
//! returned value.

use crate::sync::engine::SyncEngine;
use crate::transport::{AgentClient, Dialect, Manifest};
use serde::Serialize;
use std::sync::Arc;

/// Error text when the manifest itself cannot be read
pub const MONITOR_FAILED: &str = "Failed to monitor sync progress";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCheck {
    pub has_manifest: bool,
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Syncing,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncProgress {
    pub status: SyncStatus,
    /// Percent, always within 0..=100
    pub progress: u8,
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncProgress {
    fn syncing(progress: u8, total: Option<f64>) -> Self {
        Self {
            status: SyncStatus::Syncing,
            progress,
            total,
            error: None,
        }
    }

    fn complete(total: Option<f64>) -> Self {
        Self {
            status: SyncStatus::Complete,
            progress: 100,
            total,
            error: None,
        }
    }

    fn failed(total: Option<f64>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::syncing(0, total)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == SyncStatus::Complete
    }
}

/// Percent of `total` reached by `synced`. A zero total counts as done.
pub fn progress_percent(total: f64, synced: f64) -> u8 {
    if total > 0.0 {
        (100.0 * synced / total).round().clamp(0.0, 100.0) as u8
    } else {
        100
    }
}

pub struct SyncMonitor {
    agent: Arc<dyn AgentClient>,
    engine: SyncEngine,
}

impl SyncMonitor {
    pub fn new(agent: Arc<dyn AgentClient>, engine: SyncEngine) -> Self {
        Self { agent, engine }
    }

    async fn full_manifest(&self, identity: &str) -> crate::error::Result<Manifest> {
        self.agent.manifest_since(identity, 0).await
    }

    /// Whether the agent has anything to offer for `identity`.
    pub async fn check_for_valid_manifest(&self, identity: &str) -> ManifestCheck {
        match self.full_manifest(identity).await {
            Ok(manifest) => {
                let total = manifest.total.as_number();
                ManifestCheck {
                    has_manifest: !manifest.is_empty() || total.is_some(),
                    total,
                }
            }
            Err(e) => {
                if e.is_agent_unavailable() {
                    tracing::debug!("Manifest check: {}", e);
                } else {
                    tracing::error!("Manifest check failed: {}", e);
                }
                ManifestCheck {
                    has_manifest: false,
                    total: None,
                }
            }
        }
    }

    /// Classify the agent's progress, running a sync pass when the agent is
    /// ready to serve data.
    pub async fn monitor_sync_progress(&self, identity: &str) -> SyncProgress {
        let manifest = match self.full_manifest(identity).await {
            Ok(manifest) => manifest,
            Err(e) => {
                if e.is_agent_unavailable() {
                    tracing::debug!("Sync progress: {}", e);
                } else {
                    tracing::error!("Sync progress: {}", e);
                }
                return SyncProgress::failed(None, MONITOR_FAILED);
            }
        };

        match manifest.dialect() {
            Dialect::Legacy => {
                if let Err(error) = self.run_pass(identity).await {
                    return SyncProgress::failed(None, error);
                }
                if manifest.is_empty() {
                    SyncProgress::syncing(0, None)
                } else {
                    SyncProgress::complete(None)
                }
            }
            Dialect::Active { total, synced } => {
                if let Err(error) = self.run_pass(identity).await {
                    return SyncProgress::failed(Some(total), error);
                }
                if synced >= total {
                    SyncProgress::complete(Some(total))
                } else {
                    SyncProgress::syncing(progress_percent(total, synced), Some(total))
                }
            }
            Dialect::Pending | Dialect::Unknown => SyncProgress::syncing(0, None),
        }
    }

    /// Run one engine pass. A missing agent is not an error here.
    async fn run_pass(&self, identity: &str) -> Result<(), String> {
        match self.engine.sync(identity).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_agent_unavailable() => {
                tracing::debug!("Sync during monitoring: {}", e);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Sync during monitoring failed: {}", e);
                Err(e.to_string())
            }
        }
    }
}
