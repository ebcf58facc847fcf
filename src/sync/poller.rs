//! Background polling.
//!
//! [`BackgroundPoller`] runs a sync pass right away and then on every
//! interval tick. Scheduled and manual passes go through the same in-flight
//! guard: a pass requested while another is running returns
//! [`PollOutcome::Skipped`] without talking to the agent.

use crate::events::{EventBus, SyncEvent};
use crate::sync::engine::SyncEngine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default time between scheduled passes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Supplies the identity a pass syncs, if one is active.
pub trait IdentityResolver: Send + Sync {
    fn active_identity(&self) -> Option<String>;
}

impl<F> IdentityResolver for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn active_identity(&self) -> Option<String> {
        self()
    }
}

/// An identity that never changes.
pub struct FixedIdentity(pub Option<String>);

impl IdentityResolver for FixedIdentity {
    fn active_identity(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Result of one `perform_sync` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another pass was running
    Skipped,
    NoIdentity,
    Synced(usize),
    Failed,
}

impl PollOutcome {
    /// Integer form: merged count, `0` when nothing ran, `-1` on failure.
    pub fn code(&self) -> i64 {
        match self {
            PollOutcome::Skipped | PollOutcome::NoIdentity => 0,
            PollOutcome::Synced(n) => *n as i64,
            PollOutcome::Failed => -1,
        }
    }
}

struct Inner {
    engine: SyncEngine,
    identity: Arc<dyn IdentityResolver>,
    events: EventBus,
    in_flight: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

/// Clears the in-flight flag however the pass ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    async fn perform_sync(&self) -> PollOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sync already in flight, skipping");
            return PollOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let Some(identity) = self.identity.active_identity() else {
            tracing::debug!("No active identity, skipping sync");
            return PollOutcome::NoIdentity;
        };

        match self.engine.sync(&identity).await {
            Ok(report) => {
                *self.last_sync.lock() = Some(Utc::now());
                if report.merged > 0 {
                    self.events.publish(SyncEvent::RecordsUpdated {
                        identity,
                        count: report.merged,
                    });
                }
                PollOutcome::Synced(report.merged)
            }
            Err(e) if e.is_agent_unavailable() => {
                tracing::debug!("Background sync: {}", e);
                PollOutcome::Failed
            }
            Err(e) => {
                tracing::error!("Background sync failed: {}", e);
                PollOutcome::Failed
            }
        }
    }
}

pub struct BackgroundPoller {
    inner: Arc<Inner>,
    interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundPoller {
    pub fn new(
        engine: SyncEngine,
        identity: Arc<dyn IdentityResolver>,
        events: EventBus,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                identity,
                events,
                in_flight: AtomicBool::new(false),
                last_sync: Mutex::new(None),
            }),
            interval,
            timer: Mutex::new(None),
        }
    }

    /// Run a pass now and then every interval. No-op if already started.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let period = self.interval;
        *timer = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // First tick completes immediately
                ticks.tick().await;
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    inner.perform_sync().await;
                });
            }
        }));
        tracing::info!("Background sync started (every {:?})", period);
    }

    /// Cancel future passes. A pass already running finishes on its own.
    pub fn stop(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
            tracing::info!("Background sync stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Whether a pass is in progress right now.
    pub fn is_syncing(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub async fn perform_sync(&self) -> PollOutcome {
        self.inner.perform_sync().await
    }

    /// Same as [`perform_sync`](Self::perform_sync); skipped rather than
    /// queued when a pass is already running.
    pub async fn trigger_manual_sync(&self) -> PollOutcome {
        self.perform_sync().await
    }

    /// When the last pass completed without error.
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_sync.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for BackgroundPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
