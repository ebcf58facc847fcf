mod common;

use common::{record, seed_catalog, test_config, FixtureAgent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracksync::sync::{FixedIdentity, PollOutcome, SyncStack, SyncStatus};
use tracksync::{Repository, SyncEvent};

fn memory_stack() -> anyhow::Result<SyncStack> {
    let stack = SyncStack::with_repository(&test_config(), Repository::in_memory())?;
    seed_catalog(&stack.repo, &["two-sum", "add-two-numbers", "lru-cache"]);
    Ok(stack)
}

#[tokio::test]
async fn test_full_pass_over_bus() -> anyhow::Result<()> {
    let stack = memory_stack()?;
    let agent = FixtureAgent::attach(
        &stack.bus,
        "alice",
        vec![
            record("two-sum", 100),
            record("add-two-numbers", 200),
            record("lru-cache", 300),
            record("two-sum", 400),
            record("lru-cache", 500),
        ],
    );

    let report = stack.engine.sync("alice").await?;
    assert_eq!(report.merged, 5);
    assert_eq!(report.chunks, 3);
    assert_eq!(report.watermark, 500);
    assert_eq!(agent.chunk_requests(), 3);
    assert_eq!(stack.repo.records("alice")?.len(), 5);

    // Nothing new: no chunk requests, watermark unchanged
    let report = stack.engine.sync("alice").await?;
    assert_eq!(report.merged, 0);
    assert_eq!(report.watermark, 500);
    assert_eq!(agent.chunk_requests(), 3);
    assert_eq!(stack.bridge.pending_requests(), 0);
    Ok(())
}

#[tokio::test]
async fn test_only_new_records_are_fetched() -> anyhow::Result<()> {
    let stack = memory_stack()?;
    let agent = FixtureAgent::attach(&stack.bus, "alice", vec![record("two-sum", 100)]);

    stack.engine.sync("alice").await?;
    agent.push(record("lru-cache", 250));

    let report = stack.engine.sync("alice").await?;
    assert_eq!(report.merged, 1);
    assert_eq!(report.watermark, 250);
    assert_eq!(stack.repo.records("alice")?[0].item_id, "lru-cache");
    Ok(())
}

#[tokio::test]
async fn test_other_identity_times_out() -> anyhow::Result<()> {
    let stack = memory_stack()?;
    let agent = FixtureAgent::attach(&stack.bus, "alice", vec![record("two-sum", 100)]);

    let err = stack.engine.sync("bob").await.unwrap_err();
    assert!(err.is_agent_unavailable());
    assert_eq!(agent.manifest_requests(), 0);
    assert_eq!(stack.bridge.pending_requests(), 0);
    assert_eq!(stack.repo.watermark("bob")?, 0);
    Ok(())
}

#[tokio::test]
async fn test_agent_without_correlation_ids() -> anyhow::Result<()> {
    let stack = memory_stack()?;
    let agent = FixtureAgent::attach(
        &stack.bus,
        "alice",
        vec![record("two-sum", 100), record("lru-cache", 200), record("two-sum", 300)],
    );
    agent.state.lock().echo_correlation = false;

    let report = stack.engine.sync("alice").await?;
    assert_eq!(report.merged, 3);
    assert_eq!(report.watermark, 300);
    Ok(())
}

#[tokio::test]
async fn test_unknown_item_is_skipped() -> anyhow::Result<()> {
    let stack = memory_stack()?;
    let _agent = FixtureAgent::attach(
        &stack.bus,
        "alice",
        vec![record("two-sum", 100), record("not-in-catalog", 200)],
    );

    // No catalog URL configured, so the forced refresh fails and the record is dropped
    let report = stack.engine.sync("alice").await?;
    assert_eq!(report.merged, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.watermark, 100);
    assert!(!stack.catalog.is_refreshing());
    Ok(())
}

#[tokio::test]
async fn test_poller_announces_updates() -> anyhow::Result<()> {
    let stack = memory_stack()?;
    let _agent = FixtureAgent::attach(
        &stack.bus,
        "alice",
        vec![record("two-sum", 100), record("lru-cache", 200)],
    );
    let poller = stack.poller(Arc::new(FixedIdentity(Some("alice".into()))), &test_config());
    let mut events = poller.subscribe();

    assert_eq!(poller.trigger_manual_sync().await, PollOutcome::Synced(2));
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await??;
    assert_eq!(
        event,
        SyncEvent::RecordsUpdated {
            identity: "alice".into(),
            count: 2
        }
    );

    assert_eq!(poller.trigger_manual_sync().await, PollOutcome::Synced(0));
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_monitor_reads_agent_counters() -> anyhow::Result<()> {
    let stack = memory_stack()?;
    let agent = FixtureAgent::attach(&stack.bus, "alice", vec![]);
    let monitor = stack.monitor();

    agent.set_counters(json!({ "total": 100, "totalSynced": 50 }));
    let progress = monitor.monitor_sync_progress("alice").await;
    assert_eq!(progress.status, SyncStatus::Syncing);
    assert_eq!(progress.progress, 50);
    assert_eq!(progress.total, Some(100.0));

    agent.set_counters(json!({ "total": 100, "totalSynced": 100 }));
    let progress = monitor.monitor_sync_progress("alice").await;
    assert_eq!(progress.status, SyncStatus::Complete);
    assert_eq!(progress.progress, 100);

    agent.set_counters(json!({ "total": null, "totalSynced": null }));
    let check = monitor.check_for_valid_manifest("alice").await;
    assert!(!check.has_manifest);
    Ok(())
}

#[tokio::test]
async fn test_monitor_without_agent() -> anyhow::Result<()> {
    let stack = memory_stack()?;
    let monitor = stack.monitor();

    let check = monitor.check_for_valid_manifest("alice").await;
    assert!(!check.has_manifest);
    assert_eq!(check.total, None);

    let progress = monitor.monitor_sync_progress("alice").await;
    assert_eq!(progress.status, SyncStatus::Syncing);
    assert!(progress.error.is_some());
    Ok(())
}

#[tokio::test]
async fn test_disk_store_survives_restart() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let mut config = test_config();
    config.storage.path = Some(temp.path().to_path_buf());

    {
        let stack = SyncStack::open(&config).await?;
        seed_catalog(&stack.repo, &["two-sum"]);
        let _agent = FixtureAgent::attach(&stack.bus, "alice", vec![record("two-sum", 100)]);
        assert_eq!(stack.engine.sync("alice").await?.merged, 1);
        stack.shutdown().await?;
    }

    let stack = SyncStack::open(&config).await?;
    assert_eq!(stack.repo.watermark("alice")?, 100);
    assert_eq!(stack.repo.records("alice")?.len(), 1);
    assert!(stack.repo.catalog_entry("two-sum")?.is_some());
    stack.shutdown().await?;
    Ok(())
}
