use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracksync::sync::{FixedIdentity, RefreshMode, RefreshOutcome, SyncStack, SyncStatus};
use tracksync::{Config, LocalFields, RecordKey, SyncEvent};

#[derive(Parser)]
#[command(name = "tracksync")]
#[command(version)]
#[command(about = "Incremental sync of practice-problem submissions from a local agent")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "TRACKSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Identity (account name) to sync
    #[arg(short, long, env = "TRACKSYNC_IDENTITY", global = true)]
    identity: Option<String>,

    /// Store directory
    #[arg(long, env = "TRACKSYNC_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass
    Sync,
    /// Sync in the background until Ctrl-C
    Poll,
    /// Show the agent's sync progress
    Status {
        /// Keep polling until the agent reports complete
        #[arg(short, long)]
        watch: bool,
    },
    /// Refresh the reference catalog
    Catalog {
        /// Refetch even if the catalog is fresh
        #[arg(short, long)]
        force: bool,
    },
    /// List stored records
    Records {
        /// Show at most this many records
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Edit the locally-owned fields of a stored record
    Edit {
        item_id: String,
        timestamp: i64,
        #[arg(long)]
        notes: Option<String>,
        /// Minutes spent
        #[arg(long)]
        time_spent: Option<u32>,
        #[arg(long)]
        used_hints: Option<bool>,
        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "tracksync=debug" } else { "tracksync=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn require_identity(config: &Config) -> Result<String> {
    config
        .identity
        .clone()
        .context("No identity configured (use --identity or set `identity` in the config file)")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if cli.identity.is_some() {
        config.identity = cli.identity.clone();
    }
    if cli.data_dir.is_some() {
        config.storage.path = cli.data_dir.clone();
    }

    let stack = SyncStack::open(&config).await?;
    let result = run(cli.command, &config, &stack).await;
    stack.shutdown().await?;
    result
}

async fn run(command: Commands, config: &Config, stack: &SyncStack) -> Result<()> {
    match command {
        Commands::Sync => {
            let identity = require_identity(config)?;
            stack.catalog.refresh(RefreshMode::IfStale).await;
            match stack.engine.sync(&identity).await {
                Ok(report) => {
                    println!(
                        "{} {} merged, {} skipped, {} chunks (watermark {})",
                        "✓".green(),
                        report.merged,
                        report.skipped,
                        report.chunks,
                        report.watermark
                    );
                    Ok(())
                }
                Err(e) if e.is_agent_unavailable() => {
                    println!("{} Agent not available, nothing synced", "!".yellow());
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }

        Commands::Poll => {
            let identity = require_identity(config)?;
            stack.catalog.refresh(RefreshMode::IfStale).await;

            let poller = stack.poller(Arc::new(FixedIdentity(Some(identity))), config);
            let mut events = poller.subscribe();
            poller.start();
            println!(
                "Polling every {:?}, press Ctrl-C to stop",
                poller.interval()
            );

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(SyncEvent::RecordsUpdated { identity, count }) => {
                            println!("{} {} new records for {}", "↻".cyan(), count, identity);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            poller.stop();
            if let Some(last) = poller.last_sync_time() {
                println!("Last sync at {}", last.to_rfc3339());
            }
            Ok(())
        }

        Commands::Status { watch } => {
            let identity = require_identity(config)?;
            let monitor = stack.monitor();

            if !watch {
                let check = monitor.check_for_valid_manifest(&identity).await;
                if !check.has_manifest {
                    println!("{} No manifest from agent yet", "!".yellow());
                    return Ok(());
                }
                let progress = monitor.monitor_sync_progress(&identity).await;
                println!("{}", serde_json::to_string_pretty(&progress)?);
                return Ok(());
            }

            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::with_template("{spinner} [{bar:40}] {pos}% {msg}")?
                    .progress_chars("=> "),
            );
            loop {
                let progress = monitor.monitor_sync_progress(&identity).await;
                bar.set_position(progress.progress as u64);
                match (&progress.error, progress.total) {
                    (Some(error), _) => bar.set_message(error.clone()),
                    (None, Some(total)) => bar.set_message(format!("of {} records", total)),
                    (None, None) => bar.set_message("waiting for agent"),
                }
                if progress.status == SyncStatus::Complete {
                    bar.finish_with_message("complete");
                    break;
                }
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        bar.abandon();
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
            Ok(())
        }

        Commands::Catalog { force } => {
            let mode = if force {
                RefreshMode::Force
            } else {
                RefreshMode::IfStale
            };
            match stack.catalog.refresh(mode).await {
                RefreshOutcome::Fresh => println!("Catalog is fresh"),
                RefreshOutcome::Refreshed { added } => {
                    println!("{} Catalog refreshed, {} entries written", "✓".green(), added)
                }
                RefreshOutcome::Failed(e) => println!("{} Catalog refresh failed: {}", "✗".red(), e),
            }
            println!("{} entries stored", stack.repo.catalog_len()?);
            Ok(())
        }

        Commands::Records { limit } => {
            let identity = require_identity(config)?;
            let records = stack.repo.records(&identity)?;
            for record in records.iter().take(limit) {
                let status = if record.status == "Accepted" {
                    record.status.green()
                } else {
                    record.status.red()
                };
                println!(
                    "{:>12}  {:<40} {:<8} {:<14} {}",
                    record.timestamp,
                    record.title,
                    record.difficulty,
                    status,
                    record.local.notes.as_deref().unwrap_or("")
                );
            }
            println!(
                "{} of {} records (watermark {})",
                records.len().min(limit),
                records.len(),
                stack.repo.watermark(&identity)?
            );
            Ok(())
        }

        Commands::Edit {
            item_id,
            timestamp,
            notes,
            time_spent,
            used_hints,
            tags,
        } => {
            let identity = require_identity(config)?;
            let edit = LocalFields {
                notes,
                time_spent,
                used_hints,
                tags,
                ..Default::default()
            };
            if edit.is_empty() {
                anyhow::bail!("Nothing to edit");
            }
            let key = RecordKey::new(item_id, timestamp);
            match stack.repo.update_local_fields(&identity, &key, edit)? {
                Some(record) => println!("{} Updated {}@{}", "✓".green(), record.item_id, record.timestamp),
                None => anyhow::bail!("No record {}@{}", key.item_id, key.timestamp),
            }
            Ok(())
        }
    }
}
