//! Agent process link - runs the agent as a child process.
//!
//! Tracker envelopes on the bus are written to the child's stdin, one JSON
//! line each. Lines the child prints on stdout are parsed and republished on
//! the bus. The child is killed when the link is dropped.

use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::transport::bus::LocalBus;
use crate::transport::protocol::{read_frame, write_frame};

pub struct AgentProcess {
    child: Child,
    pumps: Vec<JoinHandle<()>>,
}

impl AgentProcess {
    /// Spawn `command` (program followed by its arguments) and attach it to `bus`.
    pub async fn spawn(command: &[String], bus: &LocalBus) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("Agent command is empty")?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn agent process `{}`", program))?;

        let mut stdin = child.stdin.take().context("Failed to open agent stdin")?;
        let stdout = child.stdout.take().context("Failed to open agent stdout")?;

        // Tracker -> agent
        let mut rx = bus.subscribe();
        let outbound = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) if envelope.is_from_agent() => continue,
                    Ok(envelope) => {
                        if let Err(e) = write_frame(&mut stdin, &envelope).await {
                            tracing::debug!("Agent stdin closed: {}", e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Agent link lagged, {} requests dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Agent -> tracker
        let inbound_bus = bus.clone();
        let inbound = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(envelope)) if envelope.is_from_agent() => {
                        if inbound_bus.publish(envelope).is_err() {
                            break;
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        tracing::debug!("Agent process closed stdout");
                        break;
                    }
                    Err(SyncError::Protocol(msg)) => {
                        tracing::debug!("Ignoring agent output: {}", msg);
                    }
                    Err(e) => {
                        tracing::debug!("Agent stdout read failed: {}", e);
                        break;
                    }
                }
            }
        });

        tracing::info!("Started agent process `{}`", program);

        Ok(Self {
            child,
            pumps: vec![outbound, inbound],
        })
    }

    /// Stop the pumps and kill the child.
    pub async fn shutdown(mut self) -> Result<()> {
        for pump in &self.pumps {
            pump.abort();
        }
        self.child
            .kill()
            .await
            .context("Failed to kill agent process")?;
        Ok(())
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}
