//! Builtin job types available to every configuration.

use std::process::Stdio;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use cadence_scheduler::{Job, JobContext, JobRegistry};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Logs its argument at info level.
pub struct LogJob;

#[async_trait]
impl Job for LogJob {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        info!(
            job = %ctx.name,
            run = ctx.run_count,
            message = ctx.argument.as_deref().unwrap_or(""),
            "scheduled message"
        );
        Ok(())
    }
}

/// Runs its argument through `sh -c`. The child is killed when the job is
/// asked to stop.
pub struct CommandJob;

#[async_trait]
impl Job for CommandJob {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        let command = ctx
            .argument
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow!("command job '{}' has no command argument", ctx.name))?;

        debug!(job = %ctx.name, %command, "spawning command");
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn '{command}'"))?;

        tokio::select! {
            output = child.wait_with_output() => {
                let output = output.with_context(|| format!("failed to wait for '{command}'"))?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                if !stdout.trim().is_empty() {
                    debug!(job = %ctx.name, stdout = %stdout.trim(), "command output");
                }
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    bail!("'{command}' exited with {}: {}", output.status, stderr.trim());
                }
                info!(job = %ctx.name, "command completed");
                Ok(())
            }
            _ = ctx.cancelled() => {
                warn!(job = %ctx.name, %command, "command terminated");
                Ok(())
            }
        }
    }
}

/// Registry holding the builtin `log` and `command` job types.
pub fn builtin_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register("log", LogJob).register("command", CommandJob);
    registry
}
