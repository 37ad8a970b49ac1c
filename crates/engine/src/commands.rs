//! Out-of-band annex command execution
//!
//! Requests are persisted first, so a command accepted before a restart
//! still runs after it. Each executed command re-requests its path at high
//! priority and triggers a change check for the tree.

use crate::context::EngineContext;
use crate::detector::ChangeDetector;
use crate::scheduler::{Priority, Scheduler};
use annexstat_core::CommandRequest;
use annexstat_store::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct CommandExecutor {
    ctx: Arc<EngineContext>,
    scheduler: Arc<Scheduler>,
    detector: Arc<ChangeDetector>,
    wake: Notify,
}

impl CommandExecutor {
    pub fn new(
        ctx: Arc<EngineContext>,
        scheduler: Arc<Scheduler>,
        detector: Arc<ChangeDetector>,
    ) -> Self {
        Self {
            ctx,
            scheduler,
            detector,
            wake: Notify::new(),
        }
    }

    /// Queue a command for execution
    pub fn submit(&self, request: &CommandRequest) -> Result<()> {
        self.ctx.store.push_command(request)?;
        debug!(id = %request.id, command = %request.command, path = %request.path, "Command queued");
        self.wake.notify_one();
        Ok(())
    }

    /// Execute queued commands until shutdown
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            self.drain().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
            }
        }
        debug!("Command executor stopped");
    }

    /// Run everything currently queued, oldest first
    pub async fn drain(self: &Arc<Self>) -> usize {
        let queued = match self.ctx.store.drain_commands() {
            Ok(queued) => queued,
            Err(e) => {
                error!("failed to read command queue: {}", e);
                return 0;
            }
        };

        let mut executed = 0;
        for request in queued {
            let Some(tree) = self.ctx.registry.get(request.tree) else {
                debug!(id = %request.id, "dropping command for unregistered tree");
                continue;
            };

            let vcs = self.ctx.vcs.clone();
            let path = request.path.clone();
            let command = request.command;
            let tree_for_task = tree.clone();
            let result = tokio::task::spawn_blocking(move || {
                vcs.run_command(&tree_for_task, &path, command)
            })
            .await;

            match result {
                Ok(Ok(())) => {
                    info!(tree = %tree.id, path = %request.path, command = %request.command, "Command finished");
                    executed += 1;
                }
                Ok(Err(e)) => {
                    warn!(tree = %tree.id, path = %request.path, command = %request.command, "Command failed: {}", e);
                }
                Err(e) => {
                    error!(id = %request.id, "command task failed: {}", e);
                    continue;
                }
            }

            // Whatever happened, the path's status may have moved
            self.scheduler
                .submit(tree.id, request.path.clone(), Priority::High, Duration::ZERO);
            let detector = self.detector.clone();
            let id = tree.id;
            tokio::spawn(async move { detector.check(id, None).await });
        }
        executed
    }
}
