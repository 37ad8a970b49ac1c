//! Daemon lifecycle management
//!
//! The daemon owns the status store, the engine, the filesystem watches
//! and the IPC socket. It runs until `stop`, SIGINT or SIGTERM.

use annexstat_cli::ipc::{IpcServer, Request, RequestHandler, Response};
use annexstat_cli::locks::DaemonLock;
use annexstat_cli::roots::{Applied, RootSync};
use annexstat_cli::util::{self, StatePaths};
use annexstat_core::{badge_for, Badge, RepoPath, WatchedTree};
use annexstat_engine::{identify, Config, Engine};
use annexstat_store::SledStore;
use annexstat_vcs::GitAnnexCli;
use annexstat_watcher::{FallbackTimer, TreeWatcher};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const CONFIG_POLL: Duration = Duration::from_secs(2);
const ROOT_RECHECK: Duration = Duration::from_secs(30);

/// Is a daemon holding the lock in the default state directory?
pub fn is_running() -> bool {
    StatePaths::resolve()
        .map(|paths| DaemonLock::holder(&paths.dir).is_some())
        .unwrap_or(false)
}

/// Run the daemon in the foreground until it is told to stop
pub async fn run(config_path: PathBuf) -> Result<()> {
    // 1. State directory and logging
    let paths = StatePaths::resolve()?;
    std::fs::create_dir_all(&paths.logs).context("Failed to create logs directory")?;
    let _log_guard = init_logging(&paths);

    // 2. Exclusive lock
    let lock = DaemonLock::acquire(&paths.dir)?;
    info!(pid = std::process::id(), config = %config_path.display(), "Daemon starting");

    // 3. Config, store and engine
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let store = Arc::new(SledStore::open(&paths.store).context("Failed to open status store")?);
    let vcs = Arc::new(GitAnnexCli::new(&config.vcs.git_bin));
    let engine = Engine::new(store.clone(), vcs.clone(), config.engine.clone())?;

    // 4. Change signals: filesystem watches plus the fallback timer
    let (watcher, pump) = TreeWatcher::new(
        config.watch.debounce(),
        config.watch.ignore.clone(),
        engine.signal_sender(),
    );
    let pump_task = tokio::spawn(pump.run());
    let fallback = FallbackTimer::new(
        config.engine.fallback_interval(),
        {
            let engine = engine.clone();
            move || engine.trees().into_iter().map(|tree| tree.id).collect()
        },
        engine.signal_sender(),
    );
    let fallback_task = tokio::spawn(fallback.run());

    // 5. Watched trees, then the engine loops
    let mut roots = RootSync::new(config.roots.clone(), ROOT_RECHECK);
    roots
        .sync(|wanted| apply_roots(&engine, &watcher, &vcs, wanted))
        .await;
    engine.start();

    // 6. IPC
    let shutdown = CancellationToken::new();
    let server = IpcServer::bind(&paths.socket)
        .await
        .context("Failed to start IPC server")?;
    let handler = Arc::new(DaemonHandler {
        engine: engine.clone(),
        shutdown: shutdown.clone(),
        started: Instant::now(),
    });
    let server_task = tokio::spawn(server.serve(handler, shutdown.clone()));

    // 7. Wait for a stop, reloading the config when it changes and
    // retrying roots that are not in effect yet
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut last_modified = modified_time(&config_path);
    let mut poll = tokio::time::interval(CONFIG_POLL);
    info!(trees = engine.trees().len(), "Daemon ready");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = terminate.recv() => {
                info!("Terminated");
                break;
            }
            _ = poll.tick() => {
                let current = modified_time(&config_path);
                if current != last_modified {
                    last_modified = current;
                    match Config::load(&config_path) {
                        Ok(updated) => {
                            reload(&config, &updated);
                            roots.want(&updated.roots);
                            config = updated;
                        }
                        Err(e) => warn!("Ignoring invalid config: {}", e),
                    }
                }
                roots
                    .sync(|wanted| apply_roots(&engine, &watcher, &vcs, wanted))
                    .await;
            }
        }
    }

    // 8. Shut down
    shutdown.cancel();
    engine.shutdown();
    fallback_task.abort();
    drop(watcher);
    pump_task.abort();
    if let Err(e) = server_task.await {
        warn!("IPC server task failed: {}", e);
    }
    if let Err(e) = store.flush() {
        error!("failed to flush status store: {}", e);
    }
    lock.release()?;
    info!("Daemon stopped");
    Ok(())
}

/// Log to `logs/daemon.log` through a non-blocking writer
fn init_logging(paths: &StatePaths) -> WorkerGuard {
    let appender = tracing_appender::rolling::never(&paths.logs, "daemon.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("ANNEXSTAT_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    guard
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Log what a changed config file means; roots are applied by `RootSync`
fn reload(old: &Config, new: &Config) {
    info!("Config file changed");
    if new.roots != old.roots {
        info!(roots = new.roots.len(), "Watched roots changed");
    }
    if new.engine != old.engine || new.vcs != old.vcs || new.watch != old.watch {
        warn!("Engine, vcs and watch settings apply after a daemon restart");
    }
}

/// Reconcile the engine's trees and the filesystem watches with `roots`
async fn apply_roots(
    engine: &Arc<Engine>,
    watcher: &TreeWatcher,
    vcs: &Arc<GitAnnexCli>,
    roots: Vec<PathBuf>,
) -> Result<Applied> {
    let roots: Vec<PathBuf> = roots
        .into_iter()
        .map(|root| root.canonicalize().unwrap_or(root))
        .collect();
    let vcs = vcs.clone();
    let identified = tokio::task::spawn_blocking(move || identify(&roots, vcs.as_ref()))
        .await
        .context("Tree identification task failed")?;
    for (root, e) in &identified.rejected {
        warn!(root = %root.display(), "not watching, no git-annex identifier: {}", e);
    }

    let delta = engine.set_trees(identified.trees)?;
    for tree in &delta.removed {
        watcher.unwatch(tree.id);
    }
    for tree in &delta.relocated {
        watch(watcher, tree);
    }
    // Unchanged trees from the previous run need their watch too
    for tree in engine.trees() {
        if !watcher.is_watching(tree.id) {
            watch(watcher, &tree);
        }
    }
    Ok(Applied {
        rejected: identified.rejected.len(),
    })
}

fn watch(watcher: &TreeWatcher, tree: &WatchedTree) {
    if let Err(e) = watcher.watch(tree) {
        warn!(tree = %tree, "cannot watch tree, relying on the fallback timer: {:#}", e);
    }
}

struct DaemonHandler {
    engine: Arc<Engine>,
    shutdown: CancellationToken,
    started: Instant,
}

impl DaemonHandler {
    fn locate(&self, path: &Path) -> std::result::Result<(WatchedTree, RepoPath), Response> {
        let absolute = util::absolute(path).map_err(|e| Response::error(format!("{:#}", e)))?;
        let tree = self
            .engine
            .tree_for_path(&absolute)
            .ok_or_else(|| Response::error(format!("{} is not inside a watched tree", absolute.display())))?;
        let relative = RepoPath::from_absolute(&tree.root, &absolute)
            .map_err(|e| Response::error(e.to_string()))?;
        Ok((tree, relative))
    }
}

impl RequestHandler for DaemonHandler {
    fn handle(&self, request: Request) -> Response {
        match request {
            Request::Status { path } => match self.locate(&path) {
                Ok((tree, path)) => {
                    let status = self.engine.request_status(tree.id, &path);
                    let badge = status.as_ref().map(badge_for).unwrap_or(Badge::Unknown);
                    Response::Status {
                        tree: tree.id,
                        path,
                        status,
                        badge,
                    }
                }
                Err(response) => response,
            },
            Request::Command { path, command } => match self.locate(&path) {
                Ok((tree, path)) => match self.engine.submit_command(tree.id, path, command) {
                    Ok(request) => Response::Queued {
                        id: request.id.to_string(),
                    },
                    Err(e) => Response::error(format!("{:#}", e)),
                },
                Err(response) => response,
            },
            Request::Trees => {
                let mut trees: Vec<WatchedTree> = self.engine.trees().into_iter().collect();
                trees.sort_by(|a, b| a.root.cmp(&b.root));
                Response::Trees { trees }
            }
            Request::Stats => Response::Stats {
                pid: std::process::id(),
                uptime_secs: self.started.elapsed().as_secs(),
                engine: self.engine.stats(),
            },
            Request::Stop => {
                info!("Stop requested");
                self.shutdown.cancel();
                Response::Stopping
            }
        }
    }
}
