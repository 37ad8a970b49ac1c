//! IPC between the CLI and the daemon
//!
//! One JSON object per line in each direction over a Unix socket. A
//! connection may carry any number of request/response pairs.

use annexstat_core::{AnnexCommand, Badge, PathStatus, RepoPath, TreeId, WatchedTree};
use annexstat_engine::EngineStats;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("cannot connect to daemon at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("a daemon is already serving {0}")]
    AlreadyServing(PathBuf),
    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("daemon closed the connection")]
    Closed,
}

pub type Result<T> = std::result::Result<T, IpcError>;

/// Client to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Current status of an absolute path
    Status { path: PathBuf },
    /// Queue an annex command for an absolute path
    Command { path: PathBuf, command: AnnexCommand },
    Trees,
    Stats,
    Stop,
}

/// Daemon to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Status {
        tree: TreeId,
        path: RepoPath,
        /// `None` until the requested refresh lands
        status: Option<PathStatus>,
        badge: Badge,
    },
    Queued {
        id: String,
    },
    Trees {
        trees: Vec<WatchedTree>,
    },
    Stats {
        pid: u32,
        uptime_secs: u64,
        engine: EngineStats,
    },
    Stopping,
    Error {
        message: String,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

/// Answers requests on the daemon side
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> Response;
}

pub struct IpcClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl IpcClient {
    pub async fn connect(socket: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket)
            .await
            .map_err(|source| IpcError::Connect {
                path: socket.to_path_buf(),
                source,
            })?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    /// Send one request and wait for its response
    pub async fn send(&mut self, request: &Request) -> Result<Response> {
        write_line(&mut self.writer, request).await?;
        match self.lines.next_line().await? {
            Some(line) => Ok(serde_json::from_str(&line)?),
            None => Err(IpcError::Closed),
        }
    }
}

/// Listening socket; the socket file is removed on drop
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Bind `path`, replacing a socket file nobody is listening on
    pub async fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(IpcError::AlreadyServing(path.to_path_buf()));
            }
            debug!(path = %path.display(), "Removing stale socket");
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "IPC server listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` fires
    pub async fn serve<H: RequestHandler>(self, handler: Arc<H>, shutdown: CancellationToken) {
        loop {
            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                },
            };

            // Connections outlive the listener so a `stop` reply still goes out
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, handler).await {
                    debug!("connection ended: {}", e);
                }
            });
        }
        debug!("IPC server stopped");
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_connection<H: RequestHandler>(stream: UnixStream, handler: Arc<H>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handler.handle(request),
            Err(e) => Response::error(format!("invalid request: {}", e)),
        };
        write_line(&mut writer, &response).await?;
    }
    Ok(())
}

async fn write_line<T: Serialize>(writer: &mut OwnedWriteHalf, message: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
