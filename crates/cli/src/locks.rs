//! Lock file management for daemon exclusivity
//!
//! One daemon per state directory. The lock is an `flock` on
//! `daemon.lock`, whose content names the holder so `stop` and `status`
//! can find it.

use annexstat_core::now_ms;
use anyhow::{Context, Result};
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCK_FILE: &str = "daemon.lock";

/// Held for the daemon's whole lifetime
pub struct DaemonLock {
    path: PathBuf,
    // The flock lives as long as this descriptor
    _file: File,
}

/// Who holds the lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockContent {
    pub pid: u32,
    /// Unix milliseconds
    pub started_at: u64,
}

impl LockContent {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            started_at: now_ms(),
        }
    }

    fn read_from(file: &mut File) -> Result<Self> {
        file.seek(SeekFrom::Start(0))?;
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        serde_json::from_str(&text).context("Malformed lock file")
    }

    fn write_to(&self, file: &mut File) -> Result<()> {
        let text = serde_json::to_string(self).context("Failed to serialize lock content")?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        is_process_alive(self.pid)
    }
}

impl DaemonLock {
    /// Acquire the exclusive daemon lock in `state_dir`
    ///
    /// Fails if another live process holds it. A lock file left behind by a
    /// dead process is removed and the acquisition retried once.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir).context("Failed to create state directory")?;
        let path = state_dir.join(LOCK_FILE);

        match Self::try_lock(&path)? {
            Some(lock) => Ok(lock),
            None => {
                warn!(path = %path.display(), "Removing stale daemon lock");
                std::fs::remove_file(&path).context("Failed to remove stale lock")?;
                Self::try_lock(&path)?
                    .ok_or_else(|| anyhow::anyhow!("Daemon lock is still held after stale removal"))
            }
        }
    }

    /// `Ok(None)` when the lock is held but its holder is dead
    fn try_lock(path: &Path) -> Result<Option<Self>> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .context("Failed to open lock file")?;

        if !try_flock_exclusive(&file)? {
            let stale = LockContent::read_from(&mut file)
                .map(|content| !content.is_alive())
                .unwrap_or(true);
            if stale {
                return Ok(None);
            }
            anyhow::bail!("Daemon already running (lock file held by active process)");
        }

        LockContent::current().write_to(&mut file)?;
        Ok(Some(Self {
            path: path.to_path_buf(),
            _file: file,
        }))
    }

    /// Release the lock and remove its file
    pub fn release(self) -> Result<()> {
        std::fs::remove_file(&self.path).context("Failed to remove lock file")
    }

    /// Content of the lock in `state_dir` while a live daemon holds it
    pub fn holder(state_dir: &Path) -> Option<LockContent> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(state_dir.join(LOCK_FILE))
            .ok()?;

        // Acquirable means nobody holds it; dropping `file` releases it again
        if try_flock_exclusive(&file).unwrap_or(false) {
            return None;
        }
        LockContent::read_from(&mut file)
            .ok()
            .filter(LockContent::is_alive)
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(true),
        Err(Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Null signal: checks existence without delivering anything
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // EPERM means it exists but belongs to someone else
    !matches!(
        kill(Pid::from_raw(pid as i32), None::<Signal>),
        Err(Errno::ESRCH)
    )
}
