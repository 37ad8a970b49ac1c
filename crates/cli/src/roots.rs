//! Watched-root reconciliation with retry
//!
//! The daemon applies the configured roots on startup and whenever the
//! config file lists different ones. An attempt that fails is repeated on
//! the next polling cycle. Roots without a git-annex identifier are looked
//! at again after `recheck_after`, since a folder may be initialized later.

use anyhow::Result;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// What one apply achieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// Roots that could not be identified as git-annex trees
    pub rejected: usize,
}

/// Wanted roots and whether they are fully in effect
pub struct RootSync {
    wanted: Vec<PathBuf>,
    settled: bool,
    recheck_after: Duration,
    not_before: Option<Instant>,
}

impl RootSync {
    pub fn new(roots: Vec<PathBuf>, recheck_after: Duration) -> Self {
        Self {
            wanted: roots,
            settled: false,
            recheck_after,
            not_before: None,
        }
    }

    /// The config file now lists `roots`
    pub fn want(&mut self, roots: &[PathBuf]) {
        if roots != self.wanted.as_slice() {
            self.wanted = roots.to_vec();
            self.settled = false;
            self.not_before = None;
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Roots to apply now, if an attempt is owed
    pub fn due(&self, now: Instant) -> Option<Vec<PathBuf>> {
        if self.settled {
            return None;
        }
        match self.not_before {
            Some(at) if now < at => None,
            _ => Some(self.wanted.clone()),
        }
    }

    /// Record the outcome of applying the wanted roots
    pub fn record(&mut self, outcome: &Result<Applied>, now: Instant) {
        match outcome {
            Ok(applied) if applied.rejected == 0 => {
                self.settled = true;
                self.not_before = None;
            }
            Ok(_) => self.not_before = Some(now + self.recheck_after),
            Err(_) => self.not_before = None,
        }
    }

    /// Run `apply` if an attempt is owed; returns whether it ran
    pub async fn sync<F, Fut>(&mut self, apply: F) -> bool
    where
        F: FnOnce(Vec<PathBuf>) -> Fut,
        Fut: Future<Output = Result<Applied>>,
    {
        let Some(roots) = self.due(Instant::now()) else {
            return false;
        };

        let outcome = apply(roots).await;
        match &outcome {
            Ok(applied) if applied.rejected > 0 => {
                debug!(rejected = applied.rejected, "Rechecking rejected roots later");
            }
            Ok(_) => {}
            Err(e) => error!("failed to apply watched roots, retrying: {:#}", e),
        }
        self.record(&outcome, Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn roots(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[tokio::test]
    async fn test_failed_apply_is_retried_next_cycle() {
        let mut sync = RootSync::new(roots(&["/photos"]), Duration::from_secs(30));
        let attempts = &Cell::new(0);

        // Persisting the watched set fails once
        let ran = sync
            .sync(|_| async move {
                attempts.set(attempts.get() + 1);
                Err::<Applied, _>(anyhow::anyhow!("database error"))
            })
            .await;
        assert!(ran);
        assert!(!sync.is_settled());

        let ran = sync
            .sync(|wanted| async move {
                attempts.set(attempts.get() + 1);
                assert_eq!(wanted, roots(&["/photos"]));
                Ok::<_, anyhow::Error>(Applied::default())
            })
            .await;
        assert!(ran);
        assert!(sync.is_settled());

        // Nothing owed until the roots change
        let ran = sync
            .sync(|_| async move {
                attempts.set(attempts.get() + 1);
                Ok::<_, anyhow::Error>(Applied::default())
            })
            .await;
        assert!(!ran);
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn test_rejected_roots_are_rechecked_later() {
        let mut sync = RootSync::new(roots(&["/photos", "/plain"]), Duration::from_secs(30));
        let start = Instant::now();
        assert!(sync.due(start).is_some());

        sync.record(&Ok(Applied { rejected: 1 }), start);
        assert!(!sync.is_settled());
        assert!(sync.due(start + Duration::from_secs(1)).is_none());
        assert!(sync.due(start + Duration::from_secs(30)).is_some());
    }

    #[test]
    fn test_changed_roots_are_due_at_once() {
        let mut sync = RootSync::new(roots(&["/photos"]), Duration::from_secs(30));
        let start = Instant::now();
        sync.record(&Ok(Applied::default()), start);
        assert!(sync.due(start).is_none());

        // Same list again changes nothing
        sync.want(&roots(&["/photos"]));
        assert!(sync.is_settled());

        sync.want(&roots(&["/photos", "/music"]));
        assert_eq!(sync.due(start), Some(roots(&["/photos", "/music"])));

        // A pending recheck does not delay a new list
        sync.record(&Ok(Applied { rejected: 1 }), start);
        sync.want(&roots(&["/music"]));
        assert_eq!(sync.due(start), Some(roots(&["/music"])));
    }
}
