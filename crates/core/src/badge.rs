//! Status → badge decision table
//!
//! Pure mapping used by UI clients; no I/O, no state.

use crate::{PathStatus, Presence, Sufficiency};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Copy-count buckets drawn as literal digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CopyBucket {
    One,
    Two,
    Three,
    Four,
    MoreThanFour,
}

impl CopyBucket {
    /// Bucket for a non-zero copy count
    pub fn from_count(count: u32) -> Option<Self> {
        match count {
            0 => None,
            1 => Some(CopyBucket::One),
            2 => Some(CopyBucket::Two),
            3 => Some(CopyBucket::Three),
            4 => Some(CopyBucket::Four),
            _ => Some(CopyBucket::MoreThanFour),
        }
    }

    fn tag(self) -> &'static str {
        match self {
            CopyBucket::One => "1",
            CopyBucket::Two => "2",
            CopyBucket::Three => "3",
            CopyBucket::Four => "4",
            CopyBucket::MoreThanFour => "many",
        }
    }
}

/// Badge drawn next to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Badge {
    /// Status still being computed
    Unknown,
    NotTracked,
    /// Directory with no tracked content
    EmptyFolder,
    ZeroCopies,
    UnknownCopies(Presence),
    Copies {
        presence: Presence,
        sufficiency: Sufficiency,
        bucket: CopyBucket,
    },
}

impl Badge {
    /// Stable identifier clients register their icons under
    pub fn identifier(&self) -> String {
        match self {
            Badge::Unknown => "unknown".to_string(),
            Badge::NotTracked => "not-tracked".to_string(),
            Badge::EmptyFolder => "empty-folder".to_string(),
            Badge::ZeroCopies => "zero-copies".to_string(),
            Badge::UnknownCopies(presence) => {
                format!("{}-unknown-copies", presence_tag(*presence))
            }
            Badge::Copies {
                presence,
                sufficiency,
                bucket,
            } => format!(
                "{}-{}-{}",
                presence_tag(*presence),
                bucket.tag(),
                match sufficiency {
                    Sufficiency::Sufficient => "enough",
                    Sufficiency::Insufficient => "lacking",
                }
            ),
        }
    }
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier())
    }
}

fn presence_tag(presence: Presence) -> &'static str {
    match presence {
        Presence::Present => "present",
        Presence::Absent => "absent",
        Presence::PartiallyPresent => "partial",
    }
}

/// Decide the badge for a stored status
pub fn badge_for(status: &PathStatus) -> Badge {
    if !status.is_tracked {
        return Badge::NotTracked;
    }

    let (presence, replicas) = match (status.presence, status.replicas) {
        (None, _) => return Badge::Unknown,
        (Some(p), r) => (p, r),
    };

    if status.is_empty_dir() {
        return Badge::EmptyFolder;
    }

    match replicas {
        None => Badge::UnknownCopies(presence),
        Some(r) => match CopyBucket::from_count(r.count) {
            None => Badge::ZeroCopies,
            Some(bucket) => Badge::Copies {
                presence,
                sufficiency: r.sufficiency,
                bucket,
            },
        },
    }
}
