//! Status synchronization engine
//!
//! This crate provides:
//! - The watched tree registry and the read-through status cache
//! - The two-lane refresh scheduler
//! - Full-tree scans, incremental change detection and folder aggregation
//! - Out-of-band annex command execution
//! - The `Engine` runtime tying them together, plus its TOML configuration

pub mod aggregator;
pub mod cache;
pub mod commands;
pub mod config;
pub mod context;
pub mod detector;
pub mod engine;
pub mod events;
pub mod registry;
pub mod scanner;
pub mod scheduler;

pub use aggregator::{aggregate, Aggregate, AggregationReport, FolderAggregator};
pub use cache::StatusCache;
pub use commands::CommandExecutor;
pub use config::{Config, ConfigError, EngineConfig, VcsConfig, WatchConfig};
pub use context::EngineContext;
pub use detector::{ChangeDetector, ChangeSet, CheckReport};
pub use engine::{Engine, EngineStats};
pub use events::{ScanOutcome, StatusChanged};
pub use registry::{identify, Identified, TreeDelta, TreeRegistry};
pub use scanner::TreeScanner;
pub use scheduler::{LaneLimits, Priority, RefreshRequest, Scheduler};
