//! annexstat command line support
//!
//! This crate provides:
//! - The daemon's newline-delimited JSON protocol over a Unix socket
//! - The exclusive daemon lock
//! - Retry bookkeeping for the watched-root set
//! - State directory layout and output helpers shared by the commands

pub mod ipc;
pub mod locks;
pub mod roots;
pub mod util;
