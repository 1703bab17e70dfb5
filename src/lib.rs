//! dt - a multi-threaded data integrity and I/O exerciser for storage devices and file
//! systems: pattern generation and verification, block-tag checking, per-thread read/write
//! state machines, cross-thread sequential-write coordination, and job/thread lifecycle
//! management with a line-mode command interface.

pub mod app;
pub mod btag;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod io;
pub mod job;
pub mod logger;
pub mod pattern;
pub mod stats;
pub mod target;
pub mod trigger;
pub mod util;
pub mod verify;
pub mod worker;

pub use config::Config;

/// Result type used throughout dt.
pub type Result<T> = anyhow::Result<T>;
