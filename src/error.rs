//! Error classification shared across the I/O primitive, verifier, and reporting layers.
//!
//! Fallible operations still propagate through `anyhow::Result` (see `crate::Result`); the
//! types here are the small, plain-data classifications that call sites branch on by value
//! rather than propagate.

use std::fmt;

/// A single bad token or cross-field conflict found while validating a `Config`.
///
/// Validation does not fail on the first problem: every `ConfigError` found in one pass is
/// collected and reported together (see `config::validate::validate`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("{field}: {message}")]
    Invalid { field: String, message: String },
    #[error("{a} and {b} are mutually exclusive")]
    Conflicting { a: String, b: String },
    #[error("{field} is required when {because}")]
    MissingRequired { field: String, because: String },
}

/// Aggregated validation failure: every problem found in one `Config::validate()` pass.
#[derive(Debug, Clone)]
pub struct ConfigErrors(pub Vec<ConfigError>);

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} configuration error(s):", self.0.len())?;
        for (i, e) in self.0.iter().enumerate() {
            writeln!(f, "  {}. {e}", i + 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

/// Per-failure detail populated by the I/O primitive layer (C4) and consumed by the
/// retry/report path. Mirrors the original `{file, op, handle, offset, bytes, os_error}`
/// error-info struct.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub file: String,
    pub op: OpKind,
    pub offset: u64,
    pub requested: usize,
    pub transferred: usize,
    pub os_error: Option<i32>,
    pub disk_full: bool,
}

impl ErrorInfo {
    pub fn new(file: impl Into<String>, op: OpKind, offset: u64, requested: usize) -> Self {
        Self {
            file: file.into(),
            op,
            offset,
            requested,
            transferred: 0,
            os_error: None,
            disk_full: false,
        }
    }

    /// Classify a raw OS error against the retry set (§4.4).
    pub fn classify(&self, retry_errors: &RetrySet) -> RetryClass {
        match self.os_error {
            Some(code) if retry_errors.matches(code) => RetryClass::Retryable,
            Some(libc::ENOSPC) => RetryClass::Fatal,
            _ if self.disk_full => RetryClass::Fatal,
            _ => RetryClass::Fatal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Open,
    Close,
    Read,
    Write,
    Flush,
    Seek,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::Open => "open",
            OpKind::Close => "close",
            OpKind::Read => "read",
            OpKind::Write => "write",
            OpKind::Flush => "flush",
            OpKind::Seek => "seek",
        };
        f.write_str(s)
    }
}

/// Whether an I/O failure should be retried by the primitive layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Fatal,
}

/// Configured set of OS error codes treated as retryable, plus an "any" wildcard
/// (`retry_errors=all`, §6).
#[derive(Debug, Clone, Default)]
pub struct RetrySet {
    codes: Vec<i32>,
    any: bool,
}

impl RetrySet {
    pub fn any() -> Self {
        Self { codes: Vec::new(), any: true }
    }

    pub fn from_codes(codes: Vec<i32>) -> Self {
        Self { codes, any: false }
    }

    pub fn matches(&self, code: i32) -> bool {
        self.any || self.codes.contains(&code)
    }
}

/// Outcome of a re-read-on-corruption comparison (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiscompareCause {
    /// Re-read equals the original (corrupted) read: data on media matches what was returned.
    PossibleWrite,
    /// Re-read equals the expected pattern: the original read was a transient cache corruption.
    PossibleRead,
    /// Re-read matches neither the original read nor the expected pattern.
    Inconclusive,
}

impl fmt::Display for MiscompareCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MiscompareCause::PossibleWrite => "possible write failure",
            MiscompareCause::PossibleRead => "possible read failure",
            MiscompareCause::Inconclusive => "data does not match previous data or expected",
        };
        f.write_str(s)
    }
}
