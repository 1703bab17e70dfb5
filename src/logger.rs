//! Logger (C15): serializes diagnostic and error output across every thread of a job (and,
//! for the error log, across every job in the process), matching the per-job print-mutex /
//! global-print-lock discipline spec §5's resource table prescribes.
//!
//! Grounded on the print-mutex discipline implied across `worker/mod.rs` and `target/mod.rs`
//! (serialized diagnostic `eprintln!` calls); no `log`/`tracing` facade is pulled in, matching
//! the teacher's own choice to log via direct `println!`/`eprintln!` rather than a logging
//! façade.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

/// Message severity, independent of the stats reporting level (`config::ReportLevel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

/// One process-wide logger. A job's worker threads all hand their lines to the same
/// instance; the internal mutex is the `print_lock` spec §5 calls out, serializing stdout
/// and the optional per-job log file together so interleaved threads don't tear lines.
pub struct Logger {
    inner: Mutex<Inner>,
}

struct Inner {
    job_log: Option<File>,
    error_log: Option<File>,
    logprefix: Option<String>,
    line_number: u64,
}

impl Logger {
    pub fn new(job_log_path: Option<&Path>, error_log_path: Option<&Path>, logprefix: Option<String>) -> std::io::Result<Self> {
        let job_log = job_log_path.map(open_append).transpose()?;
        let error_log = error_log_path.map(open_append).transpose()?;
        Ok(Self { inner: Mutex::new(Inner { job_log, error_log, logprefix, line_number: 0 }) })
    }

    pub fn stdout_only() -> Self {
        Self { inner: Mutex::new(Inner { job_log: None, error_log: None, logprefix: None, line_number: 0 }) }
    }

    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.line_number += 1;
        let prefix = inner.logprefix.clone().unwrap_or_default();
        let line = format!("{prefix}{}: {}", level.label(), message.as_ref());
        match level {
            Level::Error => eprintln!("{line}"),
            _ => println!("{line}"),
        }
        if let Some(f) = inner.job_log.as_mut() {
            let _ = writeln!(f, "{line}");
        }
        if level == Level::Error {
            if let Some(f) = inner.error_log.as_mut() {
                let _ = writeln!(f, "{line}");
            }
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message);
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.log(Level::Warning, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message);
    }

    /// Numbered error header used before an extended error-info block (spec §4.11/§7): every
    /// reported error gets a monotonically increasing number and a wall-clock timestamp.
    pub fn error_header(&self, error_number: u64) -> String {
        let now = humantime_now();
        format!("Error {error_number} at {now}")
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn humantime_now() -> String {
    let now = SystemTime::now();
    chrono::DateTime::<chrono::Local>::from(now).format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

impl Default for Logger {
    fn default() -> Self {
        Self::stdout_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_to_job_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("job.log");
        let logger = Logger::new(Some(&log_path), None, None).unwrap();
        logger.info("hello");
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("hello"));
    }

    #[test]
    fn error_lines_also_go_to_error_log() {
        let dir = tempfile::tempdir().unwrap();
        let job_log = dir.path().join("job.log");
        let error_log = dir.path().join("errors.log");
        let logger = Logger::new(Some(&job_log), Some(&error_log), None).unwrap();
        logger.error("boom");
        logger.info("fine");
        let errs = std::fs::read_to_string(&error_log).unwrap();
        assert!(errs.contains("boom"));
        assert!(!errs.contains("fine"));
    }
}
