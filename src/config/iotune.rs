//! Runtime-editable iotune file (spec §4.10/§6 glossary: "iotune"): the monitor thread stats
//! this file's mtime periodically and, on change, re-parses and applies new delays/IOPS to
//! every worker in the job without restarting it.
//!
//! Grounded on `config/toml.rs`'s preset-file load idiom, narrowed to the small delay/iops
//! knob set the monitor is allowed to hot-reload.

use serde::Deserialize;
use std::time::SystemTime;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct IotuneFile {
    pub iops: Option<f64>,
    pub retry_delay_secs: Option<u64>,
    pub think_time_us: Option<u64>,
}

/// Tracks one iotune file's last-seen mtime so the monitor only re-parses on change.
pub struct IotuneWatcher {
    path: std::path::PathBuf,
    last_mtime: Option<SystemTime>,
}

impl IotuneWatcher {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into(), last_mtime: None }
    }

    /// Returns `Some(parsed)` if the file's mtime changed since the last poll (or this is the
    /// first poll and the file exists), `None` otherwise. IO/parse errors are logged by the
    /// caller and treated as "no change" rather than fatal — a bad edit to the iotune file
    /// should not kill a running job.
    pub fn poll(&mut self) -> Option<IotuneFile> {
        let meta = std::fs::metadata(&self.path).ok()?;
        let mtime = meta.modified().ok()?;
        if Some(mtime) == self.last_mtime {
            return None;
        }
        self.last_mtime = Some(mtime);
        let body = std::fs::read_to_string(&self.path).ok()?;
        toml::from_str(&body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_poll_returns_parsed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iotune.toml");
        std::fs::write(&path, "iops = 500.0\n").unwrap();
        let mut watcher = IotuneWatcher::new(&path);
        let parsed = watcher.poll().unwrap();
        assert_eq!(parsed.iops, Some(500.0));
    }

    #[test]
    fn unchanged_mtime_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iotune.toml");
        std::fs::write(&path, "iops = 500.0\n").unwrap();
        let mut watcher = IotuneWatcher::new(&path);
        assert!(watcher.poll().is_some());
        assert!(watcher.poll().is_none());
    }

    #[test]
    fn missing_file_returns_none() {
        let mut watcher = IotuneWatcher::new("/nonexistent/iotune.toml");
        assert!(watcher.poll().is_none());
    }
}
