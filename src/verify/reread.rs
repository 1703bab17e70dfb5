//! Re-read-on-corruption protocol (spec §4.6): when a miscompare is detected and `retryDC`
//! is enabled, re-read the same record through a second, direct-I/O handle and classify the
//! outcome, then save triage buffers under a sibling directory.
//!
//! Grounded on the same re-read idea as `util/verification.rs`'s retry-oriented verification
//! dispatch, extended with the second-handle/direct-I/O bypass and triage-file naming that has
//! no teacher counterpart and is built directly from spec §4.6.

use crate::error::MiscompareCause;
use crate::io::{IoPrimitive, OpenFlags};
use crate::Result;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One completed re-read attempt.
#[derive(Debug, Clone)]
pub struct RereadAttempt {
    pub attempt: u32,
    pub cause: MiscompareCause,
    pub reread_buf: Vec<u8>,
}

/// Open a second handle to `path` with direct I/O, bypassing cache. Returns `Ok(None)`
/// (not an error) when the OS/filesystem doesn't permit direct I/O here (NFS, tmpfs,
/// misaligned request sizes) — callers should skip the DIO re-read path in that case rather
/// than fail the whole verification.
pub fn open_direct_handle(
    make_primitive: impl Fn() -> Box<dyn IoPrimitive>,
    path: &Path,
) -> Option<Box<dyn IoPrimitive>> {
    let mut primitive = make_primitive();
    let flags = OpenFlags { direct: true, read_only: true, ..Default::default() };
    match primitive.open(path, flags) {
        Ok(()) => Some(primitive),
        Err(_) => None,
    }
}

/// Re-read the same record up to `limit` times, with a linearly scaled delay
/// (`base_delay * attempt_number`), classifying each attempt against the original
/// (corrupted) read and the expected pattern.
pub fn reread_loop(
    handle: &mut dyn IoPrimitive,
    offset: u64,
    size: usize,
    expected: &[u8],
    corrupted: &[u8],
    limit: u32,
    base_delay: Duration,
) -> Vec<RereadAttempt> {
    let mut attempts = Vec::new();
    for attempt in 1..=limit {
        std::thread::sleep(base_delay * attempt);
        let mut buf = vec![0u8; size];
        let n = handle.pread(&mut buf, offset).unwrap_or(0);
        buf.truncate(n);

        let cause = if buf == corrupted[..n.min(corrupted.len())] {
            MiscompareCause::PossibleWrite
        } else if n >= expected.len() && buf[..expected.len()] == expected[..] {
            MiscompareCause::PossibleRead
        } else {
            MiscompareCause::Inconclusive
        };

        attempts.push(RereadAttempt { attempt, cause, reread_buf: buf });
    }
    attempts
}

/// Triage directory for a target path: a sibling directory named `<basename>.dt-triage`,
/// or `override_dir` when the caller has configured an explicit error-log/job-log directory.
pub fn triage_dir(target: &Path, override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    parent.join(format!("{name}.dt-triage"))
}

/// Save the expected/corrupted/re-read buffers as triage files named
/// `<basename>-{EXPECT|CORRUPT|REREAD}<n>-j<job>t<thread>`, where `n` is the smallest
/// non-colliding index in `dir`.
pub fn save_triage_files(
    dir: &Path,
    basename: &str,
    job_id: u32,
    thread_number: u32,
    expected: &[u8],
    corrupted: &[u8],
    reread: &[u8],
) -> Result<(PathBuf, PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating triage directory {}", dir.display()))?;

    let n = smallest_free_index(dir, basename, job_id, thread_number)?;
    let expect_path = dir.join(format!("{basename}-EXPECT{n}-j{job_id}t{thread_number}"));
    let corrupt_path = dir.join(format!("{basename}-CORRUPT{n}-j{job_id}t{thread_number}"));
    let reread_path = dir.join(format!("{basename}-REREAD{n}-j{job_id}t{thread_number}"));

    std::fs::write(&expect_path, expected).context("writing EXPECT triage file")?;
    std::fs::write(&corrupt_path, corrupted).context("writing CORRUPT triage file")?;
    std::fs::write(&reread_path, reread).context("writing REREAD triage file")?;

    Ok((expect_path, corrupt_path, reread_path))
}

fn smallest_free_index(dir: &Path, basename: &str, job_id: u32, thread_number: u32) -> Result<u32> {
    let mut n = 0u32;
    loop {
        let candidate = dir.join(format!("{basename}-EXPECT{n}-j{job_id}t{thread_number}"));
        if !candidate.exists() {
            return Ok(n);
        }
        n += 1;
    }
}

/// Build the two re-read reproducer command lines: one that replays just the failing record,
/// one that replays the whole pass up to and including it.
pub fn reproducer_command_lines(
    exe: &str,
    target: &str,
    block_size: usize,
    failing_record: u64,
    offset: u64,
    pattern_desc: &str,
) -> (String, String) {
    let single = format!(
        "{exe} if={target} bs={block_size} offset={offset} records=1 pattern={pattern_desc}"
    );
    let replay = format!(
        "{exe} if={target} bs={block_size} records={failing_record} pattern={pattern_desc}"
    );
    (single, replay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triage_dir_defaults_to_sibling_of_target() {
        let dir = triage_dir(Path::new("/data/file.bin"), None);
        assert_eq!(dir, PathBuf::from("/data/file.bin.dt-triage"));
    }

    #[test]
    fn triage_dir_honors_override() {
        let dir = triage_dir(Path::new("/data/file.bin"), Some(Path::new("/var/log/dt")));
        assert_eq!(dir, PathBuf::from("/var/log/dt"));
    }

    #[test]
    fn save_triage_files_picks_smallest_free_index() {
        let tmp = tempfile::tempdir().unwrap();
        let (e0, _, _) = save_triage_files(tmp.path(), "f", 1, 0, b"e", b"c", b"r").unwrap();
        assert!(e0.to_string_lossy().contains("EXPECT0-"));
        let (e1, _, _) = save_triage_files(tmp.path(), "f", 1, 0, b"e", b"c", b"r").unwrap();
        assert!(e1.to_string_lossy().contains("EXPECT1-"));
    }

    #[test]
    fn reproducer_lines_mention_target_and_offset() {
        let (single, replay) = reproducer_command_lines("dt", "/dev/sdb", 4096, 42, 172032, "iot");
        assert!(single.contains("/dev/sdb"));
        assert!(single.contains("offset=172032"));
        assert!(replay.contains("records=42"));
    }
}
