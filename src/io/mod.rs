//! I/O primitive layer: a uniform read/write/flush/seek/open/close contract over positional
//! file I/O and memory-mapped I/O.
//!
//! Grounded on `engine/mod.rs` (the `IOEngine` trait shape, `EngineCapabilities`) and
//! `engine/sync.rs` (`pread`/`pwrite`/`fsync`/`fdatasync` via `libc`, manual short-I/O retry
//! loop, `anyhow::Context` error annotation with fd/offset/length). SCSI/NVMe pass-through and
//! async (io_uring/libaio) backends are not targets here, and are represented only as the
//! `unsupported` arm of `Capabilities`/`trim`/`file_map`, never as a panic.

pub mod mmap;
pub mod sync;

use crate::error::{ErrorInfo, OpKind, RetryClass, RetrySet};
use crate::Result;
use std::path::Path;

/// How an I/O primitive should open its target.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub direct: bool,
    pub read_only: bool,
    pub create: bool,
    pub append: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// What an `IoPrimitive` backend can do; callers branch on this rather than probing by trial
/// and error. Backends that cannot support an operation (e.g. `trim` on a plain file) report
/// it here instead of panicking when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub direct_io: bool,
    pub trim: bool,
    pub file_map: bool,
}

/// One mapped extent, as returned by `file_map` on backends that support it.
#[derive(Debug, Clone, Copy)]
pub struct Extent {
    pub logical_offset: u64,
    pub physical_offset: u64,
    pub length: u64,
}

/// Uniform contract implemented by each I/O backend. A `Worker` holds one `Box<dyn IoPrimitive>`
/// per open target; the per-thread loop never matches on backend type directly.
pub trait IoPrimitive: Send {
    fn open(&mut self, path: &Path, flags: OpenFlags) -> Result<()>;
    fn close(&mut self) -> Result<()>;

    /// Positioned read; may return fewer bytes than requested (short read / EOF), which is
    /// not itself an error.
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> std::result::Result<usize, ErrorInfo>;

    /// Positioned write; may return fewer bytes than requested (e.g. ENOSPC mid-write).
    fn pwrite(&mut self, buf: &[u8], offset: u64) -> std::result::Result<usize, ErrorInfo>;

    fn flush(&mut self) -> std::result::Result<(), ErrorInfo>;
    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64>;

    fn trim(&mut self, _offset: u64, _length: u64) -> Result<()> {
        anyhow::bail!("trim: unsupported by this backend")
    }

    fn file_map(&mut self) -> Result<Vec<Extent>> {
        anyhow::bail!("file_map: unsupported by this backend")
    }

    fn size(&self) -> u64;
    fn capabilities(&self) -> Capabilities;
    fn logical_block_size(&self) -> u64 {
        512
    }
}

/// Retry wrapper shared by every backend: runs `op` and, on a retryable error, sleeps
/// `retry_delay` and tries again up to `retry_limit` additional times, bounding total primitive
/// calls to `retry_limit + 1`.
pub fn with_retry<T>(
    retry_set: &RetrySet,
    retry_limit: u32,
    retry_delay: std::time::Duration,
    mut op: impl FnMut() -> std::result::Result<T, ErrorInfo>,
) -> std::result::Result<T, ErrorInfo> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(info) => {
                let class = info.classify(retry_set);
                if class == RetryClass::Retryable && attempt < retry_limit {
                    attempt += 1;
                    std::thread::sleep(retry_delay);
                    continue;
                }
                return Err(info);
            }
        }
    }
}

/// Build an `ErrorInfo` from the last OS error for the given operation, classifying disk-full
/// uniformly across backends as `disk_full=true`.
pub fn errno_info(file: &str, op: OpKind, offset: u64, requested: usize) -> ErrorInfo {
    let err = std::io::Error::last_os_error();
    let code = err.raw_os_error();
    let mut info = ErrorInfo::new(file, op, offset, requested);
    info.os_error = code;
    info.disk_full = code == Some(libc::ENOSPC);
    info
}
