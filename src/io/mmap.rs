//! Memory-mapped I/O backend: maps the target into the process address space and performs
//! reads/writes via `memcpy` instead of `pread`/`pwrite`.
//!
//! Grounded on `engine/mmap.rs`'s mmap/munmap lifecycle and msync-on-flush discipline,
//! retargeted onto the `IoPrimitive` contract. Carried as the second backend behind that
//! trait, since the mmap implementation it is grounded on is already complete and idiomatic.

use super::{Capabilities, Extent, IoPrimitive, OpenFlags, Whence};
use crate::error::{ErrorInfo, OpKind};
use crate::Result;
use anyhow::Context;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr;

pub struct MmapIo {
    path: PathBuf,
    fd: RawFd,
    addr: *mut u8,
    len: usize,
    cursor: u64,
}

unsafe impl Send for MmapIo {}

impl Default for MmapIo {
    fn default() -> Self {
        Self { path: PathBuf::new(), fd: -1, addr: ptr::null_mut(), len: 0, cursor: 0 }
    }
}

impl MmapIo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IoPrimitive for MmapIo {
    fn open(&mut self, path: &Path, flags: OpenFlags) -> Result<()> {
        // mmap bypasses O_DIRECT semantics entirely; this backend never asks for direct I/O.
        let mut oflags = if flags.read_only { libc::O_RDONLY } else { libc::O_RDWR };
        if flags.create {
            oflags |= libc::O_CREAT;
        }
        let cpath = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
            .context("path contains an embedded NUL")?;
        let fd = unsafe { libc::open(cpath.as_ptr(), oflags, 0o644) };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            return Err(err).with_context(|| format!("open({}) for mmap", path.display()));
        }
        let size = unsafe {
            let mut st: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut st) == 0 { st.st_size as u64 } else { 0 }
        };
        if size == 0 {
            // mmap of a zero-length file fails; defer mapping until the first write grows it.
            self.fd = fd;
            self.path = path.to_path_buf();
            return Ok(());
        }
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let addr = unsafe {
            libc::mmap(ptr::null_mut(), size as usize, prot, libc::MAP_SHARED, fd, 0)
        };
        if addr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err).context("mmap failed");
        }
        self.fd = fd;
        self.path = path.to_path_buf();
        self.addr = addr as *mut u8;
        self.len = size as usize;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.addr.is_null() {
            unsafe {
                libc::munmap(self.addr as *mut libc::c_void, self.len);
            }
            self.addr = ptr::null_mut();
            self.len = 0;
        }
        if self.fd >= 0 {
            let r = unsafe { libc::close(self.fd) };
            self.fd = -1;
            if r < 0 {
                let err = std::io::Error::last_os_error();
                return Err(err).context("close failed");
            }
        }
        Ok(())
    }

    fn pread(&mut self, buf: &mut [u8], offset: u64) -> std::result::Result<usize, ErrorInfo> {
        let start = offset as usize;
        if self.addr.is_null() || start >= self.len {
            return Ok(0);
        }
        let n = buf.len().min(self.len - start);
        unsafe {
            ptr::copy_nonoverlapping(self.addr.add(start), buf.as_mut_ptr(), n);
        }
        Ok(n)
    }

    fn pwrite(&mut self, buf: &[u8], offset: u64) -> std::result::Result<usize, ErrorInfo> {
        let end = offset + buf.len() as u64;
        if end as usize > self.len {
            if let Err(e) = self.grow_and_remap(end as usize) {
                let mut info = ErrorInfo::new(self.path.display().to_string(), OpKind::Write, offset, buf.len());
                info.disk_full = e.to_string().contains("No space left");
                return Err(info);
            }
        }
        let start = offset as usize;
        let n = buf.len().min(self.len - start);
        unsafe {
            ptr::copy_nonoverlapping(buf.as_ptr(), self.addr.add(start), n);
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::result::Result<(), ErrorInfo> {
        if self.addr.is_null() {
            return Ok(());
        }
        let r = unsafe { libc::msync(self.addr as *mut libc::c_void, self.len, libc::MS_SYNC) };
        if r < 0 {
            return Err(ErrorInfo::new(self.path.display().to_string(), OpKind::Flush, 0, 0));
        }
        Ok(())
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        self.cursor = match whence {
            Whence::Start => offset as u64,
            Whence::Current => (self.cursor as i64 + offset) as u64,
            Whence::End => (self.len as i64 + offset) as u64,
        };
        Ok(self.cursor)
    }

    fn size(&self) -> u64 {
        self.len as u64
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { direct_io: false, trim: false, file_map: false }
    }
}

impl MmapIo {
    fn grow_and_remap(&mut self, new_len: usize) -> Result<()> {
        if !self.addr.is_null() {
            unsafe {
                libc::munmap(self.addr as *mut libc::c_void, self.len);
            }
        }
        let r = unsafe { libc::ftruncate(self.fd, new_len as i64) };
        if r < 0 {
            let err = std::io::Error::last_os_error();
            self.addr = ptr::null_mut();
            self.len = 0;
            return Err(err).context("ftruncate (grow for mmap write) failed");
        }
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let addr = unsafe {
            libc::mmap(ptr::null_mut(), new_len, prot, libc::MAP_SHARED, self.fd, 0)
        };
        if addr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            self.addr = ptr::null_mut();
            self.len = 0;
            return Err(err).context("remap after growth failed");
        }
        self.addr = addr as *mut u8;
        self.len = new_len;
        Ok(())
    }
}

impl Drop for MmapIo {
    fn drop(&mut self) {
        if !self.addr.is_null() {
            unsafe {
                libc::munmap(self.addr as *mut libc::c_void, self.len);
            }
        }
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}
