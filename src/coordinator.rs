//! Cross-thread I/O coordinator (C8, "iolock"): serializes advancement of a single shared
//! sequential offset when multiple workers of one job share a file/device.
//!
//! Grounded on the `Arc<Mutex<...>>` shared-counter idiom used for cross-worker state sharing
//! elsewhere in the teacher (`worker/mod.rs`'s `shared_snapshots`/`StatsSnapshot`) and the
//! RAII-on-`Drop` lock-scope discipline the teacher applies to its own lock guards
//! (`target/mod.rs`'s `LockGuard`).

use std::sync::{Condvar, Mutex};

/// Shared state protected by the iolock's single mutex (spec §4.8/§5).
struct Shared {
    sequential_offset: u64,
    end_of_file: bool,
    bytes_read: u64,
    bytes_written: u64,
    records_read: u64,
    records_written: u64,
    error_count: u64,
    waiting_threads: u32,
    threads_done: u32,
}

/// One job's shared sequential-offset coordinator. Created once per job when `iolock=true`
/// and handed to every worker that opens the shared target.
pub struct IoLock {
    state: Mutex<Shared>,
    barrier: Condvar,
    thread_count: u32,
}

/// What a worker does under the lock before performing I/O outside it (spec §4.8: "takes the
/// lock, reads `io_sequential_offset`, sets its local offset, advances the shared offset by
/// its request size, releases the lock, and then performs the I/O *outside* the lock").
pub struct Reservation {
    pub offset: u64,
    /// Set if this reservation pushed the shared offset past a configured limit; the caller
    /// must set `end_of_file` (via `signal_end_of_file`) and stop after this I/O.
    pub limit_reached: bool,
}

impl IoLock {
    pub fn new(start_offset: u64, thread_count: u32) -> Self {
        Self {
            state: Mutex::new(Shared {
                sequential_offset: start_offset,
                end_of_file: false,
                bytes_read: 0,
                bytes_written: 0,
                records_read: 0,
                records_written: 0,
                error_count: 0,
                waiting_threads: 0,
                threads_done: 0,
            }),
            barrier: Condvar::new(),
            thread_count,
        }
    }

    /// `end_of_file`, once set by any thread, short-circuits all other threads on their next
    /// iteration head.
    pub fn end_of_file(&self) -> bool {
        self.state.lock().unwrap().end_of_file
    }

    pub fn signal_end_of_file(&self) {
        self.state.lock().unwrap().end_of_file = true;
    }

    /// Reserve the next `size` bytes of the shared sequential offset, checking the shared
    /// `data_limit`/`record_limit` under the lock. Sets `io_end_of_file` and returns
    /// `limit_reached=true` when the reservation would exceed either limit (the caller should
    /// not perform the I/O in that case).
    pub fn reserve_sequential(&self, size: u64, data_limit: Option<u64>, record_limit: Option<u64>) -> Reservation {
        let mut state = self.state.lock().unwrap();
        if state.end_of_file {
            return Reservation { offset: state.sequential_offset, limit_reached: true };
        }
        if let Some(limit) = data_limit {
            if state.bytes_read + state.bytes_written + size > limit {
                state.end_of_file = true;
                return Reservation { offset: state.sequential_offset, limit_reached: true };
            }
        }
        if let Some(limit) = record_limit {
            if state.records_read + state.records_written + 1 > limit {
                state.end_of_file = true;
                return Reservation { offset: state.sequential_offset, limit_reached: true };
            }
        }
        let offset = state.sequential_offset;
        state.sequential_offset += size;
        Reservation { offset, limit_reached: false }
    }

    /// Record one completed I/O against the shared counters (owned by the coordinator per
    /// spec §4.8; thread-local counters still tick separately for per-thread reports).
    pub fn record(&self, is_write: bool, bytes: u64) {
        let mut state = self.state.lock().unwrap();
        if is_write {
            state.bytes_written += bytes;
            state.records_written += 1;
        } else {
            state.bytes_read += bytes;
            state.records_read += 1;
        }
    }

    pub fn record_error(&self) {
        self.state.lock().unwrap().error_count += 1;
    }

    pub fn snapshot(&self) -> CoordinatorStats {
        let state = self.state.lock().unwrap();
        CoordinatorStats {
            bytes_read: state.bytes_read,
            bytes_written: state.bytes_written,
            records_read: state.records_read,
            records_written: state.records_written,
            error_count: state.error_count,
        }
    }

    /// Barrier letting prefill finish (across all threads sharing the file) before regular
    /// I/O begins (spec §4.8: "a `wait_for_threads_done` barrier").
    pub fn wait_for_threads_done(&self) {
        let mut state = self.state.lock().unwrap();
        state.threads_done += 1;
        while state.threads_done < self.thread_count {
            state = self.barrier.wait(state).unwrap();
        }
        self.barrier.notify_all();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatorStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub records_read: u64,
    pub records_written: u64,
    pub error_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn reservations_are_disjoint_across_threads() {
        let lock = Arc::new(IoLock::new(0, 4));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                let mut offsets = Vec::new();
                for _ in 0..100 {
                    let r = lock.reserve_sequential(512, None, None);
                    offsets.push(r.offset);
                }
                offsets
            }));
        }
        let mut all_offsets = Vec::new();
        for h in handles {
            all_offsets.extend(h.join().unwrap());
        }
        all_offsets.sort_unstable();
        let mut dedup = all_offsets.clone();
        dedup.dedup();
        assert_eq!(all_offsets.len(), dedup.len(), "no two reservations should overlap");
    }

    #[test]
    fn data_limit_sets_end_of_file() {
        let lock = IoLock::new(0, 1);
        let r1 = lock.reserve_sequential(512, Some(1000), None);
        assert!(!r1.limit_reached);
        let r2 = lock.reserve_sequential(600, Some(1000), None);
        assert!(r2.limit_reached);
        assert!(lock.end_of_file());
    }

    #[test]
    fn counters_accumulate_under_lock() {
        let lock = IoLock::new(0, 1);
        lock.record(true, 4096);
        lock.record(false, 2048);
        let stats = lock.snapshot();
        assert_eq!(stats.bytes_written, 4096);
        assert_eq!(stats.bytes_read, 2048);
        assert_eq!(stats.records_written, 1);
        assert_eq!(stats.records_read, 1);
    }
}
