//! History ring: a fixed-size per-thread ring of recent I/O records, dumped for forensic
//! context on the first error or miscompare a worker hits.
//!
//! Grounded on the preference for explicit, allocation-once structures in hot per-worker
//! state (`worker/mod.rs`'s `Worker` field layout); unlike `stats/mod.rs`'s atomic counters,
//! a history ring needs ordered, bounded storage, so it is built on a `VecDeque` rather than
//! atomics.

use std::time::SystemTime;

/// One recorded I/O attempt. Carries only the first `N` bytes of the request buffer so the
/// ring stays cheap to maintain even at high IOPS.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub file_index: usize,
    pub record_number: u64,
    pub offset: u64,
    pub requested: usize,
    pub transferred: usize,
    pub is_write: bool,
    pub head_bytes: Vec<u8>,
    pub timestamp: SystemTime,
}

/// Fixed-size ring of the most recent `capacity` I/O records for one worker.
///
/// Push is O(1) amortized; once full, the oldest entry is evicted. `dumped` tracks whether
/// this ring has already been printed for the error currently in flight, so a burst of
/// errors against the same record doesn't reprint the same context repeatedly.
pub struct HistoryRing {
    capacity: usize,
    head_bytes_len: usize,
    entries: std::collections::VecDeque<HistoryEntry>,
    dumped: bool,
}

impl HistoryRing {
    pub fn new(capacity: usize, head_bytes_len: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            head_bytes_len,
            entries: std::collections::VecDeque::with_capacity(capacity.max(1)),
            dumped: false,
        }
    }

    /// Record one I/O attempt. Clears the `dumped` flag, since a new record means any
    /// future error is a fresh event worth dumping again.
    pub fn record(
        &mut self,
        file_index: usize,
        record_number: u64,
        offset: u64,
        requested: usize,
        transferred: usize,
        is_write: bool,
        buf: &[u8],
    ) {
        let n = self.head_bytes_len.min(buf.len());
        let entry = HistoryEntry {
            file_index,
            record_number,
            offset,
            requested,
            transferred,
            is_write,
            head_bytes: buf[..n].to_vec(),
            timestamp: SystemTime::now(),
        };
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        self.dumped = false;
    }

    /// Dump the ring newest-first, if it hasn't already been dumped for the current error.
    /// Returns `None` if a dump already happened (idempotence).
    pub fn dump_once(&mut self) -> Option<Vec<&HistoryEntry>> {
        if self.dumped {
            return None;
        }
        self.dumped = true;
        Some(self.entries.iter().rev().collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut ring = HistoryRing::new(2, 8);
        ring.record(0, 1, 0, 512, 512, true, b"aaaaaaaa");
        ring.record(0, 2, 512, 512, 512, true, b"bbbbbbbb");
        ring.record(0, 3, 1024, 512, 512, true, b"cccccccc");
        assert_eq!(ring.len(), 2);
        let dumped = ring.dump_once().unwrap();
        assert_eq!(dumped[0].record_number, 3);
        assert_eq!(dumped[1].record_number, 2);
    }

    #[test]
    fn dump_is_idempotent_until_next_record() {
        let mut ring = HistoryRing::new(4, 8);
        ring.record(0, 1, 0, 512, 512, true, b"aaaaaaaa");
        assert!(ring.dump_once().is_some());
        assert!(ring.dump_once().is_none());
        ring.record(0, 2, 512, 512, 512, true, b"bbbbbbbb");
        assert!(ring.dump_once().is_some());
    }

    #[test]
    fn truncates_head_bytes_to_configured_length() {
        let mut ring = HistoryRing::new(1, 4);
        ring.record(0, 1, 0, 512, 512, true, b"abcdefgh");
        let dumped = ring.dump_once().unwrap();
        assert_eq!(dumped[0].head_bytes, b"abcd");
    }
}
