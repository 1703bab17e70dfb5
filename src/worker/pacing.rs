//! Per-thread IOPS pacing (spec §4.5.3): holds a worker to a target I/O rate by sleeping at
//! the top of each iteration rather than between request submission and completion.
//!
//! Grounded on the teacher's own rate-limiting instinct in `engine/mod.rs` (an IOEngine
//! tracked submission timestamps to compute achieved IOPS) reworked around dt's "target total
//! microseconds so far" accounting instead of a moving-average rate.

use crate::config::IopsType;
use std::time::{Duration, Instant};

/// Tracks a target vs. actual cumulative time so short bursts of fast I/O are repaid by
/// shorter sleeps later rather than compounding into a growing backlog (spec §4.5.3:
/// `target_total_usecs += usecs_per_io`, sleep `target - actual` when positive).
pub struct Pacer {
    usecs_per_io: Option<f64>,
    iops_type: IopsType,
    start: Instant,
    target_total_usecs: f64,
}

impl Pacer {
    pub fn new(iops: Option<f64>, iops_type: IopsType) -> Self {
        let usecs_per_io = iops.filter(|v| *v > 0.0).map(|v| 1_000_000.0 / v);
        Self { usecs_per_io, iops_type, start: Instant::now(), target_total_usecs: 0.0 }
    }

    /// Called once per iteration, before the I/O is issued. A no-op when no `iops` target is
    /// configured. `Iomon` mode shares this same accounting (the monitor thread is the one
    /// that periodically rewrites `usecs_per_io` via `retarget`); it performs no additional
    /// smoothing of its own here.
    pub fn throttle(&mut self) {
        let Some(usecs_per_io) = self.usecs_per_io else { return };
        self.target_total_usecs += usecs_per_io;
        let actual_total_usecs = self.start.elapsed().as_secs_f64() * 1_000_000.0;
        let behind = self.target_total_usecs - actual_total_usecs;
        if behind > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(behind / 1_000_000.0));
        }
    }

    /// A read-after-write counts as two I/Os against the pacing budget (spec §4.5.3).
    pub fn account_extra_io(&mut self) {
        if let Some(usecs_per_io) = self.usecs_per_io {
            self.target_total_usecs += usecs_per_io;
        }
    }

    /// Applied by the monitor (C10) when an iotune file reload changes the target rate.
    pub fn retarget(&mut self, iops: Option<f64>) {
        self.usecs_per_io = iops.filter(|v| *v > 0.0).map(|v| 1_000_000.0 / v);
    }

    pub fn iops_type(&self) -> IopsType {
        self.iops_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_target_never_sleeps() {
        let mut pace = Pacer::new(None, IopsType::Exact);
        let start = Instant::now();
        for _ in 0..1000 {
            pace.throttle();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn target_rate_paces_iterations() {
        let mut pace = Pacer::new(Some(2000.0), IopsType::Exact);
        let start = Instant::now();
        for _ in 0..20 {
            pace.throttle();
        }
        // 20 iterations at 2000 iops should take roughly 10ms; allow generous slack for CI jitter.
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn retarget_changes_future_pacing() {
        let mut pace = Pacer::new(Some(10.0), IopsType::Iomon);
        pace.retarget(Some(1_000_000.0));
        assert_eq!(pace.iops_type(), IopsType::Iomon);
        let start = Instant::now();
        for _ in 0..100 {
            pace.throttle();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
