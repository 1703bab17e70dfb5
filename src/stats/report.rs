//! Text rendering of a job's stats at the configured `report_level` (spec §4.11: `none`,
//! `brief`, `full`).
//!
//! Grounded on `output/text.rs`'s plain-text report layout, narrowed to the read/write/error
//! counters and latency percentiles `StatsSnapshot`/`WorkerLatency` carry, dropping the
//! teacher's distribution/engine-specific sections that have no counterpart here.

use super::{StatsSnapshot, WorkerLatency};
use crate::config::ReportLevel;
use crate::util::time::{format_duration, format_throughput};
use std::fmt::Write as _;
use std::time::Duration;

/// Render one job's aggregated stats as the text block written to stdout/joblog at job end
/// (or periodically, at `keepalive` ticks, for the brief form). `elapsed` is the pass/job
/// wall-clock time used to compute average bytes/sec and IO/sec (spec §4.11: rates come from
/// a high-resolution elapsed timer, not `times()` ticks, since those read zero for short
/// FS-cached runs).
pub fn render(
    level: ReportLevel,
    tag: &str,
    snapshot: &StatsSnapshot,
    latency: Option<&WorkerLatency>,
    elapsed: Option<Duration>,
) -> String {
    match level {
        ReportLevel::None => String::new(),
        ReportLevel::Brief => render_brief(tag, snapshot),
        ReportLevel::Full => render_full(tag, snapshot, latency, elapsed),
    }
}

fn render_brief(tag: &str, s: &StatsSnapshot) -> String {
    format!(
        "{tag}: reads={} writes={} bytes={} errors={}",
        s.reads,
        s.writes,
        s.bytes_read + s.bytes_written,
        s.read_errors + s.write_errors + s.miscompares,
    )
}

fn render_full(tag: &str, s: &StatsSnapshot, latency: Option<&WorkerLatency>, elapsed: Option<Duration>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {tag} ===");
    let _ = writeln!(out, "  reads            : {}", s.reads);
    let _ = writeln!(out, "  writes           : {}", s.writes);
    let _ = writeln!(out, "  bytes read       : {}", s.bytes_read);
    let _ = writeln!(out, "  bytes written    : {}", s.bytes_written);
    let _ = writeln!(out, "  read errors      : {}", s.read_errors);
    let _ = writeln!(out, "  write errors     : {}", s.write_errors);
    let _ = writeln!(out, "  miscompares      : {}", s.miscompares);
    let _ = writeln!(out, "  retries          : {}", s.retries);
    let _ = writeln!(out, "  passes completed : {}", s.passes_completed);
    if let Some(elapsed) = elapsed.filter(|d| !d.is_zero()) {
        let total_ios = (s.reads + s.writes) as f64;
        let total_bytes = (s.bytes_read + s.bytes_written) as f64;
        let secs = elapsed.as_secs_f64();
        let _ = writeln!(out, "  elapsed          : {}", format_duration(elapsed));
        let _ = writeln!(out, "  throughput       : {}", format_throughput(total_bytes / secs));
        let _ = writeln!(out, "  iops             : {:.1}", total_ios / secs);
    }
    if let Some(latency) = latency {
        let _ = writeln!(out, "  read latency     : {}", percentile_line(&latency.read_latency));
        let _ = writeln!(out, "  write latency    : {}", percentile_line(&latency.write_latency));
    }
    out
}

fn percentile_line(hist: &super::histogram::LatencyHistogram) -> String {
    let fmt = |d: Option<Duration>| d.map(|d| format!("{:.1}us", d.as_secs_f64() * 1e6)).unwrap_or_else(|| "n/a".to_string());
    format!(
        "p50={} p95={} p99={} p999={}",
        fmt(hist.percentile(50.0)),
        fmt(hist.percentile(95.0)),
        fmt(hist.percentile(99.0)),
        fmt(hist.percentile(99.9)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_level_renders_empty() {
        assert_eq!(render(ReportLevel::None, "job", &StatsSnapshot::default(), None, None), "");
    }

    #[test]
    fn brief_mentions_totals() {
        let snap = StatsSnapshot { reads: 10, writes: 5, bytes_read: 4096, ..Default::default() };
        let text = render(ReportLevel::Brief, "job1", &snap, None, None);
        assert!(text.contains("reads=10"));
        assert!(text.contains("writes=5"));
    }

    #[test]
    fn full_includes_latency_when_present() {
        let mut latency = WorkerLatency::default();
        latency.read_latency.record(Duration::from_micros(100));
        let snap = StatsSnapshot::default();
        let text = render(ReportLevel::Full, "job1", &snap, Some(&latency), Some(Duration::from_secs(1)));
        assert!(text.contains("read latency"));
    }
}
