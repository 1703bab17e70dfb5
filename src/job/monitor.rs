//! Monitor/keepalive thread (C10): one per job, ticking every `monitor_interval` to render
//! brief keepalive lines, detect no-progress stalls, and hot-reload the iotune file.
//!
//! Grounded on the job-level periodic-reporting idiom implicit in `stats/mod.rs`'s snapshot
//! design (a monitor reads worker counters without needing `&mut` access) and on
//! `config/iotune.rs`'s mtime-driven reload, generalized here from a single read into the
//! full keepalive/no-progress tick spec §4.10 describes.

use super::{Job, JobState};
use crate::config::{Config, ReportLevel};
use crate::logger::Logger;
use crate::stats::{report, StatsSnapshot};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Spawn the monitor thread for `job`, ticking at `cfg.monitor_interval` until the job
/// finishes or `job.monitor_stop` is set (by `Job::wait`, once every worker has exited).
pub fn spawn(job: Arc<Job>, cfg: Arc<Config>, logger: Arc<Logger>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("dt-job{}-monitor", job.id))
        .spawn(move || run(job, cfg, logger))
        .expect("spawning monitor thread")
}

fn run(job: Arc<Job>, cfg: Arc<Config>, logger: Arc<Logger>) {
    let interval = cfg.monitor_interval.max(Duration::from_millis(100));
    let mut watcher = cfg.iotune_file.as_ref().map(crate::config::iotune::IotuneWatcher::new);
    let mut last_progress = StatsSnapshot::default();
    let mut ticks_without_progress: u32 = 0;
    let mut noprogt_fired = false;
    let noprog_limit = cfg.noprogtime.map(|d| (d.as_secs_f64() / interval.as_secs_f64()).ceil() as u32);
    let noprogt_limit = cfg.noprogttime.map(|d| (d.as_secs_f64() / interval.as_secs_f64()).ceil() as u32);
    let trigger = crate::trigger::build_sink(cfg.trigger.clone(), cfg.trigger_control);

    loop {
        std::thread::sleep(interval);
        if job.monitor_stop.load(Ordering::Acquire) {
            return;
        }
        if matches!(job.state(), JobState::Finished | JobState::Cancelled) {
            return;
        }

        let report_data = job.report();
        if cfg.report_level != ReportLevel::None {
            let tag = job.tag.clone().unwrap_or_else(|| format!("job{}", job.id));
            let line = report::render(ReportLevel::Brief, &tag, &report_data.stats, None, None);
            if !line.is_empty() {
                logger.info(line);
            }
        }

        if let Some(limit) = noprog_limit {
            if report_data.stats.reads == last_progress.reads && report_data.stats.writes == last_progress.writes {
                ticks_without_progress += 1;
                // Fire the warning every `limit` ticks the stall persists (spec §4.10:
                // "log a no-progress warning"), but only fire the `noprog` trigger once per
                // stall once the longer `noprogttime` deadline is crossed.
                if ticks_without_progress % limit == 0 {
                    logger.warning(format!(
                        "job {} has made no progress in {:?}",
                        job.id,
                        interval * ticks_without_progress
                    ));
                }
                if !noprogt_fired && noprogt_limit.is_some_and(|t| ticks_without_progress >= t) {
                    noprogt_fired = true;
                    let tag = job.tag.clone().unwrap_or_else(|| format!("job{}", job.id));
                    trigger.fire(&crate::trigger::TriggerContext {
                        job_id: job.id,
                        thread_number: 0,
                        target: tag,
                        cause: crate::trigger::TriggerCause::NoProgress,
                    });
                }
            } else {
                ticks_without_progress = 0;
                noprogt_fired = false;
            }
        }
        last_progress = report_data.stats;

        if let Some(watcher) = watcher.as_mut() {
            if let Some(file) = watcher.poll() {
                logger.info(format!("job {}: reloaded iotune file", job.id));
                if let Some(iotune) = &job.iotune {
                    iotune.apply(&file);
                }
            }
        }
    }
}
