//! Per-thread worker (C5): the write and read/read-after-write state machines that actually
//! exercise a target. Each job spawns `threads` of these, each owning its own I/O primitive
//! handle, pattern engine, btag template, and history ring.
//!
//! Grounded on this module's own `Worker` struct — kept for its single-owner-per-thread field
//! layout and its iteration-head pause/cancel check — regenerated around dt's write/read loop
//! (spec §4.5/§5) instead of the teacher's IOPS-profiling request loop. I/O itself goes
//! through `io::IoPrimitive` (C4), pattern bytes through `pattern::PatternEngine` (C1), block
//! tags through `btag` (C2), verification through `verify` (C6), and recent-I/O context
//! through `history::HistoryRing` (C3).

pub mod pacing;

use crate::btag::{self, Btag, BtagIdentity, VerifyMask};
use crate::config::{BlockSizeSpec, Config, IoDir, IoMode, OnError, PatternSourceSpec};
use crate::coordinator::IoLock;
use crate::error::OpKind;
use crate::history::HistoryRing;
use crate::io::{with_retry, IoPrimitive, OpenFlags};
use crate::logger::Logger;
use crate::pattern::{OverlayConfig, PatternEngine, PatternSource};
use crate::stats::{WorkerLatency, WorkerStats};
use crate::target::Walker;
use crate::util::buffer::AlignedBuffer;
use crate::verify::{self, reread, VerifyMode};
use crate::Result;
use anyhow::Context;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Cooperative control flags a job's manager (C9) flips to pause/resume/cancel every worker
/// without tearing down their open handles. Checked at each iteration head (spec §4.9).
#[derive(Debug, Default)]
pub struct Control {
    pub paused: AtomicBool,
    pub cancelled: AtomicBool,
    /// Bumped whenever the monitor reloads the iotune file (C10); workers compare against
    /// their last-seen generation to know when to re-read `iops`/`retry_delay`.
    pub iotune_generation: AtomicU32,
}

impl Control {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// What a completed iteration did, reported back to the job loop (C9) for scheduling
/// decisions (start next pass, stop the thread, abort the job).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    EndOfFile,
    /// `true` when the fatal condition was a miscompare rather than an I/O error.
    Fatal { miscompare: bool },
}

/// One worker thread's full state, built once via `Worker::new` and driven to completion by
/// repeatedly calling `run_iteration` from the job's thread body.
pub struct Worker {
    pub job_id: u32,
    pub thread_number: u32,
    cfg: Arc<Config>,
    control: Arc<Control>,
    iolock: Option<Arc<IoLock>>,
    logger: Arc<Logger>,
    stats: Arc<WorkerStats>,
    latency: WorkerLatency,

    primitive: Box<dyn IoPrimitive>,
    target_path: PathBuf,
    /// Present when the target is a directory tree (`dir=`) rather than a single file or
    /// device; drives per-worker file naming, per-file boundaries, and dispose-on-pass-end.
    walker: Option<Walker>,
    per_file_records: u64,

    pattern: PatternEngine,
    btag_template: Btag,
    generation: u32,
    history: HistoryRing,
    write_buf: AlignedBuffer,

    rng: Xoshiro256PlusPlus,
    offset: u64,
    /// Baseline offset for the current file/pass (spec §4.5 step 5's `file_position`): random
    /// offsets are drawn from `[file_position, file_position + rdata_limit)` and never move
    /// this; only `next_sequential_offset` does.
    file_position: u64,
    /// Set once a reverse-direction run has produced the record sitting at `file_position`;
    /// `limit_reached` uses this to stop on the following iteration instead of re-issuing I/O
    /// at the saturated floor offset forever (spec §4.5/§8's reverse boundary).
    reverse_at_floor: bool,
    record_index: u64,
    pass: u32,
    error_count: u32,
    error_number: u64,
    pace: pacing::Pacer,
    iotune: Option<Arc<crate::job::IotuneState>>,
    iotune_seen_gen: u32,
    trigger: Box<dyn crate::trigger::TriggerSink>,
    fsfull: Option<Arc<crate::job::FsFullState>>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        control: Arc<Control>,
        iolock: Option<Arc<IoLock>>,
        logger: Arc<Logger>,
        stats: Arc<WorkerStats>,
        job_id: u32,
        thread_number: u32,
        iotune: Option<Arc<crate::job::IotuneState>>,
        fsfull: Option<Arc<crate::job::FsFullState>>,
        make_primitive: impl FnOnce() -> Box<dyn IoPrimitive>,
    ) -> Result<Self> {
        let mut walker = if cfg.walker.base_dir.is_some() {
            Some(Walker::new(&cfg.walker, job_id, thread_number)?)
        } else {
            None
        };

        let target_path = if let Some(walker) = &mut walker {
            walker.ensure_dir()?;
            walker.current_path()
        } else {
            cfg.target.single().cloned().context("worker requires a resolved target path")?
        };

        let mut primitive = make_primitive();
        let open_flags = OpenFlags {
            direct: cfg.direct,
            read_only: matches!(cfg.iomode, IoMode::Verify),
            create: true,
            append: false,
        };
        primitive
            .open(&target_path, open_flags)
            .with_context(|| format!("opening target {}", target_path.display()))?;

        let pattern_source = match &cfg.pattern.source {
            PatternSourceSpec::Fixed32(v) => PatternSource::Fixed32(*v),
            PatternSourceSpec::Incr => PatternSource::Incr,
            PatternSourceSpec::FromFile(p) => PatternSource::FromFile(p.clone()),
            PatternSourceSpec::Iot => {
                PatternSource::Iot { seed: cfg.pattern.iotseed.unwrap_or(0x9E37_79B9_7F4A_7C15) }
            }
        };
        let overlay = OverlayConfig {
            prefix: cfg.pattern.prefix.clone().map(|s| s.into_bytes()),
            lbdata: cfg.pattern.lbdata,
            timestamp: cfg.pattern.timestamp,
        };
        let pattern = PatternEngine::new(pattern_source, overlay)?;

        let identity = BtagIdentity {
            devid: 0,
            inode: 0,
            serial: Vec::new(),
            hostname: hostname_bytes(),
            process_id: std::process::id(),
            job_id,
            thread_number,
            device_size: cfg.block.min() as u32,
            step_offset: cfg.step_offset,
            file_backed: true,
        };
        let write_start = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let pattern_word = match &cfg.pattern.source {
            PatternSourceSpec::Fixed32(v) => *v,
            _ => 0,
        };
        let btag_template = Btag::create_template(&identity, 1, pattern_word, write_start);

        let history = HistoryRing::new(cfg.history_size, cfg.history_data_size);

        let rseed = cfg.rseed.unwrap_or(job_id as u64 * 0x1000_0000 + thread_number as u64);
        let rng = Xoshiro256PlusPlus::seed_from_u64(rseed);

        let start_offset = cfg.start_offset + thread_number as u64 * cfg.step_offset;

        let alignment = primitive.logical_block_size().max(4096) as usize;
        let write_buf = AlignedBuffer::new(cfg.block.max().max(512) as usize, alignment);
        let pace = pacing::Pacer::new(cfg.iops, cfg.iops_type);
        let trigger = crate::trigger::build_sink(cfg.trigger.clone(), cfg.trigger_control);

        Ok(Self {
            job_id,
            thread_number,
            cfg,
            control,
            iolock,
            logger,
            stats,
            latency: WorkerLatency::default(),
            primitive,
            target_path,
            walker,
            per_file_records: 0,
            pattern,
            btag_template,
            generation: 1,
            history,
            write_buf,
            rng,
            offset: start_offset,
            file_position: start_offset,
            reverse_at_floor: false,
            record_index: 0,
            pass: 0,
            error_count: 0,
            error_number: 0,
            pace,
            iotune,
            iotune_seen_gen: 0,
            trigger,
            fsfull,
        })
    }

    /// Start a new pass: reseed the pattern engine, bump the btag generation, reset the
    /// sequential cursor (spec §4.5: generation increments once per pass).
    pub fn start_pass(&mut self) -> Result<()> {
        self.pass += 1;
        self.generation += 1;
        self.pattern.start_pass(self.pass)?;
        self.offset = self.cfg.start_offset + self.thread_number as u64 * self.cfg.step_offset;
        self.file_position = self.offset;
        self.reverse_at_floor = false;
        Ok(())
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    pub fn latency(&self) -> &WorkerLatency {
        &self.latency
    }

    /// Drive one record's worth of I/O. Call in a loop from the job thread until it returns
    /// anything other than `StepOutcome::Continue`.
    pub fn run_iteration(&mut self) -> Result<StepOutcome> {
        if self.control.is_cancelled() {
            return Ok(StepOutcome::Fatal { miscompare: false });
        }
        while self.control.is_paused() && !self.control.is_cancelled() {
            std::thread::sleep(Duration::from_millis(50));
        }
        if self.control.is_cancelled() {
            return Ok(StepOutcome::Fatal { miscompare: false });
        }

        let block_size = self.draw_block_size();
        let is_write = self.draw_is_write();

        // The sequential baseline always advances, whether or not this record ends up random
        // (spec §4.8: "the coordinator serializes advancement of the sequential baseline only").
        let sequential_offset = if let Some(lock) = self.iolock.clone() {
            let r = lock.reserve_sequential(block_size, self.cfg.limits.data_limit, self.cfg.limits.record_limit);
            if r.limit_reached {
                return Ok(StepOutcome::EndOfFile);
            }
            r.offset
        } else {
            loop {
                if !self.limit_reached(block_size) {
                    break self.next_sequential_offset(block_size);
                }
                if !self.advance_to_next_file()? {
                    return Ok(StepOutcome::EndOfFile);
                }
            }
        };

        let offset = if self.draw_is_random(is_write) {
            self.draw_random_offset(block_size)
        } else {
            sequential_offset
        };

        self.pace.throttle();

        let outcome = if is_write {
            self.do_write(offset, block_size)?
        } else {
            self.do_read(offset, block_size)?
        };

        if let Some(lock) = &self.iolock {
            lock.record(is_write, block_size);
        }

        self.record_index += 1;
        self.per_file_records += 1;
        Ok(outcome)
    }

    fn limit_reached(&self, block_size: u64) -> bool {
        let record_count = if self.walker.is_some() { self.per_file_records } else { self.record_index };
        if let Some(limit) = self.cfg.limits.record_limit {
            if record_count >= limit {
                return true;
            }
        }
        if self.cfg.io_dir == IoDir::Reverse {
            // Reverse sequential I/O stops once it has produced the record at `file_position`
            // (spec §4.5/§8's "not below 0"/"stop at file_position"): without this check a
            // reverse run would keep re-issuing I/O at the saturated floor offset forever,
            // relying only on `record_limit` to eventually trip.
            if self.reverse_at_floor {
                return true;
            }
        } else if let Some(limit) = self.cfg.limits.data_limit {
            if self.offset + block_size > self.cfg.start_offset + limit {
                return true;
            }
        }
        // After an ENOSPC restart, a read-only pass must stop at exactly what the write pass
        // actually got down rather than its original `limit=`/`records=` (spec §4.12 scenario 6).
        if !self.cfg.fsfull_restart || self.cfg.read_percentage != Some(100) {
            return false;
        }
        if let Some(fsfull) = &self.fsfull {
            if fsfull.restarted.load(Ordering::Relaxed) {
                let cap = fsfull.last_dbytes_written.load(Ordering::Relaxed);
                if cap > 0 && self.offset + block_size > self.cfg.start_offset + cap {
                    return true;
                }
            }
        }
        false
    }

    /// Move to the next file in this worker's directory slice once the current file has hit
    /// its record/data boundary (spec §4.7). Returns `false` once the walker has exhausted its
    /// `dir_limit`/`file_limit` budget, at which point the pass is over for this worker.
    fn advance_to_next_file(&mut self) -> Result<bool> {
        if self.walker.is_none() {
            return Ok(false);
        }
        self.walker.as_mut().unwrap().record_created();
        let step = self.walker.as_mut().unwrap().advance();
        if step == crate::target::WalkStep::Done {
            let walker = self.walker.as_mut().unwrap();
            if walker.should_dispose_on_success() {
                walker.delete_all()?;
            }
            return Ok(false);
        }

        let next_path = {
            let walker = self.walker.as_mut().unwrap();
            walker.ensure_dir()?;
            walker.current_path()
        };

        self.primitive.close()?;
        let open_flags = OpenFlags {
            direct: self.cfg.direct,
            read_only: matches!(self.cfg.iomode, IoMode::Verify),
            create: true,
            append: false,
        };
        self.primitive
            .open(&next_path, open_flags)
            .with_context(|| format!("opening target {}", next_path.display()))?;
        self.target_path = next_path;
        self.offset = self.cfg.start_offset;
        self.file_position = self.offset;
        self.reverse_at_floor = false;
        self.per_file_records = 0;
        Ok(true)
    }

    fn next_sequential_offset(&mut self, block_size: u64) -> u64 {
        let offset = self.offset;
        match self.cfg.io_dir {
            IoDir::Forward => self.offset += block_size,
            IoDir::Reverse => {
                // `offset` (the value about to be returned for this record) sitting at or below
                // `file_position` means this is the last valid record; mark the floor reached so
                // `limit_reached` stops on the next iteration instead of re-issuing I/O at the
                // saturated offset forever.
                if offset <= self.file_position {
                    self.reverse_at_floor = true;
                }
                self.offset = self.offset.saturating_sub(block_size).max(self.file_position);
            }
        }
        offset
    }

    /// Spec §4.5 step 5: decide whether this record goes random rather than sequential.
    /// `io_type=random` makes every record random absent a percentage override;
    /// `random_percentage`/`random_rpercentage`/`random_wpercentage` (the latter two taking
    /// precedence for reads/writes respectively) draw per-record, with `-1` meaning a uniform
    /// coin flip.
    fn draw_is_random(&mut self, is_write: bool) -> bool {
        let pct = if is_write {
            self.cfg.random_wpercentage.or(self.cfg.random_percentage)
        } else {
            self.cfg.random_rpercentage.or(self.cfg.random_percentage)
        };
        match pct {
            Some(-1) => self.rng.gen_bool(0.5),
            Some(p) => self.rng.gen_range(0..100) < p,
            None => self.cfg.io_type == crate::config::IoType::Random,
        }
    }

    /// The size of the region random offsets may land in: `limit=`/`count=`'s data limit when
    /// given, else the target's current extent (spec §4.5 step 5's `rdata_limit`).
    fn random_data_limit(&self) -> u64 {
        self.cfg.limits.data_limit.filter(|&v| v > 0).unwrap_or_else(|| self.primitive.size()).max(self.cfg.block.max())
    }

    /// Draw a `random_align`-aligned offset in `[file_position, file_position + rdata_limit)`,
    /// never placing a `block_size`-byte request past `rdata_limit` (spec §4.5 edge case).
    fn draw_random_offset(&mut self, block_size: u64) -> u64 {
        let rdata_limit = self.random_data_limit();
        let span = rdata_limit.saturating_sub(block_size);
        let align = self.cfg.ralign.unwrap_or(block_size).max(1);
        let raw = if span == 0 { 0 } else { self.rng.gen_range(0..=span) };
        let aligned = (raw / align) * align;
        self.file_position + aligned.min(span)
    }

    fn draw_block_size(&mut self) -> u64 {
        match self.cfg.block {
            BlockSizeSpec::Fixed(v) => v,
            BlockSizeSpec::Variable { min, max } => {
                if max <= min {
                    min
                } else {
                    self.rng.gen_range(min..=max)
                }
            }
            BlockSizeSpec::Incrementing { min, max, incr } => {
                let span = (max - min) / incr.max(1) + 1;
                let step = self.record_index % span;
                min + step * incr
            }
        }
    }

    fn draw_is_write(&mut self) -> bool {
        match self.cfg.read_percentage {
            Some(pct) => self.rng.gen_range(0..100) >= pct,
            None => true,
        }
    }

    /// Build the expected contents of one record: base pattern plus overlays, stamped with a
    /// btag if enabled. Shared between the write path (building what to send) and the read
    /// path (building what to compare against).
    fn fill_expected(&mut self, offset: u64, block_size: u64, record_number: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; block_size as usize];
        let now_secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        self.pattern.fill(&mut buf, offset, offset as u32, now_secs)?;
        if self.cfg.btag {
            let device_size = self.cfg.block.min().max(1) as usize;
            btag::stamp_buffer(&mut self.btag_template, &mut buf, device_size, record_number as u32, offset);
        }
        Ok(buf)
    }

    fn verify_mode<'a>(&self, template: &'a Btag) -> VerifyMode<'a> {
        if self.cfg.btag {
            let random_io = matches!(self.cfg.io_type, crate::config::IoType::Random);
            let mask = self.cfg.btag_verify_expr.as_deref().map_or_else(
                || VerifyMask::default_for(random_io, self.iolock.is_some(), false),
                |expr| {
                    let ops = crate::config::tokens::parse_mask_expr(expr);
                    VerifyMask::default_for(random_io, self.iolock.is_some(), false).apply_expr(&ops)
                },
            );
            VerifyMode::Btag { expected_template: template, mask, device_size: self.cfg.block.min().max(1) as usize }
        } else {
            VerifyMode::ByteWiseWithOverlays
        }
    }

    fn do_write(&mut self, offset: u64, block_size: u64) -> Result<StepOutcome> {
        let expected = self.fill_expected(offset, block_size, self.record_index)?;
        self.write_buf.as_mut_slice()[..expected.len()].copy_from_slice(&expected);

        let retry_errors = self.cfg.retry_errors.clone();
        let retry_limit = self.cfg.retry_limit;
        let retry_delay = self.cfg.retry_delay;
        let primitive = &mut self.primitive;
        let payload = &self.write_buf.as_slice()[..expected.len()];
        let result = with_retry(&retry_errors, retry_limit, retry_delay, || primitive.pwrite(payload, offset));

        match result {
            Ok(n) => {
                self.stats.record_write(n as u64);
                self.history.record(0, self.record_index, offset, block_size as usize, n, true, payload);
                if n < expected.len() {
                    // Spec §4.5 step 11: partial write on a regular file is ENOSPC; stop writing
                    // this file now, don't retry (a later write might "succeed" at the wrong size).
                    return self.handle_disk_full();
                }
                if self.cfg.read_after_write {
                    return self.verify_after_write(offset, block_size, &expected);
                }
                Ok(StepOutcome::Continue)
            }
            Err(info) if info.disk_full => {
                self.stats.write_errors.add(1);
                self.handle_disk_full()
            }
            Err(info) => {
                self.stats.write_errors.add(1);
                self.handle_error(OpKind::Write, &format!("write failed: os_error={:?}", info.os_error))
            }
        }
    }

    /// Spec §4.7/§4.12 scenario 6: react to a partial write / disk-full error. When
    /// `fsfull_restart` is set and this write was sequential-forward (never random or
    /// reverse), record what was actually written, wait for free space, tear the file set
    /// down and restart writing from file 0. Otherwise the failure is terminal for this file
    /// (spec §4.5 step 11: "do not retry").
    fn handle_disk_full(&mut self) -> Result<StepOutcome> {
        self.error_number += 1;
        self.logger.error(format!(
            "{}: file_system_full=true at file offset {}",
            self.logger.error_header(self.error_number),
            self.offset
        ));

        let sequential_forward =
            self.cfg.io_dir == IoDir::Forward && self.cfg.io_type != crate::config::IoType::Random;
        if !self.cfg.fsfull_restart || !sequential_forward {
            return self.handle_error_kind(false);
        }

        if let Some(fsfull) = self.fsfull.clone() {
            fsfull.last_dbytes_written.store(self.stats.bytes_written.get(), Ordering::Relaxed);
            let files_written = if self.walker.is_some() { self.per_file_records } else { 1 };
            fsfull.last_files_written.store(files_written, Ordering::Relaxed);
            fsfull.restarted.store(true, Ordering::Relaxed);
        }

        self.logger.warning("disk full: waiting for free space before restarting writes from file 0");
        let watchdog_path = self.target_path.clone();
        let needed = self.cfg.block.max().max(1);
        let recovered =
            crate::target::wait_for_free_space(&watchdog_path, needed, self.cfg.fsfree_delay, self.cfg.fsfree_retries);
        if !recovered {
            self.logger.warning("free space did not recover within fsfree_retries; giving up on this file");
            return self.handle_error_kind(false);
        }

        self.restart_from_file_zero()?;
        Ok(StepOutcome::Continue)
    }

    /// Tear down and recreate the file set, then resume writing from its first file/offset
    /// (spec §4.7: "the file set is torn down and writes restart").
    fn restart_from_file_zero(&mut self) -> Result<()> {
        if let Some(walker) = &mut self.walker {
            walker.delete_all()?;
            walker.reset();
            walker.ensure_dir()?;
            let path = walker.current_path();
            self.primitive.close()?;
            let open_flags = OpenFlags { direct: self.cfg.direct, read_only: false, create: true, append: false };
            self.primitive
                .open(&path, open_flags)
                .with_context(|| format!("reopening target {}", path.display()))?;
            self.target_path = path;
        } else {
            self.primitive.close()?;
            let open_flags = OpenFlags { direct: self.cfg.direct, read_only: false, create: true, append: false };
            self.primitive
                .open(&self.target_path.clone(), open_flags)
                .with_context(|| format!("reopening target {}", self.target_path.display()))?;
        }
        self.offset = self.cfg.start_offset + self.thread_number as u64 * self.cfg.step_offset;
        self.file_position = self.offset;
        self.reverse_at_floor = false;
        self.per_file_records = 0;
        Ok(())
    }

    fn do_read(&mut self, offset: u64, block_size: u64) -> Result<StepOutcome> {
        let mut buf = vec![0u8; block_size as usize];
        let retry_errors = self.cfg.retry_errors.clone();
        let retry_limit = self.cfg.retry_limit;
        let retry_delay = self.cfg.retry_delay;
        let primitive = &mut self.primitive;
        let result = with_retry(&retry_errors, retry_limit, retry_delay, || primitive.pread(&mut buf, offset));

        match result {
            Ok(n) => {
                buf.truncate(n);
                self.stats.record_read(n as u64);
                self.history.record(0, self.record_index, offset, block_size as usize, n, false, &buf);
                if self.cfg.verify {
                    let expected = self.fill_expected(offset, n as u64, self.record_index)?;
                    return self.compare_and_react(offset, &expected, &buf);
                }
                Ok(StepOutcome::Continue)
            }
            Err(info) => {
                self.stats.read_errors.add(1);
                self.handle_error(OpKind::Read, &format!("read failed: os_error={:?}", info.os_error))
            }
        }
    }

    fn verify_after_write(&mut self, offset: u64, block_size: u64, expected: &[u8]) -> Result<StepOutcome> {
        let mut buf = vec![0u8; block_size as usize];
        let n = self
            .primitive
            .pread(&mut buf, offset)
            .map_err(|info| anyhow::anyhow!("read-after-write read failed: os_error={:?}", info.os_error))?;
        buf.truncate(n);
        self.compare_and_react(offset, expected, &buf)
    }

    fn compare_and_react(&mut self, offset: u64, expected: &[u8], received: &[u8]) -> Result<StepOutcome> {
        let header = if self.cfg.btag && received.len() >= crate::btag::BTAG_SIZE {
            let mut h = [0u8; crate::btag::BTAG_SIZE];
            h.copy_from_slice(&expected[..crate::btag::BTAG_SIZE]);
            Btag::decode(&h)
        } else {
            self.btag_template.clone()
        };
        let mode = self.verify_mode(&header);
        let result = verify::verify(received, expected, &mode);
        if result.ok {
            return Ok(StepOutcome::Continue);
        }

        self.stats.miscompares.add(1);
        self.error_number += 1;
        let mismatch_at = result.first_mismatch_offset.unwrap_or(0);
        self.logger.error(format!(
            "{} miscompare at file offset {} (record {})",
            self.logger.error_header(self.error_number),
            offset + mismatch_at as u64,
            self.record_index
        ));
        self.logger.error(verify::miscompare_dump(expected, received, offset, mismatch_at));
        if let Some(entries) = self.history.dump_once() {
            for entry in entries {
                self.logger.error(format!(
                    "history: record={} offset={} write={} transferred={}",
                    entry.record_number, entry.offset, entry.is_write, entry.transferred
                ));
            }
        }

        if self.cfg.retry_dc {
            self.attempt_reread(offset, expected, received);
        }

        self.handle_error_kind(true)
    }

    fn attempt_reread(&mut self, offset: u64, expected: &[u8], corrupted: &[u8]) {
        let target_path = self.target_path.clone();
        let make = || -> Box<dyn IoPrimitive> { Box::new(crate::io::sync::PositionalIo::new()) };
        if let Some(mut handle) = reread::open_direct_handle(make, &target_path) {
            let attempts = reread::reread_loop(
                handle.as_mut(),
                offset,
                expected.len(),
                expected,
                corrupted,
                self.cfg.retry_dc_limit,
                self.cfg.retry_dc_delay,
            );
            for attempt in &attempts {
                self.logger.error(format!("re-read attempt {}: {}", attempt.attempt, attempt.cause));
            }
            let dir = reread::triage_dir(&target_path, self.cfg.triage_dir.as_deref());
            let basename = target_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let last = attempts.last().map(|a| a.reread_buf.clone()).unwrap_or_default();
            if let Err(e) = reread::save_triage_files(&dir, &basename, self.job_id, self.thread_number, expected, corrupted, &last) {
                self.logger.warning(format!("failed to save triage files: {e}"));
            }
        } else {
            self.logger.warning("re-read-on-corruption requested but a direct-I/O handle could not be opened");
        }

        let (single, replay) = reread::reproducer_command_lines(
            "dt",
            &target_path.display().to_string(),
            expected.len(),
            self.record_index,
            offset,
            &self.pattern_desc(),
        );
        self.logger.error(format!("to reproduce just this record: {single}"));
        self.logger.error(format!("to replay the pass up to this record: {replay}"));
    }

    /// `pattern=` token value describing this worker's pattern source, for reproducer lines.
    fn pattern_desc(&self) -> String {
        match &self.cfg.pattern.source {
            PatternSourceSpec::Fixed32(v) => format!("{v:08x}"),
            PatternSourceSpec::Incr => "incr".to_string(),
            PatternSourceSpec::FromFile(p) => p.display().to_string(),
            PatternSourceSpec::Iot => "iot".to_string(),
        }
    }

    fn handle_error(&mut self, _op: OpKind, message: &str) -> Result<StepOutcome> {
        self.error_number += 1;
        self.logger.error(format!("{}: {message}", self.logger.error_header(self.error_number)));
        self.handle_error_kind(false)
    }

    fn handle_error_kind(&mut self, miscompare: bool) -> Result<StepOutcome> {
        self.error_count += 1;
        self.trigger.fire(&crate::trigger::TriggerContext {
            job_id: self.job_id,
            thread_number: self.thread_number,
            target: self.target_path.display().to_string(),
            cause: if miscompare { crate::trigger::TriggerCause::Miscompare } else { crate::trigger::TriggerCause::IoError },
        });
        let over_limit = self.cfg.limits.error_limit != 0 && self.error_count >= self.cfg.limits.error_limit;
        if over_limit || self.cfg.oncerr == OnError::Abort {
            return Ok(StepOutcome::Fatal { miscompare });
        }
        if self.cfg.oncerr == OnError::Pause {
            self.control.paused.store(true, Ordering::Relaxed);
        }
        Ok(StepOutcome::Continue)
    }
}

fn hostname_bytes() -> Vec<u8> {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, IoMode, TargetSpec};
    use std::sync::Arc;

    fn test_cfg(path: PathBuf) -> Config {
        Config {
            target: TargetSpec { input: Some(path.clone()), output: Some(path) },
            iomode: IoMode::Test,
            block: BlockSizeSpec::Fixed(512),
            read_percentage: Some(0),
            limits: crate::config::Limits { record_limit: Some(4), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn write_only_run_completes_after_record_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.bin");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        let cfg = Arc::new(test_cfg(path));
        let mut worker = Worker::new(
            cfg,
            Arc::new(Control::default()),
            None,
            Arc::new(Logger::stdout_only()),
            Arc::new(WorkerStats::new()),
            1,
            0,
            None,
            None,
            || Box::new(crate::io::sync::PositionalIo::new()),
        )
        .unwrap();
        worker.start_pass().unwrap();

        let mut outcome = StepOutcome::Continue;
        for _ in 0..10 {
            outcome = worker.run_iteration().unwrap();
            if outcome != StepOutcome::Continue {
                break;
            }
        }
        assert_eq!(outcome, StepOutcome::EndOfFile);
        assert_eq!(worker.stats.writes.get(), 4);
    }

    #[test]
    fn read_after_write_detects_injected_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.bin");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        let mut cfg = test_cfg(path.clone());
        cfg.read_after_write = true;
        cfg.limits.record_limit = Some(1);
        let cfg = Arc::new(cfg);
        let mut worker = Worker::new(
            cfg,
            Arc::new(Control::default()),
            None,
            Arc::new(Logger::stdout_only()),
            Arc::new(WorkerStats::new()),
            1,
            0,
            None,
            None,
            || Box::new(crate::io::sync::PositionalIo::new()),
        )
        .unwrap();
        worker.start_pass().unwrap();
        let outcome = worker.run_iteration().unwrap();
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(worker.stats.miscompares.get(), 0);
    }

    #[test]
    fn directory_walk_advances_across_files_and_disposes_when_done() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            iomode: IoMode::Test,
            block: BlockSizeSpec::Fixed(512),
            read_percentage: Some(0),
            limits: crate::config::Limits { record_limit: Some(2), ..Default::default() },
            walker: crate::config::WalkerSpec {
                base_dir: Some(dir.path().to_path_buf()),
                dir_limit: 2,
                subdir_limit: 0,
                subdir_depth: 0,
                file_limit: 1,
                dirprefix: "dir".to_string(),
                filepostfix: String::new(),
                delete_per_pass: true,
            },
            ..Default::default()
        };
        let cfg = Arc::new(cfg);
        let mut worker = Worker::new(
            cfg,
            Arc::new(Control::default()),
            None,
            Arc::new(Logger::stdout_only()),
            Arc::new(WorkerStats::new()),
            1,
            0,
            None,
            None,
            || Box::new(crate::io::sync::PositionalIo::new()),
        )
        .unwrap();
        worker.start_pass().unwrap();

        let mut outcome = StepOutcome::Continue;
        for _ in 0..20 {
            outcome = worker.run_iteration().unwrap();
            if outcome != StepOutcome::Continue {
                break;
            }
        }
        assert_eq!(outcome, StepOutcome::EndOfFile);
        // 2 directories, 1 file each, 2 records per file.
        assert_eq!(worker.stats.writes.get(), 4);
    }

    #[test]
    fn random_io_type_draws_random_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.bin");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        let mut cfg = test_cfg(path);
        cfg.io_type = crate::config::IoType::Random;
        let cfg = Arc::new(cfg);
        let mut worker = Worker::new(
            cfg,
            Arc::new(Control::default()),
            None,
            Arc::new(Logger::stdout_only()),
            Arc::new(WorkerStats::new()),
            1,
            0,
            None,
            None,
            || Box::new(crate::io::sync::PositionalIo::new()),
        )
        .unwrap();
        assert!(worker.draw_is_random(true));
        assert!(worker.draw_is_random(false));
    }

    #[test]
    fn random_percentage_overrides_sequential_io_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.bin");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        let mut cfg = test_cfg(path);
        cfg.random_wpercentage = Some(100);
        let cfg = Arc::new(cfg);
        let mut worker = Worker::new(
            cfg,
            Arc::new(Control::default()),
            None,
            Arc::new(Logger::stdout_only()),
            Arc::new(WorkerStats::new()),
            1,
            0,
            None,
            None,
            || Box::new(crate::io::sync::PositionalIo::new()),
        )
        .unwrap();
        assert!(worker.draw_is_random(true));
    }

    #[test]
    fn random_offset_stays_aligned_and_within_rdata_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.bin");
        std::fs::write(&path, vec![0u8; 1 << 20]).unwrap();
        let mut cfg = test_cfg(path);
        cfg.ralign = Some(4096);
        let cfg = Arc::new(cfg);
        let mut worker = Worker::new(
            cfg,
            Arc::new(Control::default()),
            None,
            Arc::new(Logger::stdout_only()),
            Arc::new(WorkerStats::new()),
            1,
            0,
            None,
            None,
            || Box::new(crate::io::sync::PositionalIo::new()),
        )
        .unwrap();
        for _ in 0..50 {
            let offset = worker.draw_random_offset(512);
            assert_eq!(offset % 4096, 0);
            assert!(offset + 512 <= 1 << 20);
        }
    }

    #[test]
    fn disk_full_without_restart_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.bin");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        let cfg = Arc::new(test_cfg(path));
        let mut worker = Worker::new(
            cfg,
            Arc::new(Control::default()),
            None,
            Arc::new(Logger::stdout_only()),
            Arc::new(WorkerStats::new()),
            1,
            0,
            None,
            None,
            || Box::new(crate::io::sync::PositionalIo::new()),
        )
        .unwrap();
        let outcome = worker.handle_disk_full().unwrap();
        assert_eq!(outcome, StepOutcome::Fatal { miscompare: false });
    }

    #[test]
    fn disk_full_with_restart_resets_walker_and_records_last_written() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            iomode: IoMode::Test,
            block: BlockSizeSpec::Fixed(512),
            read_percentage: Some(0),
            fsfull_restart: true,
            fsfree_retries: 0,
            fsfree_delay: Duration::from_millis(1),
            limits: crate::config::Limits { record_limit: Some(2), ..Default::default() },
            walker: crate::config::WalkerSpec {
                base_dir: Some(dir.path().to_path_buf()),
                dir_limit: 1,
                subdir_limit: 0,
                subdir_depth: 0,
                file_limit: 1,
                dirprefix: "dir".to_string(),
                filepostfix: String::new(),
                delete_per_pass: false,
            },
            ..Default::default()
        };
        let cfg = Arc::new(cfg);
        let fsfull = Arc::new(crate::job::FsFullState::default());
        let mut worker = Worker::new(
            cfg,
            Arc::new(Control::default()),
            None,
            Arc::new(Logger::stdout_only()),
            Arc::new(WorkerStats::new()),
            1,
            0,
            None,
            Some(Arc::clone(&fsfull)),
            || Box::new(crate::io::sync::PositionalIo::new()),
        )
        .unwrap();
        worker.start_pass().unwrap();
        worker.stats.record_write(1024);
        let outcome = worker.handle_disk_full().unwrap();
        assert_eq!(outcome, StepOutcome::Continue);
        assert!(fsfull.restarted.load(Ordering::Relaxed));
        assert_eq!(fsfull.last_dbytes_written.load(Ordering::Relaxed), 1024);
        assert_eq!(worker.offset, worker.cfg.start_offset);
    }
}
