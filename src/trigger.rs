//! Trigger execution (§6): spawning external commands in reaction to errors, miscompares, or
//! no-progress stalls is explicitly out of scope for this engine (spec §1 lists "trigger
//! execution (spawning external commands)" among the thin external-collaborator interfaces).
//! This module is that interface: a small trait the I/O loop (C5/C6) and monitor (C10) call
//! into, plus the one real implementation (spawn a subprocess) a caller can wire up.
//!
//! Grounded on `main.rs`'s `Command::new(...).arg(...).stdout(Stdio::from(...))` subprocess
//! launch (the teacher's own external-process pattern, there used to fork a background
//! service) adapted to a fire-and-forget trigger invocation.

use crate::config::{TriggerControl, TriggerSpec};
use std::process::{Command, Stdio};

/// Why a trigger is firing, matched against the job's configured `trigger_control` (spec §6:
/// `trigger_control={all|errors|miscompare|noprogs}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCause {
    IoError,
    Miscompare,
    NoProgress,
}

impl TriggerCause {
    fn matches(self, control: TriggerControl) -> bool {
        match control {
            TriggerControl::All => true,
            TriggerControl::Errors => matches!(self, TriggerCause::IoError | TriggerCause::Miscompare),
            TriggerControl::Miscompare => matches!(self, TriggerCause::Miscompare),
            TriggerControl::Noprogs => matches!(self, TriggerCause::NoProgress),
        }
    }
}

/// Context handed to the trigger so a `cmd:` invocation can pass along the failing job/thread
/// and target path as extra arguments (spec §4.6: "named external operations invoked with
/// extra arguments").
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub job_id: u32,
    pub thread_number: u32,
    pub target: String,
    pub cause: TriggerCause,
}

/// The thin interface itself. A no-op implementation satisfies callers when no trigger is
/// configured; `CommandTrigger` is the one real collaborator.
pub trait TriggerSink: Send + Sync {
    fn fire(&self, ctx: &TriggerContext);
}

pub struct NoopTrigger;

impl TriggerSink for NoopTrigger {
    fn fire(&self, _ctx: &TriggerContext) {}
}

/// Spawns the configured external command, passing job id, thread number, target path, and
/// cause as extra arguments. `br`/`bdr` are named internal hook points rather than external
/// commands in this engine (there is no SCSI/NVMe pass-through data path to hook before a
/// read), so they log instead of spawning a process.
pub struct CommandTrigger {
    spec: TriggerSpec,
    control: TriggerControl,
}

impl CommandTrigger {
    pub fn new(spec: TriggerSpec, control: TriggerControl) -> Self {
        Self { spec, control }
    }
}

impl TriggerSink for CommandTrigger {
    fn fire(&self, ctx: &TriggerContext) {
        if !ctx.cause.matches(self.control) {
            return;
        }
        match &self.spec {
            TriggerSpec::Command(cmd) => {
                let _ = Command::new(cmd)
                    .arg(ctx.job_id.to_string())
                    .arg(ctx.thread_number.to_string())
                    .arg(&ctx.target)
                    .arg(cause_name(ctx.cause))
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn();
            }
            TriggerSpec::BeforeRead | TriggerSpec::BeforeDataRead => {
                eprintln!(
                    "trigger: {} hook at job {} thread {} target {} ({})",
                    hook_name(&self.spec),
                    ctx.job_id,
                    ctx.thread_number,
                    ctx.target,
                    cause_name(ctx.cause)
                );
            }
        }
    }
}

fn cause_name(cause: TriggerCause) -> &'static str {
    match cause {
        TriggerCause::IoError => "error",
        TriggerCause::Miscompare => "miscompare",
        TriggerCause::NoProgress => "noprog",
    }
}

fn hook_name(spec: &TriggerSpec) -> &'static str {
    match spec {
        TriggerSpec::BeforeRead => "br",
        TriggerSpec::BeforeDataRead => "bdr",
        TriggerSpec::Command(_) => "cmd",
    }
}

/// Build the sink a job should use from its resolved config: `None` trigger config yields a
/// no-op so callers never need to branch on `Option`.
pub fn build_sink(spec: Option<TriggerSpec>, control: TriggerControl) -> Box<dyn TriggerSink> {
    match spec {
        Some(spec) => Box::new(CommandTrigger::new(spec, control)),
        None => Box::new(NoopTrigger),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miscompare_only_control_filters_noprog() {
        assert!(!TriggerCause::NoProgress.matches(TriggerControl::Miscompare));
        assert!(TriggerCause::Miscompare.matches(TriggerControl::Miscompare));
    }

    #[test]
    fn errors_control_covers_io_error_and_miscompare_not_noprog() {
        assert!(TriggerCause::IoError.matches(TriggerControl::Errors));
        assert!(TriggerCause::Miscompare.matches(TriggerControl::Errors));
        assert!(!TriggerCause::NoProgress.matches(TriggerControl::Errors));
    }

    #[test]
    fn all_control_matches_every_cause() {
        for cause in [TriggerCause::IoError, TriggerCause::Miscompare, TriggerCause::NoProgress] {
            assert!(cause.matches(TriggerControl::All));
        }
    }

    #[test]
    fn noop_trigger_does_not_panic() {
        let sink = build_sink(None, TriggerControl::All);
        sink.fire(&TriggerContext {
            job_id: 1,
            thread_number: 0,
            target: "/tmp/x".to_string(),
            cause: TriggerCause::IoError,
        });
    }
}
