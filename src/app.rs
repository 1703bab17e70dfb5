//! Process entry point's shared context (C16): wires C13→C14's validated `Config` into a
//! running job and owns the line-mode command loop that drives C9's pause/resume/cancel/
//! modify/query/wait operations.
//!
//! Grounded on the Design Notes' replacement for the original's process-wide globals (§9:
//! `master_dinfo`, `jobs`, `print_lock`, `error_logfp`, `master_logfp`, `terminating_flag`) with
//! one explicit, reference-passed `Application` value, combined with `config/cli.rs`'s function-
//! pointer command dispatch collapsed into the tagged `JobSelector`/command-word match below
//! (spec §9's "function-pointer CLI dispatch → tagged command enum").

use crate::config::Config;
use crate::io::mmap::MmapIo;
use crate::io::sync::PositionalIo;
use crate::io::IoPrimitive;
use crate::job::{JobId, JobSelector, JobTable, ModifyRequest};
use crate::logger::Logger;
use crate::Result;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One process-wide context: the job table, the shared logger, and the termination flag a
/// SIGINT handler or the command loop's EOF path can set to stop accepting new work.
pub struct Application {
    pub jobs: JobTable,
    pub logger: Arc<Logger>,
    terminating: AtomicBool,
}

impl Application {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { jobs: JobTable::new(), logger, terminating: AtomicBool::new(false) }
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    pub fn request_termination(&self) {
        self.terminating.store(true, Ordering::Release);
        self.jobs.cancel(&JobSelector::All);
    }

    /// Start a job against `cfg`, picking the mmap backend when `fsmap` is set and the
    /// positional-I/O backend otherwise (spec §4.4's primitive selection).
    pub fn submit(&self, cfg: Arc<Config>) -> Result<JobId> {
        let fsmap = cfg.fsmap;
        self.jobs.start_job(cfg, Arc::clone(&self.logger), move || -> Box<dyn IoPrimitive> {
            if fsmap {
                Box::new(MmapIo::new())
            } else {
                Box::new(PositionalIo::new())
            }
        })
    }

    /// Drive the line-mode command prompt (spec §4.16) until EOF or `quit`, dispatching each
    /// line into `dispatch_command`. Responses and errors go to the logger rather than stdout
    /// so they interleave correctly with keepalive/error output.
    pub fn run_command_prompt(&self, input: impl BufRead) {
        for line in input.lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "quit" || line == "exit" {
                break;
            }
            match self.dispatch_command(line) {
                Ok(response) => {
                    if !response.is_empty() {
                        self.logger.info(response);
                    }
                }
                Err(e) => self.logger.warning(format!("command {line:?} failed: {e}")),
            }
        }
    }

    /// Parse and run one command-prompt line: `<verb> <target> [key=value ...]` (spec §9:
    /// "a single command sum type with three selectors" — id, tag, tag-prefix).
    pub fn dispatch_command(&self, line: &str) -> Result<String> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().context_msg("empty command")?;
        let target = parts.next().context_msg("missing target (id, tag, or tag*)")?;
        let selector = parse_selector(target);
        let rest: Vec<&str> = parts.collect();

        match verb {
            "pause" => {
                self.jobs.pause(&selector);
                Ok(String::new())
            }
            "resume" => {
                self.jobs.resume(&selector);
                Ok(String::new())
            }
            "cancel" | "stop" => {
                self.jobs.cancel(&selector);
                Ok(String::new())
            }
            "wait" => {
                self.jobs.wait(&selector);
                Ok(String::new())
            }
            "modify" => {
                let req = parse_modify_request(&rest)?;
                self.jobs.modify(&selector, &req);
                Ok(String::new())
            }
            "query" | "show" => {
                let reports = self.jobs.query(&selector);
                Ok(reports
                    .iter()
                    .map(|r| {
                        format!(
                            "job {} [{}] state={:?} reads={} writes={} errors={}",
                            r.id,
                            r.tag.as_deref().unwrap_or("-"),
                            r.state,
                            r.stats.reads,
                            r.stats.writes,
                            r.error_count,
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            other => anyhow::bail!("unrecognized command {other:?}"),
        }
    }
}

/// `<n>` selects by job id, `prefix*` selects by tag prefix, `all` selects every job,
/// anything else selects by exact tag (spec §4.9).
fn parse_selector(target: &str) -> JobSelector {
    if target == "all" {
        JobSelector::All
    } else if let Some(prefix) = target.strip_suffix('*') {
        JobSelector::ByTagPrefix(prefix.to_string())
    } else if let Ok(id) = target.parse::<JobId>() {
        JobSelector::ById(id)
    } else {
        JobSelector::ByTag(target.to_string())
    }
}

fn parse_modify_request(args: &[&str]) -> Result<ModifyRequest> {
    let mut req = ModifyRequest::default();
    for arg in args {
        let (key, value) = arg.split_once('=').context_msg("modify arguments must be key=value")?;
        match key {
            "iops" => req.iops = Some(value.parse().context_msg("iops must be a number")?),
            "retry_delay" => req.retry_delay = Some(Duration::from_secs(value.parse().context_msg("retry_delay must be a number of seconds")?)),
            other => anyhow::bail!("modify: unrecognized key {other:?}"),
        }
    }
    Ok(req)
}

/// A tiny `Option`/parse-error to `anyhow::Result` helper, matching the teacher's terse
/// `.context()` idiom without pulling in a full parser combinator for three fields.
trait ContextMsg<T> {
    fn context_msg(self, msg: &str) -> Result<T>;
}

impl<T> ContextMsg<T> for Option<T> {
    fn context_msg(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| anyhow::anyhow!("{msg}"))
    }
}

impl<T, E: std::fmt::Display> ContextMsg<T> for std::result::Result<T, E> {
    fn context_msg(self, msg: &str) -> Result<T> {
        self.map_err(|e| anyhow::anyhow!("{msg}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlockSizeSpec, IoMode, Limits, TargetSpec};

    fn test_cfg(path: std::path::PathBuf) -> Arc<Config> {
        Arc::new(Config {
            target: TargetSpec { input: Some(path.clone()), output: Some(path) },
            iomode: IoMode::Test,
            block: BlockSizeSpec::Fixed(512),
            read_percentage: Some(0),
            limits: Limits { record_limit: Some(2), ..Default::default() },
            monitor_interval: Duration::ZERO,
            ..Default::default()
        })
    }

    #[test]
    fn selector_parses_id_tag_and_prefix() {
        assert!(matches!(parse_selector("42"), JobSelector::ById(42)));
        assert!(matches!(parse_selector("all"), JobSelector::All));
        match parse_selector("smoke*") {
            JobSelector::ByTagPrefix(p) => assert_eq!(p, "smoke"),
            other => panic!("unexpected selector: {other:?}"),
        }
        match parse_selector("nightly") {
            JobSelector::ByTag(t) => assert_eq!(t, "nightly"),
            other => panic!("unexpected selector: {other:?}"),
        }
    }

    #[test]
    fn submit_and_query_reports_job_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        let app = Application::new(Arc::new(Logger::stdout_only()));
        let id = app.submit(test_cfg(path)).unwrap();
        app.jobs.wait(&JobSelector::ById(id));
        let response = app.dispatch_command(&format!("query {id}")).unwrap();
        assert!(response.contains("state=Finished"));
    }

    #[test]
    fn modify_command_updates_iotune_generation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        let mut cfg = test_cfg(path);
        Arc::get_mut(&mut cfg).unwrap().iotune_file = Some(dir.path().join("iotune.toml"));
        let app = Application::new(Arc::new(Logger::stdout_only()));
        let id = app.submit(cfg).unwrap();
        app.dispatch_command(&format!("modify {id} iops=500")).unwrap();
        app.jobs.wait(&JobSelector::ById(id));
    }
}
