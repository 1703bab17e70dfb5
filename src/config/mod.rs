//! Configuration module (C14): the typed, validated `Config` a `Worker` clones from, built
//! from the `key=value` token language (C13, `tokens.rs`).
//!
//! Grounded on `config/validator.rs`'s `validate_*`-function-per-section shape, adapted to
//! collect every problem in one pass (`validate::validate`) instead of failing on the first,
//! and on the field-grouping style of the teacher's `WorkloadConfig`/`RuntimeConfig`/
//! `OutputConfig` split.

pub mod build;
pub mod iotune;
pub mod tokens;
pub mod validate;

use crate::error::RetrySet;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level, immutable-after-parsing configuration shared by every worker in a job.
#[derive(Debug, Clone)]
pub struct Config {
    pub target: TargetSpec,
    pub iomode: IoMode,
    pub threads: u32,
    pub tag: Option<String>,

    pub block: BlockSizeSpec,
    pub io_dir: IoDir,
    pub io_type: IoType,
    pub read_percentage: Option<i32>,
    pub random_percentage: Option<i32>,
    pub random_rpercentage: Option<i32>,
    pub random_wpercentage: Option<i32>,
    pub rseed: Option<u64>,
    pub ralign: Option<u64>,
    pub step_offset: u64,
    pub start_offset: u64,

    pub pattern: PatternSpec,

    pub limits: Limits,
    pub dispose: Dispose,
    pub oncerr: OnError,

    pub iobehavior: String,

    pub bufmode: BufMode,
    pub direct: bool,

    pub iolock: bool,
    pub fsalign: bool,
    pub fsmap: bool,
    pub fsync: bool,
    pub fsync_frequency: Option<u64>,
    pub fsfull_restart: bool,
    pub fsfree_delay: Duration,
    pub fsfree_retries: u32,

    pub trigger: Option<TriggerSpec>,
    pub trigger_control: TriggerControl,

    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub retry_errors: RetrySet,
    pub retry_dc: bool,
    pub retry_dc_limit: u32,
    pub retry_dc_delay: Duration,

    pub noprogtime: Option<Duration>,
    pub noprogttime: Option<Duration>,
    pub keepalive: Option<Duration>,
    pub pkeepalive: Option<Duration>,
    pub tkeepalive: Option<Duration>,

    pub logfile: Option<PathBuf>,
    pub logprefix: Option<String>,
    pub joblog: Option<PathBuf>,
    pub errorfile: Option<PathBuf>,
    pub triage_dir: Option<PathBuf>,

    pub history_size: usize,
    pub history_data_size: usize,

    pub btag: bool,
    pub btag_verify_expr: Option<String>,
    pub xcompare: bool,
    pub dumpbtags: bool,

    pub lock_files: bool,
    pub lock_mode: LockMode,
    pub unlock_chance: u8,

    pub iops: Option<f64>,
    pub iops_type: IopsType,

    pub monitor_interval: Duration,
    pub iotune_file: Option<PathBuf>,

    pub walker: WalkerSpec,

    pub read_after_write: bool,
    pub verify: bool,
    pub prefill: bool,

    pub aios: Option<u32>,
    pub workload_preset: Option<String>,
    pub enable: std::collections::HashSet<String>,
    pub disable: std::collections::HashSet<String>,

    pub report_level: ReportLevel,
}

#[derive(Debug, Clone)]
pub struct TargetSpec {
    /// `if=`
    pub input: Option<PathBuf>,
    /// `of=`
    pub output: Option<PathBuf>,
}

impl TargetSpec {
    /// The single path workers operate on when `if=` and `of=` name the same target (the
    /// common `iomode=test` case).
    pub fn single(&self) -> Option<&PathBuf> {
        match (&self.input, &self.output) {
            (Some(i), Some(o)) if i == o => Some(i),
            (Some(i), None) => Some(i),
            (None, Some(o)) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    Test,
    Copy,
    Mirror,
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDir {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    Sequential,
    Random,
}

#[derive(Debug, Clone, Copy)]
pub enum BlockSizeSpec {
    Fixed(u64),
    Variable { min: u64, max: u64 },
    Incrementing { min: u64, max: u64, incr: u64 },
}

impl BlockSizeSpec {
    pub fn min(&self) -> u64 {
        match self {
            BlockSizeSpec::Fixed(v) => *v,
            BlockSizeSpec::Variable { min, .. } => *min,
            BlockSizeSpec::Incrementing { min, .. } => *min,
        }
    }
    pub fn max(&self) -> u64 {
        match self {
            BlockSizeSpec::Fixed(v) => *v,
            BlockSizeSpec::Variable { max, .. } => *max,
            BlockSizeSpec::Incrementing { max, .. } => *max,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatternSpec {
    pub source: PatternSourceSpec,
    pub prefix: Option<String>,
    pub iotseed: Option<u64>,
    pub lbdata: bool,
    pub timestamp: bool,
}

#[derive(Debug, Clone)]
pub enum PatternSourceSpec {
    Fixed32(u32),
    Incr,
    FromFile(PathBuf),
    Iot,
}

#[derive(Debug, Clone, Default)]
pub struct Limits {
    pub data_limit: Option<u64>,
    pub record_limit: Option<u64>,
    pub file_limit: Option<u64>,
    pub pass_limit: u32,
    pub error_limit: u32,
    pub volume_limit: Option<u64>,
    pub runtime: Option<Duration>,
    pub max_files: Option<u64>,
    pub max_data_percentage: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispose {
    Keep,
    Delete,
    KeepOnError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    Abort,
    Continue,
    Pause,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BufMode {
    pub buffered: bool,
    pub unbuffered: bool,
    pub cache_reads: bool,
    pub cache_writes: bool,
}

#[derive(Debug, Clone)]
pub enum TriggerSpec {
    BeforeRead,
    BeforeDataRead,
    Command(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerControl {
    All,
    Errors,
    Miscompare,
    Noprogs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Full,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IopsType {
    Exact,
    Iomon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLevel {
    None,
    Brief,
    Full,
}

#[derive(Debug, Clone)]
pub struct WalkerSpec {
    pub base_dir: Option<PathBuf>,
    pub dir_limit: u32,
    pub subdir_limit: u32,
    pub subdir_depth: u32,
    pub file_limit: u32,
    pub dirprefix: String,
    pub filepostfix: String,
    pub delete_per_pass: bool,
}

impl Default for WalkerSpec {
    fn default() -> Self {
        Self {
            base_dir: None,
            dir_limit: 1,
            subdir_limit: 0,
            subdir_depth: 0,
            file_limit: 1,
            dirprefix: "dir".to_string(),
            filepostfix: String::new(),
            delete_per_pass: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: TargetSpec { input: None, output: None },
            iomode: IoMode::Test,
            threads: 1,
            tag: None,
            block: BlockSizeSpec::Fixed(4096),
            io_dir: IoDir::Forward,
            io_type: IoType::Sequential,
            read_percentage: None,
            random_percentage: None,
            random_rpercentage: None,
            random_wpercentage: None,
            rseed: None,
            ralign: None,
            step_offset: 0,
            start_offset: 0,
            pattern: PatternSpec {
                source: PatternSourceSpec::Iot,
                prefix: None,
                iotseed: None,
                lbdata: false,
                timestamp: false,
            },
            limits: Limits { pass_limit: 1, error_limit: 1, ..Default::default() },
            dispose: Dispose::Keep,
            oncerr: OnError::Continue,
            iobehavior: "dt".to_string(),
            bufmode: BufMode { buffered: true, ..Default::default() },
            direct: false,
            iolock: false,
            fsalign: false,
            fsmap: false,
            fsync: false,
            fsync_frequency: None,
            fsfull_restart: false,
            fsfree_delay: Duration::from_secs(1),
            fsfree_retries: 0,
            trigger: None,
            trigger_control: TriggerControl::Errors,
            retry_limit: 0,
            retry_delay: Duration::from_secs(1),
            retry_errors: RetrySet::default(),
            retry_dc: false,
            retry_dc_limit: 2,
            retry_dc_delay: Duration::from_secs(1),
            noprogtime: None,
            noprogttime: None,
            keepalive: None,
            pkeepalive: None,
            tkeepalive: None,
            logfile: None,
            logprefix: None,
            joblog: None,
            errorfile: None,
            triage_dir: None,
            history_size: 1,
            history_data_size: 32,
            btag: false,
            btag_verify_expr: None,
            xcompare: false,
            dumpbtags: false,
            lock_files: false,
            lock_mode: LockMode::Full,
            unlock_chance: 0,
            iops: None,
            iops_type: IopsType::Exact,
            monitor_interval: Duration::from_secs(1),
            iotune_file: None,
            walker: WalkerSpec::default(),
            read_after_write: false,
            verify: false,
            prefill: false,
            aios: None,
            workload_preset: None,
            enable: Default::default(),
            disable: Default::default(),
            report_level: ReportLevel::Full,
        }
    }
}
