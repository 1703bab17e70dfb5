//! Builds a `Config` from a parsed `TokenSet` (spec §6's abridged token list).
//!
//! Grounded on `config/cli_convert.rs`'s CLI-struct-to-`Config` conversion shape, retargeted
//! onto the `key=value` token language instead of clap's derived struct.

use super::tokens::{parse_size, parse_u32, parse_u64, TokenSet};
use super::*;
use crate::error::{ConfigError, RetrySet};
use std::time::Duration;

/// Every token name this parser recognizes, used to flag unknown tokens as a validation
/// error rather than silently ignoring typos.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "if", "of", "bs", "ibs", "obs", "min", "max", "incr", "count", "limit", "records", "files",
    "passes", "runtime", "pattern", "prefix", "iotseed", "rseed", "offset", "ralign", "step",
    "dir", "sdirs", "depth", "dirp", "filepostfix", "dispose", "oncerr", "iotype", "iodir",
    "iomode", "iobehavior", "aios", "flags", "bufmodes", "read_percentage", "random_percentage",
    "random_rpercentage", "random_wpercentage", "iolock", "fsalign", "fsfile_flag", "fsmap",
    "fsync", "fsync_frequency", "fsfull_restart", "fsfree_delay", "fsfree_retries", "trigger",
    "trigger_action", "trigger_control", "retry_limit", "retry_delay", "retry_errors", "retryDC",
    "retryDC_limit", "retryDC_delay", "noprogtime", "noprogttime", "keepalive", "pkeepalive",
    "tkeepalive", "logfile", "logprefix", "joblog", "errorfile", "history", "hdsize", "btag",
    "btag_verify", "xcompare", "dumpbtags", "lock_files", "lock_mode", "unlock_chance", "iops",
    "iops_type", "workload", "enable", "disable", "help", "version", "threads", "tag", "verify",
    "raw", "monitor_interval", "iotune", "max_data_percentage",
];

pub fn build_config(tokens: &TokenSet) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(v) = tokens.get("if") {
        cfg.target.input = Some(PathBuf::from(v));
    }
    if let Some(v) = tokens.get("of") {
        cfg.target.output = Some(PathBuf::from(v));
    }
    if cfg.target.input.is_none() && cfg.target.output.is_none() {
        return Err(ConfigError::MissingRequired {
            field: "if/of".to_string(),
            because: "at least one target must be given".to_string(),
        });
    }

    if let Some(v) = tokens.get("iomode") {
        cfg.iomode = match v {
            "test" => IoMode::Test,
            "copy" => IoMode::Copy,
            "mirror" => IoMode::Mirror,
            "verify" => IoMode::Verify,
            other => return Err(invalid("iomode", other)),
        };
    }

    if let Some(v) = tokens.get("threads") {
        cfg.threads = v.parse().map_err(|_| invalid("threads", v))?;
    }
    if let Some(v) = tokens.get("tag") {
        cfg.tag = Some(v.to_string());
    }

    build_block_size(tokens, &mut cfg)?;

    if let Some(v) = tokens.get("iodir") {
        cfg.io_dir = match v {
            "forward" => IoDir::Forward,
            "reverse" => IoDir::Reverse,
            other => return Err(invalid("iodir", other)),
        };
    }
    if let Some(v) = tokens.get("iotype") {
        cfg.io_type = match v {
            "sequential" => IoType::Sequential,
            "random" => IoType::Random,
            other => return Err(invalid("iotype", other)),
        };
    }

    if let Some(v) = tokens.get("read_percentage") {
        cfg.read_percentage = Some(v.parse().map_err(|_| invalid("read_percentage", v))?);
    }
    if let Some(v) = tokens.get("random_percentage") {
        cfg.random_percentage = Some(v.parse().map_err(|_| invalid("random_percentage", v))?);
    }
    if let Some(v) = tokens.get("random_rpercentage") {
        cfg.random_rpercentage = Some(v.parse().map_err(|_| invalid("random_rpercentage", v))?);
    }
    if let Some(v) = tokens.get("random_wpercentage") {
        cfg.random_wpercentage = Some(v.parse().map_err(|_| invalid("random_wpercentage", v))?);
    }
    if let Some(v) = tokens.get("rseed") {
        cfg.rseed = Some(parse_u64(v).map_err(|_| invalid("rseed", v))?);
    }
    if let Some(v) = tokens.get("ralign") {
        cfg.ralign = Some(parse_size(v).map_err(|_| invalid("ralign", v))?);
    }
    if let Some(v) = tokens.get("step") {
        cfg.step_offset = parse_size(v).map_err(|_| invalid("step", v))?;
    }
    if let Some(v) = tokens.get("offset") {
        cfg.start_offset = parse_size(v).map_err(|_| invalid("offset", v))?;
    }

    build_pattern(tokens, &mut cfg)?;
    build_limits(tokens, &mut cfg)?;

    if let Some(v) = tokens.get("dispose") {
        cfg.dispose = match v {
            "keep" => Dispose::Keep,
            "delete" => Dispose::Delete,
            "keeponerror" => Dispose::KeepOnError,
            other => return Err(invalid("dispose", other)),
        };
    }
    if let Some(v) = tokens.get("oncerr") {
        cfg.oncerr = match v {
            "abort" => OnError::Abort,
            "continue" => OnError::Continue,
            "pause" => OnError::Pause,
            other => return Err(invalid("oncerr", other)),
        };
    }
    if let Some(v) = tokens.get("iobehavior") {
        cfg.iobehavior = v.to_string();
    }
    if let Some(v) = tokens.get("aios") {
        cfg.aios = Some(v.parse().map_err(|_| invalid("aios", v))?);
    }

    build_bufmode(tokens, &mut cfg)?;

    cfg.iolock = tokens.has_flag("iolock");
    cfg.fsalign = tokens.has_flag("fsalign");
    cfg.fsmap = tokens.has_flag("fsmap");
    cfg.fsync = tokens.has_flag("fsync");
    if let Some(v) = tokens.get("fsync_frequency") {
        cfg.fsync_frequency = Some(v.parse().map_err(|_| invalid("fsync_frequency", v))?);
    }
    cfg.fsfull_restart = tokens.has_flag("fsfull_restart");
    if let Some(v) = tokens.get("fsfree_delay") {
        cfg.fsfree_delay = Duration::from_secs(v.parse().map_err(|_| invalid("fsfree_delay", v))?);
    }
    if let Some(v) = tokens.get("fsfree_retries") {
        cfg.fsfree_retries = v.parse().map_err(|_| invalid("fsfree_retries", v))?;
    }

    build_trigger(tokens, &mut cfg)?;
    build_retry(tokens, &mut cfg)?;

    if let Some(v) = tokens.get("noprogtime") {
        cfg.noprogtime = Some(Duration::from_secs(v.parse().map_err(|_| invalid("noprogtime", v))?));
    }
    if let Some(v) = tokens.get("noprogttime") {
        cfg.noprogttime = Some(Duration::from_secs(v.parse().map_err(|_| invalid("noprogttime", v))?));
    }
    if let Some(v) = tokens.get("keepalive") {
        cfg.keepalive = Some(Duration::from_secs(v.parse().map_err(|_| invalid("keepalive", v))?));
    }
    if let Some(v) = tokens.get("pkeepalive") {
        cfg.pkeepalive = Some(Duration::from_secs(v.parse().map_err(|_| invalid("pkeepalive", v))?));
    }
    if let Some(v) = tokens.get("tkeepalive") {
        cfg.tkeepalive = Some(Duration::from_secs(v.parse().map_err(|_| invalid("tkeepalive", v))?));
    }

    cfg.logfile = tokens.get("logfile").map(PathBuf::from);
    cfg.logprefix = tokens.get("logprefix").map(str::to_string);
    cfg.joblog = tokens.get("joblog").map(PathBuf::from);
    cfg.errorfile = tokens.get("errorfile").map(PathBuf::from);

    if let Some(v) = tokens.get("history") {
        cfg.history_size = v.parse().map_err(|_| invalid("history", v))?;
    }
    if let Some(v) = tokens.get("hdsize") {
        cfg.history_data_size = v.parse().map_err(|_| invalid("hdsize", v))?;
    }

    cfg.btag = tokens.has_flag("btag");
    cfg.btag_verify_expr = tokens.get("btag_verify").map(str::to_string);
    cfg.xcompare = tokens.has_flag("xcompare");
    cfg.dumpbtags = tokens.has_flag("dumpbtags");

    cfg.lock_files = tokens.has_flag("lock_files");
    if let Some(v) = tokens.get("lock_mode") {
        cfg.lock_mode = match v {
            "full" => LockMode::Full,
            "partial" => LockMode::Partial,
            other => return Err(invalid("lock_mode", other)),
        };
    }
    if let Some(v) = tokens.get("unlock_chance") {
        cfg.unlock_chance = v.parse().map_err(|_| invalid("unlock_chance", v))?;
    }

    if let Some(v) = tokens.get("iops") {
        cfg.iops = Some(v.parse().map_err(|_| invalid("iops", v))?);
    }
    if let Some(v) = tokens.get("iops_type") {
        cfg.iops_type = match v {
            "exact" => IopsType::Exact,
            "iomon" => IopsType::Iomon,
            other => return Err(invalid("iops_type", other)),
        };
    }
    if let Some(v) = tokens.get("iotune") {
        cfg.iotune_file = Some(PathBuf::from(v));
    }

    build_walker(tokens, &mut cfg)?;

    cfg.read_after_write = tokens.has_flag("raw");
    cfg.verify = tokens.has_flag("verify") || cfg.iomode == IoMode::Verify;
    cfg.prefill = tokens.has_flag("prefill");

    cfg.workload_preset = tokens.get("workload").map(str::to_string);
    if let Some(v) = tokens.get("enable") {
        cfg.enable = v.split(',').map(str::to_string).collect();
    }
    if let Some(v) = tokens.get("disable") {
        cfg.disable = v.split(',').map(str::to_string).collect();
    }

    Ok(cfg)
}

fn build_block_size(tokens: &TokenSet, cfg: &mut Config) -> Result<(), ConfigError> {
    if let Some(v) = tokens.get("bs") {
        cfg.block = BlockSizeSpec::Fixed(parse_size(v).map_err(|_| invalid("bs", v))?);
        return Ok(());
    }
    let min = tokens.get("min").map(parse_size).transpose().map_err(|_| invalid("min", tokens.get("min").unwrap()))?;
    let max = tokens.get("max").map(parse_size).transpose().map_err(|_| invalid("max", tokens.get("max").unwrap()))?;
    if let (Some(min), Some(max)) = (min, max) {
        cfg.block = match tokens.get("incr") {
            Some("vary") | None => BlockSizeSpec::Variable { min, max },
            Some(incr) => BlockSizeSpec::Incrementing {
                min,
                max,
                incr: parse_size(incr).map_err(|_| invalid("incr", incr))?,
            },
        };
    }
    Ok(())
}

fn build_pattern(tokens: &TokenSet, cfg: &mut Config) -> Result<(), ConfigError> {
    if let Some(v) = tokens.get("pattern") {
        cfg.pattern.source = match v {
            "iot" => PatternSourceSpec::Iot,
            "incr" => PatternSourceSpec::Incr,
            hex if hex.starts_with("0x") || hex.chars().all(|c| c.is_ascii_hexdigit()) => {
                PatternSourceSpec::Fixed32(parse_u32(hex).map_err(|_| invalid("pattern", hex))?)
            }
            path => PatternSourceSpec::FromFile(PathBuf::from(path)),
        };
    }
    if let Some(v) = tokens.get("prefix") {
        cfg.pattern.prefix = Some(v.to_string());
    }
    if let Some(v) = tokens.get("iotseed") {
        cfg.pattern.iotseed = Some(parse_u64(v).map_err(|_| invalid("iotseed", v))?);
    }
    cfg.pattern.lbdata = tokens.has_flag("lbdata");
    cfg.pattern.timestamp = tokens.has_flag("timestamp");
    Ok(())
}

fn build_limits(tokens: &TokenSet, cfg: &mut Config) -> Result<(), ConfigError> {
    if let Some(v) = tokens.get("limit").or_else(|| tokens.get("count")) {
        cfg.limits.data_limit = Some(parse_size(v).map_err(|_| invalid("limit", v))?);
    }
    if let Some(v) = tokens.get("records") {
        cfg.limits.record_limit = Some(v.parse().map_err(|_| invalid("records", v))?);
    }
    if let Some(v) = tokens.get("files") {
        cfg.limits.file_limit = Some(v.parse().map_err(|_| invalid("files", v))?);
    }
    if let Some(v) = tokens.get("passes") {
        cfg.limits.pass_limit = v.parse().map_err(|_| invalid("passes", v))?;
    }
    if let Some(v) = tokens.get("runtime") {
        cfg.limits.runtime = Some(Duration::from_secs(v.parse().map_err(|_| invalid("runtime", v))?));
    }
    if let Some(v) = tokens.get("max_data_percentage") {
        cfg.limits.max_data_percentage = Some(v.parse().map_err(|_| invalid("max_data_percentage", v))?);
    }
    Ok(())
}

fn build_bufmode(tokens: &TokenSet, cfg: &mut Config) -> Result<(), ConfigError> {
    if let Some(v) = tokens.get("flags") {
        for flag in v.split(',') {
            if flag == "direct" {
                cfg.direct = true;
            }
        }
    }
    if let Some(v) = tokens.get("bufmodes") {
        for mode in v.split(',') {
            match mode {
                "buffered" => cfg.bufmode.buffered = true,
                "unbuffered" => cfg.bufmode.unbuffered = true,
                "cachereads" => cfg.bufmode.cache_reads = true,
                "cachewrites" => cfg.bufmode.cache_writes = true,
                other => return Err(invalid("bufmodes", other)),
            }
        }
    }
    Ok(())
}

fn build_trigger(tokens: &TokenSet, cfg: &mut Config) -> Result<(), ConfigError> {
    if let Some(v) = tokens.get("trigger") {
        cfg.trigger = Some(match v {
            "br" => TriggerSpec::BeforeRead,
            "bdr" => TriggerSpec::BeforeDataRead,
            other => match other.strip_prefix("cmd:") {
                Some(cmd) => TriggerSpec::Command(cmd.to_string()),
                None => return Err(invalid("trigger", other)),
            },
        });
    }
    if let Some(v) = tokens.get("trigger_control") {
        cfg.trigger_control = match v {
            "all" => TriggerControl::All,
            "errors" => TriggerControl::Errors,
            "miscompare" => TriggerControl::Miscompare,
            "noprogs" => TriggerControl::Noprogs,
            other => return Err(invalid("trigger_control", other)),
        };
    }
    Ok(())
}

fn build_retry(tokens: &TokenSet, cfg: &mut Config) -> Result<(), ConfigError> {
    if let Some(v) = tokens.get("retry_limit") {
        cfg.retry_limit = v.parse().map_err(|_| invalid("retry_limit", v))?;
    }
    if let Some(v) = tokens.get("retry_delay") {
        cfg.retry_delay = Duration::from_secs(v.parse().map_err(|_| invalid("retry_delay", v))?);
    }
    if let Some(v) = tokens.get("retry_errors") {
        cfg.retry_errors = if v == "all" {
            RetrySet::any()
        } else {
            let codes: Result<Vec<i32>, _> = v.split(',').map(str::parse).collect();
            RetrySet::from_codes(codes.map_err(|_| invalid("retry_errors", v))?)
        };
    }
    cfg.retry_dc = tokens.has_flag("retryDC");
    if let Some(v) = tokens.get("retryDC_limit") {
        cfg.retry_dc_limit = v.parse().map_err(|_| invalid("retryDC_limit", v))?;
    }
    if let Some(v) = tokens.get("retryDC_delay") {
        cfg.retry_dc_delay = Duration::from_secs(v.parse().map_err(|_| invalid("retryDC_delay", v))?);
    }
    Ok(())
}

fn build_walker(tokens: &TokenSet, cfg: &mut Config) -> Result<(), ConfigError> {
    if let Some(v) = tokens.get("dir") {
        cfg.walker.base_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = tokens.get("sdirs") {
        cfg.walker.subdir_limit = v.parse().map_err(|_| invalid("sdirs", v))?;
    }
    if let Some(v) = tokens.get("depth") {
        cfg.walker.subdir_depth = v.parse().map_err(|_| invalid("depth", v))?;
    }
    if let Some(v) = tokens.get("dirp") {
        cfg.walker.dirprefix = v.to_string();
    }
    if let Some(v) = tokens.get("filepostfix") {
        cfg.walker.filepostfix = v.to_string();
    }
    if let Some(v) = tokens.get("files") {
        cfg.walker.file_limit = v.parse().map_err(|_| invalid("files", v))?;
    }
    cfg.walker.delete_per_pass = tokens.has_flag("dispose") && cfg.dispose == Dispose::Delete;
    Ok(())
}

fn invalid(field: &str, got: &str) -> ConfigError {
    ConfigError::Invalid { field: field.to_string(), message: format!("unrecognized value {got:?}") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_tokens_build_a_config() {
        let tokens = TokenSet::parse(["if=/tmp/x", "bs=4k", "pattern=iot"]);
        let cfg = build_config(&tokens).unwrap();
        assert_eq!(cfg.block.min(), 4096);
        assert!(matches!(cfg.pattern.source, PatternSourceSpec::Iot));
    }

    #[test]
    fn missing_target_is_rejected() {
        let tokens = TokenSet::parse(["bs=4k"]);
        assert!(build_config(&tokens).is_err());
    }

    #[test]
    fn hex_pattern_parses_as_fixed32() {
        let tokens = TokenSet::parse(["if=/tmp/x", "pattern=deadbeef"]);
        let cfg = build_config(&tokens).unwrap();
        assert!(matches!(cfg.pattern.source, PatternSourceSpec::Fixed32(0xdead_beef)));
    }

    #[test]
    fn retry_errors_all_sets_wildcard() {
        let tokens = TokenSet::parse(["if=/tmp/x", "retry_errors=all"]);
        let cfg = build_config(&tokens).unwrap();
        assert!(cfg.retry_errors.matches(5));
    }
}
