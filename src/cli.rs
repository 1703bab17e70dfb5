//! Outer CLI shape (C13): `clap` handles what it's good at — `--help`/`--version`, the
//! positional target, `--script` — and hands everything else off to the trailing
//! `key=value` tokens parsed by `config::tokens`.
//!
//! Grounded on `config/cli.rs`'s clap-derive outer shape, stripped of the distributed
//! coordinator/service mode flags (no counterpart in dt) and narrowed to the token-passthrough
//! surface the invocation language (spec §6) actually needs.

use clap::Parser;
use std::path::PathBuf;

/// `dt` - a multi-threaded data integrity and I/O exerciser.
#[derive(Parser, Debug)]
#[command(name = "dt")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// A startup script of newline-separated `key=value` tokens, applied before the
    /// command-line tokens (which override it). Defaults to the `DT_SCRIPT` environment
    /// variable when not given explicitly.
    #[arg(long, env = "DT_SCRIPT")]
    pub script: Option<PathBuf>,

    /// Print extra diagnostic timing to stderr.
    #[arg(long)]
    pub debug: bool,

    /// Every remaining `key=value` (or bare-flag) token, in order, consumed by the token
    /// parser (spec §6's abridged token list).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub tokens: Vec<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
