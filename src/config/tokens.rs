//! `key=value` token parser (C13): the invocation surface described in spec §6.
//!
//! Grounded on `config/cli.rs`'s clap-derive outer shape, combined with a dedicated
//! tokenizer for the `key=value` option language clap's derive API cannot express directly.
//! A thin `clap` wrapper (`crate::cli::Cli`) handles `--help`/`--version`/the target
//! positional/`--script`; everything else is `key=value` tokens collected here.

use std::collections::HashMap;
use std::fmt;

/// One parsed `key=value` (or bare `key`) token, in the order it appeared on the line.
#[derive(Debug, Clone)]
pub struct Token {
    pub key: String,
    pub value: Option<String>,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.key, v),
            None => write!(f, "{}", self.key),
        }
    }
}

/// The full set of tokens from one invocation (command line plus any `DT_SCRIPT`/script
/// file lines, concatenated in order — later tokens override earlier ones with the same key,
/// matching shell-style last-wins semantics for repeated flags).
#[derive(Debug, Clone, Default)]
pub struct TokenSet {
    ordered: Vec<Token>,
    by_key: HashMap<String, String>,
    bare: std::collections::HashSet<String>,
}

impl TokenSet {
    /// Parse a sequence of raw argv-style strings, each either `key=value` or a bare flag
    /// word (e.g. `verify`, `help`).
    pub fn parse<'a>(args: impl IntoIterator<Item = &'a str>) -> Self {
        let mut set = Self::default();
        for raw in args {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            match raw.split_once('=') {
                Some((k, v)) => {
                    set.by_key.insert(k.to_string(), v.to_string());
                    set.ordered.push(Token { key: k.to_string(), value: Some(v.to_string()) });
                }
                None => {
                    set.bare.insert(raw.to_string());
                    set.ordered.push(Token { key: raw.to_string(), value: None });
                }
            }
        }
        set
    }

    /// Merge a script file's tokens (one token per line, `#` comments, blank lines skipped)
    /// in underneath the command line: script tokens are applied first, command-line tokens
    /// override them.
    pub fn merge_script(mut self, script_body: &str) -> Self {
        let script_lines: Vec<&str> = script_body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        let script_set = Self::parse(script_lines);
        let mut merged = script_set;
        for tok in self.ordered.drain(..) {
            match &tok.value {
                Some(v) => merged.by_key.insert(tok.key.clone(), v.clone()),
                None => {
                    merged.bare.insert(tok.key.clone());
                    None
                }
            };
            merged.ordered.push(tok);
        }
        merged
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.by_key.get(key).map(String::as_str)
    }

    pub fn has_flag(&self, key: &str) -> bool {
        self.bare.contains(key) || matches!(self.by_key.get(key).map(String::as_str), Some("true") | Some("1"))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.ordered.iter()
    }

    /// Every key seen, for "unknown token" validation against a recognized-names list.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(|t| t.key.as_str())
    }
}

/// Parse a human-friendly size suffix (`4k`, `1M`, `2G`, `512`) into a byte count. `k`/`K` is
/// 1024, `m`/`M` is 1024^2, `g`/`G` is 1024^3 — binary multiples, matching the teacher's and
/// the broader example pack's `parse_size` convention (not decimal SI).
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size".to_string());
    }
    let (digits, mult): (&str, u64) = match s.chars().last().unwrap() {
        'k' | 'K' => (&s[..s.len() - 1], 1024),
        'm' | 'M' => (&s[..s.len() - 1], 1024 * 1024),
        'g' | 'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        't' | 'T' => (&s[..s.len() - 1], 1024u64.pow(4)),
        _ => (s, 1),
    };
    let base: u64 = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| e.to_string())?
    } else {
        digits.parse().map_err(|e: std::num::ParseIntError| e.to_string())?
    };
    Ok(base * mult)
}

/// Parse a possibly-hex 32-bit value (`0xdeadbeef` or `3735928559`).
pub fn parse_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

/// Parse a possibly-hex 64-bit value, used for seeds and offsets.
pub fn parse_u64(s: &str) -> Result<u64, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

/// Parse the `btag_verify=<mask-expr>` comma-separated expression: `all,~record_index` means
/// start from all fields, then clear `record_index`. Returns the ordered list of (name,
/// clear?) pairs for the caller to fold into a `VerifyMask`.
pub fn parse_mask_expr(expr: &str) -> Vec<(String, bool)> {
    expr.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|tok| {
            if let Some(name) = tok.strip_prefix('~') {
                (name.to_string(), true)
            } else {
                (tok.to_string(), false)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_and_bare_tokens() {
        let set = TokenSet::parse(["bs=4k", "verify", "pattern=iot"]);
        assert_eq!(set.get("bs"), Some("4k"));
        assert!(set.has_flag("verify"));
        assert_eq!(set.get("pattern"), Some("iot"));
    }

    #[test]
    fn command_line_overrides_script() {
        let set = TokenSet::parse(["bs=8k"]).merge_script("bs=4k\ncount=10\n");
        assert_eq!(set.get("bs"), Some("8k"));
        assert_eq!(set.get("count"), Some("10"));
    }

    #[test]
    fn size_suffixes_are_binary_multiples() {
        assert_eq!(parse_size("4k").unwrap(), 4096);
        assert_eq!(parse_size("1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("512").unwrap(), 512);
    }

    #[test]
    fn mask_expr_tracks_clears() {
        let parsed = parse_mask_expr("all,~record_index,~record_size");
        assert_eq!(parsed[0], ("all".to_string(), false));
        assert_eq!(parsed[1], ("record_index".to_string(), true));
    }
}
