//! Log dialect detection.
//!
//! Two legacy dialects exist: the ULX console transcript and the
//! `[TAG]`-prefixed transcript. Detection looks at the first classifiable
//! line only; an explicit caller hint always takes precedence.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// The two supported legacy transcript dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogFormat {
    #[serde(rename = "ULX")]
    Ulx,
    #[serde(rename = "TAGGED")]
    Tagged,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Ulx => "ULX",
            LogFormat::Tagged => "TAGGED",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-side format selection; `Auto` defers to [`detect_format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FormatHint {
    #[default]
    Auto,
    Ulx,
    Tagged,
}

lazy_static! {
    static ref ULX_HEADER_RE: Regex =
        Regex::new(r#"^<Logging continued from "#).unwrap();
    static ref TAGGED_LINE_RE: Regex =
        Regex::new(r"^\[\d{2}:\d{2}:\d{2}\]\s*\[[A-Z][A-Z0-9_]*\]").unwrap();
    static ref TIMESTAMPED_LINE_RE: Regex = Regex::new(r"^\[\d{2}:\d{2}:\d{2}\]").unwrap();
}

/// Classify a whole document by its first recognizable line. Absence of
/// evidence is not an error: an unclassifiable document falls back to the
/// more permissive console dialect.
pub fn detect_format(content: &str) -> LogFormat {
    for line in content.lines() {
        let line = line.trim_start_matches('\u{feff}');
        if line.trim().is_empty() {
            continue;
        }
        if ULX_HEADER_RE.is_match(line) {
            return LogFormat::Ulx;
        }
        if TAGGED_LINE_RE.is_match(line) {
            return LogFormat::Tagged;
        }
        if TIMESTAMPED_LINE_RE.is_match(line) {
            return LogFormat::Ulx;
        }
        // First non-blank line had no known shape; keep scanning, later
        // lines may still carry one.
    }
    LogFormat::Ulx
}

/// Resolve the effective format: explicit hint wins over detection.
pub fn resolve_format(hint: FormatHint, content: &str) -> LogFormat {
    match hint {
        FormatHint::Ulx => LogFormat::Ulx,
        FormatHint::Tagged => LogFormat::Tagged,
        FormatHint::Auto => detect_format(content),
    }
}
