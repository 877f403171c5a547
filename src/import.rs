//! Import orchestration: detect, parse, normalize, then write or dry-run.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;

use crate::detection::{resolve_format, FormatHint, LogFormat};
use crate::event::{GameMode, ParseError, ParsedBatch};
use crate::normalize::{normalize, ServerContext};
use crate::parsers::{DialectParser, TaggedParser, UlxParser};
use crate::store::IngestStore;
use crate::writer::write_batch;

/// One import call: a whole document plus the context it targets.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub server: ServerContext,
    pub content: String,
    pub format_hint: FormatHint,
    /// Stamped onto events whose line carries no mode hint.
    pub default_mode: Option<GameMode>,
    /// Local-to-UTC offset of the log's clock, in minutes.
    pub timezone_offset_minutes: i32,
    pub base_date: Option<NaiveDate>,
    pub dry_run: bool,
}

/// What the caller gets back, whether the run persisted or not.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub format: LogFormat,
    pub lines_parsed: usize,
    pub events_generated: usize,
    pub events_inserted: usize,
    pub players_touched: usize,
    pub by_type: IndexMap<String, usize>,
    pub dry_run: bool,
    pub errors: Vec<ParseError>,
}

impl ImportSummary {
    fn from_batch(batch: &ParsedBatch, dry_run: bool) -> Self {
        Self {
            format: batch.format,
            lines_parsed: batch.lines_parsed,
            events_generated: batch.events.len(),
            events_inserted: 0,
            players_touched: 0,
            by_type: batch.by_type.clone(),
            dry_run,
            errors: batch.errors.clone(),
        }
    }
}

#[derive(Debug)]
pub enum ImportError {
    /// Structurally invalid call, rejected before any parsing.
    InvalidInput(String),
    /// Nothing survived normalization; the summary carries the full parse
    /// diagnostics so "wrong format" and "empty log" stay distinguishable.
    NoEvents(Box<ImportSummary>),
    /// Parser construction or persistence failure, propagated as-is.
    Internal(anyhow::Error),
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::InvalidInput(reason) => write!(f, "invalid import request: {reason}"),
            ImportError::NoEvents(summary) => write!(
                f,
                "no events produced (format {}, {} lines parsed, {} errors)",
                summary.format,
                summary.lines_parsed,
                summary.errors.len()
            ),
            ImportError::Internal(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<anyhow::Error> for ImportError {
    fn from(err: anyhow::Error) -> Self {
        ImportError::Internal(err)
    }
}

/// Run one import end to end. Dry runs perform the whole parse and
/// normalization but never touch `store`.
pub fn run_import<S: IngestStore>(
    store: &mut S,
    request: &ImportRequest,
) -> Result<ImportSummary, ImportError> {
    if request.content.trim().is_empty() {
        return Err(ImportError::InvalidInput("content is empty".to_string()));
    }
    if request.server.id.trim().is_empty() {
        return Err(ImportError::InvalidInput(
            "target server id is missing".to_string(),
        ));
    }

    let format = resolve_format(request.format_hint, &request.content);

    let batch = match format {
        LogFormat::Ulx => UlxParser::new(
            request.base_date,
            request.timezone_offset_minutes,
            request.default_mode,
        )?
        .parse_document(&request.content),
        LogFormat::Tagged => TaggedParser::new(
            request.base_date,
            request.timezone_offset_minutes,
            request.default_mode,
        )?
        .parse_document(&request.content),
    };

    let normalized = normalize(&batch, &request.server);
    if normalized.is_empty() {
        return Err(ImportError::NoEvents(Box::new(ImportSummary::from_batch(
            &batch,
            request.dry_run,
        ))));
    }

    let mut summary = ImportSummary::from_batch(&batch, request.dry_run);
    if request.dry_run {
        return Ok(summary);
    }

    let outcome = write_batch(store, &normalized)?;
    summary.events_inserted = outcome.ingested;
    summary.players_touched = outcome.players_touched;
    Ok(summary)
}
