use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use srcds_ingest::{
    run_import, timestamp, FormatHint, GameMode, ImportError, ImportRequest, ImportSummary,
    MemoryStore, ServerContext, SqliteStore,
};

#[derive(Parser)]
#[command(name = "srcds-ingest")]
#[command(about = "Import legacy Garry's Mod server logs into the event store")]
#[command(version)]
struct Cli {
    /// Log file to import
    logfile: PathBuf,

    #[arg(long = "server-id", help_heading = "Target Server")]
    server_id: String,
    #[arg(long = "server-name", default_value = "", help_heading = "Target Server")]
    server_name: String,
    #[arg(long = "mode", value_enum, help_heading = "Target Server")]
    mode: Option<GameMode>,

    #[arg(
        short = 'f',
        long = "format",
        value_enum,
        default_value = "auto",
        help_heading = "Input Options"
    )]
    format: FormatHint,
    /// Default gamemode for lines that carry no mode hint
    #[arg(long = "default-mode", value_enum, help_heading = "Input Options")]
    default_mode: Option<GameMode>,
    /// Base date (YYYY-MM-DD) for the log's time-of-day stamps
    #[arg(long = "base-date", help_heading = "Input Options")]
    base_date: Option<String>,
    /// Local-to-UTC offset of the log's clock, in minutes (e.g. -180)
    #[arg(long = "tz-offset", default_value_t = 0, help_heading = "Input Options")]
    tz_offset: i32,

    #[arg(long = "db", default_value = "srcds-ingest.db", help_heading = "Output Options")]
    db: PathBuf,
    /// Parse and normalize without writing anything
    #[arg(short = 'n', long = "dry-run", help_heading = "Output Options")]
    dry_run: bool,
    /// Print the summary as JSON instead of text
    #[arg(long = "summary-json", help_heading = "Output Options")]
    summary_json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(summary) => {
            print_summary(&summary, cli.summary_json);
            ExitCode::SUCCESS
        }
        Err(RunError::Rejected(summary, reason)) => {
            eprintln!("Error: {reason}");
            print_summary(&summary, cli.summary_json);
            ExitCode::FAILURE
        }
        Err(RunError::Other(err)) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

enum RunError {
    /// Rejected with diagnostics worth showing.
    Rejected(Box<ImportSummary>, String),
    Other(anyhow::Error),
}

impl From<anyhow::Error> for RunError {
    fn from(err: anyhow::Error) -> Self {
        RunError::Other(err)
    }
}

fn run(cli: &Cli) -> Result<ImportSummary, RunError> {
    let content = std::fs::read_to_string(&cli.logfile)
        .with_context(|| format!("read log file {}", cli.logfile.display()))?;

    let base_date = match &cli.base_date {
        Some(raw) => Some(
            timestamp::parse_base_date(raw)
                .with_context(|| format!("invalid --base-date '{raw}', expected YYYY-MM-DD"))
                .map_err(RunError::Other)?,
        ),
        None => None,
    };

    let request = ImportRequest {
        server: ServerContext {
            id: cli.server_id.clone(),
            mode: cli.mode,
            name: cli.server_name.clone(),
        },
        content,
        format_hint: cli.format,
        default_mode: cli.default_mode,
        timezone_offset_minutes: cli.tz_offset,
        base_date,
        dry_run: cli.dry_run,
    };

    // Dry runs never even open the database file.
    let result = if cli.dry_run {
        run_import(&mut MemoryStore::new(), &request)
    } else {
        let mut store = SqliteStore::open(&cli.db)?;
        run_import(&mut store, &request)
    };

    result.map_err(|err| match err {
        ImportError::NoEvents(summary) => {
            let reason = format!("{}", ImportError::NoEvents(summary.clone()));
            RunError::Rejected(summary, reason)
        }
        other => RunError::Other(anyhow::anyhow!(other)),
    })
}

fn print_summary(summary: &ImportSummary, as_json: bool) {
    if as_json {
        match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("Error: serialize summary: {err}"),
        }
        return;
    }

    println!("Format:          {}", summary.format);
    println!("Lines parsed:    {}", summary.lines_parsed);
    println!("Events generated:{:>6}", summary.events_generated);
    println!("Events inserted: {:>6}", summary.events_inserted);
    println!("Players touched: {:>6}", summary.players_touched);
    if summary.dry_run {
        println!("(dry run, nothing written)");
    }
    if !summary.by_type.is_empty() {
        println!("By type:");
        for (kind, count) in &summary.by_type {
            println!("  {kind:<12} {count}");
        }
    }
    if !summary.errors.is_empty() {
        println!("Parse errors:    {}", summary.errors.len());
        for error in &summary.errors {
            println!("  line {}: {} ({})", error.line, error.reason, error.text);
        }
    }
}
