//! Dialect parsers for the two legacy transcript formats.
//!
//! Both parsers walk the document line-by-line and dispatch each line
//! through an ordered list of (pattern, builder) rules; the first match
//! wins. Cross-line state (open sessions, current map) lives in a
//! [`ParserState`] owned by one parse call, so concurrent imports of
//! different documents never share anything.

pub mod tagged;
pub mod ulx;

pub use tagged::TaggedParser;
pub use ulx::UlxParser;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use std::collections::HashMap;

use crate::event::{GameMode, ParsedBatch, RawEvent};
use crate::identity::IdentityResolver;

/// Parses one whole document into a batch. Implementations are constructed
/// fresh per import call.
pub trait DialectParser {
    fn parse_document(&self, content: &str) -> ParsedBatch;
}

/// An open connect→disconnect interval for one player.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

/// Mutable cross-line parse state, threaded through every rule builder.
/// Never shared between parse calls.
#[derive(Debug, Default)]
pub struct ParserState {
    pub current_map: Option<String>,
    pub sessions: HashMap<String, Session>,
}

impl ParserState {
    /// Open a session for an identity key. The id is deterministic so
    /// re-parsing the same document yields the same linkage.
    pub fn open_session(&mut self, key: &str, started_at: DateTime<Utc>) -> Session {
        let session = Session {
            session_id: format!("{}:{}", key, started_at.timestamp()),
            started_at,
        };
        self.sessions.insert(key.to_string(), session.clone());
        session
    }

    /// Close and return the open session for a key, if any.
    pub fn close_session(&mut self, key: &str) -> Option<Session> {
        self.sessions.remove(key)
    }
}

/// Sessions are keyed by SteamID when the identity resolved, by display
/// name otherwise, so CONNECT and DISCONNECT find each other either way.
pub fn session_key(steam_id: Option<&str>, name: &str) -> String {
    steam_id.unwrap_or(name).to_string()
}

/// Per-line context handed to rule builders alongside the captures.
pub struct LineCtx<'a> {
    pub timestamp: DateTime<Utc>,
    pub raw: &'a str,
    pub resolver: &'a IdentityResolver,
    pub default_mode: Option<GameMode>,
}

pub type BuildFn = fn(&LineCtx, &Captures, &mut ParserState) -> Vec<RawEvent>;

/// One (matcher, builder) pair. Rules are tried in list order per line;
/// adding a new line shape is adding a list entry.
pub struct LineRule {
    pub name: &'static str,
    pub pattern: Regex,
    pub build: BuildFn,
}

impl LineRule {
    pub fn apply(&self, ctx: &LineCtx, rest: &str, state: &mut ParserState) -> Option<Vec<RawEvent>> {
        self.pattern
            .captures(rest)
            .map(|caps| (self.build)(ctx, &caps, state))
    }
}

/// Chat text starting with `!` or `/` doubles as an addon command.
pub fn is_command_text(message: &str) -> bool {
    message.starts_with('!') || message.starts_with('/')
}

/// Split a command message into the command token and its arguments.
pub fn split_command(message: &str) -> (String, Vec<String>) {
    let mut words = message.split_whitespace();
    let command = words.next().unwrap_or(message).to_string();
    let args = words.map(str::to_string).collect();
    (command, args)
}
