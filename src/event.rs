use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detection::LogFormat;

/// Event type tags. Kept as open strings on the events themselves so
/// unrecognized tagged-dialect tags stay representable; these constants
/// cover the modeled shapes.
pub mod kind {
    pub const CONNECT: &str = "CONNECT";
    pub const DISCONNECT: &str = "DISCONNECT";
    pub const CHAT: &str = "CHAT";
    pub const COMMAND: &str = "COMMAND";
    pub const KILL: &str = "KILL";
    pub const PROP_SPAWN: &str = "PROP_SPAWN";
    pub const TOOL_USE: &str = "TOOL_USE";
    pub const GAME_EVENT: &str = "GAME_EVENT";
    pub const ROUND_START: &str = "ROUND_START";
    pub const ROUND_END: &str = "ROUND_END";
    pub const UNKNOWN: &str = "UNKNOWN";
}

/// Game modes this pipeline knows about. The first entry doubles as the
/// ultimate fallback when neither the line nor the target server carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Sandbox,
    Ttt,
    Darkrp,
    Murder,
}

pub const SUPPORTED_MODES: [GameMode; 4] = [
    GameMode::Sandbox,
    GameMode::Ttt,
    GameMode::Darkrp,
    GameMode::Murder,
];

impl GameMode {
    /// Match a free-form mode tag from a log line against the supported
    /// set; anything else (team names, permission levels) is not a mode.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.to_ascii_lowercase();
        SUPPORTED_MODES.iter().copied().find(|m| m.as_str() == tag)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Sandbox => "sandbox",
            GameMode::Ttt => "ttt",
            GameMode::Darkrp => "darkrp",
            GameMode::Murder => "murder",
        }
    }
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event recovered from a log line, before it is bound to a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub game_mode: Option<GameMode>,
    /// Verbatim source line, always retained for audit.
    pub raw_text: String,
    pub steam_id: Option<String>,
    pub player_name: Option<String>,
    /// Shape depends on `kind`: kills carry attacker/victim/weapon, chat
    /// carries message/channel, spawns carry the model path, and so on.
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl RawEvent {
    pub fn new(kind: &str, timestamp: DateTime<Utc>, raw_text: &str) -> Self {
        let kind = if kind.is_empty() { kind::UNKNOWN } else { kind };
        Self {
            kind: kind.to_string(),
            timestamp,
            game_mode: None,
            raw_text: raw_text.to_string(),
            steam_id: None,
            player_name: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_player(mut self, name: Option<String>, steam_id: Option<String>) -> Self {
        self.player_name = name;
        self.steam_id = steam_id;
        self
    }

    pub fn set_meta(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// A line that matched no known grammar. Never aborts the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseError {
    pub line: usize,
    pub text: String,
    pub reason: String,
}

/// Output of one dialect parser over a whole document. Built fresh per
/// import call; treated as immutable once returned.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedBatch {
    pub format: LogFormat,
    pub lines_parsed: usize,
    pub events: Vec<RawEvent>,
    pub by_type: IndexMap<String, usize>,
    pub errors: Vec<ParseError>,
}

impl ParsedBatch {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            lines_parsed: 0,
            events: Vec::new(),
            by_type: IndexMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn push_event(&mut self, event: RawEvent) {
        *self.by_type.entry(event.kind.clone()).or_insert(0) += 1;
        self.events.push(event);
    }

    pub fn push_error(&mut self, line: usize, text: &str, reason: &str) {
        self.errors.push(ParseError {
            line,
            text: text.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// A RawEvent bound to a destination server; consumed exactly once by the
/// writer (or discarded on dry-run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub server_id: String,
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub game_mode: GameMode,
    pub raw_text: String,
    pub steam_id: Option<String>,
    pub player_name: Option<String>,
    pub metadata: serde_json::Map<String, Value>,
}
