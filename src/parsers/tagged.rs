//! Parser for the `[TAG]`-prefixed transcript dialect.
//!
//! Unlike the console dialect this one never drops a line it recognized
//! the tag of: a payload that misses its sub-pattern degrades to a generic
//! event of the tag's type with the raw payload preserved, and a tag the
//! parser has never seen becomes a GAME_EVENT carrying the tag name.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::{json, Value};

use super::{session_key, DialectParser, LineCtx, ParserState};
use crate::detection::LogFormat;
use crate::event::{kind, GameMode, ParsedBatch, RawEvent};
use crate::identity::IdentityResolver;
use crate::timestamp::{effective_base_date, parse_clock, resolve_instant};

lazy_static! {
    static ref TAGGED_LINE_RE: Regex =
        Regex::new(r"^\[(\d{2}:\d{2}:\d{2})\]\s*\[([A-Za-z0-9_]+)\]\s?(.*)$").unwrap();
}

type TagBuildFn = fn(&LineCtx, &Captures, &mut ParserState) -> Vec<RawEvent>;

/// Sub-grammar for one recognized tag. When `pattern` misses, the line
/// still yields a generic `fallback_kind` event with the raw payload.
struct TagRule {
    tag: &'static str,
    fallback_kind: &'static str,
    pattern: Regex,
    build: TagBuildFn,
}

pub struct TaggedParser {
    base_date: Option<NaiveDate>,
    offset_minutes: i32,
    default_mode: Option<GameMode>,
    rules: Vec<TagRule>,
}

// Player segments in payloads look like `Name [STEAM_0:1:2|ttt]`; the part
// after the pipe is the gamemode or role the addon logged for the player.
const PLAYER_SEG: &str = r"(.+?) \[(STEAM_\d+:\d+:\d+)\|([^\]]*)\]";

impl TaggedParser {
    pub fn new(
        base_date: Option<NaiveDate>,
        offset_minutes: i32,
        default_mode: Option<GameMode>,
    ) -> Result<Self> {
        let rules = vec![
            tag_rule(
                "CHAT",
                kind::CHAT,
                &format!(r"^{PLAYER_SEG}: (.*)$"),
                build_chat,
            )?,
            tag_rule(
                "CONNECT",
                kind::CONNECT,
                &format!(r"^{PLAYER_SEG}\s*(.*)$"),
                build_connect,
            )?,
            tag_rule(
                "SPAWN",
                kind::PROP_SPAWN,
                &format!(r"^{PLAYER_SEG} spawned (\S+) \[(\d+)\]$"),
                build_spawn,
            )?,
            tag_rule(
                "TOOLS",
                kind::TOOL_USE,
                &format!(r"^{PLAYER_SEG} used (\S+)"),
                build_tools,
            )?,
            tag_rule(
                "COMMAND",
                kind::COMMAND,
                &format!(r"^{PLAYER_SEG} (\S+)\s*(.*)$"),
                build_command,
            )?,
            tag_rule(
                "PLAYER",
                kind::GAME_EVENT,
                &format!(r"^{PLAYER_SEG} died to {PLAYER_SEG} \((.+?)\)$"),
                build_died_to,
            )?,
        ];
        Ok(Self {
            base_date,
            offset_minutes,
            default_mode,
            rules,
        })
    }
}

impl DialectParser for TaggedParser {
    fn parse_document(&self, content: &str) -> ParsedBatch {
        let resolver = IdentityResolver::from_text(content);
        let base = effective_base_date(self.base_date, None);

        let mut batch = ParsedBatch::new(LogFormat::Tagged);
        let mut state = ParserState::default();

        for line in content.lines() {
            let line = line.trim_start_matches('\u{feff}').trim_end();
            if line.is_empty() {
                continue;
            }
            batch.lines_parsed += 1;

            // Lines without the [clock] [TAG] frame are not part of this
            // dialect; skipped, same leniency as the console parser.
            let Some(outer) = TAGGED_LINE_RE.captures(line) else {
                continue;
            };
            let Some(clock) = parse_clock(&outer[1]) else {
                continue;
            };
            let tag = outer[2].to_string();
            let payload = outer.get(3).map(|m| m.as_str()).unwrap_or("");

            let ctx = LineCtx {
                timestamp: resolve_instant(clock, base, self.offset_minutes),
                raw: line,
                resolver: &resolver,
                default_mode: self.default_mode,
            };

            let events = match self.rules.iter().find(|r| r.tag == tag) {
                Some(rule) => match rule.pattern.captures(payload) {
                    Some(caps) => (rule.build)(&ctx, &caps, &mut state),
                    None => vec![generic_event(&ctx, rule.fallback_kind, &tag, payload)],
                },
                None => vec![generic_event(&ctx, kind::GAME_EVENT, &tag, payload)],
            };
            for event in events {
                batch.push_event(event);
            }
        }

        batch
    }
}

fn tag_rule(
    tag: &'static str,
    fallback_kind: &'static str,
    pattern: &str,
    build: TagBuildFn,
) -> Result<TagRule> {
    Ok(TagRule {
        tag,
        fallback_kind,
        pattern: Regex::new(pattern).with_context(|| format!("compile {tag} sub-pattern"))?,
        build,
    })
}

fn base_event(ctx: &LineCtx, kind: &str) -> RawEvent {
    let mut event = RawEvent::new(kind, ctx.timestamp, ctx.raw);
    event.game_mode = ctx.default_mode;
    event
}

/// Recognized tag, unexpected payload shape: keep everything.
fn generic_event(ctx: &LineCtx, kind: &str, tag: &str, payload: &str) -> RawEvent {
    let mut event = base_event(ctx, kind);
    event.set_meta("tag", json!(tag));
    event.set_meta("raw", json!(payload));
    event
}

/// Apply the `name [steam|mode-or-role]` captures common to every
/// sub-grammar: identifies the actor and, when the pipe segment names a
/// known gamemode, overrides the event's mode.
fn apply_player_seg(event: &mut RawEvent, caps: &Captures) {
    let name = caps[1].to_string();
    let steam_id = caps[2].to_string();
    let seg = caps[3].to_string();
    event.player_name = Some(name);
    event.steam_id = Some(steam_id);
    if let Some(mode) = GameMode::from_tag(&seg) {
        event.game_mode = Some(mode);
    } else if !seg.is_empty() {
        event.set_meta("role", Value::String(seg));
    }
}

fn set_map(event: &mut RawEvent, state: &ParserState) {
    // No map-change grammar exists in this dialect; stays absent unless a
    // future shape fills it in.
    if let Some(map) = &state.current_map {
        event.set_meta("map", Value::String(map.clone()));
    }
}

fn build_chat(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    let mut event = base_event(ctx, kind::CHAT);
    apply_player_seg(&mut event, caps);
    event.set_meta("message", json!(&caps[4]));
    event.set_meta("channel", json!("global"));
    set_map(&mut event, state);
    vec![event]
}

fn build_connect(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    let trailer = caps[4].to_lowercase();

    let mut event = if trailer.contains("disconnected") {
        base_event(ctx, kind::DISCONNECT)
    } else {
        // "initial spawn" and anything else count as a connect.
        base_event(ctx, kind::CONNECT)
    };
    apply_player_seg(&mut event, caps);

    let key = session_key(event.steam_id.as_deref(), event.player_name.as_deref().unwrap_or(""));
    if event.kind == kind::DISCONNECT {
        if let Some(session) = state.close_session(&key) {
            event.set_meta("session_id", json!(session.session_id));
            event.set_meta("session_start", json!(session.started_at.to_rfc3339()));
        }
    } else {
        let session = state.open_session(&key, ctx.timestamp);
        event.set_meta("session_id", json!(session.session_id));
        event.set_meta("session_start", json!(session.started_at.to_rfc3339()));
    }
    if !caps[4].is_empty() {
        event.set_meta("detail", json!(&caps[4]));
    }
    set_map(&mut event, state);
    vec![event]
}

fn build_spawn(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    let mut event = base_event(ctx, kind::PROP_SPAWN);
    apply_player_seg(&mut event, caps);
    event.set_meta("model", json!(&caps[4]));
    if let Ok(index) = caps[5].parse::<i64>() {
        event.set_meta("entity_index", json!(index));
    }
    set_map(&mut event, state);
    vec![event]
}

fn build_tools(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    let mut event = base_event(ctx, kind::TOOL_USE);
    apply_player_seg(&mut event, caps);
    event.set_meta("tool", json!(&caps[4]));
    set_map(&mut event, state);
    vec![event]
}

fn build_command(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    let mut event = base_event(ctx, kind::COMMAND);
    apply_player_seg(&mut event, caps);
    // The pipe segment on COMMAND lines is the runner's permission level,
    // not a gamemode.
    if let Some(role) = event.metadata.remove("role") {
        event.set_meta("permission_level", role);
    }
    event.set_meta("command", json!(&caps[4]));
    event.set_meta("raw_args", json!(&caps[5]));
    set_map(&mut event, state);
    vec![event]
}

fn build_died_to(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    // Payload reads victim-first: `<victim> died to <attacker> (<weapon>)`.
    let victim_name = caps[1].to_string();
    let victim_id = caps[2].to_string();
    let attacker_name = caps[4].to_string();
    let attacker_id = caps[5].to_string();
    let weapon_model = caps[7].to_string();

    let mut event = base_event(ctx, kind::KILL)
        .with_player(Some(attacker_name.clone()), Some(attacker_id.clone()));
    event.set_meta("attacker_name", json!(attacker_name));
    event.set_meta("attacker_steam_id", json!(attacker_id));
    if let Some(mode) = GameMode::from_tag(&caps[6]) {
        event.game_mode = Some(mode);
    } else if !caps[6].is_empty() {
        event.set_meta("attacker_role", json!(&caps[6]));
    }
    event.set_meta("victim_name", json!(victim_name));
    event.set_meta("victim_steam_id", json!(victim_id));
    if !caps[3].is_empty() && GameMode::from_tag(&caps[3]).is_none() {
        event.set_meta("victim_role", json!(&caps[3]));
    }
    event.set_meta("weapon", json!(weapon_model));
    set_map(&mut event, state);
    vec![event]
}
