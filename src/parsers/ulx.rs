//! Parser for the ULX-style console transcript dialect.
//!
//! This dialect is lossy by design: the console interleaves many
//! admin/engine lines the pipeline does not model, so a timestamped line
//! matching no rule is dropped silently rather than recorded as an error.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::{json, Value};

use super::{
    is_command_text, session_key, split_command, DialectParser, LineCtx, LineRule, ParserState,
};
use crate::detection::LogFormat;
use crate::event::{kind, GameMode, ParsedBatch, RawEvent};
use crate::identity::IdentityResolver;
use crate::timestamp::{effective_base_date, parse_clock, parse_header_date, resolve_instant};

lazy_static! {
    static ref PREFIX_RE: Regex = Regex::new(r"^\[(\d{2}:\d{2}:\d{2})\]\s?(.*)$").unwrap();
    static ref HEADER_RE: Regex =
        Regex::new(r#"^<Logging continued from "data/ulx_logs/(\d{2}-\d{2}-\d{2})\.txt">"#)
            .unwrap();
}

pub struct UlxParser {
    base_date: Option<NaiveDate>,
    offset_minutes: i32,
    default_mode: Option<GameMode>,
    rules: Vec<LineRule>,
}

impl UlxParser {
    pub fn new(
        base_date: Option<NaiveDate>,
        offset_minutes: i32,
        default_mode: Option<GameMode>,
    ) -> Result<Self> {
        // Priority order matters: the global-chat shape is greedy enough to
        // swallow team/admin chat and identity-bind lines, so it comes after
        // all of them.
        let rules = vec![
            rule(r"^New map: (.+)$", "map_change", build_map_change)?,
            rule(
                r"^Server is shutting down/changing levels\.$",
                "shutdown",
                build_shutdown,
            )?,
            rule(r#"^Client "(.+)" connected\.$"#, "connect", build_connect)?,
            rule(
                r#"^Dropped "(.+)" from server\s*<(STEAM_\d+:\d+:\d+)>"#,
                "dropped",
                build_dropped,
            )?,
            rule(
                r#"^Client "(.+)" spawned in server\s*<STEAM_\d+:\d+:\d+>"#,
                "spawned",
                build_spawned,
            )?,
            rule(r"^\(TEAM\) (.+?): (.*)$", "team_chat", build_team_chat)?,
            rule(r"^(.+?) to admins: (.*)$", "admin_chat", build_admin_chat)?,
            rule(r"^\(tsay from (.+?)\) (.*)$", "tsay_chat", build_tsay_chat)?,
            rule(r"^([^:]+): (.*)$", "global_chat", build_global_chat)?,
            rule(r"^(.+?) killed (.+?) using (.+)$", "kill", build_kill)?,
            rule(r"^(.+?) suicided!$", "suicide", build_suicide)?,
        ];
        Ok(Self {
            base_date,
            offset_minutes,
            default_mode,
            rules,
        })
    }

    /// Date the log's own continuation header claims, when present.
    fn header_date(content: &str) -> Option<NaiveDate> {
        content.lines().find_map(|line| {
            HEADER_RE
                .captures(line.trim_start_matches('\u{feff}'))
                .and_then(|caps| parse_header_date(&caps[1]))
        })
    }
}

impl DialectParser for UlxParser {
    fn parse_document(&self, content: &str) -> ParsedBatch {
        let resolver = IdentityResolver::from_text(content);
        let base = effective_base_date(self.base_date, Self::header_date(content));

        let mut batch = ParsedBatch::new(LogFormat::Ulx);
        let mut state = ParserState::default();

        for line in content.lines() {
            let line = line.trim_start_matches('\u{feff}').trim_end();
            if line.is_empty() {
                continue;
            }
            batch.lines_parsed += 1;

            if HEADER_RE.is_match(line) {
                continue;
            }

            // Lines without the bracketed clock are engine noise or
            // continuations, not errors.
            let Some(prefix) = PREFIX_RE.captures(line) else {
                continue;
            };
            let Some(clock) = parse_clock(&prefix[1]) else {
                continue;
            };
            let rest = prefix.get(2).map(|m| m.as_str()).unwrap_or("");

            let ctx = LineCtx {
                timestamp: resolve_instant(clock, base, self.offset_minutes),
                raw: line,
                resolver: &resolver,
                default_mode: self.default_mode,
            };

            for rule in &self.rules {
                if let Some(events) = rule.apply(&ctx, rest, &mut state) {
                    for event in events {
                        batch.push_event(event);
                    }
                    break;
                }
            }
        }

        batch
    }
}

fn rule(pattern: &str, name: &'static str, build: super::BuildFn) -> Result<LineRule> {
    Ok(LineRule {
        name,
        pattern: Regex::new(pattern).with_context(|| format!("compile {name} rule"))?,
        build,
    })
}

fn base_event(ctx: &LineCtx, kind: &str) -> RawEvent {
    let mut event = RawEvent::new(kind, ctx.timestamp, ctx.raw);
    event.game_mode = ctx.default_mode;
    event
}

fn set_map(event: &mut RawEvent, state: &ParserState) {
    if let Some(map) = &state.current_map {
        event.set_meta("map", Value::String(map.clone()));
    }
}

fn build_map_change(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    state.current_map = Some(caps[1].to_string());
    let mut event = base_event(ctx, kind::GAME_EVENT);
    event.set_meta("event", json!("map_change"));
    set_map(&mut event, state);
    vec![event]
}

fn build_shutdown(ctx: &LineCtx, _caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    let mut event = base_event(ctx, kind::GAME_EVENT);
    event.set_meta("event", json!("shutdown"));
    set_map(&mut event, state);
    vec![event]
}

fn build_connect(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    let name = caps[1].to_string();
    let steam_id = ctx.resolver.resolve(&name).map(str::to_string);
    let key = session_key(steam_id.as_deref(), &name);
    let session = state.open_session(&key, ctx.timestamp);

    let mut event = base_event(ctx, kind::CONNECT).with_player(Some(name), steam_id);
    event.set_meta("session_id", json!(session.session_id));
    event.set_meta("session_start", json!(session.started_at.to_rfc3339()));
    set_map(&mut event, state);
    vec![event]
}

fn build_dropped(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    let name = caps[1].to_string();
    // Drop lines carry the id themselves; no resolver lookup needed.
    let steam_id = Some(caps[2].to_string());
    let key = session_key(steam_id.as_deref(), &name);

    let mut event = base_event(ctx, kind::DISCONNECT).with_player(Some(name.clone()), steam_id);
    // The session may have been opened under the display name if the
    // connect line predated any identity bind.
    if let Some(session) = state
        .close_session(&key)
        .or_else(|| state.close_session(&name))
    {
        event.set_meta("session_id", json!(session.session_id));
        event.set_meta("session_start", json!(session.started_at.to_rfc3339()));
    }
    set_map(&mut event, state);
    vec![event]
}

// Identity-bind lines are mined by the resolver pre-scan; matching them
// here just keeps them out of the global-chat rule.
fn build_spawned(_ctx: &LineCtx, _caps: &Captures, _state: &mut ParserState) -> Vec<RawEvent> {
    Vec::new()
}

fn build_chat(ctx: &LineCtx, state: &ParserState, name: &str, message: &str, channel: &str) -> RawEvent {
    let steam_id = ctx.resolver.resolve(name).map(str::to_string);
    let mut event = base_event(ctx, kind::CHAT).with_player(Some(name.to_string()), steam_id);
    event.set_meta("message", json!(message));
    event.set_meta("channel", json!(channel));
    set_map(&mut event, state);
    event
}

fn build_team_chat(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    vec![build_chat(ctx, state, &caps[1], &caps[2], "team")]
}

fn build_admin_chat(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    vec![build_chat(ctx, state, &caps[1], &caps[2], "admin")]
}

fn build_tsay_chat(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    vec![build_chat(ctx, state, &caps[1], &caps[2], "tsay")]
}

fn build_global_chat(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    let name = caps[1].to_string();
    let message = caps[2].to_string();
    let chat = build_chat(ctx, state, &name, &message, "global");

    // A `!`/`/`-prefixed message is both chat and an addon command; the
    // chat event comes first.
    if is_command_text(&message) {
        let (command, args) = split_command(&message);
        let mut cmd_event = base_event(ctx, kind::COMMAND)
            .with_player(chat.player_name.clone(), chat.steam_id.clone());
        cmd_event.set_meta("command", json!(command));
        cmd_event.set_meta("args", json!(args));
        cmd_event.set_meta("channel", json!("chat"));
        set_map(&mut cmd_event, state);
        vec![chat, cmd_event]
    } else {
        vec![chat]
    }
}

fn build_kill(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    let attacker = caps[1].to_string();
    let victim = caps[2].to_string();
    let weapon = caps[3].to_string();
    let attacker_id = ctx.resolver.resolve(&attacker).map(str::to_string);
    let victim_id = ctx.resolver.resolve(&victim).map(str::to_string);

    let mut event =
        base_event(ctx, kind::KILL).with_player(Some(attacker.clone()), attacker_id.clone());
    event.set_meta("attacker_name", json!(attacker));
    event.set_meta("attacker_steam_id", json!(attacker_id));
    event.set_meta("victim_name", json!(victim));
    event.set_meta("victim_steam_id", json!(victim_id));
    event.set_meta("weapon", json!(weapon));
    set_map(&mut event, state);
    vec![event]
}

fn build_suicide(ctx: &LineCtx, caps: &Captures, state: &mut ParserState) -> Vec<RawEvent> {
    let name = caps[1].to_string();
    let steam_id = ctx.resolver.resolve(&name).map(str::to_string);

    let mut event = base_event(ctx, kind::KILL).with_player(Some(name.clone()), steam_id.clone());
    event.set_meta("attacker_name", json!(name));
    event.set_meta("attacker_steam_id", json!(steam_id));
    event.set_meta("victim_name", json!(name));
    event.set_meta("victim_steam_id", json!(steam_id));
    event.set_meta("suicide", json!(true));
    set_map(&mut event, state);
    vec![event]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::parse_base_date;

    fn parser() -> UlxParser {
        UlxParser::new(parse_base_date("2024-01-01"), 0, None).unwrap()
    }

    const FIXTURE: &str = "\
<Logging continued from \"data/ulx_logs/03-22-19.txt\">
[10:00:00] New map: gm_construct
[10:00:05] Client \"Alice\" connected.
Client \"Alice\" spawned in server <STEAM_0:1:11111>
Client \"Bob\" spawned in server <STEAM_0:0:22222>
[10:01:00] Alice: hello world
[10:02:30] Alice killed Bob using weapon_ak47
[10:03:00] Dropped \"Alice\" from server<STEAM_0:1:11111>";

    #[test]
    fn fixture_round_trip_in_timestamp_order() {
        let batch = parser().parse_document(FIXTURE);
        let kinds: Vec<&str> = batch.events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                kind::GAME_EVENT,
                kind::CONNECT,
                kind::CHAT,
                kind::KILL,
                kind::DISCONNECT
            ]
        );
        assert!(batch
            .events
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(batch.errors.is_empty());
    }

    #[test]
    fn kill_identities_resolved_from_bind_lines() {
        let batch = parser().parse_document(FIXTURE);
        let kill = batch.events.iter().find(|e| e.kind == kind::KILL).unwrap();
        assert_eq!(kill.meta_str("attacker_steam_id"), Some("STEAM_0:1:11111"));
        assert_eq!(kill.meta_str("victim_steam_id"), Some("STEAM_0:0:22222"));
        assert_eq!(kill.meta_str("weapon"), Some("weapon_ak47"));
        assert_eq!(kill.steam_id.as_deref(), Some("STEAM_0:1:11111"));
    }

    #[test]
    fn unresolved_kill_identities_stay_null() {
        let text = "[10:00:00] Ghost killed Phantom using crowbar";
        let batch = parser().parse_document(text);
        let kill = &batch.events[0];
        assert_eq!(kill.metadata.get("attacker_steam_id"), Some(&Value::Null));
        assert_eq!(kill.metadata.get("victim_steam_id"), Some(&Value::Null));
        assert!(kill.steam_id.is_none());
    }

    #[test]
    fn connect_disconnect_share_a_session() {
        let batch = parser().parse_document(FIXTURE);
        let connect = batch.events.iter().find(|e| e.kind == kind::CONNECT).unwrap();
        let disconnect = batch
            .events
            .iter()
            .find(|e| e.kind == kind::DISCONNECT)
            .unwrap();
        let sid = connect.meta_str("session_id").unwrap();
        assert_eq!(disconnect.meta_str("session_id"), Some(sid));
    }

    #[test]
    fn disconnect_without_connect_has_no_session() {
        let text = "[10:00:00] Dropped \"Loner\" from server<STEAM_0:0:333>";
        let batch = parser().parse_document(text);
        let event = &batch.events[0];
        assert_eq!(event.kind, kind::DISCONNECT);
        assert_eq!(event.steam_id.as_deref(), Some("STEAM_0:0:333"));
        assert!(event.metadata.get("session_id").is_none());
    }

    #[test]
    fn command_chat_emits_two_events_in_order() {
        let text = "[00:00:05] Bob: !rtv";
        let batch = parser().parse_document(text);
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].kind, kind::CHAT);
        assert_eq!(batch.events[0].meta_str("message"), Some("!rtv"));
        assert_eq!(batch.events[1].kind, kind::COMMAND);
        assert_eq!(batch.events[1].meta_str("command"), Some("!rtv"));
        assert_eq!(batch.events[1].metadata.get("args"), Some(&json!([])));
    }

    #[test]
    fn slash_command_with_args() {
        let text = "[00:00:05] Admin: /slay Bob 2";
        let batch = parser().parse_document(text);
        assert_eq!(batch.events[1].kind, kind::COMMAND);
        assert_eq!(batch.events[1].meta_str("command"), Some("/slay"));
        assert_eq!(batch.events[1].metadata.get("args"), Some(&json!(["Bob", "2"])));
    }

    #[test]
    fn chat_channels_are_distinguished() {
        let text = "\
[10:00:00] (TEAM) Alice: flank left
[10:00:01] Alice to admins: need help
[10:00:02] (tsay from Console) restart soon
[10:00:03] Alice: plain chat";
        let batch = parser().parse_document(text);
        let channels: Vec<&str> = batch
            .events
            .iter()
            .filter_map(|e| e.meta_str("channel"))
            .collect();
        assert_eq!(channels, vec!["team", "admin", "tsay", "global"]);
    }

    #[test]
    fn map_change_updates_state_for_later_events() {
        let text = "\
[10:00:00] New map: ttt_minecraft
[10:00:05] Client \"Alice\" connected.";
        let batch = parser().parse_document(text);
        let connect = batch.events.iter().find(|e| e.kind == kind::CONNECT).unwrap();
        assert_eq!(connect.meta_str("map"), Some("ttt_minecraft"));
    }

    #[test]
    fn unmatched_timestamped_lines_drop_without_error() {
        let text = "[10:00:00] ServerLog: something the model does not cover";
        let batch = parser().parse_document(text);
        // The global-chat rule happens to match "ServerLog: ..." shaped
        // lines; a truly alien line yields nothing.
        let text2 = "[10:00:00] -- engine diagnostics dump --";
        let batch2 = parser().parse_document(text2);
        assert!(batch2.events.is_empty());
        assert!(batch2.errors.is_empty());
        assert_eq!(batch2.lines_parsed, 1);
        assert!(batch.errors.is_empty());
    }

    #[test]
    fn lines_without_clock_prefix_are_skipped() {
        let text = "no timestamp here\nClient \"X\" spawned in server <STEAM_0:1:1>";
        let batch = parser().parse_document(text);
        assert!(batch.events.is_empty());
        assert!(batch.errors.is_empty());
    }

    #[test]
    fn header_date_feeds_timestamps_when_no_base_date() {
        let parser = UlxParser::new(None, 0, None).unwrap();
        let text = "\
<Logging continued from \"data/ulx_logs/03-22-19.txt\">
[10:00:00] Client \"Alice\" connected.";
        let batch = parser.parse_document(text);
        assert_eq!(
            batch.events[0].timestamp.to_rfc3339(),
            "2019-03-22T10:00:00+00:00"
        );
    }

    #[test]
    fn timezone_offset_applied_to_instants() {
        let parser = UlxParser::new(parse_base_date("2024-01-01"), -180, None).unwrap();
        let batch = parser.parse_document("[23:30:00] Client \"Alice\" connected.");
        assert_eq!(
            batch.events[0].timestamp.to_rfc3339(),
            "2024-01-02T02:30:00+00:00"
        );
    }

    #[test]
    fn suicide_emits_self_kill() {
        let text = "[10:00:00] Bob suicided!";
        let batch = parser().parse_document(text);
        let event = &batch.events[0];
        assert_eq!(event.kind, kind::KILL);
        assert_eq!(event.metadata.get("suicide"), Some(&json!(true)));
        assert_eq!(event.meta_str("victim_name"), Some("Bob"));
    }

    #[test]
    fn default_mode_is_stamped_on_events() {
        let parser = UlxParser::new(parse_base_date("2024-01-01"), 0, Some(GameMode::Ttt)).unwrap();
        let batch = parser.parse_document("[10:00:00] Bob: hi");
        assert_eq!(batch.events[0].game_mode, Some(GameMode::Ttt));
    }
}
