//! Display-name to SteamID resolution.
//!
//! Names in these logs are free-form and mutable; the SteamID is the only
//! stable handle. Connect/disconnect lines are the two places the console
//! dialect ever prints both together, so the resolver pre-scans the whole
//! document for them before the line-by-line parse runs.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    // Engine prints the id in angle brackets; the timestamp prefix is
    // present on some server builds and absent on others.
    static ref SPAWNED_RE: Regex = Regex::new(
        r#"^(?:\[\d{2}:\d{2}:\d{2}\]\s*)?Client "(.+)" spawned in server\s*<(STEAM_\d+:\d+:\d+)>"#
    )
    .unwrap();
    static ref DROPPED_RE: Regex = Regex::new(
        r#"^(?:\[\d{2}:\d{2}:\d{2}\]\s*)?Dropped "(.+)" from server\s*<(STEAM_\d+:\d+:\d+)>"#
    )
    .unwrap();
}

/// Read-only name→SteamID map built from one document.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    by_name: HashMap<String, String>,
}

impl IdentityResolver {
    /// Scan every line for identity-binding shapes. When a name is reused
    /// by two different ids within one log, the later binding wins; that
    /// imprecision comes with the legacy data and is left as-is.
    pub fn from_text(content: &str) -> Self {
        let mut by_name = HashMap::new();
        for line in content.lines() {
            let line = line.trim_start_matches('\u{feff}').trim_end();
            if let Some(caps) = SPAWNED_RE.captures(line).or_else(|| DROPPED_RE.captures(line)) {
                by_name.insert(caps[1].to_string(), caps[2].to_string());
            }
        }
        Self { by_name }
    }

    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_from_spawn_and_drop_lines() {
        let text = "\
[10:00:01] Client \"Alice\" connected.
Client \"Alice\" spawned in server <STEAM_0:1:11111>
Dropped \"Bob\" from server<STEAM_0:0:22222>
[10:05:00] Alice: hello";
        let resolver = IdentityResolver::from_text(text);
        assert_eq!(resolver.resolve("Alice"), Some("STEAM_0:1:11111"));
        assert_eq!(resolver.resolve("Bob"), Some("STEAM_0:0:22222"));
        assert_eq!(resolver.resolve("Carol"), None);
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn timestamped_bind_lines_also_match() {
        let text = "[10:00:02] Client \"Alice\" spawned in server <STEAM_0:1:11111>";
        let resolver = IdentityResolver::from_text(text);
        assert_eq!(resolver.resolve("Alice"), Some("STEAM_0:1:11111"));
    }

    #[test]
    fn name_reuse_last_writer_wins() {
        let text = "\
Client \"Player\" spawned in server <STEAM_0:1:1>
Dropped \"Player\" from server<STEAM_0:1:2>";
        let resolver = IdentityResolver::from_text(text);
        assert_eq!(resolver.resolve("Player"), Some("STEAM_0:1:2"));
    }

    #[test]
    fn empty_document_resolves_nothing() {
        let resolver = IdentityResolver::from_text("");
        assert!(resolver.is_empty());
    }
}
