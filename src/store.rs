//! Persistence for normalized events and player aggregates.
//!
//! The pipeline only needs two operations from its storage engine: append
//! a batch of immutable event rows and upsert per-player aggregate rows.
//! [`SqliteStore`] is the shipped implementation; [`MemoryStore`] backs
//! unit tests and the dry-run zero-side-effect checks.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

use crate::event::NormalizedEvent;

/// Derived per-player row. `first_seen`/`last_seen` bracket everything the
/// player was ever seen doing; `total_connections` counts CONNECT events
/// only. Rows are never decremented or deleted by this pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerAggregate {
    pub steam_id: String,
    pub last_name: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_connections: i64,
}

/// Storage operations the writer relies on. Upserts must be monotonic:
/// `first_seen` only moves back, `last_seen` only forward, connection
/// counts only add.
pub trait IngestStore {
    fn insert_events(&mut self, events: &[NormalizedEvent]) -> Result<usize>;
    fn upsert_player(&mut self, aggregate: &PlayerAggregate) -> Result<()>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create db parent dir {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite db {}", path.display()))?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn event_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(Into::into)
    }

    pub fn get_player(&self, steam_id: &str) -> Result<Option<PlayerAggregate>> {
        self.conn
            .query_row(
                "SELECT steam_id, last_name, first_seen, last_seen, total_connections
                 FROM players WHERE steam_id = ?1",
                params![steam_id],
                |row| {
                    Ok(PlayerAggregate {
                        steam_id: row.get(0)?,
                        last_name: row.get(1)?,
                        first_seen: row.get(2)?,
                        last_seen: row.get(3)?,
                        total_connections: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            server_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            ts TEXT NOT NULL,
            game_mode TEXT NOT NULL,
            steam_id TEXT,
            player_name TEXT,
            raw_text TEXT NOT NULL,
            metadata_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_server_ts ON events(server_id, ts);
        CREATE INDEX IF NOT EXISTS idx_events_steam_id ON events(steam_id);

        CREATE TABLE IF NOT EXISTS players (
            steam_id TEXT PRIMARY KEY,
            last_name TEXT,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            total_connections INTEGER NOT NULL DEFAULT 0
        );
        ",
    )?;

    Ok(())
}

impl IngestStore for SqliteStore {
    fn insert_events(&mut self, events: &[NormalizedEvent]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events
                 (server_id, event_type, ts, game_mode, steam_id, player_name, raw_text, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.server_id,
                    event.kind,
                    event.timestamp,
                    event.game_mode.as_str(),
                    event.steam_id,
                    event.player_name,
                    event.raw_text,
                    serde_json::Value::Object(event.metadata.clone()).to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    fn upsert_player(&mut self, aggregate: &PlayerAggregate) -> Result<()> {
        self.conn.execute(
            "INSERT INTO players (steam_id, last_name, first_seen, last_seen, total_connections)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(steam_id) DO UPDATE SET
                last_name = COALESCE(excluded.last_name, last_name),
                first_seen = MIN(first_seen, excluded.first_seen),
                last_seen = MAX(last_seen, excluded.last_seen),
                total_connections = total_connections + excluded.total_connections",
            params![
                aggregate.steam_id,
                aggregate.last_name,
                aggregate.first_seen,
                aggregate.last_seen,
                aggregate.total_connections,
            ],
        )?;
        Ok(())
    }
}

/// In-memory store for tests; counts calls so dry-run behavior can be
/// asserted as "the writer was never invoked".
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub events: Vec<NormalizedEvent>,
    pub players: HashMap<String, PlayerAggregate>,
    pub insert_calls: usize,
    pub upsert_calls: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IngestStore for MemoryStore {
    fn insert_events(&mut self, events: &[NormalizedEvent]) -> Result<usize> {
        self.insert_calls += 1;
        self.events.extend_from_slice(events);
        Ok(events.len())
    }

    fn upsert_player(&mut self, aggregate: &PlayerAggregate) -> Result<()> {
        self.upsert_calls += 1;
        self.players
            .entry(aggregate.steam_id.clone())
            .and_modify(|existing| {
                if aggregate.last_name.is_some() {
                    existing.last_name = aggregate.last_name.clone();
                }
                existing.first_seen = existing.first_seen.min(aggregate.first_seen);
                existing.last_seen = existing.last_seen.max(aggregate.last_seen);
                existing.total_connections += aggregate.total_connections;
            })
            .or_insert_with(|| aggregate.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{kind, GameMode};
    use chrono::TimeZone;

    fn event(kind: &str, ts: DateTime<Utc>, steam_id: Option<&str>) -> NormalizedEvent {
        NormalizedEvent {
            server_id: "srv-1".to_string(),
            kind: kind.to_string(),
            timestamp: ts,
            game_mode: GameMode::Ttt,
            raw_text: format!("[10:00:00] {kind}"),
            steam_id: steam_id.map(str::to_string),
            player_name: Some("Bob".to_string()),
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn sqlite_insert_and_count() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let events = vec![
            event(kind::CONNECT, ts, Some("STEAM_0:1:1")),
            event(kind::CHAT, ts, Some("STEAM_0:1:1")),
        ];
        assert_eq!(store.insert_events(&events).unwrap(), 2);
        assert_eq!(store.event_count().unwrap(), 2);
    }

    #[test]
    fn sqlite_upsert_is_monotonic() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();

        store
            .upsert_player(&PlayerAggregate {
                steam_id: "STEAM_0:1:1".to_string(),
                last_name: Some("Bob".to_string()),
                first_seen: t0,
                last_seen: t0,
                total_connections: 1,
            })
            .unwrap();
        store
            .upsert_player(&PlayerAggregate {
                steam_id: "STEAM_0:1:1".to_string(),
                last_name: Some("Bobby".to_string()),
                first_seen: t1,
                last_seen: t1,
                total_connections: 2,
            })
            .unwrap();

        let row = store.get_player("STEAM_0:1:1").unwrap().unwrap();
        assert_eq!(row.first_seen, t0);
        assert_eq!(row.last_seen, t1);
        assert_eq!(row.total_connections, 3);
        assert_eq!(row.last_name.as_deref(), Some("Bobby"));
    }

    #[test]
    fn sqlite_upsert_never_moves_last_seen_backwards() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        for (first, last) in [(t0, t0), (earlier, earlier)] {
            store
                .upsert_player(&PlayerAggregate {
                    steam_id: "STEAM_0:1:1".to_string(),
                    last_name: None,
                    first_seen: first,
                    last_seen: last,
                    total_connections: 0,
                })
                .unwrap();
        }

        let row = store.get_player("STEAM_0:1:1").unwrap().unwrap();
        assert_eq!(row.first_seen, earlier);
        assert_eq!(row.last_seen, t0);
    }

    #[test]
    fn memory_store_tracks_calls() {
        let mut store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        store
            .insert_events(&[event(kind::CHAT, ts, None)])
            .unwrap();
        assert_eq!(store.insert_calls, 1);
        assert_eq!(store.events.len(), 1);
        assert_eq!(store.upsert_calls, 0);
    }
}
