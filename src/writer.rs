//! Batch persistence: event rows plus per-player aggregate upserts.
//!
//! At-least-once is acceptable here: event rows are append-only and the
//! aggregate upsert is monotonic, so a failed batch can be re-ingested in
//! full. The one caveat is CONNECT counting, which double-counts if the
//! same batch is deliberately replayed; callers own that decision.

use anyhow::Result;
use indexmap::IndexMap;
use serde::Serialize;

use crate::event::{kind, NormalizedEvent};
use crate::store::{IngestStore, PlayerAggregate};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WriteOutcome {
    pub ingested: usize,
    pub players_touched: usize,
}

/// Fold a batch into one aggregate delta per distinct SteamID, in first-seen
/// order. Events without an identity contribute nothing.
pub fn fold_player_aggregates(events: &[NormalizedEvent]) -> Vec<PlayerAggregate> {
    let mut by_player: IndexMap<String, PlayerAggregate> = IndexMap::new();

    for event in events {
        let Some(steam_id) = &event.steam_id else {
            continue;
        };
        let entry = by_player
            .entry(steam_id.clone())
            .or_insert_with(|| PlayerAggregate {
                steam_id: steam_id.clone(),
                last_name: None,
                first_seen: event.timestamp,
                last_seen: event.timestamp,
                total_connections: 0,
            });
        entry.first_seen = entry.first_seen.min(event.timestamp);
        entry.last_seen = entry.last_seen.max(event.timestamp);
        if event.kind == kind::CONNECT {
            entry.total_connections += 1;
        }
        if let Some(name) = &event.player_name {
            entry.last_name = Some(name.clone());
        }
    }

    by_player.into_values().collect()
}

/// Persist a normalized batch: bulk event insert, then one aggregate
/// upsert per distinct player. Failures propagate; a partial write is
/// recoverable by re-ingesting the batch.
pub fn write_batch<S: IngestStore>(store: &mut S, events: &[NormalizedEvent]) -> Result<WriteOutcome> {
    let ingested = store.insert_events(events)?;

    let aggregates = fold_player_aggregates(events);
    for aggregate in &aggregates {
        store.upsert_player(aggregate)?;
    }

    Ok(WriteOutcome {
        ingested,
        players_touched: aggregates.len(),
    })
}
