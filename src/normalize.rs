//! Binding parsed batches to a destination server.
//!
//! Pure data transformation: no I/O, no side effects, trivially testable
//! against literal event fixtures. Normalizing the same batch against the
//! same context twice yields identical output.

use serde::Serialize;

use crate::event::{GameMode, NormalizedEvent, ParsedBatch, SUPPORTED_MODES};

/// The destination server an import targets.
#[derive(Debug, Clone, Serialize)]
pub struct ServerContext {
    pub id: String,
    pub mode: Option<GameMode>,
    pub name: String,
}

/// Mode resolution order: the line's own hint, then the destination's
/// default, then the first supported mode.
fn resolve_mode(event_mode: Option<GameMode>, server: &ServerContext) -> GameMode {
    event_mode.or(server.mode).unwrap_or(SUPPORTED_MODES[0])
}

/// Bind every event in a batch to the destination server.
pub fn normalize(batch: &ParsedBatch, server: &ServerContext) -> Vec<NormalizedEvent> {
    batch
        .events
        .iter()
        .map(|event| NormalizedEvent {
            server_id: server.id.clone(),
            kind: event.kind.clone(),
            timestamp: event.timestamp,
            game_mode: resolve_mode(event.game_mode, server),
            raw_text: if event.raw_text.is_empty() {
                // Display fallback for events whose source carried no text.
                event.kind.clone()
            } else {
                event.raw_text.clone()
            },
            steam_id: event.steam_id.clone(),
            player_name: event.player_name.clone(),
            metadata: event.metadata.clone(),
        })
        .collect()
}
