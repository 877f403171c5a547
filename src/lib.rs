// Core library for the srcds-ingest legacy log pipeline

pub mod detection;
pub mod event;
pub mod identity;
pub mod import;
pub mod normalize;
pub mod parsers;
pub mod store;
pub mod timestamp;
pub mod writer;

pub use detection::{detect_format, resolve_format, FormatHint, LogFormat};
pub use event::{kind, GameMode, NormalizedEvent, ParseError, ParsedBatch, RawEvent, SUPPORTED_MODES};
pub use identity::IdentityResolver;
pub use import::{run_import, ImportError, ImportRequest, ImportSummary};
pub use normalize::{normalize, ServerContext};
pub use parsers::{DialectParser, TaggedParser, UlxParser};
pub use store::{IngestStore, MemoryStore, PlayerAggregate, SqliteStore};
pub use writer::{fold_player_aggregates, write_batch, WriteOutcome};
