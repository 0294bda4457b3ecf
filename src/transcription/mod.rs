//! # Transcription Layer
//!
//! The remote transcription engine with retry/backoff, the content-addressed
//! result cache that keeps the same audio from being paid for twice, and the
//! append-only cost ledger with budget enforcement.

pub mod cache;
pub mod cost;
pub mod engine;

pub use cache::{audio_hash, CacheStats, CachedTranscription, TranscriptionCache};
pub use cost::{CostLogEntry, CostOutcome, CostStats, CostTracker};
pub use engine::{TranscriptionEngine, TranscriptionResult};
