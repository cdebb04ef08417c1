//! Turn reconstruction and training-pair generation for message history.
//!
//! This crate turns each conversation's raw messages into `(input, output)`
//! pairs for supervised fine-tuning: the normalizer resolves message text,
//! the junk filter drops reactions and noise, the turn grouper merges runs of
//! messages from one speaker, and the pair builder answers every owner turn
//! with the contact turn before it.

use chrono::{DateTime, Utc};

/// Trait for anything that can supply conversations to the pipeline.
///
/// Implementors own connection handling and access checks, and must return
/// each conversation's messages sorted by timestamp.
pub trait MessageSource {
    /// Load every conversation. `cutoff` is the start of the lookback window;
    /// sources may use it to skip older messages early.
    fn load_conversations(
        &self,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<Conversation>, SourceError>;
}

// Blanket implementation for references to sources
impl<S: MessageSource + ?Sized> MessageSource for &S {
    fn load_conversations(
        &self,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<Conversation>, SourceError> {
        (*self).load_conversations(cutoff)
    }
}

mod config;
mod error;
mod filter;
mod helpers;
mod message;
pub mod pipeline;
pub mod source;
mod turns;

pub use config::{PipelineConfig, DEFAULT_PLACEHOLDERS, DEFAULT_TAPBACK_PREFIXES};
pub use error::{DecodeError, OutputError, PipelineError, SourceError};
pub use filter::{is_junk, JunkFilter, JunkReason};
pub use helpers::{apple_time_to_utc, clean_text, decode_attributed_body, utc_to_apple_nanos};
pub use message::{normalize, Discard, MessageBody, NormalizedMessage, RawMessage, Speaker};
pub use pipeline::{
    assemble_dataset, build_training_pairs, process_all_conversations, write_pairs,
    write_pairs_csv, BatchResult, ConversationPipeline, ConversationResult, Dataset,
    DatasetSummary, PipelineStats,
};
pub use source::{ChatDbSource, Conversation, CsvExportSource};
pub use turns::{build_pairs, group_turns, TrainingPair, Turn};

/// Default lookback window in days.
pub const DAYS_BACK: Option<u32> = Some(30);

/// Default minimum message length in characters.
pub const MIN_MESSAGE_LENGTH: usize = 2;

/// Default maximum message length in characters; longer texts are usually pasted logs.
pub const MAX_MESSAGE_LENGTH: usize = 1000;

/// Default largest gap between two messages of the same turn.
pub const MAX_TURN_GAP_SECONDS: i64 = 3000;

/// Default input for pairs with no preceding contact turn.
pub const CONVERSATION_STARTER_TOKEN: &str = "[CONVERSATION_STARTER]";

/// Default separator between the messages of a turn.
pub const TURN_SEPARATOR: &str = " ";
