//! Pipeline configuration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::{
    CONVERSATION_STARTER_TOKEN, DAYS_BACK, MAX_MESSAGE_LENGTH, MAX_TURN_GAP_SECONDS,
    MIN_MESSAGE_LENGTH, TURN_SEPARATOR,
};

/// Reaction verbs the messaging app renders as plain text ("Liked “hey”").
pub const DEFAULT_TAPBACK_PREFIXES: &[&str] = &[
    "Liked",
    "Loved",
    "Laughed at",
    "Disliked",
    "Emphasized",
    "Questioned",
];

/// Whole-message placeholders that carry no conversational content.
pub const DEFAULT_PLACEHOLDERS: &[&str] = &[
    "[IMAGE]",
    "[URL]",
    "[VIDEO]",
    "[AUDIO]",
    "[FILE]",
    "This message was deleted",
    "You unsent a message",
];

/// Configuration threaded through every pipeline stage.
///
/// Constructed once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Lookback window in days. `None` processes the whole history.
    pub days_back: Option<u32>,
    /// Minimum message length in characters.
    pub min_message_length: usize,
    /// Maximum message length in characters.
    pub max_message_length: usize,
    /// Largest gap between two messages of one speaker that still joins them.
    pub max_turn_gap_seconds: i64,
    /// Input value for pairs without a preceding contact turn.
    pub conversation_starter_token: String,
    /// Separator placed between the messages of a turn.
    pub turn_separator: String,
    pub tapback_prefixes: Vec<String>,
    pub placeholders: Vec<String>,
    /// Conversations yielding fewer pairs than this are dropped from the dataset.
    pub min_pairs_per_conversation: usize,
    /// Drop repeated (input, output) pairs, keeping the first occurrence.
    pub dedupe_pairs: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            days_back: DAYS_BACK,
            min_message_length: MIN_MESSAGE_LENGTH,
            max_message_length: MAX_MESSAGE_LENGTH,
            max_turn_gap_seconds: MAX_TURN_GAP_SECONDS,
            conversation_starter_token: CONVERSATION_STARTER_TOKEN.to_string(),
            turn_separator: TURN_SEPARATOR.to_string(),
            tapback_prefixes: DEFAULT_TAPBACK_PREFIXES.iter().map(|s| s.to_string()).collect(),
            placeholders: DEFAULT_PLACEHOLDERS.iter().map(|s| s.to_string()).collect(),
            min_pairs_per_conversation: 1,
            dedupe_pairs: true,
        }
    }
}

impl PipelineConfig {
    /// Reject settings that would make every message or pair invalid.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.min_message_length > self.max_message_length {
            return Err(PipelineError::InvalidConfig(format!(
                "min_message_length ({}) exceeds max_message_length ({})",
                self.min_message_length, self.max_message_length
            )));
        }
        self.max_turn_gap()?;
        if self.conversation_starter_token.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "conversation_starter_token must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Earliest instant inside the lookback window, relative to `now`.
    ///
    /// A window reaching past the earliest representable instant covers the
    /// whole history and yields `None`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = Duration::try_days(i64::from(self.days_back?))?;
        now.checked_sub_signed(days)
    }

    /// The turn gap as a duration. Fails for negative values and for values
    /// too large to represent.
    pub fn max_turn_gap(&self) -> Result<Duration, PipelineError> {
        if self.max_turn_gap_seconds < 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "max_turn_gap_seconds must not be negative, got {}",
                self.max_turn_gap_seconds
            )));
        }
        Duration::try_seconds(self.max_turn_gap_seconds).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "max_turn_gap_seconds is out of range, got {}",
                self.max_turn_gap_seconds
            ))
        })
    }
}
