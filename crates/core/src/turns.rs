//! Turn grouping and training-pair construction.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::message::{NormalizedMessage, Speaker};

/// A maximal run of messages from one speaker, merged by time proximity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub texts: Vec<String>,
    pub speaker: Speaker,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Turn {
    fn open(msg: &NormalizedMessage) -> Self {
        Self {
            texts: vec![msg.text.clone()],
            speaker: msg.speaker.clone(),
            start_time: msg.timestamp,
            end_time: msg.timestamp,
        }
    }

    fn accepts(&self, msg: &NormalizedMessage, max_gap: Duration) -> bool {
        self.speaker == msg.speaker && msg.timestamp - self.end_time <= max_gap
    }

    pub fn is_from_owner(&self) -> bool {
        self.speaker.is_owner()
    }

    /// The turn's texts in chronological order, joined by `separator`.
    pub fn joined(&self, separator: &str) -> String {
        self.texts.join(separator)
    }
}

/// One supervised example: what the contact said, and how the owner answered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingPair {
    pub input: String,
    pub output: String,
}

/// Group time-sorted messages into turns.
///
/// A message extends the open turn when it has the same speaker and arrives
/// within `max_gap` of the turn's last message; otherwise the open turn is
/// closed and a new one starts. Fails if a timestamp goes backwards.
pub fn group_turns(
    messages: &[NormalizedMessage],
    max_gap: Duration,
) -> Result<Vec<Turn>, PipelineError> {
    let mut turns = Vec::new();
    let mut open: Option<Turn> = None;

    for (index, msg) in messages.iter().enumerate() {
        if let Some(turn) = open.as_mut() {
            if msg.timestamp < turn.end_time {
                return Err(PipelineError::OutOfOrder {
                    index,
                    previous: turn.end_time,
                    current: msg.timestamp,
                });
            }
            if turn.accepts(msg, max_gap) {
                turn.texts.push(msg.text.clone());
                turn.end_time = msg.timestamp;
                continue;
            }
        }
        if let Some(closed) = open.replace(Turn::open(msg)) {
            turns.push(closed);
        }
    }

    turns.extend(open);
    Ok(turns)
}

/// Emit a pair for every owner turn.
///
/// The input is the immediately preceding turn when a contact wrote it. When
/// the owner turn opens the conversation, or follows another owner turn, the
/// input is the conversation starter token.
pub fn build_pairs(turns: &[Turn], config: &PipelineConfig) -> Vec<TrainingPair> {
    let mut pairs = Vec::new();
    let mut previous: Option<&Turn> = None;

    for turn in turns {
        if turn.is_from_owner() {
            let input = match previous {
                Some(prev) if !prev.is_from_owner() => prev.joined(&config.turn_separator),
                _ => config.conversation_starter_token.clone(),
            };
            pairs.push(TrainingPair {
                input,
                output: turn.joined(&config.turn_separator),
            });
        }
        previous = Some(turn);
    }

    pairs
}
