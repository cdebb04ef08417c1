//! Raw and normalized message types, and the normalizer between them.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::helpers::{clean_text, decode_attributed_body};

/// Text payload of a stored message, as found in the plain and rich columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Plain(String),
    Encoded(Vec<u8>),
    Both { text: String, encoded: Vec<u8> },
    Empty,
}

impl MessageBody {
    /// Build a body from the nullable plain-text and attributed-body columns.
    pub fn from_columns(text: Option<String>, encoded: Option<Vec<u8>>) -> Self {
        let text = text.filter(|t| !t.is_empty());
        let encoded = encoded.filter(|e| !e.is_empty());
        match (text, encoded) {
            (Some(text), Some(encoded)) => MessageBody::Both { text, encoded },
            (Some(text), None) => MessageBody::Plain(text),
            (None, Some(encoded)) => MessageBody::Encoded(encoded),
            (None, None) => MessageBody::Empty,
        }
    }

    /// Resolve the body to cleaned text. The plain field wins whenever it has
    /// visible content; the encoded body is only decoded as a fallback.
    pub fn resolve(&self) -> Result<Option<String>, DecodeError> {
        match self {
            MessageBody::Plain(text) => Ok(non_blank(clean_text(text))),
            MessageBody::Encoded(encoded) => decode_text(encoded),
            MessageBody::Both { text, encoded } => match non_blank(clean_text(text)) {
                Some(text) => Ok(Some(text)),
                None => decode_text(encoded),
            },
            MessageBody::Empty => Ok(None),
        }
    }
}

fn decode_text(encoded: &[u8]) -> Result<Option<String>, DecodeError> {
    decode_attributed_body(encoded).map(|text| non_blank(clean_text(&text)))
}

fn non_blank(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// A message as read from a source. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
    pub sender_id: Option<String>,
    pub is_from_owner: bool,
    pub has_attachment: bool,
}

/// Who authored a message: the account owner or a specific contact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Speaker {
    Owner,
    Contact(String),
}

impl Speaker {
    pub fn of(raw: &RawMessage) -> Self {
        if raw.is_from_owner {
            Speaker::Owner
        } else {
            Speaker::Contact(raw.sender_id.clone().unwrap_or_default())
        }
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, Speaker::Owner)
    }
}

/// A message with non-empty plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub speaker: Speaker,
}

impl NormalizedMessage {
    pub fn is_from_owner(&self) -> bool {
        self.speaker.is_owner()
    }
}

/// Why the normalizer dropped a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// No plain text and no encoded body, or only whitespace and attachment markers.
    NoText,
    /// The encoded body could not be decoded.
    Undecodable,
    /// Sent before the lookback cutoff.
    OutsideWindow,
}

/// Normalize a raw message, or report why it was dropped.
///
/// `cutoff` is the start of the lookback window, if any.
pub fn normalize(
    raw: &RawMessage,
    cutoff: Option<DateTime<Utc>>,
) -> Result<NormalizedMessage, Discard> {
    if cutoff.is_some_and(|cutoff| raw.timestamp < cutoff) {
        return Err(Discard::OutsideWindow);
    }

    let text = match raw.body.resolve() {
        Ok(Some(text)) => text,
        Ok(None) => {
            if raw.has_attachment {
                debug!(timestamp = %raw.timestamp, "dropping attachment-only message");
            }
            return Err(Discard::NoText);
        }
        Err(e) => {
            warn!(timestamp = %raw.timestamp, error = %e, "failed to decode message body");
            return Err(Discard::Undecodable);
        }
    };

    Ok(NormalizedMessage {
        text,
        timestamp: raw.timestamp,
        speaker: Speaker::of(raw),
    })
}
