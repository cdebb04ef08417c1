//! Junk filter: drops reactions, placeholders and length outliers.

use regex::Regex;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::message::NormalizedMessage;

/// Reason a message was rejected, in the order the checks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JunkReason {
    Tapback,
    Placeholder,
    TooShort,
    TooLong,
}

/// Stateless message filter compiled from the configured lexicons.
#[derive(Debug, Clone)]
pub struct JunkFilter {
    tapback_re: Option<Regex>,
    placeholder_re: Option<Regex>,
    min_len: usize,
    max_len: usize,
}

impl JunkFilter {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            tapback_re: lexicon_regex(&config.tapback_prefixes, r"(?:\W|$)")?,
            placeholder_re: lexicon_regex(&config.placeholders, "$")?,
            min_len: config.min_message_length,
            max_len: config.max_message_length,
        })
    }

    /// Classify a message. `None` means it is kept.
    pub fn classify(&self, msg: &NormalizedMessage) -> Option<JunkReason> {
        let text = msg.text.as_str();
        if self.tapback_re.as_ref().is_some_and(|re| re.is_match(text)) {
            return Some(JunkReason::Tapback);
        }
        if self.placeholder_re.as_ref().is_some_and(|re| re.is_match(text)) {
            return Some(JunkReason::Placeholder);
        }
        let len = text.chars().count();
        if len < self.min_len {
            return Some(JunkReason::TooShort);
        }
        if len > self.max_len {
            return Some(JunkReason::TooLong);
        }
        None
    }

    pub fn is_junk(&self, msg: &NormalizedMessage) -> bool {
        self.classify(msg).is_some()
    }
}

/// One-off check. Pipelines should build a [`JunkFilter`] once and reuse it.
pub fn is_junk(msg: &NormalizedMessage, config: &PipelineConfig) -> Result<bool, PipelineError> {
    Ok(JunkFilter::new(config)?.is_junk(msg))
}

/// Case-insensitive alternation anchored at the start and closed by `suffix`.
fn lexicon_regex(entries: &[String], suffix: &str) -> Result<Option<Regex>, PipelineError> {
    let alternatives: Vec<String> = entries
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"(?i)^(?:{}){}", alternatives.join("|"), suffix);
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| PipelineError::InvalidConfig(format!("bad lexicon pattern: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Speaker;
    use chrono::Utc;

    fn msg(text: &str) -> NormalizedMessage {
        NormalizedMessage {
            text: text.to_string(),
            timestamp: Utc::now(),
            speaker: Speaker::Owner,
        }
    }

    fn filter() -> JunkFilter {
        JunkFilter::new(&PipelineConfig::default()).unwrap()
    }

    #[test]
    fn test_tapbacks() {
        let f = filter();
        assert_eq!(f.classify(&msg("Liked “hey”")), Some(JunkReason::Tapback));
        assert_eq!(f.classify(&msg("Laughed at \"that's wild\"")), Some(JunkReason::Tapback));
        assert_eq!(f.classify(&msg("emphasized an image")), Some(JunkReason::Tapback));
        assert_eq!(f.classify(&msg("Likedness is not a word")), None);
        assert_eq!(f.classify(&msg("I liked it")), None);
    }

    #[test]
    fn test_placeholders() {
        let f = filter();
        assert_eq!(f.classify(&msg("[IMAGE]")), Some(JunkReason::Placeholder));
        assert_eq!(f.classify(&msg("[url]")), Some(JunkReason::Placeholder));
        assert_eq!(
            f.classify(&msg("This message was deleted")),
            Some(JunkReason::Placeholder)
        );
        assert_eq!(f.classify(&msg("[IMAGE] look at this")), None);
    }

    #[test]
    fn test_length_bounds() {
        let config = PipelineConfig {
            min_message_length: 2,
            max_message_length: 10,
            ..Default::default()
        };
        let f = JunkFilter::new(&config).unwrap();
        assert_eq!(f.classify(&msg("k")), Some(JunkReason::TooShort));
        assert_eq!(f.classify(&msg("ok")), None);
        assert_eq!(f.classify(&msg("0123456789")), None);
        assert_eq!(f.classify(&msg("0123456789!")), Some(JunkReason::TooLong));
        // Counted in characters, not bytes.
        assert_eq!(f.classify(&msg("éé")), None);
    }

    #[test]
    fn test_custom_lexicon() {
        let config = PipelineConfig {
            tapback_prefixes: vec!["Reacted (+)".to_string()],
            placeholders: Vec::new(),
            ..Default::default()
        };
        let f = JunkFilter::new(&config).unwrap();
        assert_eq!(f.classify(&msg("Reacted (+) to a message")), Some(JunkReason::Tapback));
        assert_eq!(f.classify(&msg("Liked “hey”")), None);
        assert_eq!(f.classify(&msg("[IMAGE]")), None);
    }

    #[test]
    fn test_one_off_is_junk() {
        let config = PipelineConfig::default();
        assert!(is_junk(&msg("Loved “dinner?”"), &config).unwrap());
        assert!(!is_junk(&msg("dinner at 7?"), &config).unwrap());
    }
}
