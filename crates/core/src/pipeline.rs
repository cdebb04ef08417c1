//! Pipeline for turning conversations into training pairs.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{OutputError, PipelineError};
use crate::filter::{JunkFilter, JunkReason};
use crate::message::{normalize, Discard, NormalizedMessage, RawMessage};
use crate::source::Conversation;
use crate::turns::{build_pairs, group_turns, TrainingPair};

/// Message and pair counts at each stage, for diagnosing empty results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub raw_messages: usize,
    pub outside_window: usize,
    pub no_text: usize,
    pub undecodable: usize,
    pub tapbacks: usize,
    pub placeholders: usize,
    pub too_short: usize,
    pub too_long: usize,
    pub kept_messages: usize,
    pub turns: usize,
    pub owner_turns: usize,
    pub pairs: usize,
}

impl PipelineStats {
    fn record_discard(&mut self, discard: Discard) {
        match discard {
            Discard::OutsideWindow => self.outside_window += 1,
            Discard::NoText => self.no_text += 1,
            Discard::Undecodable => self.undecodable += 1,
        }
    }

    fn record_junk(&mut self, reason: JunkReason) {
        match reason {
            JunkReason::Tapback => self.tapbacks += 1,
            JunkReason::Placeholder => self.placeholders += 1,
            JunkReason::TooShort => self.too_short += 1,
            JunkReason::TooLong => self.too_long += 1,
        }
    }

    pub fn junk_messages(&self) -> usize {
        self.tapbacks + self.placeholders + self.too_short + self.too_long
    }

    pub fn merge(&mut self, other: &PipelineStats) {
        self.raw_messages += other.raw_messages;
        self.outside_window += other.outside_window;
        self.no_text += other.no_text;
        self.undecodable += other.undecodable;
        self.tapbacks += other.tapbacks;
        self.placeholders += other.placeholders;
        self.too_short += other.too_short;
        self.too_long += other.too_long;
        self.kept_messages += other.kept_messages;
        self.turns += other.turns;
        self.owner_turns += other.owner_turns;
        self.pairs += other.pairs;
    }
}

/// Pairs produced from one conversation.
#[derive(Debug, Clone)]
pub struct ConversationResult {
    pub conversation_id: String,
    pub pairs: Vec<TrainingPair>,
    pub stats: PipelineStats,
}

/// Result of processing every conversation.
#[derive(Debug)]
pub struct BatchResult {
    pub results: Vec<ConversationResult>,
    pub stats: PipelineStats,
    pub failed_conversations: usize,
}

/// Normalizer, junk filter, turn grouper and pair builder, configured once.
#[derive(Debug, Clone)]
pub struct ConversationPipeline {
    config: PipelineConfig,
    filter: JunkFilter,
    cutoff: Option<DateTime<Utc>>,
    max_gap: Duration,
}

impl ConversationPipeline {
    /// Validate the configuration and fix the lookback cutoff relative to `now`.
    pub fn new(config: &PipelineConfig, now: DateTime<Utc>) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            filter: JunkFilter::new(config)?,
            cutoff: config.cutoff(now),
            max_gap: config.max_turn_gap()?,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.cutoff
    }

    /// Run every stage over one conversation's time-sorted messages.
    pub fn process(
        &self,
        messages: &[RawMessage],
    ) -> Result<(Vec<TrainingPair>, PipelineStats), PipelineError> {
        let mut stats = PipelineStats {
            raw_messages: messages.len(),
            ..Default::default()
        };

        let mut kept: Vec<NormalizedMessage> = Vec::with_capacity(messages.len());
        for raw in messages {
            let msg = match normalize(raw, self.cutoff) {
                Ok(msg) => msg,
                Err(discard) => {
                    stats.record_discard(discard);
                    continue;
                }
            };
            match self.filter.classify(&msg) {
                Some(reason) => stats.record_junk(reason),
                None => kept.push(msg),
            }
        }
        stats.kept_messages = kept.len();

        let turns = group_turns(&kept, self.max_gap)?;
        stats.turns = turns.len();
        stats.owner_turns = turns.iter().filter(|t| t.is_from_owner()).count();

        let pairs = build_pairs(&turns, &self.config);
        stats.pairs = pairs.len();
        Ok((pairs, stats))
    }

    pub fn process_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<ConversationResult, PipelineError> {
        let (pairs, stats) = self.process(&conversation.messages)?;
        debug!(
            conversation = %conversation.id,
            raw = stats.raw_messages,
            kept = stats.kept_messages,
            turns = stats.turns,
            pairs = stats.pairs,
            "processed conversation"
        );
        Ok(ConversationResult {
            conversation_id: conversation.id.clone(),
            pairs,
            stats,
        })
    }
}

/// Build the training pairs for one conversation's time-sorted messages.
pub fn build_training_pairs(
    messages: &[RawMessage],
    config: &PipelineConfig,
    now: DateTime<Utc>,
) -> Result<Vec<TrainingPair>, PipelineError> {
    let pipeline = ConversationPipeline::new(config, now)?;
    pipeline.process(messages).map(|(pairs, _)| pairs)
}

/// Process all conversations in parallel.
///
/// Results keep the input order. A conversation that violates the ordering
/// contract is logged and counted, and the rest still run.
pub fn process_all_conversations(
    conversations: &[Conversation],
    pipeline: &ConversationPipeline,
) -> BatchResult {
    let total = conversations.len();
    let processed_count = AtomicUsize::new(0);
    let error_count = AtomicUsize::new(0);

    let results: Vec<ConversationResult> = conversations
        .par_iter()
        .filter_map(|conversation| {
            let result = pipeline.process_conversation(conversation);
            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 || count == total {
                info!("Processed {}/{} conversations...", count, total);
            }

            match result {
                Ok(result) => Some(result),
                Err(e) => {
                    error_count.fetch_add(1, Ordering::Relaxed);
                    warn!(conversation = %conversation.id, error = %e, "skipping conversation");
                    None
                }
            }
        })
        .collect();

    let mut stats = PipelineStats::default();
    for result in &results {
        stats.merge(&result.stats);
    }

    let failed_conversations = error_count.load(Ordering::Relaxed);
    if failed_conversations > 0 {
        warn!("{} conversations failed to process", failed_conversations);
    }

    BatchResult {
        results,
        stats,
        failed_conversations,
    }
}

/// The final list of pairs plus what assembly removed.
#[derive(Debug, Default)]
pub struct Dataset {
    pub pairs: Vec<TrainingPair>,
    pub small_conversations_dropped: usize,
    pub empty_pairs_removed: usize,
    pub duplicates_removed: usize,
}

/// Concatenate per-conversation pairs in order, applying the dataset-level
/// rules: minimum pairs per conversation, no empty fields, optional dedupe.
pub fn assemble_dataset(results: Vec<ConversationResult>, config: &PipelineConfig) -> Dataset {
    let mut dataset = Dataset::default();
    let mut seen: HashSet<TrainingPair> = HashSet::new();

    for result in results {
        if result.pairs.len() < config.min_pairs_per_conversation {
            dataset.small_conversations_dropped += 1;
            continue;
        }
        for pair in result.pairs {
            if pair.input.trim().is_empty() || pair.output.trim().is_empty() {
                dataset.empty_pairs_removed += 1;
                continue;
            }
            if config.dedupe_pairs && !seen.insert(pair.clone()) {
                dataset.duplicates_removed += 1;
                continue;
            }
            dataset.pairs.push(pair);
        }
    }

    dataset
}

/// Write pairs as CSV with an `input,output` header. Fields containing the
/// delimiter, quotes or newlines are quoted.
pub fn write_pairs<W: Write>(writer: W, pairs: &[TrainingPair]) -> Result<(), OutputError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    writer.write_record(["input", "output"])?;
    for pair in pairs {
        writer.serialize(pair)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_pairs_csv(path: &Path, pairs: &[TrainingPair]) -> Result<(), OutputError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_pairs(std::io::BufWriter::new(file), pairs)
}

/// Character-length statistics over a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub total_examples: usize,
    pub avg_input_chars: f64,
    pub avg_output_chars: f64,
    pub min_input_chars: usize,
    pub max_input_chars: usize,
    pub min_output_chars: usize,
    pub max_output_chars: usize,
}

impl DatasetSummary {
    pub fn from_pairs(pairs: &[TrainingPair]) -> Self {
        if pairs.is_empty() {
            return Self::default();
        }
        let inputs: Vec<usize> = pairs.iter().map(|p| p.input.chars().count()).collect();
        let outputs: Vec<usize> = pairs.iter().map(|p| p.output.chars().count()).collect();
        let n = pairs.len() as f64;
        Self {
            total_examples: pairs.len(),
            avg_input_chars: inputs.iter().sum::<usize>() as f64 / n,
            avg_output_chars: outputs.iter().sum::<usize>() as f64 / n,
            min_input_chars: inputs.iter().copied().min().unwrap_or(0),
            max_input_chars: inputs.iter().copied().max().unwrap_or(0),
            min_output_chars: outputs.iter().copied().min().unwrap_or(0),
            max_output_chars: outputs.iter().copied().max().unwrap_or(0),
        }
    }
}
