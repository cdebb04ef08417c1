//! CLI tool for turning message history into fine-tuning pairs.
//!
//! Reads conversations from the Messages `chat.db` store (or a directory of
//! CSV exports), runs the turn-pairing pipeline and writes an `input,output`
//! CSV suitable for supervised fine-tuning.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};

use chat_pairs_core::{
    assemble_dataset, pipeline::PipelineStats, process_all_conversations, source::default_chat_db_path,
    write_pairs_csv, ChatDbSource, ConversationPipeline, CsvExportSource, DatasetSummary,
    MessageSource, PipelineConfig,
};

/// Build (previous turn, reply) training pairs from message history.
#[derive(Parser, Debug)]
#[command(name = "chat-pairs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the Messages database (default: ~/Library/Messages/chat.db)
    #[arg(long, conflicts_with = "csv_root")]
    db: Option<PathBuf>,

    /// Read conversations from CSV exports under this directory instead
    #[arg(long)]
    csv_root: Option<PathBuf>,

    /// Output CSV file
    #[arg(long, default_value = "training_data.csv")]
    output: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only process messages from the last N days
    #[arg(long, conflicts_with = "all_history")]
    days_back: Option<u32>,

    /// Process the whole history
    #[arg(long)]
    all_history: bool,

    /// Include conversations with more than one other participant
    #[arg(long)]
    include_group_chats: bool,

    /// Maximum gap between messages of the same turn
    #[arg(long)]
    max_turn_gap_seconds: Option<i64>,

    /// Minimum message length in characters
    #[arg(long)]
    min_message_length: Option<usize>,

    /// Maximum message length in characters
    #[arg(long)]
    max_message_length: Option<usize>,

    /// Input value for pairs without a preceding contact turn
    #[arg(long)]
    starter_token: Option<String>,

    /// Keep duplicate (input, output) pairs
    #[arg(long)]
    keep_duplicates: bool,

    /// Write run configuration and statistics as JSON to this file
    #[arg(long)]
    metadata: Option<PathBuf>,
}

/// Contents of the TOML configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    pipeline: PipelineConfig,
    source: SourceSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SourceSettings {
    db_path: Option<PathBuf>,
    include_group_chats: bool,
}

impl FileConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid config TOML at {}", path.display()))
    }
}

/// Command-line flags win over the configuration file.
fn apply_overrides(config: &mut PipelineConfig, args: &Args) {
    if args.all_history {
        config.days_back = None;
    } else if let Some(days) = args.days_back {
        config.days_back = Some(days);
    }
    if let Some(gap) = args.max_turn_gap_seconds {
        config.max_turn_gap_seconds = gap;
    }
    if let Some(min) = args.min_message_length {
        config.min_message_length = min;
    }
    if let Some(max) = args.max_message_length {
        config.max_message_length = max;
    }
    if let Some(token) = &args.starter_token {
        config.conversation_starter_token = token.clone();
    }
    if args.keep_duplicates {
        config.dedupe_pairs = false;
    }
}

fn open_source(args: &Args, file: &SourceSettings) -> Result<Box<dyn MessageSource>> {
    if let Some(root) = &args.csv_root {
        info!(root = %root.display(), "reading CSV exports");
        return Ok(Box::new(CsvExportSource::new(root)));
    }
    let db_path = args
        .db
        .clone()
        .or_else(|| file.db_path.clone())
        .unwrap_or_else(default_chat_db_path);
    let source = ChatDbSource::open(&db_path, args.include_group_chats || file.include_group_chats)
        .with_context(|| format!("Cannot read message store at {}", db_path.display()))?;
    Ok(Box::new(source))
}

fn log_stats(stats: &PipelineStats) {
    info!(
        raw = stats.raw_messages,
        outside_window = stats.outside_window,
        no_text = stats.no_text,
        undecodable = stats.undecodable,
        junk = stats.junk_messages(),
        tapbacks = stats.tapbacks,
        placeholders = stats.placeholders,
        too_short = stats.too_short,
        too_long = stats.too_long,
        kept = stats.kept_messages,
        turns = stats.turns,
        owner_turns = stats.owner_turns,
        pairs = stats.pairs,
        "pipeline statistics"
    );
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let file_config = FileConfig::load(args.config.as_deref())?;
    let mut config = file_config.pipeline;
    apply_overrides(&mut config, &args);

    let pipeline = ConversationPipeline::new(&config, Utc::now())?;
    match pipeline.cutoff() {
        Some(cutoff) => info!(
            "Processing messages from {} onwards (last {} days)",
            cutoff.format("%Y-%m-%d"),
            pipeline.config().days_back.unwrap_or_default()
        ),
        None => info!("Processing all messages (no date limit)"),
    }

    let source = open_source(&args, &file_config.source)?;
    let conversations = source.load_conversations(pipeline.cutoff())?;
    let group_chats = conversations.iter().filter(|c| c.is_group()).count();
    info!(
        group_chats,
        "Found {} conversations to process",
        conversations.len()
    );

    let batch = process_all_conversations(&conversations, &pipeline);
    log_stats(&batch.stats);

    let total_conversations = batch.results.len();
    let dataset = assemble_dataset(batch.results, pipeline.config());
    info!(
        small_conversations_dropped = dataset.small_conversations_dropped,
        empty_pairs_removed = dataset.empty_pairs_removed,
        duplicates_removed = dataset.duplicates_removed,
        "assembled dataset"
    );

    if dataset.pairs.is_empty() {
        error!("No training examples were generated; check the statistics above");
        bail!("no training examples generated");
    }

    write_pairs_csv(&args.output, &dataset.pairs)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    let summary = DatasetSummary::from_pairs(&dataset.pairs);
    info!("Saved {} training examples to {:?}", summary.total_examples, args.output);
    info!(
        "  Average input length: {:.1} characters",
        summary.avg_input_chars
    );
    info!(
        "  Average output length: {:.1} characters",
        summary.avg_output_chars
    );
    info!(
        "  Input length range: {}-{} characters",
        summary.min_input_chars, summary.max_input_chars
    );
    info!(
        "  Output length range: {}-{} characters",
        summary.min_output_chars, summary.max_output_chars
    );

    if let Some(metadata_path) = &args.metadata {
        let metadata = serde_json::json!({
            "config": pipeline.config(),
            "counts": {
                "conversations_loaded": conversations.len(),
                "conversations_processed": total_conversations,
                "conversations_failed": batch.failed_conversations,
                "small_conversations_dropped": dataset.small_conversations_dropped,
                "empty_pairs_removed": dataset.empty_pairs_removed,
                "duplicates_removed": dataset.duplicates_removed,
            },
            "stats": batch.stats,
            "summary": summary,
            "files": {
                "output_path": args.output.to_string_lossy(),
            },
        });
        std::fs::write(metadata_path, serde_json::to_string_pretty(&metadata)?)
            .with_context(|| format!("Failed to write {}", metadata_path.display()))?;
        info!("Metadata: {:?}", metadata_path);
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_pairs=info,chat_pairs_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
