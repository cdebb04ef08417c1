//! Conversations exported as CSV files, one file per conversation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::SourceError;
use crate::message::{MessageBody, RawMessage};
use crate::source::Conversation;
use crate::MessageSource;

/// A row from an exported conversation file.
#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    sender: Option<String>,
    is_from_owner: String,
    text: Option<String>,
    #[serde(default)]
    has_attachment: Option<String>,
}

/// Discover all CSV files in a directory.
pub fn discover_csv_files(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "csv"))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    paths
}

/// Reads every `*.csv` under a root directory as one conversation with columns
/// `timestamp,sender,is_from_owner,text,has_attachment`.
pub struct CsvExportSource {
    root: PathBuf,
}

impl CsvExportSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Read one export file. Rows are sorted by timestamp.
    pub fn read_conversation(path: &Path) -> Result<Conversation, SourceError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut messages = Vec::new();
        let mut participants = BTreeSet::new();

        for (line, result) in reader.deserialize().enumerate() {
            let row: CsvRow = result?;
            let invalid = |reason: String| SourceError::InvalidRecord {
                path: path.to_path_buf(),
                reason: format!("row {}: {}", line + 1, reason),
            };

            let timestamp = DateTime::parse_from_rfc3339(row.timestamp.trim())
                .map_err(|e| invalid(format!("bad timestamp {:?}: {}", row.timestamp, e)))?
                .with_timezone(&Utc);
            let is_from_owner = parse_flag(&row.is_from_owner)
                .ok_or_else(|| invalid(format!("bad is_from_owner {:?}", row.is_from_owner)))?;
            let has_attachment = match row.has_attachment.as_deref() {
                None | Some("") => false,
                Some(value) => parse_flag(value)
                    .ok_or_else(|| invalid(format!("bad has_attachment {:?}", value)))?,
            };

            let sender_id = row.sender.filter(|s| !s.is_empty());
            if !is_from_owner {
                if let Some(sender) = &sender_id {
                    participants.insert(sender.clone());
                }
            }

            messages.push(RawMessage {
                body: MessageBody::from_columns(row.text, None),
                timestamp,
                sender_id,
                is_from_owner,
                has_attachment,
            });
        }

        messages.sort_by_key(|m| m.timestamp);

        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Ok(Conversation {
            id,
            participants: participants.into_iter().collect(),
            messages,
        })
    }
}

impl MessageSource for CsvExportSource {
    /// The lookback window is applied by the normalizer, not here.
    fn load_conversations(
        &self,
        _cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<Conversation>, SourceError> {
        let files = discover_csv_files(&self.root);
        if files.is_empty() {
            return Err(SourceError::NotFound(self.root.clone()));
        }

        let total = files.len();
        let mut conversations = Vec::with_capacity(total);
        for path in files {
            match Self::read_conversation(&path) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping export file"),
            }
        }
        info!(
            loaded = conversations.len(),
            total, "read conversation exports"
        );
        Ok(conversations)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const HEADER: &str = "timestamp,sender,is_from_owner,text,has_attachment";

    #[test]
    fn test_discover_csv_files() {
        let temp = TempDir::new().unwrap();
        let csv1 = temp.path().join("alice.csv");
        let csv2 = temp.path().join("archive/bob.csv");

        std::fs::create_dir_all(temp.path().join("archive")).unwrap();
        std::fs::write(&csv1, "header\n").unwrap();
        std::fs::write(&csv2, "header\n").unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored\n").unwrap();

        let files = discover_csv_files(temp.path());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_read_conversation_sorts_rows() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("alice.csv");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        writeln!(file, "2024-01-01T10:00:05Z,,true,hey,").unwrap();
        writeln!(file, "2024-01-01T10:00:00Z,alice,false,hi,0").unwrap();
        writeln!(file, "2024-01-01T10:00:01Z,alice,false,\"there, you\",no").unwrap();
        writeln!(file, "2024-01-01T10:00:09Z,alice,false,,1").unwrap();
        drop(file);

        let conversation = CsvExportSource::read_conversation(&path).unwrap();
        assert_eq!(conversation.id, "alice");
        assert_eq!(conversation.participants, vec!["alice"]);
        assert_eq!(conversation.messages.len(), 4);
        assert_eq!(
            conversation.messages[1].body,
            MessageBody::Plain("there, you".to_string())
        );
        assert!(conversation.messages[2].is_from_owner);
        assert_eq!(conversation.messages[2].sender_id, None);
        assert_eq!(conversation.messages[3].body, MessageBody::Empty);
        assert!(conversation.messages[3].has_attachment);
    }

    #[test]
    fn test_bad_timestamp_is_invalid_record() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.csv");
        std::fs::write(&path, format!("{}\nyesterday,alice,false,hi,0\n", HEADER)).unwrap();

        let err = CsvExportSource::read_conversation(&path).unwrap_err();
        assert!(matches!(err, SourceError::InvalidRecord { .. }));
    }

    #[test]
    fn test_load_skips_broken_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("good.csv"),
            format!("{}\n2024-01-01T10:00:00Z,alice,false,hello,0\n", HEADER),
        )
        .unwrap();
        std::fs::write(
            temp.path().join("bad.csv"),
            format!("{}\n2024-01-01T10:00:00Z,alice,maybe,hello,0\n", HEADER),
        )
        .unwrap();

        let source = CsvExportSource::new(temp.path());
        let conversations = source.load_conversations(None).unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, "good");
    }

    #[test]
    fn test_empty_root_is_not_found() {
        let temp = TempDir::new().unwrap();
        let source = CsvExportSource::new(temp.path());
        assert!(matches!(
            source.load_conversations(None),
            Err(SourceError::NotFound(_))
        ));
    }
}
