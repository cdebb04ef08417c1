//! Message sources: where conversations come from before the pipeline runs.

mod chat_db;
mod csv_export;

pub use chat_db::{default_chat_db_path, ChatDbSource};
pub use csv_export::{discover_csv_files, CsvExportSource};

use crate::message::RawMessage;

/// One logical conversation: every message exchanged with a participant set,
/// sorted by timestamp.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<String>,
    pub messages: Vec<RawMessage>,
}

impl Conversation {
    pub fn is_group(&self) -> bool {
        self.participants.len() > 1
    }
}
