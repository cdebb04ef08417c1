//! Read-only access to the macOS Messages `chat.db` store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags};
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::helpers::{apple_time_to_utc, utc_to_apple_nanos, LEGACY_SECONDS_THRESHOLD};
use crate::message::{MessageBody, RawMessage};
use crate::source::Conversation;
use crate::MessageSource;

const PARTICIPANTS_QUERY: &str = "
    SELECT c.ROWID AS chat_id, GROUP_CONCAT(h.id, ',') AS participants
    FROM chat c
    JOIN chat_handle_join chj ON c.ROWID = chj.chat_id
    JOIN handle h ON chj.handle_id = h.ROWID
    GROUP BY c.ROWID
    ORDER BY c.ROWID";

/// `~/Library/Messages/chat.db`
pub fn default_chat_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join("Library").join("Messages").join("chat.db")
}

/// Reads conversations from a Messages database, grouping chats that share
/// the same participant set.
pub struct ChatDbSource {
    conn: Connection,
    include_group_chats: bool,
}

impl ChatDbSource {
    /// Open the store read-only. Fails before any processing when the file is
    /// missing or the process lacks permission to read it.
    pub fn open(path: &Path, include_group_chats: bool) -> Result<Self, SourceError> {
        if !path.exists() {
            return Err(SourceError::NotFound(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| access_error(path, e))?;

        // SQLite opens lazily; touch the schema so permission problems surface here.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|e| access_error(path, e))?;

        info!(path = %path.display(), "opened message store");
        Ok(Self::from_connection(conn, include_group_chats))
    }

    pub fn from_connection(conn: Connection, include_group_chats: bool) -> Self {
        Self {
            conn,
            include_group_chats,
        }
    }

    /// Chat ids grouped by their sorted participant handles, in order of the
    /// first chat seen for each group.
    fn participant_groups(&self) -> Result<Vec<(Vec<String>, Vec<i64>)>, SourceError> {
        let mut stmt = self.conn.prepare(PARTICIPANTS_QUERY)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut groups: Vec<(Vec<String>, Vec<i64>)> = Vec::new();
        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        for row in rows {
            let (chat_id, participants) = row?;
            let Some(participants) = participants else {
                continue;
            };
            let mut key: Vec<String> = participants.split(',').map(str::to_string).collect();
            key.sort();
            key.dedup();
            match index.get(&key) {
                Some(&i) => groups[i].1.push(chat_id),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![chat_id]));
                }
            }
        }
        Ok(groups)
    }

    /// All messages of the given chats, merged and sorted by timestamp.
    fn messages_for(
        &self,
        chat_ids: &[i64],
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawMessage>, SourceError> {
        if chat_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; chat_ids.len()].join(",");
        let mut params: Vec<i64> = chat_ids.to_vec();
        let date_filter = match cutoff {
            Some(cutoff) => {
                params.push(utc_to_apple_nanos(cutoff));
                // Legacy second-resolution rows pass through; the normalizer applies the window.
                format!("AND (m.date >= ? OR m.date < {})", LEGACY_SECONDS_THRESHOLD)
            }
            None => String::new(),
        };
        let query = format!(
            "SELECT DISTINCT m.ROWID, m.text, m.attributedBody, m.date, m.is_from_me,
                    h.id, m.cache_has_attachments
             FROM message m
             LEFT JOIN handle h ON m.handle_id = h.ROWID
             INNER JOIN chat_message_join cmj ON m.ROWID = cmj.message_id
             WHERE cmj.chat_id IN ({}) {}
             ORDER BY m.date ASC, m.ROWID ASC",
            placeholders, date_filter
        );

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<bool>>(6)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (rowid, text, attributed_body, date, is_from_me, handle, has_attachments) = row?;
            let Some(timestamp) = apple_time_to_utc(date) else {
                warn!(rowid, date, "skipping message with invalid timestamp");
                continue;
            };
            messages.push(RawMessage {
                body: MessageBody::from_columns(text, attributed_body),
                timestamp,
                sender_id: handle,
                is_from_owner: is_from_me,
                has_attachment: has_attachments.unwrap_or(false),
            });
        }

        // Mixed legacy and nanosecond dates do not sort correctly in SQL.
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }
}

impl MessageSource for ChatDbSource {
    fn load_conversations(
        &self,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<Conversation>, SourceError> {
        let mut groups = self.participant_groups()?;
        let total = groups.len();
        if !self.include_group_chats {
            groups.retain(|(participants, _)| participants.len() == 1);
            info!(
                kept = groups.len(),
                total, "filtered for one-to-one conversations"
            );
        }

        let mut conversations = Vec::with_capacity(groups.len());
        for (participants, chat_ids) in groups {
            let messages = self.messages_for(&chat_ids, cutoff)?;
            debug!(
                participants = %participants.join(", "),
                chats = chat_ids.len(),
                messages = messages.len(),
                "loaded conversation"
            );
            if messages.is_empty() {
                continue;
            }
            conversations.push(Conversation {
                id: participants.join(", "),
                participants,
                messages,
            });
        }
        Ok(conversations)
    }
}

fn access_error(path: &Path, err: rusqlite::Error) -> SourceError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                ErrorCode::CannotOpen | ErrorCode::PermissionDenied | ErrorCode::AuthorizationForStatementDenied
            ) =>
        {
            SourceError::PermissionDenied {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        }
        _ => SourceError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::{typedstream_fixture, APPLE_EPOCH_OFFSET_SECS};
    use rusqlite::params;
    use tempfile::TempDir;

    const SCHEMA: &str = "
        CREATE TABLE handle (ROWID INTEGER PRIMARY KEY, id TEXT NOT NULL);
        CREATE TABLE chat (ROWID INTEGER PRIMARY KEY, guid TEXT);
        CREATE TABLE chat_handle_join (chat_id INTEGER, handle_id INTEGER);
        CREATE TABLE message (
            ROWID INTEGER PRIMARY KEY,
            text TEXT,
            attributedBody BLOB,
            date INTEGER,
            is_from_me INTEGER,
            handle_id INTEGER,
            cache_has_attachments INTEGER DEFAULT 0
        );
        CREATE TABLE chat_message_join (chat_id INTEGER, message_id INTEGER);";

    /// Unix seconds -> store nanoseconds.
    fn apple_nanos(unix_secs: i64) -> i64 {
        (unix_secs - APPLE_EPOCH_OFFSET_SECS) * 1_000_000_000
    }

    fn insert_message(
        conn: &Connection,
        chat_id: i64,
        text: Option<&str>,
        body: Option<Vec<u8>>,
        unix_secs: i64,
        from_me: bool,
        handle_id: i64,
    ) {
        conn.execute(
            "INSERT INTO message (text, attributedBody, date, is_from_me, handle_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![text, body, apple_nanos(unix_secs), from_me, handle_id],
        )
        .unwrap();
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO chat_message_join (chat_id, message_id) VALUES (?1, ?2)",
            params![chat_id, id],
        )
        .unwrap();
    }

    /// Alice has two chats (SMS and iMessage); Bob and Carol share a group chat.
    fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute_batch(
            "INSERT INTO handle (ROWID, id) VALUES (1, 'alice@example.com'), (2, 'bob@example.com'), (3, 'carol@example.com');
             INSERT INTO chat (ROWID, guid) VALUES (1, 'sms'), (2, 'imessage'), (3, 'group');
             INSERT INTO chat_handle_join VALUES (1, 1), (2, 1), (3, 2), (3, 3);",
        )
        .unwrap();

        insert_message(&conn, 2, Some("later on imessage"), None, 1_700_000_100, false, 1);
        insert_message(&conn, 1, Some("hi from sms"), None, 1_700_000_000, false, 1);
        insert_message(&conn, 1, None, Some(typedstream_fixture("reply")), 1_700_000_050, true, 1);
        insert_message(&conn, 3, Some("group hello"), None, 1_700_000_000, false, 2);
        conn
    }

    #[test]
    fn test_groups_chats_by_participants() {
        let source = ChatDbSource::from_connection(fixture(), false);
        let conversations = source.load_conversations(None).unwrap();
        assert_eq!(conversations.len(), 1);

        let alice = &conversations[0];
        assert_eq!(alice.participants, vec!["alice@example.com"]);
        let timestamps: Vec<i64> = alice.messages.iter().map(|m| m.timestamp.timestamp()).collect();
        assert_eq!(timestamps, vec![1_700_000_000, 1_700_000_050, 1_700_000_100]);
        assert!(alice.messages[1].is_from_owner);
        assert!(matches!(alice.messages[1].body, MessageBody::Encoded(_)));
        assert_eq!(alice.messages[0].sender_id.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_includes_group_chats_when_asked() {
        let source = ChatDbSource::from_connection(fixture(), true);
        let conversations = source.load_conversations(None).unwrap();
        assert_eq!(conversations.len(), 2);
        assert!(conversations[1].is_group());
        assert_eq!(
            conversations[1].participants,
            vec!["bob@example.com", "carol@example.com"]
        );
    }

    #[test]
    fn test_cutoff_is_pushed_into_query() {
        let source = ChatDbSource::from_connection(fixture(), false);
        let cutoff = DateTime::from_timestamp(1_700_000_060, 0).unwrap();
        let conversations = source.load_conversations(Some(cutoff)).unwrap();
        assert_eq!(conversations[0].messages.len(), 1);
    }

    #[test]
    fn test_open_missing_file() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("chat.db");
        assert!(matches!(
            ChatDbSource::open(&missing, false),
            Err(SourceError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_reads_file_read_only() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chat.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(SCHEMA).unwrap();
        }
        let source = ChatDbSource::open(&path, false).unwrap();
        assert!(source.load_conversations(None).unwrap().is_empty());
        assert!(source
            .conn
            .execute("INSERT INTO handle (id) VALUES ('x')", [])
            .is_err());
    }
}
