//! Interaction log and feedback correlation.
//!
//! Every answered question becomes one row of the `chathistory` table, keyed by
//! the moment the question was submitted. A later thumbs up/down is joined back
//! to that row by the same key and fills in its `good` or `bad` column.

use crate::error::{KingbotError, Result};
use crate::session::PendingInteraction;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chathistory (
    timestamp TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    time TEXT NOT NULL,
    session_id TEXT NOT NULL,
    query TEXT NOT NULL,
    answer TEXT NOT NULL,
    good TEXT,
    bad TEXT,
    spare1 TEXT,
    spare2 TEXT,
    reference TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_chathistory_session ON chathistory(session_id);
"#;

/// A user's verdict on an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Good,
    Bad,
    None,
}

impl Rating {
    /// Map a thumbs glyph (or its name) onto a rating. No glyph means no rating.
    pub fn from_glyph(glyph: Option<&str>) -> Result<Self> {
        let Some(glyph) = glyph.map(str::trim).filter(|g| !g.is_empty()) else {
            return Ok(Rating::None);
        };
        match glyph {
            "👍" | "good" | "up" | "thumbs_up" => Ok(Rating::Good),
            "👎" | "bad" | "down" | "thumbs_down" => Ok(Rating::Bad),
            other => Err(KingbotError::InvalidInput(format!(
                "Unknown feedback rating: {}",
                other
            ))),
        }
    }

    /// Log column the comment is written to.
    pub fn column(self) -> Option<&'static str> {
        match self {
            Rating::Good => Some("good"),
            Rating::Bad => Some("bad"),
            Rating::None => None,
        }
    }
}

/// Feedback as submitted from the widget.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackEvent {
    /// Timestamp key of the answer being rated.
    pub key: String,
    /// 👍 or 👎.
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Feedback resolved against the log.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRecord {
    pub timestamp: String,
    pub rating: Rating,
    pub comment: String,
}

impl TryFrom<FeedbackEvent> for FeedbackRecord {
    type Error = KingbotError;

    fn try_from(event: FeedbackEvent) -> Result<Self> {
        Ok(Self {
            rating: Rating::from_glyph(event.rating.as_deref())?,
            comment: event.comment.as_deref().map(str::trim).unwrap_or_default().to_string(),
            timestamp: event.key,
        })
    }
}

/// One answered question, ready to be logged.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRow {
    pub timestamp: String,
    pub date: String,
    pub time: String,
    pub session_id: String,
    pub query: String,
    pub answer: String,
    pub reference: String,
}

impl InteractionRow {
    pub fn new(
        session_id: Uuid,
        interaction: &PendingInteraction,
        answer: &str,
        reference: &str,
    ) -> Self {
        Self {
            timestamp: interaction.moment_key(),
            date: interaction.moment.format("%Y-%m-%d").to_string(),
            time: interaction.moment.format("%H:%M:%S").to_string(),
            session_id: session_id.to_string(),
            query: interaction.logged_query(),
            answer: answer.to_string(),
            reference: reference.to_string(),
        }
    }
}

/// A logged row together with its feedback columns.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedInteraction {
    pub row: InteractionRow,
    pub good: Option<String>,
    pub bad: Option<String>,
}

/// Persistent store of answered questions.
#[async_trait]
pub trait InteractionLog: Send + Sync {
    /// Record an answered question with empty feedback.
    async fn insert(&self, row: &InteractionRow) -> Result<()>;

    /// Write feedback onto the row with the record's timestamp.
    ///
    /// Never inserts. Returns whether a row was updated; rows that already
    /// carry feedback and unknown keys are left alone.
    async fn apply_feedback(&self, record: &FeedbackRecord) -> Result<bool>;
}

/// `chathistory` table in SQLite.
pub struct SqliteInteractionLog {
    conn: Mutex<Connection>,
}

impl SqliteInteractionLog {
    /// Open (or create) the log database.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened interaction log at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory log (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KingbotError::Log(format!("Failed to acquire lock: {}", e)))
    }

    /// Fetch a row by timestamp key.
    pub fn get(&self, timestamp: &str) -> Result<Option<LoggedInteraction>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                r#"
                SELECT timestamp, date, time, session_id, query, answer, reference, good, bad
                FROM chathistory
                WHERE timestamp = ?1
                "#,
                params![timestamp],
                |row| {
                    Ok(LoggedInteraction {
                        row: InteractionRow {
                            timestamp: row.get(0)?,
                            date: row.get(1)?,
                            time: row.get(2)?,
                            session_id: row.get(3)?,
                            query: row.get(4)?,
                            answer: row.get(5)?,
                            reference: row.get(6)?,
                        },
                        good: row.get(7)?,
                        bad: row.get(8)?,
                    })
                },
            )
            .optional()?;

        Ok(row)
    }

    /// Number of logged rows.
    pub fn row_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chathistory", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl InteractionLog for SqliteInteractionLog {
    #[instrument(skip(self, row), fields(timestamp = %row.timestamp))]
    async fn insert(&self, row: &InteractionRow) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO chathistory
            (timestamp, date, time, session_id, query, answer, good, bad, spare1, spare2, reference)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, NULL, NULL, ?7)
            "#,
            params![
                row.timestamp,
                row.date,
                row.time,
                row.session_id,
                row.query,
                row.answer,
                row.reference,
            ],
        )?;

        debug!("Logged interaction");
        Ok(())
    }

    #[instrument(skip(self, record), fields(timestamp = %record.timestamp, rating = ?record.rating))]
    async fn apply_feedback(&self, record: &FeedbackRecord) -> Result<bool> {
        let Some(column) = record.rating.column() else {
            debug!("No rating given, nothing to record");
            return Ok(false);
        };

        let conn = self.lock()?;

        // `column` comes from a fixed set of names
        let sql = format!(
            "UPDATE chathistory SET {} = ?1 WHERE timestamp = ?2 AND good IS NULL AND bad IS NULL",
            column
        );
        let updated = conn.execute(&sql, params![record.comment, record.timestamp])?;

        if updated == 0 {
            warn!("Feedback matched no unrated row");
        } else {
            info!("Recorded {} feedback", column);
        }
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn interaction(second: u32, query: &str, chip: Option<&str>) -> PendingInteraction {
        PendingInteraction {
            moment: Local.with_ymd_and_hms(2026, 10, 19, 9, 30, second).unwrap(),
            query: query.to_string(),
            chip: chip.map(str::to_string),
        }
    }

    fn feedback(key: &str, rating: Option<&str>, comment: Option<&str>) -> FeedbackRecord {
        FeedbackRecord::try_from(FeedbackEvent {
            key: key.to_string(),
            rating: rating.map(str::to_string),
            comment: comment.map(str::to_string),
        })
        .unwrap()
    }

    async fn seeded_log() -> (SqliteInteractionLog, Vec<String>) {
        let log = SqliteInteractionLog::in_memory().unwrap();
        let session = Uuid::new_v4();
        let mut keys = Vec::new();
        for (second, query) in [(1, "Where can I print?"), (2, "Can I borrow a laptop?")] {
            let row = InteractionRow::new(session, &interaction(second, query, None), "answer", "");
            log.insert(&row).await.unwrap();
            keys.push(row.timestamp);
        }
        (log, keys)
    }

    #[test]
    fn test_rating_glyphs() {
        assert_eq!(Rating::from_glyph(Some("👍")).unwrap(), Rating::Good);
        assert_eq!(Rating::from_glyph(Some("👎")).unwrap(), Rating::Bad);
        assert_eq!(Rating::from_glyph(Some("thumbs_up")).unwrap(), Rating::Good);
        assert_eq!(Rating::from_glyph(None).unwrap(), Rating::None);
        assert_eq!(Rating::from_glyph(Some(" ")).unwrap(), Rating::None);
        assert!(Rating::from_glyph(Some("🤷")).is_err());

        assert_eq!(Rating::Good.column(), Some("good"));
        assert_eq!(Rating::Bad.column(), Some("bad"));
        assert_eq!(Rating::None.column(), None);
    }

    #[test]
    fn test_comment_is_trimmed_or_empty() {
        let record = feedback("k", Some("👍"), Some("  great \n"));
        assert_eq!(record.comment, "great");

        let record = feedback("k", Some("👎"), None);
        assert_eq!(record.comment, "");
    }

    #[test]
    fn test_row_fields_from_interaction() {
        let session = Uuid::new_v4();
        let row = InteractionRow::new(
            session,
            &interaction(5, "What are the library hours?", Some("hours")),
            "See the hours page.",
            "https://library.sjsu.edu/library-hours/library-hours",
        );

        assert_eq!(row.timestamp, "2026-10-19T09:30:05.000000");
        assert_eq!(row.date, "2026-10-19");
        assert_eq!(row.time, "09:30:05");
        assert_eq!(row.session_id, session.to_string());
        assert_eq!(row.query, "What are the library hours? (hours)");
    }

    #[tokio::test]
    async fn test_thumbs_up_updates_only_matching_row() {
        let (log, keys) = seeded_log().await;

        let updated = log
            .apply_feedback(&feedback(&keys[0], Some("👍"), Some("great")))
            .await
            .unwrap();
        assert!(updated);

        let rated = log.get(&keys[0]).unwrap().unwrap();
        assert_eq!(rated.good.as_deref(), Some("great"));
        assert_eq!(rated.bad, None);

        let untouched = log.get(&keys[1]).unwrap().unwrap();
        assert_eq!(untouched.good, None);
        assert_eq!(untouched.bad, None);
        assert_eq!(log.row_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_thumbs_down_without_comment_sets_empty_string() {
        let (log, keys) = seeded_log().await;

        log.apply_feedback(&feedback(&keys[1], Some("👎"), None))
            .await
            .unwrap();

        let rated = log.get(&keys[1]).unwrap().unwrap();
        assert_eq!(rated.bad.as_deref(), Some(""));
        assert_eq!(rated.good, None);
    }

    #[tokio::test]
    async fn test_feedback_never_inserts() {
        let (log, _) = seeded_log().await;

        let updated = log
            .apply_feedback(&feedback("2001-01-01T00:00:00.000000", Some("👍"), Some("hi")))
            .await
            .unwrap();
        assert!(!updated);
        assert_eq!(log.row_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_feedback_applies_at_most_once() {
        let (log, keys) = seeded_log().await;

        assert!(log
            .apply_feedback(&feedback(&keys[0], Some("👍"), Some("first")))
            .await
            .unwrap());
        assert!(!log
            .apply_feedback(&feedback(&keys[0], Some("👎"), Some("second")))
            .await
            .unwrap());

        let rated = log.get(&keys[0]).unwrap().unwrap();
        assert_eq!(rated.good.as_deref(), Some("first"));
        assert_eq!(rated.bad, None);
    }

    #[tokio::test]
    async fn test_absent_rating_updates_nothing() {
        let (log, keys) = seeded_log().await;

        let updated = log
            .apply_feedback(&feedback(&keys[0], None, Some("just a note")))
            .await
            .unwrap();
        assert!(!updated);

        let row = log.get(&keys[0]).unwrap().unwrap();
        assert_eq!(row.good, None);
        assert_eq!(row.bad, None);
    }

    #[tokio::test]
    async fn test_duplicate_timestamp_is_an_error() {
        let log = SqliteInteractionLog::in_memory().unwrap();
        let row = InteractionRow::new(Uuid::new_v4(), &interaction(1, "q", None), "a", "");
        log.insert(&row).await.unwrap();
        assert!(matches!(
            log.insert(&row).await,
            Err(KingbotError::Database(_))
        ));
    }
}
