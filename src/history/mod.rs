//! Sqlite-backed brief history.
//!
//! Append-only log of generated briefs keyed by user. The pipeline never
//! touches this store directly: the caller loads history before a run and
//! appends the result after the run returns.
//!
//! Canonical ordering: [`HistoryStore::recent_briefs`] returns entries
//! oldest-first (most recent last), matching the order the pipeline state
//! expects when it slices "last N" from the end.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::types::{BriefRequest, FinalBrief};

/// History store errors.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// SQLite failure.
    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored row no longer deserializes.
    #[error("stored brief is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// One row of the listing view, newest first.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Brief topic.
    pub topic: String,
    /// Depth the brief was requested at.
    pub depth: String,
    /// Whether the request was a follow-up.
    pub follow_up: bool,
    /// Row creation timestamp (UTC, sqlite `datetime('now')` format).
    pub created_at: String,
}

/// Append-only brief log over a sqlite pool.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    /// Open (or create) the history database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] if the file cannot be opened or
    /// the schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(path = %path.as_ref().display(), "history store opened");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), HistoryError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                 user_id TEXT PRIMARY KEY,
                 created_at TEXT NOT NULL DEFAULT (datetime('now')),
                 last_activity TEXT NOT NULL DEFAULT (datetime('now'))
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS briefs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id TEXT NOT NULL,
                 topic TEXT NOT NULL,
                 depth TEXT NOT NULL,
                 is_follow_up INTEGER NOT NULL,
                 request_json TEXT NOT NULL,
                 brief_json TEXT NOT NULL,
                 created_at TEXT NOT NULL DEFAULT (datetime('now')),
                 FOREIGN KEY (user_id) REFERENCES users (user_id)
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_briefs_user_created
             ON briefs (user_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a brief (and the request that produced it) to a user's log.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] on serialization or SQLite failure.
    pub async fn append(
        &self,
        user_id: &str,
        request: &BriefRequest,
        brief: &FinalBrief,
    ) -> Result<(), HistoryError> {
        let request_json = serde_json::to_string(request)?;
        let brief_json = serde_json::to_string(brief)?;

        sqlx::query("INSERT OR IGNORE INTO users (user_id) VALUES (?1)")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        sqlx::query("UPDATE users SET last_activity = datetime('now') WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "INSERT INTO briefs (user_id, topic, depth, is_follow_up, request_json, brief_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(user_id)
        .bind(&brief.topic)
        .bind(request.depth.as_str())
        .bind(request.follow_up)
        .bind(&request_json)
        .bind(&brief_json)
        .execute(&self.pool)
        .await?;

        debug!(user_id, topic = %brief.topic, "brief appended to history");
        Ok(())
    }

    /// The user's most recent briefs, returned oldest-first.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] on SQLite failure or if a stored brief no
    /// longer deserializes.
    pub async fn recent_briefs(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<FinalBrief>, HistoryError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT brief_json FROM briefs
             WHERE user_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut briefs = rows
            .iter()
            .map(|(json,)| serde_json::from_str::<FinalBrief>(json))
            .collect::<Result<Vec<_>, _>>()?;

        // Rows come back newest-first; flip into the canonical order.
        briefs.reverse();
        Ok(briefs)
    }

    /// Listing view for the CLI, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Database`] on SQLite failure.
    pub async fn recent_entries(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let rows: Vec<(String, String, bool, String)> = sqlx::query_as(
            "SELECT topic, depth, is_follow_up, created_at FROM briefs
             WHERE user_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(topic, depth, follow_up, created_at)| HistoryEntry {
                topic,
                depth,
                follow_up,
                created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::Utc;

    use crate::types::ResearchDepth;

    fn request(topic: &str, user: &str) -> BriefRequest {
        BriefRequest {
            topic: topic.to_owned(),
            user_id: user.to_owned(),
            depth: ResearchDepth::Moderate,
            follow_up: false,
            additional_context: None,
        }
    }

    fn brief(topic: &str) -> FinalBrief {
        FinalBrief {
            topic: topic.to_owned(),
            executive_summary: "summary ".repeat(10),
            synthesis: "synthesis".to_owned(),
            key_insights: vec!["insight".to_owned()],
            references: vec![],
            context_used: None,
            metadata: HashMap::new(),
            generated_at: Utc::now(),
        }
    }

    async fn store() -> (HistoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::open(dir.path().join("history.db"))
            .await
            .expect("open store");
        (store, dir)
    }

    #[tokio::test]
    async fn test_append_and_recall_round_trip() {
        let (store, _dir) = store().await;
        let original = brief("solar");
        store
            .append("u1", &request("solar", "u1"), &original)
            .await
            .expect("append");

        let briefs = store.recent_briefs("u1", 5).await.expect("recall");
        assert_eq!(briefs.len(), 1);
        assert_eq!(briefs[0], original);
    }

    #[tokio::test]
    async fn test_recent_briefs_oldest_first_with_limit() {
        let (store, _dir) = store().await;
        for topic in ["one", "two", "three", "four"] {
            store
                .append("u1", &request(topic, "u1"), &brief(topic))
                .await
                .expect("append");
        }

        let briefs = store.recent_briefs("u1", 2).await.expect("recall");
        assert_eq!(briefs.len(), 2);
        // The two newest, in canonical oldest-first order.
        assert_eq!(briefs[0].topic, "three");
        assert_eq!(briefs[1].topic, "four");
    }

    #[tokio::test]
    async fn test_histories_are_isolated_per_user() {
        let (store, _dir) = store().await;
        store
            .append("alice", &request("alpha", "alice"), &brief("alpha"))
            .await
            .expect("append");
        store
            .append("bob", &request("beta", "bob"), &brief("beta"))
            .await
            .expect("append");

        let alice = store.recent_briefs("alice", 10).await.expect("recall");
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].topic, "alpha");

        let nobody = store.recent_briefs("carol", 10).await.expect("recall");
        assert!(nobody.is_empty());
    }

    #[tokio::test]
    async fn test_recent_entries_listing_newest_first() {
        let (store, _dir) = store().await;
        for topic in ["one", "two"] {
            store
                .append("u1", &request(topic, "u1"), &brief(topic))
                .await
                .expect("append");
        }

        let entries = store.recent_entries("u1", 10).await.expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].topic, "two");
        assert_eq!(entries[1].topic, "one");
        assert_eq!(entries[0].depth, "moderate");
        assert!(!entries[0].follow_up);
    }

    #[tokio::test]
    async fn test_reopen_preserves_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");

        {
            let store = HistoryStore::open(&path).await.expect("open");
            store
                .append("u1", &request("persisted", "u1"), &brief("persisted"))
                .await
                .expect("append");
        }

        let store = HistoryStore::open(&path).await.expect("reopen");
        let briefs = store.recent_briefs("u1", 5).await.expect("recall");
        assert_eq!(briefs.len(), 1);
        assert_eq!(briefs[0].topic, "persisted");
    }
}
