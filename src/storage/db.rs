use crate::types::{now_ts, EmailRecord, MailboxMessage, SummaryResult};
use anyhow::{Context, Result};
use chrono::DateTime;
use dirs::home_dir;
use futures::future::join_all;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const DB_FILE_NAME: &str = "mailbrief.db";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    pub async fn new_default() -> Result<Self> {
        Self::new_named(DB_FILE_NAME).await
    }

    pub async fn new_named(file_name: &str) -> Result<Self> {
        let base = default_data_dir()?;
        let db_path = base.join(file_name);
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }

        let pool = SqlitePool::connect(&url)
            .await
            .with_context(|| format!("connecting to sqlite at {}", db_path.display()))?;

        let db = Database {
            pool,
            path: db_path,
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Ephemeral database for tests. A single long-lived connection, because
    /// each `sqlite::memory:` connection is its own database.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("connecting to in-memory sqlite")?;
        let db = Database {
            pool,
            path: PathBuf::from(":memory:"),
        };
        db.migrate().await?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id TEXT NOT NULL UNIQUE,
                from_email TEXT NOT NULL,
                subject TEXT NOT NULL,
                summary TEXT NOT NULL,
                date INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                is_trashed INTEGER NOT NULL DEFAULT 0,
                deleted_date INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_emails_user ON emails(user_id);
            CREATE INDEX IF NOT EXISTS idx_emails_user_trashed ON emails(user_id, is_trashed);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("running migrations")?;
        Ok(())
    }

    /// Persist one batch of summarized messages. Each insert is an idempotent
    /// upsert on the unique external id: an existing row (including any user
    /// edits such as read state) is left untouched. Rows are written
    /// concurrently; one row's failure is logged and does not abort siblings.
    /// Returns the count of rows newly inserted.
    pub async fn persist_batch(
        &self,
        results: &[SummaryResult],
        originals: &[MailboxMessage],
        user_id: &str,
    ) -> Result<usize> {
        let by_id: HashMap<&str, &MailboxMessage> =
            originals.iter().map(|m| (m.id.as_str(), m)).collect();

        let inserts = results.iter().filter_map(|result| {
            let original = match by_id.get(result.external_id.as_str()) {
                Some(original) => *original,
                None => {
                    // Matching already happened upstream; a miss here means a
                    // result without a source message, which we skip.
                    warn!(email_id = %result.external_id, "Summary has no source message; skipping");
                    return None;
                }
            };
            Some(self.insert_summarized(result, original, user_id))
        });

        let outcomes = join_all(inserts).await;

        let mut inserted = 0usize;
        for outcome in outcomes {
            match outcome {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Persisting summarized email failed"),
            }
        }
        Ok(inserted)
    }

    /// Insert one summarized row. Returns `true` when a new row was written,
    /// `false` when a row with the same external id already existed.
    async fn insert_summarized(
        &self,
        result: &SummaryResult,
        original: &MailboxMessage,
        user_id: &str,
    ) -> Result<bool> {
        let now = now_ts();
        let res = sqlx::query(
            r#"
            INSERT INTO emails (email_id, from_email, subject, summary, date, user_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(email_id) DO NOTHING;
            "#,
        )
        .bind(&original.id)
        .bind(&original.from)
        .bind(&original.subject)
        .bind(flatten_summary(result))
        .bind(parse_message_date(&original.date))
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("inserting summarized email")?;

        let fresh = res.rows_affected() > 0;
        if !fresh {
            debug!(email_id = %original.id, "Row already present; insert skipped");
        }
        Ok(fresh)
    }

    pub async fn set_read(&self, email_id: &str, read: bool) -> Result<bool> {
        let res = sqlx::query("UPDATE emails SET read = ?1, updated_at = ?2 WHERE email_id = ?3")
            .bind(if read { 1 } else { 0 })
            .bind(now_ts())
            .bind(email_id)
            .execute(&self.pool)
            .await
            .context("updating read flag")?;
        Ok(res.rows_affected() > 0)
    }

    /// Soft-delete: `is_trashed` and `deleted_date` always move together so
    /// the pair stays consistent.
    pub async fn move_to_trash(&self, email_id: &str, user_id: &str) -> Result<bool> {
        let now = now_ts();
        let res = sqlx::query(
            r#"
            UPDATE emails
            SET is_trashed = 1, deleted_date = ?1, updated_at = ?1
            WHERE email_id = ?2 AND user_id = ?3;
            "#,
        )
        .bind(now)
        .bind(email_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("moving email to trash")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn restore_from_trash(&self, email_id: &str, user_id: &str) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE emails
            SET is_trashed = 0, deleted_date = NULL, updated_at = ?1
            WHERE email_id = ?2 AND user_id = ?3 AND is_trashed = 1;
            "#,
        )
        .bind(now_ts())
        .bind(email_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("restoring email from trash")?;
        Ok(res.rows_affected() > 0)
    }

    /// Physically remove one row; only trashed rows are eligible.
    pub async fn purge(&self, email_id: &str, user_id: &str) -> Result<bool> {
        let res = sqlx::query(
            "DELETE FROM emails WHERE email_id = ?1 AND user_id = ?2 AND is_trashed = 1",
        )
        .bind(email_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("purging email")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn empty_trash(&self, user_id: &str) -> Result<u64> {
        let res = sqlx::query("DELETE FROM emails WHERE user_id = ?1 AND is_trashed = 1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("emptying trash")?;
        Ok(res.rows_affected())
    }

    pub async fn list_inbox(&self, user_id: &str) -> Result<Vec<EmailRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT email_id, from_email, subject, summary, date, user_id, read, is_trashed, deleted_date
            FROM emails
            WHERE user_id = ?1 AND is_trashed = 0
            ORDER BY date DESC;
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("loading inbox emails")?;

        Ok(rows.into_iter().map(row_to_record).collect())
    }

    pub async fn list_trashed(&self, user_id: &str) -> Result<Vec<EmailRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT email_id, from_email, subject, summary, date, user_id, read, is_trashed, deleted_date
            FROM emails
            WHERE user_id = ?1 AND is_trashed = 1
            ORDER BY deleted_date DESC, date DESC;
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("loading trashed emails")?;

        Ok(rows.into_iter().map(row_to_record).collect())
    }

    pub async fn load_by_email_id(&self, email_id: &str) -> Result<Option<EmailRecord>> {
        let row = sqlx::query(
            r#"
            SELECT email_id, from_email, subject, summary, date, user_id, read, is_trashed, deleted_date
            FROM emails
            WHERE email_id = ?1;
            "#,
        )
        .bind(email_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading email by id")?;

        Ok(row.map(row_to_record))
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> EmailRecord {
    EmailRecord {
        email_id: row.get(0),
        from_email: row.get(1),
        subject: row.get(2),
        summary: row.get(3),
        date: row.get(4),
        user_id: row.get(5),
        read: row.get::<i64, _>(6) == 1,
        is_trashed: row.get::<i64, _>(7) == 1,
        deleted_date: row.get(8),
    }
}

/// Flatten the structured summary into the single stored text blob. Sections
/// with nothing to say are omitted entirely.
pub fn flatten_summary(result: &SummaryResult) -> String {
    let mut out = String::from("Summary:\n");
    out.push_str(
        &result
            .bullet_summary
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n"),
    );

    if !result.events.is_empty() {
        out.push_str("\n\nEvents:\n");
        out.push_str(
            &result
                .events
                .iter()
                .map(|e| format!("- {}: {} {} at {}", e.name, e.date, e.time, e.venue))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }

    if !result.links.is_empty() {
        out.push_str("\n\nLinks:\n");
        out.push_str(
            &result
                .links
                .iter()
                .map(|l| format!("- {l}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }

    out
}

/// Date headers arrive as RFC 2822 (occasionally RFC 3339); anything
/// unparseable falls back to the current time rather than failing the row.
pub fn parse_message_date(raw: &str) -> i64 {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|_| now_ts())
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(custom) = env::var("MAILBRIEF_DATA_DIR") {
        let path = PathBuf::from(custom);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating MAILBRIEF_DATA_DIR at {}", path.display()))?;
        return Ok(path);
    }

    if let Some(home) = home_dir() {
        let path = home.join(".mailbrief");
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        } else {
            warn!(
                "Unable to create {}/.mailbrief; falling back to workspace-local storage",
                home.display()
            );
        }
    }

    let cwd = env::current_dir().context("determining current directory")?;
    let path = cwd.join("mailbrief-data");
    std::fs::create_dir_all(&path)
        .with_context(|| format!("creating fallback data directory {}", path.display()))?;
    Ok(path)
}
