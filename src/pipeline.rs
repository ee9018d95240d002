use crate::auth::TokenManager;
use crate::config::AppDefaults;
use crate::errors::{AppError, AppResult};
use crate::gmail::GmailClient;
use crate::storage::Database;
use crate::summarize::Summarizer;
use crate::types::SyncReport;
use std::time::Instant;
use tracing::{info, warn};

/// One sync invocation: validate credential, fetch a bounded batch, summarize
/// it in a single AI call, persist idempotently. Stages run strictly in that
/// order; no stage starts on partial output of the previous one.
pub struct SyncEngine<'a> {
    tokens: &'a TokenManager,
    gmail: &'a GmailClient,
    summarizer: &'a Summarizer,
    db: &'a Database,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        tokens: &'a TokenManager,
        gmail: &'a GmailClient,
        summarizer: &'a Summarizer,
        db: &'a Database,
    ) -> Self {
        Self {
            tokens,
            gmail,
            summarizer,
            db,
        }
    }

    /// Run one sync for `user_id`. Only a genuine authentication failure or a
    /// storage outage is a hard error; unreachable messages and degraded
    /// summaries reduce the counts, not the outcome.
    pub async fn run(&self, user_id: &str, defaults: &AppDefaults) -> AppResult<SyncReport> {
        let start = Instant::now();

        let credential = self.tokens.ensure_valid().await?;

        let messages = self
            .gmail
            .fetch_batch(
                &credential.access_token,
                &defaults.label_ids,
                defaults.max_results,
            )
            .await?;
        if messages.is_empty() {
            info!(user = %user_id, "No messages to process");
            return Ok(SyncReport::default());
        }

        let results = self.summarizer.summarize(&messages).await;
        if results.len() < messages.len() {
            // Unmatched messages stay unpersisted; the next sync lists them
            // again and re-attempts.
            warn!(
                requested = messages.len(),
                summarized = results.len(),
                "Some messages were not summarized this run"
            );
        }

        let inserted = self
            .db
            .persist_batch(&results, &messages, user_id)
            .await
            .map_err(|e| AppError::Database(format!("{e:#}")))?;

        let report = SyncReport {
            fetched: messages.len(),
            summarized: results.len(),
            inserted,
        };
        info!(
            user = %user_id,
            fetched = report.fetched,
            summarized = report.summarized,
            inserted = report.inserted,
            elapsed_ms = ?start.elapsed().as_millis(),
            "Sync completed"
        );
        Ok(report)
    }
}
