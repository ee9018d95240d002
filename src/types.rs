use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One message as pulled from the mailbox provider for a single sync batch.
/// Transient: handed to the summarizer and persister, never stored as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxMessage {
    /// Provider-assigned stable id; the dedup key downstream.
    pub id: String,
    pub from: String,
    pub subject: String,
    pub date: String,
    /// Plain-text body; empty when the message carries no text part.
    pub body: String,
}

/// A persisted, summarized email row as exposed to the CRUD surface.
#[derive(Clone, Debug)]
pub struct EmailRecord {
    pub email_id: String,
    pub from_email: String,
    pub subject: String,
    pub summary: String,
    /// Message date as seconds since the epoch, parsed from the provider's
    /// date header at persist time.
    pub date: i64,
    pub user_id: String,
    pub read: bool,
    pub is_trashed: bool,
    pub deleted_date: Option<i64>,
}

/// Structured per-message output of the summarization stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SummaryResult {
    pub external_id: String,
    pub bullet_summary: Vec<String>,
    pub events: Vec<EventDetail>,
    pub links: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetail {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub venue: String,
}

/// Counters reported back to the caller of one sync invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: usize,
    pub summarized: usize,
    pub inserted: usize,
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}
