use anyhow::Result;
use std::env;

/// Application-wide defaults. These can be overridden by env vars but do not
/// require any user-authored config files.
#[derive(Debug, Clone)]
pub struct AppDefaults {
    /// Upper bound on messages listed per sync batch.
    pub max_results: u32,
    /// Mailbox labels a message must carry to be listed.
    pub label_ids: Vec<String>,
    /// Model identifier sent to the summarization gateway.
    pub model: String,
    /// Hard timeout for the batched summarization call.
    pub summary_timeout_secs: u64,
}

impl AppDefaults {
    pub fn load() -> Result<Self> {
        let max_results = env::var("MAILBRIEF_MAX_RESULTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(10);
        let model = env::var("MAILBRIEF_MODEL")
            .unwrap_or_else(|_| "deepseek/deepseek-chat-v3.1:free".to_string());
        let summary_timeout_secs = env::var("MAILBRIEF_SUMMARY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);

        let label_ids = env::var("MAILBRIEF_LABELS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec!["INBOX".to_string(), "IMPORTANT".to_string()]);

        Ok(Self {
            max_results,
            label_ids,
            model,
            summary_timeout_secs,
        })
    }
}
