use crate::errors::{AppError, AppResult};
use crate::types::{EventDetail, MailboxMessage, SummaryResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

const COMPLETIONS_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// The JSON shape the prompt instructs the model to return. Every field the
/// model might omit defaults instead of failing the whole batch.
#[derive(Debug, Deserialize)]
struct AiEnvelope {
    #[serde(default)]
    emails: Vec<AiEmailResult>,
}

#[derive(Debug, Deserialize)]
struct AiEmailResult {
    #[serde(rename = "emailId", default)]
    email_id: String,
    #[serde(default)]
    summary: Vec<String>,
    #[serde(default)]
    events: Vec<EventDetail>,
    #[serde(default)]
    links: Vec<String>,
}

/// Builds one batched prompt for the whole fetch batch, calls the external
/// completion gateway, and parses its loosely-structured reply. Degrades to a
/// deterministic local fallback on timeout, transport error, or unparseable
/// output; it never propagates a hard error for the AI path.
pub struct Summarizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Summarizer {
    pub fn new(model: &str, timeout_secs: u64) -> AppResult<Self> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .map_err(|_| AppError::Config("OPENROUTER_API_KEY missing".into()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Unexpected(format!("building http client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            model: model.to_string(),
            base_url: COMPLETIONS_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Summarize a batch in a single outbound request. The result always has
    /// at most one entry per input message, matched by external id; results
    /// referencing ids not in the batch are dropped.
    pub async fn summarize(&self, messages: &[MailboxMessage]) -> Vec<SummaryResult> {
        if messages.is_empty() {
            return Vec::new();
        }

        let content = match self.request_completion(messages).await {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Summarization request failed; using fallback summaries");
                return fallback_results(messages);
            }
        };

        match parse_results(&content, messages) {
            Some(results) => {
                info!(
                    requested = messages.len(),
                    returned = results.len(),
                    "Summarization response parsed"
                );
                results
            }
            None => {
                warn!("Summarization response unparseable; using fallback summaries");
                fallback_results(messages)
            }
        }
    }

    async fn request_completion(&self, messages: &[MailboxMessage]) -> AppResult<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: build_batch_prompt(messages),
            }],
        };

        debug!(count = messages.len(), model = %self.model, "Requesting batch summarization");
        let res = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("completion request failed: {e}")))?;
        if !res.status().is_success() {
            return Err(AppError::Network(format!(
                "completion failed with status {}",
                res.status()
            )));
        }
        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| AppError::Unexpected(format!("parse completion envelope: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::Unexpected("completion response had no choices".into()))
    }
}

/// One structured prompt enumerating every message with its external id. The
/// instruction demands a single JSON object echoing each id back so results
/// can be matched without relying on array order.
pub fn build_batch_prompt(messages: &[MailboxMessage]) -> String {
    let mut prompt = format!(
        "You are an AI assistant. Analyze the following {} emails and provide a JSON \
         response with summaries for each email.\n\n\
         IMPORTANT: Return ONLY valid JSON without any markdown formatting, code blocks, \
         or additional text.\n\n\
         For each email, provide the output in this exact JSON structure:\n\
         {{\n\
           \"emails\": [\n\
             {{\n\
               \"id\": 1,\n\
               \"emailId\": \"actual_email_id\",\n\
               \"summary\": [\"Bullet point 1\", \"Bullet point 2\", \"Bullet point 3\"],\n\
               \"events\": [\n\
                 {{\"name\": \"Event Name\", \"date\": \"YYYY-MM-DD\", \"time\": \"HH:MM\", \"venue\": \"Venue Name\"}}\n\
               ],\n\
               \"links\": [\"https://example.com\"]\n\
             }}\n\
           ]\n\
         }}\n\n\
         Requirements:\n\
         - Provide 4-6 meaningful bullet points for each email summary\n\
         - Exclude greetings, signatures, or irrelevant text\n\
         - If the mail has social media links like youtube, facebook, etc., omit them\n\
         - If there are no events or links, use empty arrays []\n\
         - Return ONLY the JSON object, no markdown, no explanations, no code blocks\n\n\
         Emails to analyze:\n",
        messages.len()
    );

    for (index, message) in messages.iter().enumerate() {
        let _ = write!(
            prompt,
            "\nEmail ID: {}\nActual Email ID: {}\nFrom: {}\nSubject: {}\nDate: {}\nBody: {}\n---",
            index + 1,
            message.id,
            message.from,
            message.subject,
            message.date,
            message.body
        );
    }

    prompt
}

/// Parse the model's reply into per-message results. `None` means the reply
/// was not the expected JSON shape and the caller should fall back. Results
/// carrying an id not present in the input batch are dropped silently.
pub fn parse_results(content: &str, messages: &[MailboxMessage]) -> Option<Vec<SummaryResult>> {
    let cleaned = strip_code_fences(content);
    let envelope: AiEnvelope = serde_json::from_str(&cleaned).ok()?;

    let known_ids: HashSet<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    let mut results = Vec::with_capacity(envelope.emails.len());
    for entry in envelope.emails {
        if !known_ids.contains(entry.email_id.as_str()) {
            warn!(email_id = %entry.email_id, "Summary references unknown message id; dropping");
            continue;
        }
        results.push(SummaryResult {
            external_id: entry.email_id,
            bullet_summary: entry.summary,
            events: entry.events,
            links: entry.links,
        });
    }
    Some(results)
}

/// The gateway sometimes wraps its JSON in a markdown code fence despite the
/// instructions; strip it before parsing.
pub fn strip_code_fences(content: &str) -> String {
    let cleaned = if content.contains("```json") {
        content.replace("```json", "").replace("```", "")
    } else if content.contains("```") {
        content.replace("```", "")
    } else {
        content.to_string()
    };
    cleaned.trim().to_string()
}

/// Deterministic local summaries: three fixed lines per message built from
/// sender, subject, and a bounded body preview. Always covers every message
/// in the batch and depends on nothing external.
pub fn fallback_results(messages: &[MailboxMessage]) -> Vec<SummaryResult> {
    messages
        .iter()
        .map(|message| SummaryResult {
            external_id: message.id.clone(),
            bullet_summary: vec![
                format!("Email from: {}", message.from),
                format!("Subject: {}", message.subject),
                format!("Content preview: {}...", body_preview(&message.body)),
            ],
            events: Vec::new(),
            links: Vec::new(),
        })
        .collect()
}

fn body_preview(body: &str) -> String {
    body.chars().take(PREVIEW_CHARS).collect()
}
