use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::models::{Category, RawMessage};

/// Message body is truncated to this many characters before submission.
pub const BODY_LIMIT: usize = 2000;

/// Summaries are clipped to this many characters on output.
pub const SUMMARY_LIMIT: usize = 300;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A category decision plus summary for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category_id: i64,
    pub summary: String,
}

/// The classification oracle. One call per message; the implementation
/// validates the model's output against the supplied category set and
/// never invents a category outside it. Failures of any kind route the
/// caller to the Uncategorized fallback.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        message: &RawMessage,
        categories: &[Category],
    ) -> Result<Classification>;
}

/// Hosted-model classifier speaking the Anthropic Messages API.
pub struct ClaudeClassifier {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<RequestMessage>,
}

#[derive(Serialize)]
struct RequestMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ReplyJson {
    category: String,
    #[serde(default)]
    summary: String,
}

impl ClaudeClassifier {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| Error::Config("no model API key configured".into()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Classifier for ClaudeClassifier {
    async fn classify(
        &self,
        message: &RawMessage,
        categories: &[Category],
    ) -> Result<Classification> {
        if categories.is_empty() {
            return Err(Error::ClassificationFormat("no categories to choose from".into()));
        }

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 300,
            messages: vec![RequestMessage {
                role: "user",
                content: build_prompt(message, categories),
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::TransientFetch(format!("model request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::TransientFetch(format!(
                "model returned status {}",
                response.status()
            )));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::ClassificationFormat(format!("unreadable response: {}", e)))?;

        let text = body
            .content
            .first()
            .map(|block| block.text.as_str())
            .unwrap_or_default();

        debug!(reply = text, "Model reply");
        parse_reply(text, categories)
    }
}

fn build_prompt(message: &RawMessage, categories: &[Category]) -> String {
    let mut category_text = String::new();
    for cat in categories {
        category_text.push_str(&format!("- {}: {}\n", cat.name, cat.description));
    }

    format!(
        "You are sorting a user's inbox. Assign the message below to exactly one \
of these categories and summarize it in one or two sentences.\n\n\
Categories:\n{category_text}\n\
Message:\n\
From: {sender}\n\
Subject: {subject}\n\n\
{body}\n\n\
Respond with only a JSON object of the form \
{{\"category\": \"<category name>\", \"summary\": \"<summary>\"}}. \
The category must be one of the names listed above; use \"Uncategorized\" \
if nothing fits.",
        sender = message.sender,
        subject = message.subject,
        body = truncate_chars(&message.body_text, BODY_LIMIT),
    )
}

/// Validation gate for the model's reply. Anything that is not a JSON
/// object naming exactly one of the supplied categories is a format
/// failure; the category match is case-insensitive on the trimmed name.
fn parse_reply(text: &str, categories: &[Category]) -> Result<Classification> {
    let json = extract_json_object(text)
        .ok_or_else(|| Error::ClassificationFormat("reply contains no JSON object".into()))?;

    let reply: ReplyJson = serde_json::from_str(json)
        .map_err(|e| Error::ClassificationFormat(format!("reply is not valid JSON: {}", e)))?;

    let category = resolve_category(&reply.category, categories).ok_or_else(|| {
        Error::ClassificationFormat(format!("unknown category '{}'", reply.category.trim()))
    })?;

    Ok(Classification {
        category_id: category.id,
        summary: truncate_chars(reply.summary.trim(), SUMMARY_LIMIT),
    })
}

/// Find the named category, case-insensitively, tolerating surrounding
/// whitespace and quotes.
pub fn resolve_category<'a>(name: &str, categories: &'a [Category]) -> Option<&'a Category> {
    let name = name.trim().trim_matches('"').trim();
    if name.is_empty() {
        return None;
    }
    categories.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Models often wrap the object in prose or a code fence; take the
/// outermost braces.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
