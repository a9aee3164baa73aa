use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::StoredMessage;

/// Anchor text that signals unsubscribe intent.
const UNSUBSCRIBE_KEYWORDS: &[&str] = &[
    "unsubscribe",
    "opt out",
    "opt-out",
    "manage preferences",
    "remove me",
    "stop receiving",
];

/// Response text that strongly indicates the request did not take.
const FAILURE_MARKERS: &[&str] = &[
    "error",
    "failed",
    "failure",
    "unable to",
    "something went wrong",
    "try again",
    "not found",
];

/// How much of a response body the outcome heuristic reads.
const RESPONSE_SCAN_LIMIT: usize = 4096;

/// A concrete unsubscribe action resolved from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    /// http(s) URL from the List-Unsubscribe header; auto-executable.
    HeaderLink(String),
    /// Contact address only (mailto); recorded but requires manual action.
    ContactAddress(String),
    /// Link extracted from the message body.
    BodyLink(String),
}

impl Mechanism {
    pub fn kind(&self) -> &'static str {
        match self {
            Mechanism::HeaderLink(_) => "header_link",
            Mechanism::ContactAddress(_) => "contact_address",
            Mechanism::BodyLink(_) => "body_link",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Mechanism::HeaderLink(t) | Mechanism::ContactAddress(t) | Mechanism::BodyLink(t) => t,
        }
    }
}

/// Mechanism search, first match wins: structured header directive with a
/// direct link, then contact-address-only directive, then a scan of the
/// body for unsubscribe-intent links.
pub fn resolve(message: &StoredMessage) -> Option<Mechanism> {
    if let Some(header) = &message.list_unsubscribe {
        if let Some(mechanism) = parse_list_unsubscribe(header) {
            return Some(mechanism);
        }
    }

    let body = message.body_html.as_deref().unwrap_or(&message.body);
    if let Some(mechanism) = scan_html_body(body) {
        return Some(mechanism);
    }

    scan_plain_text(&message.body)
}

fn http_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(https?://[^>]+)>").unwrap())
}

fn mailto_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(mailto:[^>]+)>").unwrap())
}

fn bare_unsubscribe_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(https?://[^\s<>"]*unsubscribe[^\s<>"]*)"#).unwrap())
}

/// Parse a List-Unsubscribe header value. An http(s) URL is preferred;
/// a mailto-only value resolves to a contact address.
fn parse_list_unsubscribe(value: &str) -> Option<Mechanism> {
    if let Some(caps) = http_url_re().captures(value) {
        return Some(Mechanism::HeaderLink(caps[1].to_string()));
    }
    if let Some(caps) = mailto_re().captures(value) {
        return Some(Mechanism::ContactAddress(caps[1].to_string()));
    }
    None
}

fn scan_html_body(html: &str) -> Option<Mechanism> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").ok()?;

    for anchor in document.select(&selector) {
        let href = anchor.value().attr("href").unwrap_or("").trim();
        if href.is_empty() {
            continue;
        }
        let text = anchor.text().collect::<String>().to_lowercase();
        let intent = UNSUBSCRIBE_KEYWORDS.iter().any(|k| text.contains(k))
            || href.to_lowercase().contains("unsubscribe");
        if !intent {
            continue;
        }
        if href.starts_with("http://") || href.starts_with("https://") {
            return Some(Mechanism::BodyLink(href.to_string()));
        }
        if let Some(addr) = href.strip_prefix("mailto:") {
            if !addr.is_empty() {
                return Some(Mechanism::ContactAddress(href.to_string()));
            }
        }
    }
    None
}

fn scan_plain_text(body: &str) -> Option<Mechanism> {
    bare_unsubscribe_url_re()
        .captures(body)
        .map(|caps| Mechanism::BodyLink(caps[1].to_string()))
}

/// Executes a single mechanism: one request, redirects followed, outcome
/// classified by heuristic. `Ok` carries the success reason; every
/// failure is an [`Error::UnsubscribeExecution`]. No internal retry; a
/// fresh user request is the only retry path.
pub struct UnsubscribeExecutor {
    client: Client,
}

impl UnsubscribeExecutor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
            )
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn execute(&self, mechanism: &Mechanism) -> Result<String> {
        let url = match mechanism {
            Mechanism::ContactAddress(addr) => {
                return Err(Error::UnsubscribeExecution(format!(
                    "manual action required: {}",
                    addr
                )));
            }
            Mechanism::HeaderLink(url) | Mechanism::BodyLink(url) => url,
        };

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| Error::UnsubscribeExecution(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UnsubscribeExecution(format!(
                "non-success status {}",
                status
            )));
        }

        let text = response.text().await.unwrap_or_default();
        if let Some(marker) = failure_marker(&text) {
            return Err(Error::UnsubscribeExecution(format!(
                "response indicates failure ('{}')",
                marker
            )));
        }
        Ok("unsubscribe request accepted".to_string())
    }
}

/// Scan a bounded prefix of the response for failure markers.
fn failure_marker(text: &str) -> Option<&'static str> {
    let prefix: String = text.chars().take(RESPONSE_SCAN_LIMIT).collect();
    let prefix = prefix.to_lowercase();
    FAILURE_MARKERS.iter().copied().find(|m| prefix.contains(m))
}

/// One entry of the ordered result list, 1:1 with the requested ids.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptResult {
    pub message_id: i64,
    pub mechanism: Option<&'static str>,
    pub success: bool,
    pub reason: String,
}

/// Fans the executor out over a requested message set with a bounded
/// worker cap. Results preserve input order; every id yields exactly one
/// result, including duplicates and unknown ids.
#[derive(Clone)]
pub struct UnsubscribeService {
    db: Database,
    executor: Arc<UnsubscribeExecutor>,
    concurrency: usize,
}

impl UnsubscribeService {
    pub fn new(db: Database, executor: UnsubscribeExecutor, concurrency: usize) -> Self {
        Self {
            db,
            executor: Arc::new(executor),
            concurrency: concurrency.max(1),
        }
    }

    pub async fn unsubscribe_many(&self, message_ids: &[i64]) -> Vec<AttemptResult> {
        stream::iter(message_ids.iter().copied())
            .map(|id| self.attempt_one(id))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn attempt_one(&self, message_id: i64) -> AttemptResult {
        let message = match self.db.get_message(message_id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return self
                    .finish(message_id, None, false, "message not found".to_string())
                    .await;
            }
            Err(e) => {
                return self
                    .finish(message_id, None, false, format!("lookup failed: {}", e))
                    .await;
            }
        };

        let Some(mechanism) = resolve(&message) else {
            return self
                .finish(
                    message_id,
                    None,
                    false,
                    Error::MechanismNotFound.to_string(),
                )
                .await;
        };

        debug!(
            message_id,
            mechanism = mechanism.kind(),
            target = mechanism.target(),
            "Executing unsubscribe mechanism"
        );
        let (success, reason) = match self.executor.execute(&mechanism).await {
            Ok(reason) => (true, reason),
            Err(e) => (false, e.to_string()),
        };
        self.finish(message_id, Some(mechanism.kind()), success, reason)
            .await
    }

    async fn finish(
        &self,
        message_id: i64,
        mechanism: Option<&'static str>,
        success: bool,
        reason: String,
    ) -> AttemptResult {
        if let Err(e) = self
            .db
            .record_attempt(message_id, mechanism, success, &reason)
            .await
        {
            warn!(message_id, error = %e, "Failed to record unsubscribe attempt");
        }
        AttemptResult {
            message_id,
            mechanism,
            success,
            reason,
        }
    }
}
