use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{MailAccount, RawMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_gmail1::Gmail;
use google_gmail1::api::MessagePart;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use tracing::debug;
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

/// Provider query for the ingestion working set. The pipeline never
/// mutates read/unread state, so this listing keeps returning already
/// processed ids; the orchestrator filters them against the ledger.
pub const UNREAD_INBOX_QUERY: &str = "is:unread in:inbox";

/// Read access to one provider mailbox. Listing and full fetch are split
/// so the orchestrator can drop ledger hits before paying for content.
#[async_trait]
pub trait MailboxReader: Send + Sync {
    async fn list_unread_ids(&self, account: &MailAccount, max: u32) -> Result<Vec<String>>;
    async fn fetch(&self, account: &MailAccount, remote_id: &str) -> Result<RawMessage>;
}

type GmailHub = Gmail<HttpsConnector<HttpConnector>>;

/// Gmail-backed reader. One hub per account, built lazily from the
/// account's credential handle (a token-cache path usable with the
/// installed flow; obtaining consent is the credential manager's job).
pub struct GmailReader {
    secret: ApplicationSecret,
    hubs: Arc<tokio::sync::Mutex<HashMap<i64, GmailHub>>>,
}

impl GmailReader {
    pub fn new(secret: ApplicationSecret) -> Self {
        Self {
            secret,
            hubs: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }

    pub async fn load_secret(path: &str) -> Result<ApplicationSecret> {
        yup_oauth2::read_application_secret(path)
            .await
            .map_err(|e| Error::Config(format!("failed to read application secret: {}", e)))
    }

    async fn hub(&self, account: &MailAccount) -> Result<GmailHub> {
        let mut hubs = self.hubs.lock().await;
        if let Some(hub) = hubs.get(&account.id) {
            return Ok(hub.clone());
        }

        let auth = InstalledFlowAuthenticator::builder(
            self.secret.clone(),
            InstalledFlowReturnMethod::HTTPRedirect,
        )
        .persist_tokens_to_disk(&account.credentials)
        .build()
        .await
        .map_err(|e| Error::Config(format!("failed to build authenticator: {}", e)))?;

        let hub = Gmail::new(
            hyper::Client::builder().build(
                hyper_rustls::HttpsConnectorBuilder::new()
                    .with_native_roots()
                    .map_err(|e| Error::Config(format!("failed to load native roots: {}", e)))?
                    .https_only()
                    .enable_http1()
                    .build(),
            ),
            auth,
        );

        hubs.insert(account.id, hub.clone());
        Ok(hub)
    }
}

#[async_trait]
impl MailboxReader for GmailReader {
    async fn list_unread_ids(&self, account: &MailAccount, max: u32) -> Result<Vec<String>> {
        let hub = self.hub(account).await?;
        let (_, message_list) = hub
            .users()
            .messages_list("me")
            .q(UNREAD_INBOX_QUERY)
            .max_results(max)
            .doit()
            .await
            .map_err(|e| Error::TransientFetch(format!("failed to list messages: {}", e)))?;

        let ids: Vec<String> = message_list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        debug!(account = %account.email, count = ids.len(), "Listed unread message ids");
        Ok(ids)
    }

    async fn fetch(&self, account: &MailAccount, remote_id: &str) -> Result<RawMessage> {
        let hub = self.hub(account).await?;
        let (_, msg) = hub
            .users()
            .messages_get("me", remote_id)
            .format("full")
            .doit()
            .await
            .map_err(|e| Error::TransientFetch(format!("failed to get message {}: {}", remote_id, e)))?;

        let mut subject = String::new();
        let mut sender = String::new();
        let mut list_unsubscribe = None;

        if let Some(payload) = &msg.payload {
            if let Some(headers) = &payload.headers {
                for header in headers {
                    match header.name.as_deref() {
                        Some(name) if name.eq_ignore_ascii_case("Subject") => {
                            subject = header.value.clone().unwrap_or_default();
                        }
                        Some(name) if name.eq_ignore_ascii_case("From") => {
                            sender = header.value.clone().unwrap_or_default();
                        }
                        Some(name) if name.eq_ignore_ascii_case("List-Unsubscribe") => {
                            list_unsubscribe = header.value.clone();
                        }
                        _ => {}
                    }
                }
            }
        }

        let mut body_text = None;
        let mut body_html = None;
        if let Some(payload) = &msg.payload {
            body_text = extract_text_body(payload, "text/plain");
            body_html = extract_text_body(payload, "text/html");
        }

        let received_at = msg
            .internal_date
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Ok(RawMessage {
            remote_id: msg.id.unwrap_or_else(|| remote_id.to_string()),
            subject,
            sender,
            body_text: body_text.or_else(|| msg.snippet.clone()).unwrap_or_default(),
            body_html,
            list_unsubscribe,
            received_at,
        })
    }
}

fn extract_text_body(part: &MessagePart, mime_type: &str) -> Option<String> {
    if let Some(mime) = &part.mime_type {
        if mime == mime_type {
            if let Some(body) = &part.body {
                if let Some(data) = &body.data {
                    use base64::{Engine as _, engine::general_purpose};
                    let data_str = String::from_utf8_lossy(data);

                    // Try decoding as base64url (Gmail's default)
                    let decoded = general_purpose::URL_SAFE_NO_PAD
                        .decode(data_str.trim().replace('-', "+").replace('_', "/"))
                        .or_else(|_| {
                            general_purpose::URL_SAFE
                                .decode(data_str.trim().replace('-', "+").replace('_', "/"))
                        })
                        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(data_str.trim()))
                        .or_else(|_| general_purpose::STANDARD.decode(data_str.trim()));

                    match decoded {
                        Ok(bytes) => return String::from_utf8(bytes).ok(),
                        Err(_) => {
                            // If base64 decoding fails, it might already be raw content
                            return String::from_utf8(data.clone()).ok();
                        }
                    }
                }
            }
        }
    }

    if let Some(parts) = &part.parts {
        let mut full_body = String::new();
        for p in parts {
            if let Some(body) = extract_text_body(p, mime_type) {
                full_body.push_str(&body);
            }
        }
        if !full_body.is_empty() {
            return Some(full_body);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::MessagePartBody;

    fn part(mime: &str, data: &str) -> MessagePart {
        use base64::{Engine as _, engine::general_purpose};
        MessagePart {
            mime_type: Some(mime.to_string()),
            body: Some(MessagePartBody {
                data: Some(general_purpose::URL_SAFE_NO_PAD.encode(data).into_bytes()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_plain_text_part() {
        let p = part("text/plain", "hello there");
        assert_eq!(extract_text_body(&p, "text/plain").as_deref(), Some("hello there"));
        assert_eq!(extract_text_body(&p, "text/html"), None);
    }

    #[test]
    fn walks_nested_multipart() {
        let inner = vec![
            part("text/plain", "plain half"),
            part("text/html", "<p>html half</p>"),
        ];
        let outer = MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            parts: Some(inner),
            ..Default::default()
        };
        assert_eq!(
            extract_text_body(&outer, "text/html").as_deref(),
            Some("<p>html half</p>")
        );
    }

    #[test]
    fn raw_content_passes_through_when_not_base64() {
        let p = MessagePart {
            mime_type: Some("text/plain".to_string()),
            body: Some(MessagePartBody {
                data: Some(b"not base64 at all!!".to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            extract_text_body(&p, "text/plain").as_deref(),
            Some("not base64 at all!!")
        );
    }
}
