use crate::auth;
use crate::client::MailClient;
use crate::config::GmailSettings;
use crate::models::{self, Header, ModifyOutcome, OutgoingMessage, TrashedMessage};
use crate::query::Projection;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_gmail1::Gmail;
use google_gmail1::api::{BatchModifyMessagesRequest, Label};
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
    user_id: String,
    scopes: Vec<String>,
}

impl GmailClient {
    pub fn new(
        hub: Gmail<HttpsConnector<HttpConnector>>,
        user_id: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            hub,
            user_id: user_id.into(),
            scopes,
        }
    }

    /// Authenticate with the configured credentials and build a client
    pub async fn connect(settings: &GmailSettings, app_name: &str) -> Result<Self> {
        let secret = auth::Authenticator::load_secret(&settings.client_secret_file).await?;
        let authenticator =
            auth::Authenticator::authenticate(secret, &settings.token_store(app_name)).await?;

        let scopes: Vec<&str> = settings.scopes.iter().map(String::as_str).collect();
        authenticator
            .token(&scopes)
            .await
            .context("Failed to obtain Gmail access token")?;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("Failed to load native TLS roots")?
            .https_only()
            .enable_http1()
            .build();
        let hub = Gmail::new(hyper::Client::builder().build(connector), authenticator);

        info!(
            mailbox = settings.name.as_deref().unwrap_or(&settings.user_id),
            "Connected to Gmail"
        );
        Ok(Self::new(hub, settings.user_id.clone(), settings.scopes.clone()))
    }

    async fn find_label(&self, name: &str) -> Result<Option<String>> {
        let (_, label_list) = self
            .scoped(self.hub.users().labels_list(&self.user_id), |req, s| {
                req.add_scope(s)
            })
            .doit()
            .await
            .context("Failed to list labels")?;

        Ok(label_list
            .labels
            .unwrap_or_default()
            .into_iter()
            .find(|l| {
                l.name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .and_then(|l| l.id))
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        let label = Label {
            name: Some(name.to_string()),
            message_list_visibility: Some("show".to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            ..Default::default()
        };

        let result = self
            .scoped(
                self.hub.users().labels_create(label, &self.user_id),
                |req, s| req.add_scope(s),
            )
            .doit()
            .await;

        match result {
            Ok((_, created)) => {
                info!(label = %name, "Created label");
                created.id.context("Created label has no id")
            }
            // Someone else created it between our lookup and create
            Err(e) if is_conflict(&e) => {
                warn!(label = %name, "Label already exists, looking it up again");
                self.find_label(name)
                    .await?
                    .with_context(|| format!("Label {} reported as existing but not found", name))
            }
            Err(e) => Err(e).context(format!("Failed to create label {}", name)),
        }
    }

    /// Add the configured scopes to a request builder
    fn scoped<R>(&self, req: R, add: impl Fn(R, &str) -> R) -> R {
        self.scopes.iter().fold(req, |req, s| add(req, s))
    }
}

#[async_trait]
impl MailClient for GmailClient {
    async fn resolve_label_id(
        &self,
        name: &str,
        create_if_not_exists: bool,
    ) -> Result<Option<String>> {
        if let Some(id) = self.find_label(name).await? {
            return Ok(Some(id));
        }
        if !create_if_not_exists {
            debug!(label = %name, "Label not found");
            return Ok(None);
        }
        self.create_label(name).await.map(Some)
    }

    async fn delete_label(&self, label_id: &str) -> Result<()> {
        self.scoped(
            self.hub.users().labels_delete(&self.user_id, label_id),
            |req, s| req.add_scope(s),
        )
        .doit()
        .await
        .context(format!("Failed to delete label {}", label_id))?;
        info!(label_id = %label_id, "Deleted label");
        Ok(())
    }

    async fn search(&self, criteria: &str) -> Result<Vec<models::MessageSummary>> {
        let mut summaries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self
                .scoped(self.hub.users().messages_list(&self.user_id), |req, s| {
                    req.add_scope(s)
                })
                .q(criteria);
            if let Some(token) = &page_token {
                req = req.page_token(token);
            }

            let (_, message_list) = req.doit().await.context("Failed to search messages")?;

            summaries.extend(
                message_list
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| {
                        Some(models::MessageSummary {
                            id: m.id?,
                            thread_id: m.thread_id,
                        })
                    }),
            );

            match message_list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(criteria = %criteria, matches = summaries.len(), "Searched messages");
        Ok(summaries)
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<String> {
        use std::io::Cursor;
        let cursor = Cursor::new(message.to_rfc822().into_bytes());

        let (_, sent) = self
            .scoped(
                self.hub
                    .users()
                    .messages_send(google_gmail1::api::Message::default(), &self.user_id),
                |req, s| req.add_scope(s),
            )
            .upload(
                cursor,
                "message/rfc822"
                    .parse()
                    .context("Invalid message MIME type")?,
            )
            .await
            .context("Failed to send message")?;

        let id = sent.id.context("Sent message has no id")?;
        info!(message_id = %id, to = %message.to, "Sent message");
        Ok(id)
    }

    async fn fetch_message(&self, id: &str, projection: &Projection) -> Result<models::Message> {
        let mut req = self.scoped(
            self.hub.users().messages_get(&self.user_id, id),
            |req, s| req.add_scope(s),
        );
        if let Some(format) = projection.format {
            req = req.format(format.as_str());
        }
        for header in &projection.metadata_headers {
            req = req.add_metadata_headers(header);
        }
        if let Some(fields) = projection.fields_param() {
            req = req.param("fields", fields.as_str());
        }

        let (_, msg) = req
            .doit()
            .await
            .context(format!("Failed to get message {}", id))?;

        let headers = msg
            .payload
            .as_ref()
            .and_then(|p| p.headers.as_ref())
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|h| {
                        Some(Header {
                            name: h.name.clone()?,
                            value: h.value.clone().unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let body_text = msg
            .payload
            .as_ref()
            .and_then(|p| extract_text_body(p, "text/plain"));

        Ok(models::Message {
            id: msg.id.unwrap_or_else(|| id.to_string()),
            thread_id: msg.thread_id,
            label_ids: msg.label_ids.unwrap_or_default(),
            headers,
            snippet: msg.snippet,
            internal_date: msg.internal_date.and_then(DateTime::<Utc>::from_timestamp_millis),
            body_text,
        })
    }

    async fn batch_modify_labels(
        &self,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<ModifyOutcome> {
        let req = BatchModifyMessagesRequest {
            ids: Some(message_ids.to_vec()),
            add_label_ids: (!add_label_ids.is_empty()).then(|| add_label_ids.to_vec()),
            remove_label_ids: (!remove_label_ids.is_empty()).then(|| remove_label_ids.to_vec()),
        };

        let response = self
            .scoped(
                self.hub.users().messages_batch_modify(req, &self.user_id),
                |req, s| req.add_scope(s),
            )
            .doit()
            .await
            .context("Failed to modify message labels")?;

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .context("Failed to read batch modify response")?;

        debug!(
            messages = message_ids.len(),
            add = ?add_label_ids,
            remove = ?remove_label_ids,
            body_len = body.len(),
            "Batch modified labels"
        );
        Ok(ModifyOutcome::from_body(&body))
    }

    async fn trash_message(&self, id: &str) -> Result<TrashedMessage> {
        let (_, msg) = self
            .scoped(
                self.hub.users().messages_trash(&self.user_id, id),
                |req, s| req.add_scope(s),
            )
            .doit()
            .await
            .context("Failed to trash message")?;

        Ok(TrashedMessage {
            id: msg.id.unwrap_or_else(|| id.to_string()),
            label_ids: msg.label_ids.unwrap_or_default(),
        })
    }
}

/// Gmail answers 409 when a label with that name already exists
fn is_conflict(err: &google_gmail1::Error) -> bool {
    match err {
        google_gmail1::Error::BadRequest(value) => {
            value.pointer("/error/code").and_then(|c| c.as_u64()) == Some(409)
        }
        google_gmail1::Error::Failure(response) => {
            response.status() == hyper::StatusCode::CONFLICT
        }
        _ => false,
    }
}

fn extract_text_body(part: &google_gmail1::api::MessagePart, mime_type: &str) -> Option<String> {
    if part.mime_type.as_deref() == Some(mime_type) {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            return Some(decode_body(data));
        }
    }

    let full_body: String = part
        .parts
        .iter()
        .flatten()
        .filter_map(|p| extract_text_body(p, mime_type))
        .collect();
    (!full_body.is_empty()).then_some(full_body)
}

/// Body data arrives base64url encoded, or already decoded depending on the
/// client version
fn decode_body(data: &[u8]) -> String {
    use base64::{Engine as _, engine::general_purpose};

    let data_str = String::from_utf8_lossy(data);
    let trimmed = data_str.trim();
    general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| general_purpose::URL_SAFE.decode(trimmed))
        .or_else(|_| general_purpose::STANDARD.decode(trimmed))
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| data_str.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64url_body() {
        // "Report ready?" in base64url without padding
        assert_eq!(decode_body(b"UmVwb3J0IHJlYWR5Pw"), "Report ready?");
    }

    #[test]
    fn test_decode_plain_body_passthrough() {
        assert_eq!(decode_body(b"not base64 at all!"), "not base64 at all!");
    }

    #[test]
    fn test_conflict_detection() {
        let conflict = google_gmail1::Error::BadRequest(serde_json::json!({
            "error": { "code": 409, "message": "Label name exists or conflicts" }
        }));
        assert!(is_conflict(&conflict));

        let not_found = google_gmail1::Error::BadRequest(serde_json::json!({
            "error": { "code": 404, "message": "Not Found" }
        }));
        assert!(!is_conflict(&not_found));
    }
}
