use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// System label IDs the workflow touches
pub mod labels {
    pub const INBOX: &str = "INBOX";
    pub const UNREAD: &str = "UNREAD";
    pub const TRASH: &str = "TRASH";
}

/// The label that marks a notification as processed.
///
/// The name is what operators see and configure; the id is assigned by the
/// provider and resolved lazily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedLabel {
    pub name: String,
    pub id: Option<String>,
}

impl ProcessedLabel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: Some(id.into()),
        }
    }

    /// `{application}-{environment}-processed`, so each environment gets its
    /// own marker.
    pub fn conventional_name(application: &str, environment: &str) -> String {
        format!("{}-{}-processed", application, environment)
    }
}

/// Search hit: the list endpoint only carries ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// A fetched message, limited to whatever the projection asked for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: Option<String>,
    pub label_ids: Vec<String>,
    pub headers: Vec<Header>,
    pub snippet: Option<String>,
    pub internal_date: Option<DateTime<Utc>>,
    pub body_text: Option<String>,
}

impl Message {
    pub fn has_label(&self, label_id: &str) -> bool {
        self.label_ids.iter().any(|l| l == label_id)
    }

    /// Header lookup is case-insensitive, as in RFC 5322
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    pub fn is_read(&self) -> bool {
        !self.has_label(labels::UNREAD)
    }
}

/// Provider response to a trash call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashedMessage {
    pub id: String,
    pub label_ids: Vec<String>,
}

impl TrashedMessage {
    pub fn is_trashed(&self) -> bool {
        self.label_ids.iter().any(|l| l == labels::TRASH)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingMessage {
    pub fn to_rfc822(&self) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\
             Content-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
            self.from, self.to, self.subject, self.body
        )
    }
}

/// Outcome of a successful label modification.
///
/// Gmail's batch modify answers with an empty body, so `NoContent` is the
/// normal success case and must not be read as a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ModifyOutcome {
    NoContent,
    Payload(serde_json::Value),
}

impl ModifyOutcome {
    pub fn from_body(body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let text = text.trim();
        if text.is_empty() {
            return ModifyOutcome::NoContent;
        }
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Object(map)) if map.is_empty() => ModifyOutcome::NoContent,
            Ok(value) => ModifyOutcome::Payload(value),
            Err(_) => ModifyOutcome::Payload(serde_json::Value::String(text.to_string())),
        }
    }

    pub fn is_no_content(&self) -> bool {
        matches!(self, ModifyOutcome::NoContent)
    }
}

/// A received notification and whether it already carries the processed label
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub message_id: String,
    pub processed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conventional_label_name() {
        assert_eq!(
            ProcessedLabel::conventional_name("reports", "production"),
            "reports-production-processed"
        );
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let msg = Message {
            headers: vec![Header {
                name: "subject".to_string(),
                value: "Weekly report".to_string(),
            }],
            ..Default::default()
        };
        assert_eq!(msg.subject(), Some("Weekly report"));
        assert_eq!(msg.header("From"), None);
    }

    #[test]
    fn test_empty_bodies_are_no_content() {
        assert!(ModifyOutcome::from_body(b"").is_no_content());
        assert!(ModifyOutcome::from_body(b"  \n").is_no_content());
        assert!(ModifyOutcome::from_body(b"{}").is_no_content());
    }

    #[test]
    fn test_non_empty_body_is_payload() {
        let outcome = ModifyOutcome::from_body(br#"{"id":"m1"}"#);
        assert_eq!(
            outcome,
            ModifyOutcome::Payload(serde_json::json!({ "id": "m1" }))
        );
    }

    #[test]
    fn test_trash_marker() {
        let trashed = TrashedMessage {
            id: "m1".to_string(),
            label_ids: vec!["TRASH".to_string(), "UNREAD".to_string()],
        };
        assert!(trashed.is_trashed());
    }
}
