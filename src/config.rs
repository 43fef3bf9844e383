use crate::auth::TokenStore;
use crate::models::{OutgoingMessage, ProcessedLabel};
use crate::query::{MessageFormat, NotificationQuery};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_PATH: &str = "settings.toml";
const DEFAULT_SCOPE: &str = "https://mail.google.com/";
const DEFAULT_TOKEN_FILE: &str = "gmail-token.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app_name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    pub gmail: GmailSettings,
    pub notification: NotificationSettings,
    #[serde(default)]
    pub test_message: Option<OutgoingMessage>,
}

/// Connection parameters handed to the Gmail client as-is
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailSettings {
    pub client_secret_file: PathBuf,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    pub token_dir: Option<PathBuf>,
    pub token_file: Option<PathBuf>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub search_criteria: String,
    pub processed_label_name: Option<String>,
    pub processed_label_id: Option<String>,
    pub fields: Option<Vec<String>>,
    pub format: Option<MessageFormat>,
    #[serde(default)]
    pub metadata_headers: Vec<String>,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![DEFAULT_SCOPE.to_string()]
}

fn default_user_id() -> String {
    "me".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// The configured label name, or `{app_name}-{environment}-processed`
    pub fn processed_label_name(&self) -> String {
        self.notification
            .processed_label_name
            .clone()
            .unwrap_or_else(|| ProcessedLabel::conventional_name(&self.app_name, &self.environment))
    }

    pub fn notification_query(&self) -> Result<NotificationQuery> {
        let settings = &self.notification;
        let mut builder =
            NotificationQuery::builder(&settings.search_criteria, self.processed_label_name());
        if let Some(id) = &settings.processed_label_id {
            builder = builder.processed_label_id(id);
        }
        if let Some(fields) = &settings.fields {
            builder = builder.fields(fields.iter().cloned());
        }
        if let Some(format) = settings.format {
            builder = builder.format(format);
        }
        for header in &settings.metadata_headers {
            builder = builder.metadata_header(header);
        }
        Ok(builder.build()?)
    }
}

impl GmailSettings {
    /// Token file when one is configured, otherwise the keyring entry for the app
    pub fn token_store(&self, app_name: &str) -> TokenStore {
        match (&self.token_dir, &self.token_file) {
            (Some(dir), Some(file)) => TokenStore::File(dir.join(file)),
            (None, Some(file)) => TokenStore::File(file.clone()),
            (Some(dir), None) => TokenStore::File(dir.join(DEFAULT_TOKEN_FILE)),
            (None, None) => TokenStore::Keyring {
                service: app_name.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
app_name = "reports"
environment = "test"

[gmail]
client_secret_file = "credentials.json"
token_dir = ".tokens"
token_file = "token.json"
name = "reports mailbox"

[notification]
search_criteria = 'is:unread newer_than:1d from:"reports@example.com" subject:"Daily report"'
fields = ["id", "labelIds", "payload(headers)", "snippet"]
format = "metadata"
metadata_headers = ["subject"]

[test_message]
from = "Reports <reports@example.com>"
to = "inbox@example.com"
subject = "Daily report"
body = "This is some content"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();
        assert_eq!(config.gmail.user_id, "me");
        assert_eq!(config.gmail.scopes, vec![DEFAULT_SCOPE]);
        assert_eq!(config.processed_label_name(), "reports-test-processed");
        assert_eq!(
            config.gmail.token_store(&config.app_name),
            TokenStore::File(PathBuf::from(".tokens/token.json"))
        );
        assert_eq!(config.test_message.unwrap().subject, "Daily report");
    }

    #[test]
    fn test_notification_query_from_config() {
        let config = Config::parse(FULL).unwrap();
        let query = config.notification_query().unwrap();
        assert_eq!(query.processed_label().name, "reports-test-processed");
        assert_eq!(query.projection().format, Some(MessageFormat::Metadata));
        assert_eq!(query.projection().metadata_headers, vec!["subject"]);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::parse(
            r#"
app_name = "reports"

[gmail]
client_secret_file = "credentials.json"

[notification]
search_criteria = "subject:report"
processed_label_name = "custom-label"
processed_label_id = "Label_3"
"#,
        )
        .unwrap();
        assert_eq!(config.environment, "development");
        assert_eq!(config.processed_label_name(), "custom-label");
        assert_eq!(
            config.gmail.token_store("reports"),
            TokenStore::Keyring {
                service: "reports".to_string()
            }
        );
        let query = config.notification_query().unwrap();
        assert_eq!(query.processed_label().id.as_deref(), Some("Label_3"));
        assert!(config.test_message.is_none());
    }

    #[test]
    fn test_empty_criteria_is_rejected() {
        let config = Config::parse(
            r#"
app_name = "reports"
[gmail]
client_secret_file = "credentials.json"
[notification]
search_criteria = ""
"#,
        )
        .unwrap();
        assert!(config.notification_query().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.app_name, "reports");
        assert!(Config::load(file.path().with_extension("missing")).is_err());
    }
}
