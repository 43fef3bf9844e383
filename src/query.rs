//! The immutable description of one "watch for this email" intent.

use crate::error::{NotificationError, Result};
use crate::models::ProcessedLabel;
use serde::{Deserialize, Serialize};

/// Gmail's `format` parameter for `messages.get`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    Minimal,
    Full,
    Raw,
    Metadata,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Minimal => "minimal",
            MessageFormat::Full => "full",
            MessageFormat::Raw => "raw",
            MessageFormat::Metadata => "metadata",
        }
    }
}

/// What to ask for when fetching a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub fields: Option<Vec<String>>,
    pub format: Option<MessageFormat>,
    pub metadata_headers: Vec<String>,
}

impl Projection {
    /// Just enough to read the label set
    pub fn labels_only() -> Self {
        Self {
            fields: Some(vec!["id".to_string(), "labelIds".to_string()]),
            format: Some(MessageFormat::Minimal),
            metadata_headers: Vec::new(),
        }
    }

    /// Value for the `fields` partial-response parameter
    pub fn fields_param(&self) -> Option<String> {
        self.fields.as_ref().map(|f| f.join(","))
    }

    pub fn includes_labels(&self) -> bool {
        match &self.fields {
            None => true,
            Some(fields) => fields.iter().any(|f| f == "labelIds"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationQuery {
    search_criteria: String,
    processed_label: ProcessedLabel,
    projection: Projection,
}

impl NotificationQuery {
    pub fn builder(
        search_criteria: impl Into<String>,
        processed_label_name: impl Into<String>,
    ) -> NotificationQueryBuilder {
        NotificationQueryBuilder {
            search_criteria: search_criteria.into(),
            processed_label_name: processed_label_name.into(),
            processed_label_id: None,
            projection: Projection::default(),
        }
    }

    pub fn search_criteria(&self) -> &str {
        &self.search_criteria
    }

    pub fn processed_label(&self) -> &ProcessedLabel {
        &self.processed_label
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }
}

pub struct NotificationQueryBuilder {
    search_criteria: String,
    processed_label_name: String,
    processed_label_id: Option<String>,
    projection: Projection,
}

impl NotificationQueryBuilder {
    /// Skip label resolution by supplying the provider id up front
    pub fn processed_label_id(mut self, id: impl Into<String>) -> Self {
        self.processed_label_id = Some(id.into());
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn format(mut self, format: MessageFormat) -> Self {
        self.projection.format = Some(format);
        self
    }

    pub fn metadata_header(mut self, header: impl Into<String>) -> Self {
        self.projection.metadata_headers.push(header.into());
        self
    }

    pub fn build(self) -> Result<NotificationQuery> {
        if self.search_criteria.trim().is_empty() {
            return Err(NotificationError::InvalidQuery(
                "search criteria must not be empty".to_string(),
            ));
        }
        if self.processed_label_name.trim().is_empty() {
            return Err(NotificationError::InvalidQuery(
                "processed label name must not be empty".to_string(),
            ));
        }

        let processed_label = match self.processed_label_id {
            Some(id) if !id.is_empty() => ProcessedLabel::with_id(self.processed_label_name, id),
            _ => ProcessedLabel::new(self.processed_label_name),
        };

        Ok(NotificationQuery {
            search_criteria: self.search_criteria,
            processed_label,
            projection: self.projection,
        })
    }
}
