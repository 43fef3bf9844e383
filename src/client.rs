//! The mail-provider capabilities the notification engine consumes.

use crate::models::{Message, MessageSummary, ModifyOutcome, OutgoingMessage, TrashedMessage};
use crate::query::Projection;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait MailClient: Send + Sync {
    /// Look a label up by name, creating it when asked and absent.
    ///
    /// Returns `None` only when the label does not exist and creation was not
    /// requested.
    async fn resolve_label_id(&self, name: &str, create_if_not_exists: bool)
    -> Result<Option<String>>;

    async fn delete_label(&self, label_id: &str) -> Result<()>;

    /// Messages matching a provider query string, newest first
    async fn search(&self, criteria: &str) -> Result<Vec<MessageSummary>>;

    /// Returns the id of the sent message
    async fn send_message(&self, message: &OutgoingMessage) -> Result<String>;

    async fn fetch_message(&self, id: &str, projection: &Projection) -> Result<Message>;

    /// Add and remove labels on several messages in one call
    async fn batch_modify_labels(
        &self,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<ModifyOutcome>;

    async fn trash_message(&self, id: &str) -> Result<TrashedMessage>;
}
