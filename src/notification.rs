//! Detection and idempotent processing of one email notification.
//!
//! An `EmailNotification` is bound to a single `NotificationQuery`. It runs the
//! search at most once, resolves the processed label at most once, keeps one
//! cached copy of the matched message, and applies the processing transitions
//! against the provider. Every operation takes `&mut self`, so calls on one
//! instance never interleave. State is only written after the provider call it
//! depends on has returned, which keeps a timed-out call from leaving partial
//! state behind.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::MailClient;
use crate::error::{NotificationError, Result};
use crate::models::{MatchResult, Message, ModifyOutcome, TrashedMessage, labels};
use crate::query::{NotificationQuery, Projection};
use crate::state::NotificationState;

/// Which label changes `update_labels` makes.
///
/// Deserializing rejects unknown keys so a typo in a config file is an error
/// rather than a silent no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct UpdateLabels {
    #[serde(default)]
    pub apply_processed_label: bool,
    #[serde(default)]
    pub mark_as_read: bool,
}

impl UpdateLabels {
    /// Apply the processed label and mark read
    pub fn processed() -> Self {
        Self {
            apply_processed_label: true,
            mark_as_read: true,
        }
    }

    fn is_empty(&self) -> bool {
        !self.apply_processed_label && !self.mark_as_read
    }
}

pub struct EmailNotification {
    client: Arc<dyn MailClient>,
    query: NotificationQuery,
    processed_label_id: Option<String>,
    /// `None` until the search has run
    matches: Option<Vec<String>>,
    cached: Option<Message>,
    processed: Option<bool>,
    trashed: Vec<String>,
}

impl EmailNotification {
    pub fn new(client: Arc<dyn MailClient>, query: NotificationQuery) -> Self {
        let processed_label_id = query.processed_label().id.clone();
        Self {
            client,
            query,
            processed_label_id,
            matches: None,
            cached: None,
            processed: None,
            trashed: Vec::new(),
        }
    }

    pub fn state(&self) -> NotificationState {
        match &self.matches {
            None => NotificationState::Unresolved,
            Some(ids) if ids.is_empty() => NotificationState::NotReceived,
            Some(ids) if ids.iter().all(|id| self.trashed.contains(id)) => {
                NotificationState::Trashed
            }
            Some(_) if self.processed == Some(true) => NotificationState::ReceivedProcessed,
            Some(_) => NotificationState::ReceivedUnprocessed,
        }
    }

    /// Ids found by the search, empty before it has run
    pub fn matched_ids(&self) -> &[String] {
        self.matches.as_deref().unwrap_or(&[])
    }

    // Search resolver

    /// Whether at least one message matches the search criteria.
    ///
    /// The search runs once per instance; later calls reuse its result.
    pub async fn has_been_received(&mut self) -> Result<bool> {
        self.ensure_searched().await?;
        Ok(!self.matched_ids().is_empty())
    }

    pub async fn get_message_id(&mut self) -> Result<String> {
        self.ensure_searched().await?;
        self.matched_ids()
            .first()
            .cloned()
            .ok_or(NotificationError::NotReceived)
    }

    /// Received status plus processed status for the primary match
    pub async fn check(&mut self) -> Result<Option<MatchResult>> {
        if !self.has_been_received().await? {
            return Ok(None);
        }
        let processed = self.all_have_been_processed().await?;
        let message_id = self.get_message_id().await?;
        Ok(Some(MatchResult {
            message_id,
            processed,
        }))
    }

    async fn ensure_searched(&mut self) -> Result<()> {
        if self.matches.is_some() {
            return Ok(());
        }

        let criteria = self.query.search_criteria();
        debug!(criteria = %criteria, "Searching mailbox for notification");
        let found = self.client.search(criteria).await?;
        let ids: Vec<String> = found.into_iter().map(|m| m.id).collect();

        if ids.len() > 1 {
            warn!(
                matches = ids.len(),
                criteria = %criteria,
                "Search matched more than one message; the newest is treated as primary"
            );
        }
        info!(matches = ids.len(), "Notification search resolved");
        self.matches = Some(ids);
        Ok(())
    }

    // Label state tracker

    /// Provider id of the processed label, created on first use if missing
    pub async fn get_processed_label_id(&mut self) -> Result<String> {
        if let Some(id) = &self.processed_label_id {
            return Ok(id.clone());
        }

        let name = &self.query.processed_label().name;
        let id = self
            .client
            .resolve_label_id(name, true)
            .await?
            .ok_or_else(|| NotificationError::LabelUnresolved { name: name.clone() })?;

        debug!(label = %name, label_id = %id, "Resolved processed label");
        self.processed_label_id = Some(id.clone());
        Ok(id)
    }

    /// Whether every matched message carries the processed label.
    ///
    /// Nothing received is reported as not processed.
    pub async fn all_have_been_processed(&mut self) -> Result<bool> {
        self.ensure_searched().await?;
        if self.matched_ids().is_empty() {
            return Ok(false);
        }

        let label_id = self.get_processed_label_id().await?;
        let ids = self.matched_ids().to_vec();

        let mut processed = if self.query.projection().includes_labels() {
            self.get_message().await?.has_label(&label_id)
        } else {
            self.client
                .fetch_message(&ids[0], &Projection::labels_only())
                .await?
                .has_label(&label_id)
        };

        for id in ids.iter().skip(1) {
            if !processed {
                break;
            }
            processed = self
                .client
                .fetch_message(id, &Projection::labels_only())
                .await?
                .has_label(&label_id);
        }

        debug!(processed, "Checked processed label");
        self.processed = Some(processed);
        Ok(processed)
    }

    // Message cache

    /// The primary matched message, fetched once and then served from cache
    pub async fn get_message(&mut self) -> Result<&Message> {
        let message = match self.cached.take() {
            Some(message) => message,
            None => {
                let id = self.get_message_id().await?;
                debug!(message_id = %id, "Fetching notification message");
                self.client
                    .fetch_message(&id, self.query.projection())
                    .await?
            }
        };
        Ok(self.cached.insert(message))
    }

    /// Drop the cached message so the next `get_message` fetches again
    pub fn flush(&mut self) {
        if self.cached.take().is_some() {
            debug!("Flushed cached notification message");
        }
    }

    // Transition engine

    /// Apply the requested label changes to every matched message in one
    /// batched call.
    ///
    /// Returns `ModifyOutcome::NoContent` when the provider acknowledges with
    /// an empty body, which is how Gmail reports success.
    pub async fn update_labels(&mut self, options: UpdateLabels) -> Result<ModifyOutcome> {
        self.ensure_searched().await?;
        let ids = self.pending_ids()?;

        if options.is_empty() {
            debug!("No label changes requested");
            return Ok(ModifyOutcome::NoContent);
        }

        let mut add = Vec::new();
        if options.apply_processed_label {
            add.push(self.get_processed_label_id().await?);
        }
        let mut remove = Vec::new();
        if options.mark_as_read {
            remove.push(labels::UNREAD.to_string());
        }

        let outcome = self
            .client
            .batch_modify_labels(&ids, &add, &remove)
            .await?;

        // The label set changed, the cached copy is stale
        self.flush();
        if options.apply_processed_label {
            self.processed = Some(true);
        }

        match &outcome {
            ModifyOutcome::NoContent => info!(
                messages = ids.len(),
                applied_processed_label = options.apply_processed_label,
                marked_read = options.mark_as_read,
                "Updated notification labels"
            ),
            ModifyOutcome::Payload(body) => info!(
                messages = ids.len(),
                response = %body,
                "Updated notification labels with acknowledgment"
            ),
        }
        Ok(outcome)
    }

    /// Move every matched message to the trash, one provider call per message.
    ///
    /// Messages already trashed by an earlier call on this instance are
    /// skipped, so a call that failed part-way can be retried.
    pub async fn trash(&mut self) -> Result<Vec<TrashedMessage>> {
        self.ensure_searched().await?;
        let ids = self.pending_ids()?;

        let mut responses = Vec::with_capacity(ids.len());
        for id in ids {
            let response = self.client.trash_message(&id).await?;
            self.flush();
            self.trashed.push(id.clone());

            if !response.is_trashed() {
                warn!(
                    message_id = %id,
                    labels = ?response.label_ids,
                    "Trash response lacks TRASH label"
                );
                return Err(NotificationError::TrashNotConfirmed { message_id: id });
            }
            info!(message_id = %id, "Trashed notification");
            responses.push(response);
        }
        Ok(responses)
    }

    /// Matched ids not yet trashed; errors when there is nothing to act on
    fn pending_ids(&self) -> Result<Vec<String>> {
        let matched = self.matched_ids();
        if matched.is_empty() {
            return Err(NotificationError::NotReceived);
        }
        let pending: Vec<String> = matched
            .iter()
            .filter(|id| !self.trashed.contains(id))
            .cloned()
            .collect();
        if pending.is_empty() {
            return Err(NotificationError::AlreadyTrashed);
        }
        Ok(pending)
    }
}
