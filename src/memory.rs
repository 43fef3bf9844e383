//! In-memory mailbox
//!
//! Implements `MailClient` without a network so the notification workflow can
//! be exercised in tests and dry runs. Counts provider calls and can be told
//! to fail a call of a given kind, to answer trash without `TRASH`, or to
//! refuse label creation.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::client::MailClient;
use crate::models::{
    Header, Message, MessageSummary, ModifyOutcome, OutgoingMessage, TrashedMessage, labels,
};
use crate::query::{MessageFormat, Projection};

const SYSTEM_LABELS: &[&str] = &["INBOX", "UNREAD", "TRASH", "SPAM", "STARRED", "SENT"];
const SNIPPET_LEN: usize = 200;

/// Provider call kinds that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ResolveLabel,
    Search,
    Fetch,
    Modify,
    Trash,
}

struct StoredMessage {
    id: String,
    thread_id: String,
    from: String,
    to: String,
    subject: String,
    body: String,
    label_ids: Vec<String>,
    received_at: DateTime<Utc>,
}

#[derive(Default)]
struct MailboxState {
    /// (id, name)
    labels: Vec<(String, String)>,
    /// Newest first
    messages: Vec<StoredMessage>,
    next_message: u64,
    next_label: u64,
    /// Successful calls left before the operation fails once
    failing: HashMap<Operation, usize>,
    unconfirmed_trash: bool,
    refuse_label_creation: bool,
}

#[derive(Default)]
struct CallCounts {
    searches: AtomicUsize,
    fetches: AtomicUsize,
    modifies: AtomicUsize,
    trashes: AtomicUsize,
    label_creates: AtomicUsize,
}

#[derive(Default)]
pub struct InMemoryMailbox {
    state: RwLock<MailboxState>,
    calls: CallCounts,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a message in the inbox as if it had just arrived
    pub fn deliver(&self, message: &OutgoingMessage) -> String {
        self.deliver_at(message, Utc::now())
    }

    pub fn deliver_at(&self, message: &OutgoingMessage, received_at: DateTime<Utc>) -> String {
        let mut state = self.state.write().unwrap();
        state.next_message += 1;
        let id = format!("msg{:04}", state.next_message);
        let stored = StoredMessage {
            id: id.clone(),
            thread_id: format!("thr{:04}", state.next_message),
            from: message.from.clone(),
            to: message.to.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            label_ids: vec![labels::INBOX.to_string(), labels::UNREAD.to_string()],
            received_at,
        };
        // Newest first, like the Gmail list endpoint
        let pos = state
            .messages
            .iter()
            .position(|m| m.received_at <= received_at)
            .unwrap_or(state.messages.len());
        state.messages.insert(pos, stored);
        id
    }

    /// Make the next call of `operation` fail with a provider error
    pub fn fail_next(&self, operation: Operation) {
        self.fail_after(operation, 0);
    }

    /// Let `succeeding` calls of `operation` through, then fail the one after
    pub fn fail_after(&self, operation: Operation, succeeding: usize) {
        self.state
            .write()
            .unwrap()
            .failing
            .insert(operation, succeeding);
    }

    /// Answer trash calls with the label set untouched, without `TRASH`
    pub fn leave_trash_unconfirmed(&self) {
        self.state.write().unwrap().unconfirmed_trash = true;
    }

    /// Report missing labels as not found even when creation is requested
    pub fn refuse_label_creation(&self) {
        self.state.write().unwrap().refuse_label_creation = true;
    }

    pub fn label_ids_of(&self, message_id: &str) -> Option<Vec<String>> {
        let state = self.state.read().unwrap();
        state
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.label_ids.clone())
    }

    pub fn label_names(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        state.labels.iter().map(|(_, name)| name.clone()).collect()
    }

    pub fn search_count(&self) -> usize {
        self.calls.searches.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.calls.fetches.load(Ordering::SeqCst)
    }

    pub fn modify_count(&self) -> usize {
        self.calls.modifies.load(Ordering::SeqCst)
    }

    pub fn trash_count(&self) -> usize {
        self.calls.trashes.load(Ordering::SeqCst)
    }

    pub fn label_create_count(&self) -> usize {
        self.calls.label_creates.load(Ordering::SeqCst)
    }

    fn check_failure(&self, operation: Operation) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let Some(remaining) = state.failing.get_mut(&operation) else {
            return Ok(());
        };
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(());
        }
        state.failing.remove(&operation);
        bail!("simulated provider failure during {:?}", operation);
    }
}

#[async_trait]
impl MailClient for InMemoryMailbox {
    async fn resolve_label_id(
        &self,
        name: &str,
        create_if_not_exists: bool,
    ) -> Result<Option<String>> {
        self.check_failure(Operation::ResolveLabel)?;
        let mut state = self.state.write().unwrap();
        if let Some((id, _)) = state
            .labels
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
        {
            return Ok(Some(id.clone()));
        }
        if !create_if_not_exists || state.refuse_label_creation {
            return Ok(None);
        }

        state.next_label += 1;
        let id = format!("Label_{}", state.next_label);
        state.labels.push((id.clone(), name.to_string()));
        self.calls.label_creates.fetch_add(1, Ordering::SeqCst);
        Ok(Some(id))
    }

    async fn delete_label(&self, label_id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let before = state.labels.len();
        state.labels.retain(|(id, _)| id != label_id);
        if state.labels.len() == before {
            bail!("label {} not found", label_id);
        }
        for msg in state.messages.iter_mut() {
            msg.label_ids.retain(|l| l != label_id);
        }
        Ok(())
    }

    async fn search(&self, criteria: &str) -> Result<Vec<MessageSummary>> {
        self.calls.searches.fetch_add(1, Ordering::SeqCst);
        self.check_failure(Operation::Search)?;
        let filters = parse_criteria(criteria);
        let state = self.state.read().unwrap();
        let now = Utc::now();
        Ok(state
            .messages
            .iter()
            .filter(|m| matches_all(m, &filters, &state.labels, now))
            .map(|m| MessageSummary {
                id: m.id.clone(),
                thread_id: Some(m.thread_id.clone()),
            })
            .collect())
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<String> {
        Ok(self.deliver(message))
    }

    async fn fetch_message(&self, id: &str, projection: &Projection) -> Result<Message> {
        self.calls.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_failure(Operation::Fetch)?;
        let state = self.state.read().unwrap();
        let stored = state
            .messages
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| anyhow!("message {} not found", id))?;
        Ok(project(stored, projection))
    }

    async fn batch_modify_labels(
        &self,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<ModifyOutcome> {
        self.calls.modifies.fetch_add(1, Ordering::SeqCst);
        self.check_failure(Operation::Modify)?;
        let mut state = self.state.write().unwrap();

        // Validate everything before touching anything so a failure is atomic
        for label in add_label_ids {
            let known = SYSTEM_LABELS.contains(&label.as_str())
                || state.labels.iter().any(|(id, _)| id == label);
            if !known {
                bail!("invalid label: {}", label);
            }
        }
        for id in message_ids {
            if !state.messages.iter().any(|m| &m.id == id) {
                bail!("message {} not found", id);
            }
        }

        for msg in state
            .messages
            .iter_mut()
            .filter(|m| message_ids.contains(&m.id))
        {
            msg.label_ids.retain(|l| !remove_label_ids.contains(l));
            for label in add_label_ids {
                if !msg.label_ids.contains(label) {
                    msg.label_ids.push(label.clone());
                }
            }
        }
        Ok(ModifyOutcome::NoContent)
    }

    async fn trash_message(&self, id: &str) -> Result<TrashedMessage> {
        self.calls.trashes.fetch_add(1, Ordering::SeqCst);
        self.check_failure(Operation::Trash)?;
        let mut state = self.state.write().unwrap();
        let unconfirmed = state.unconfirmed_trash;
        let msg = state
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| anyhow!("message {} not found", id))?;
        if unconfirmed {
            return Ok(TrashedMessage {
                id: msg.id.clone(),
                label_ids: msg.label_ids.clone(),
            });
        }
        msg.label_ids.retain(|l| l != labels::INBOX);
        if !msg.label_ids.iter().any(|l| l == labels::TRASH) {
            msg.label_ids.push(labels::TRASH.to_string());
        }
        Ok(TrashedMessage {
            id: msg.id.clone(),
            label_ids: msg.label_ids.clone(),
        })
    }
}

fn project(stored: &StoredMessage, projection: &Projection) -> Message {
    let wants = |field: &str| match &projection.fields {
        None => true,
        Some(fields) => fields
            .iter()
            .any(|f| f == field || f.starts_with(&format!("{}(", field))),
    };

    let format = projection.format.unwrap_or(MessageFormat::Full);
    let mut headers = vec![
        Header {
            name: "From".to_string(),
            value: stored.from.clone(),
        },
        Header {
            name: "To".to_string(),
            value: stored.to.clone(),
        },
        Header {
            name: "Subject".to_string(),
            value: stored.subject.clone(),
        },
    ];
    match format {
        MessageFormat::Minimal | MessageFormat::Raw => headers.clear(),
        MessageFormat::Metadata if !projection.metadata_headers.is_empty() => headers.retain(|h| {
            projection
                .metadata_headers
                .iter()
                .any(|wanted| wanted.eq_ignore_ascii_case(&h.name))
        }),
        _ => {}
    }

    Message {
        id: stored.id.clone(),
        thread_id: wants("threadId").then(|| stored.thread_id.clone()),
        label_ids: if wants("labelIds") {
            stored.label_ids.clone()
        } else {
            Vec::new()
        },
        headers: if wants("payload") { headers } else { Vec::new() },
        snippet: wants("snippet").then(|| stored.body.chars().take(SNIPPET_LEN).collect()),
        internal_date: wants("internalDate").then_some(stored.received_at),
        body_text: (format == MessageFormat::Full && wants("payload"))
            .then(|| stored.body.clone()),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Criterion {
    From(String),
    To(String),
    Subject(String),
    Unread(bool),
    Label(String),
    In(String),
    NewerThan(Duration),
    OlderThan(Duration),
    Term(String),
}

/// Understands the subset of Gmail search operators notifications use
fn parse_criteria(input: &str) -> Vec<Criterion> {
    tokenize(input)
        .into_iter()
        .map(|token| {
            let Some((key, value)) = token.split_once(':') else {
                return Criterion::Term(unquote(&token));
            };
            let value = unquote(value);
            match key.to_lowercase().as_str() {
                "from" => Criterion::From(value),
                "to" => Criterion::To(value),
                "subject" => Criterion::Subject(value),
                "label" => Criterion::Label(value),
                "in" => Criterion::In(value),
                "is" => match value.to_lowercase().as_str() {
                    "unread" => Criterion::Unread(true),
                    "read" => Criterion::Unread(false),
                    _ => Criterion::Label(value),
                },
                "newer_than" => match parse_age(&value) {
                    Some(age) => Criterion::NewerThan(age),
                    None => Criterion::Term(unquote(&token)),
                },
                "older_than" => match parse_age(&value) {
                    Some(age) => Criterion::OlderThan(age),
                    None => Criterion::Term(unquote(&token)),
                },
                _ => Criterion::Term(unquote(&token)),
            }
        })
        .collect()
}

/// Split on whitespace outside double quotes
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}

/// `1d`, `2m`, `1y` (and `3h`, which Gmail also accepts).
///
/// `None` for anything malformed or too large for a `Duration`.
fn parse_age(value: &str) -> Option<Duration> {
    let unit = value.chars().last()?;
    let amount: i64 = value[..value.len() - unit.len_utf8()].parse().ok()?;
    match unit.to_ascii_lowercase() {
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        'm' => Duration::try_days(amount.checked_mul(30)?),
        'y' => Duration::try_days(amount.checked_mul(365)?),
        _ => None,
    }
}

fn matches_all(
    msg: &StoredMessage,
    criteria: &[Criterion],
    user_labels: &[(String, String)],
    now: DateTime<Utc>,
) -> bool {
    let contains = |haystack: &str, needle: &str| {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    };
    let has_label = |name: &str| {
        let id = user_labels
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(id, _)| id.as_str())
            .unwrap_or(name);
        msg.label_ids.iter().any(|l| l.eq_ignore_ascii_case(id))
    };

    let searches_trash = criteria.iter().any(|c| {
        matches!(
            c,
            Criterion::In(place)
                if place.eq_ignore_ascii_case("trash") || place.eq_ignore_ascii_case("anywhere")
        )
    });
    if !searches_trash && has_label(labels::TRASH) {
        return false;
    }

    criteria.iter().all(|criterion| match criterion {
        Criterion::From(v) => contains(&msg.from, v),
        Criterion::To(v) => contains(&msg.to, v),
        Criterion::Subject(v) => contains(&msg.subject, v),
        Criterion::Unread(unread) => has_label(labels::UNREAD) == *unread,
        Criterion::Label(name) => has_label(name),
        Criterion::In(place) => place.eq_ignore_ascii_case("anywhere") || has_label(place),
        // A cutoff before the earliest representable date admits everything
        Criterion::NewerThan(age) => now
            .checked_sub_signed(*age)
            .is_none_or(|cutoff| msg.received_at > cutoff),
        Criterion::OlderThan(age) => now
            .checked_sub_signed(*age)
            .is_some_and(|cutoff| msg.received_at < cutoff),
        Criterion::Term(term) => contains(&msg.subject, term) || contains(&msg.body, term),
    })
}
