//! Watches a mailbox for a notification email and processes it exactly once.
//!
//! `EmailNotification` finds the message matching a search, tells whether it
//! already carries the processed label, and applies the label, read-mark and
//! trash transitions through any `MailClient`. `GmailClient` talks to Gmail;
//! `InMemoryMailbox` stands in for it in tests.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod gmail;
pub mod logging;
pub mod memory;
pub mod models;
pub mod notification;
pub mod query;
pub mod state;

pub use client::MailClient;
pub use config::Config;
pub use error::{NotificationError, Result};
pub use gmail::GmailClient;
pub use memory::InMemoryMailbox;
pub use models::{MatchResult, Message, ModifyOutcome, ProcessedLabel, TrashedMessage};
pub use notification::{EmailNotification, UpdateLabels};
pub use query::{MessageFormat, NotificationQuery, Projection};
pub use state::NotificationState;
