use thiserror::Error;

/// Failures of the notification engine.
///
/// `Provider` is whatever the mail client reported, passed through untouched.
/// The other variants are misuse or unmet postconditions detected locally.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error(transparent)]
    Provider(#[from] anyhow::Error),

    #[error("no message matching the search criteria has been received")]
    NotReceived,

    #[error("the matched messages have already been trashed")]
    AlreadyTrashed,

    #[error("processed label '{name}' could not be resolved")]
    LabelUnresolved { name: String },

    #[error("trash of message {message_id} was not confirmed by the provider")]
    TrashNotConfirmed { message_id: String },

    #[error("invalid notification query: {0}")]
    InvalidQuery(String),
}

pub type Result<T> = std::result::Result<T, NotificationError>;
