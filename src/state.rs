use std::fmt;

/// Where a notification instance is in its workflow.
///
/// `NotReceived` and `Trashed` are terminal; a new search needs a new
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationState {
    Unresolved,
    NotReceived,
    ReceivedUnprocessed,
    ReceivedProcessed,
    Trashed,
}

impl NotificationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationState::NotReceived | NotificationState::Trashed
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            NotificationState::Unresolved => "unresolved",
            NotificationState::NotReceived => "not received",
            NotificationState::ReceivedUnprocessed => "received, not processed",
            NotificationState::ReceivedProcessed => "received and processed",
            NotificationState::Trashed => "trashed",
        }
    }
}

impl fmt::Display for NotificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
