//! End-to-end notification scenarios against the in-memory mailbox.
//!
//! Mirrors the live Gmail flow: create the processed label, send a matching
//! message, detect it, process it, trash it, and tear the label down.

use std::sync::Arc;
use std::time::Duration;

use email_notification::models::{OutgoingMessage, labels};
use email_notification::{
    EmailNotification, InMemoryMailbox, MailClient, MessageFormat, NotificationError,
    NotificationQuery, NotificationState, ProcessedLabel, UpdateLabels,
};

const EMAIL_BODY: &str = "This is some content";
const FROM_ADDRESS: &str = "reports@example.com";
const SUBJECT: &str = "Nightly export finished";

fn label_name() -> String {
    ProcessedLabel::conventional_name("reports", "test")
}

fn criteria() -> String {
    format!(
        r#"is:unread newer_than:1d from:"{}" subject:"{}""#,
        FROM_ADDRESS, SUBJECT
    )
}

fn notification_email() -> OutgoingMessage {
    OutgoingMessage {
        from: format!("Reports <{}>", FROM_ADDRESS),
        to: "ops@example.com".to_string(),
        subject: SUBJECT.to_string(),
        body: EMAIL_BODY.to_string(),
    }
}

/// Same shape as the production watcher: metadata projection, subject only
fn watcher(mailbox: &Arc<InMemoryMailbox>, label_id: &str) -> EmailNotification {
    let query = NotificationQuery::builder(criteria(), label_name())
        .fields(["id", "labelIds", "payload(headers)", "snippet"])
        .format(MessageFormat::Metadata)
        .metadata_header("subject")
        .processed_label_id(label_id)
        .build()
        .unwrap();
    EmailNotification::new(mailbox.clone(), query)
}

async fn setup_label(mailbox: &InMemoryMailbox) -> String {
    mailbox
        .resolve_label_id(&label_name(), true)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_processed_label_id_matches_provider() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    let label_id = setup_label(&mailbox).await;

    let query = NotificationQuery::builder(criteria(), label_name())
        .build()
        .unwrap();
    let mut en = EmailNotification::new(mailbox.clone(), query);
    assert_eq!(en.get_processed_label_id().await.unwrap(), label_id);
    assert_eq!(en.get_processed_label_id().await.unwrap(), label_id);
    assert_eq!(mailbox.label_create_count(), 1);

    mailbox.delete_label(&label_id).await.unwrap();
}

#[tokio::test]
async fn test_label_resolution_creates_when_absent() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    let query = NotificationQuery::builder(criteria(), label_name())
        .build()
        .unwrap();
    let mut en = EmailNotification::new(mailbox.clone(), query);

    let created = en.get_processed_label_id().await.unwrap();
    assert_eq!(mailbox.label_names(), vec![label_name()]);
    assert_eq!(
        mailbox.resolve_label_id(&label_name(), true).await.unwrap(),
        Some(created)
    );
}

#[tokio::test]
async fn test_single_notification_lifecycle() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    let label_id = setup_label(&mailbox).await;
    let sent_id = mailbox.send_message(&notification_email()).await.unwrap();

    let mut en = watcher(&mailbox, &label_id);

    assert!(en.has_been_received().await.unwrap());
    assert!(!en.all_have_been_processed().await.unwrap());

    let message_id = en.get_message_id().await.unwrap();
    assert!(!message_id.is_empty());
    assert_eq!(message_id, sent_id);

    let message = en.get_message().await.unwrap();
    assert_eq!(message.snippet.as_deref(), Some(EMAIL_BODY));
    assert_eq!(message.subject(), Some(SUBJECT));

    // Served from cache the second time
    en.get_message().await.unwrap();
    assert_eq!(mailbox.fetch_count(), 1);

    // A flushed cache goes back to the provider
    en.flush();
    en.get_message().await.unwrap();
    assert_eq!(mailbox.fetch_count(), 2);

    let outcome = en
        .update_labels(UpdateLabels {
            apply_processed_label: true,
            mark_as_read: true,
        })
        .await
        .unwrap();
    assert!(outcome.is_no_content());

    let refreshed = en.get_message().await.unwrap();
    assert!(refreshed.has_label(&label_id));
    assert!(!refreshed.has_label(labels::UNREAD));

    let responses = en.trash().await.unwrap();
    assert_eq!(responses.len(), 1);
    for resp in &responses {
        assert!(resp.label_ids.iter().any(|l| l == labels::TRASH));
    }
    assert_eq!(en.state(), NotificationState::Trashed);

    mailbox.delete_label(&label_id).await.unwrap();
}

#[tokio::test]
async fn test_non_received_notification() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    let label_id = setup_label(&mailbox).await;

    let query = NotificationQuery::builder(
        format!(
            r#"subject:"Dud email that couldn't possibly have been received" is:{}"#,
            label_name()
        ),
        label_name(),
    )
    .processed_label_id(&label_id)
    .build()
    .unwrap();
    let mut en = EmailNotification::new(mailbox.clone(), query);

    assert!(!en.has_been_received().await.unwrap());
    assert!(!en.all_have_been_processed().await.unwrap());
    assert_eq!(en.state(), NotificationState::NotReceived);
}

#[tokio::test]
async fn test_nothing_sent_is_not_received() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    let label_id = setup_label(&mailbox).await;
    let mut en = watcher(&mailbox, &label_id);

    assert!(!en.has_been_received().await.unwrap());
    assert!(!en.all_have_been_processed().await.unwrap());
}

#[tokio::test]
async fn test_processed_notification_is_not_matched_again() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    let label_id = setup_label(&mailbox).await;
    mailbox.send_message(&notification_email()).await.unwrap();

    let mut first_run = watcher(&mailbox, &label_id);
    let found = first_run.check().await.unwrap().unwrap();
    assert!(!found.processed);
    first_run
        .update_labels(UpdateLabels::processed())
        .await
        .unwrap();

    // Marked read, so the is:unread criteria no longer match
    let mut second_run = watcher(&mailbox, &label_id);
    assert_eq!(second_run.check().await.unwrap(), None);

    // Without is:unread the message is found, and already processed
    let query = NotificationQuery::builder(format!(r#"subject:"{}""#, SUBJECT), label_name())
        .processed_label_id(&label_id)
        .build()
        .unwrap();
    let mut third_run = EmailNotification::new(mailbox.clone(), query);
    assert!(third_run.all_have_been_processed().await.unwrap());
    assert_eq!(third_run.state(), NotificationState::ReceivedProcessed);
}

#[tokio::test]
async fn test_trash_returns_one_response_per_match() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    let label_id = setup_label(&mailbox).await;
    for _ in 0..3 {
        mailbox.send_message(&notification_email()).await.unwrap();
    }

    let mut en = watcher(&mailbox, &label_id);
    assert_eq!(en.matched_ids().len(), 0);
    assert!(en.has_been_received().await.unwrap());
    assert_eq!(en.matched_ids().len(), 3);

    en.update_labels(UpdateLabels::processed()).await.unwrap();
    assert_eq!(mailbox.modify_count(), 1);

    let responses = en.trash().await.unwrap();
    assert_eq!(responses.len(), 3);
    assert!(responses.iter().all(|r| r.is_trashed()));
    assert!(matches!(
        en.trash().await,
        Err(NotificationError::AlreadyTrashed)
    ));
}

#[tokio::test]
async fn test_operation_under_caller_timeout() {
    let mailbox = Arc::new(InMemoryMailbox::new());
    let label_id = setup_label(&mailbox).await;
    mailbox.send_message(&notification_email()).await.unwrap();
    let mut en = watcher(&mailbox, &label_id);

    let received = tokio::time::timeout(Duration::from_secs(5), en.has_been_received())
        .await
        .unwrap()
        .unwrap();
    assert!(received);
    assert_eq!(en.state(), NotificationState::ReceivedUnprocessed);
}
