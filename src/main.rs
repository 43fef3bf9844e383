use anyhow::{Context, Result, bail};
use email_notification::{
    Config, EmailNotification, GmailClient, MailClient, UpdateLabels, config, logging,
};
use std::sync::Arc;
use tracing::info;

const USAGE: &str = "Usage: email-notification [--config <path>] [--debug] \
                     <check | process [--trash] | delete-label>";

enum Command {
    Check,
    Process { trash: bool },
    DeleteLabel,
}

struct Args {
    config_path: String,
    debug: bool,
    command: Command,
}

fn parse_args() -> Result<Args> {
    let mut config_path = config::DEFAULT_PATH.to_string();
    let mut debug = false;
    let mut trash = false;
    let mut command = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next().context("--config needs a path")?,
            "--debug" => debug = true,
            "--trash" => trash = true,
            "check" | "process" | "delete-label" if command.is_none() => {
                command = Some(arg.clone())
            }
            other => bail!("Unexpected argument '{}'\n{}", other, USAGE),
        }
    }

    let command = match command.as_deref() {
        Some("check") => Command::Check,
        Some("process") => Command::Process { trash },
        Some("delete-label") => Command::DeleteLabel,
        _ => bail!("{}", USAGE),
    };

    Ok(Args {
        config_path,
        debug,
        command,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    logging::init(args.debug);

    let config = Config::load(&args.config_path)?;
    let client: Arc<dyn MailClient> =
        Arc::new(GmailClient::connect(&config.gmail, &config.app_name).await?);

    match args.command {
        Command::Check => check(client, &config).await,
        Command::Process { trash } => process(client, &config, trash).await,
        Command::DeleteLabel => delete_label(client, &config).await,
    }
}

async fn check(client: Arc<dyn MailClient>, config: &Config) -> Result<()> {
    let mut notification = EmailNotification::new(client, config.notification_query()?);

    match notification.check().await? {
        None => println!("Not received"),
        Some(found) => {
            println!("{}", serde_json::to_string_pretty(&found)?);
            let message = notification.get_message().await?;
            if let Some(subject) = message.subject() {
                println!("Subject: {}", subject);
            }
            if let Some(date) = message.internal_date {
                println!("Date: {}", date.to_rfc3339());
            }
            if let Some(snippet) = &message.snippet {
                println!("Snippet: {}", snippet);
            }
        }
    }
    println!("State: {}", notification.state());
    Ok(())
}

async fn process(client: Arc<dyn MailClient>, config: &Config, trash: bool) -> Result<()> {
    let mut notification = EmailNotification::new(client, config.notification_query()?);

    let Some(found) = notification.check().await? else {
        println!("Not received, nothing to process");
        return Ok(());
    };

    if found.processed {
        info!(message_id = %found.message_id, "Notification already processed");
    } else {
        notification.update_labels(UpdateLabels::processed()).await?;
        println!("Processed: {}", found.message_id);
    }

    if trash {
        let trashed = notification.trash().await?;
        println!("Trashed {} message(s)", trashed.len());
    }
    println!("State: {}", notification.state());
    Ok(())
}

async fn delete_label(client: Arc<dyn MailClient>, config: &Config) -> Result<()> {
    let name = config.processed_label_name();
    match client.resolve_label_id(&name, false).await? {
        Some(id) => {
            client.delete_label(&id).await?;
            println!("Deleted label {} ({})", name, id);
        }
        None => println!("Label {} does not exist", name),
    }
    Ok(())
}
