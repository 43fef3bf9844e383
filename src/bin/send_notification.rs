use anyhow::{Context, Result};
use email_notification::{Config, GmailClient, MailClient, config, logging};

/// Sends the configured `[test_message]` so a matching notification exists
#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config_path = match args.iter().position(|a| a == "--config") {
        Some(i) => args
            .get(i + 1)
            .cloned()
            .context("--config needs a path")?,
        None => config::DEFAULT_PATH.to_string(),
    };
    logging::init(args.iter().any(|a| a == "--debug"));

    let config = Config::load(&config_path)?;
    let message = config
        .test_message
        .as_ref()
        .context("No [test_message] section in config")?;

    let client = GmailClient::connect(&config.gmail, &config.app_name).await?;
    let id = client.send_message(message).await?;

    println!("Sent notification {}", id);
    println!("Search criteria: {}", config.notification.search_criteria);
    Ok(())
}
