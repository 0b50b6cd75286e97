//! drive_relay - Telegram bot that relays Google Drive folders into a chat.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use drive_relay::{DriveSession, RelayBot, TelegramApi};

/// Telegram bot that sends back every file of a Google Drive folder link.
#[derive(Parser)]
#[command(name = "drive_relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Telegram bot token.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    bot_token: String,

    /// Path to the Google credentials JSON (authorized user token or service account key).
    #[arg(long, env = "GOOGLE_TOKEN_FILE", default_value = "token.json")]
    credentials: PathBuf,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine, the variables may come from the environment.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let api = TelegramApi::new(cli.bot_token);
    let session = DriveSession::new(&cli.credentials);
    tracing::info!(credentials = %cli.credentials.display(), "Starting drive_relay");

    RelayBot::new(api, session)
        .run()
        .await
        .context("Bot stopped with an error")?;

    Ok(())
}
