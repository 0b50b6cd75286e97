//! Command routing and the long-polling loop.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::client::DriveSession;
use crate::error::Result;
use crate::pipeline::relay_folder;
use crate::telegram::{ChatSink, TelegramApi, TelegramChat, Update};
use crate::transfer::SCRATCH_DIR;
use crate::url_parser::{is_folder_link, require_folder_id};

/// Seconds a `getUpdates` call may wait for new messages.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const GREETING: &str = "Hello! Send me a Google Drive folder link to start.";
const STOPPING: &str = "Bot is stopping...";
const INVALID_LINK: &str = "Invalid Google Drive link.";
const PROCESSING: &str = "Processing Google Drive link, please wait...";
const HELP: &str = "Send me a Google Drive folder link and I will send back every file in it.\n\
Google Docs, Sheets and Slides are converted to PDF, XLSX and PPTX.\n\
\n\
Commands:\n\
/start - say hello\n\
/help - show this message\n\
/stop - stop the bot";

/// A slash command sent to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Help,
    Unknown(String),
}

impl Command {
    /// Parse a message as a command. Messages not starting with `/` are not
    /// commands. `/cmd@botname` and trailing arguments are accepted.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or_default();

        Some(match name {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "help" => Command::Help,
            other => Command::Unknown(other.to_string()),
        })
    }
}

/// Whether the polling loop should keep going after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// The bot: routes chat messages to the relay pipeline.
pub struct RelayBot {
    api: TelegramApi,
    session: DriveSession,
    scratch_dir: PathBuf,
}

impl RelayBot {
    pub fn new(api: TelegramApi, session: DriveSession) -> Self {
        Self {
            api,
            session,
            scratch_dir: PathBuf::from(SCRATCH_DIR),
        }
    }

    /// Poll for updates and handle them one at a time until `/stop`.
    pub async fn run(&self) -> Result<()> {
        let me = self.api.get_me().await?;
        info!(bot_id = me.id, username = ?me.username, "Bot started, polling for messages");

        let mut offset = 0;
        loop {
            let updates = match self.api.get_updates(offset, POLL_TIMEOUT_SECS).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Polling failed, retrying");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = update.update_id + 1;
                if self.handle_update(update).await == Flow::Stop {
                    // Confirm the stop update so it is not delivered again on restart.
                    if let Err(e) = self.api.get_updates(offset, 0).await {
                        warn!(error = %e, "Failed to acknowledge final update");
                    }
                    info!("Stop requested, shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Handle one update. Updates without message text are ignored.
    pub async fn handle_update(&self, update: Update) -> Flow {
        let Some(message) = update.message else {
            return Flow::Continue;
        };
        let Some(text) = message.text.as_deref() else {
            debug!(update_id = update.update_id, "Ignoring non-text message");
            return Flow::Continue;
        };

        info!(chat_id = message.chat.id, message_id = message.message_id, "Received message");
        let chat = TelegramChat::new(&self.api, message.chat.id, Some(message.message_id));
        self.handle_text(&chat, text).await
    }

    /// Route a message: commands first, anything else is treated as a link.
    pub async fn handle_text<C: ChatSink + ?Sized>(&self, chat: &C, text: &str) -> Flow {
        match Command::parse(text) {
            Some(Command::Start) => reply(chat, GREETING).await,
            Some(Command::Help) => reply(chat, HELP).await,
            Some(Command::Stop) => {
                reply(chat, STOPPING).await;
                return Flow::Stop;
            }
            Some(Command::Unknown(name)) => {
                reply(chat, &format!("Unknown command /{}. Use /help to see what I can do.", name)).await
            }
            None => self.handle_link(chat, text).await,
        }
        Flow::Continue
    }

    async fn handle_link<C: ChatSink + ?Sized>(&self, chat: &C, text: &str) {
        if !is_folder_link(text) {
            reply(chat, INVALID_LINK).await;
            return;
        }

        reply(chat, PROCESSING).await;

        let folder_id = match require_folder_id(text) {
            Ok(folder_id) => folder_id,
            Err(e) => {
                debug!(error = %e, "No folder id in link");
                reply(chat, INVALID_LINK).await;
                return;
            }
        };

        let drive = match self.session.client().await {
            Ok(drive) => drive,
            Err(e) => {
                error!(error = %e, "Error processing link");
                reply(chat, &format!("Error: {}", e)).await;
                return;
            }
        };

        let summary = relay_folder(drive, chat, &self.scratch_dir, &folder_id).await;
        info!(
            folder_id = %folder_id,
            delivered = summary.delivered,
            skipped = summary.skipped,
            failed = summary.failed,
            "Finished folder"
        );
    }
}

async fn reply<C: ChatSink + ?Sized>(chat: &C, text: &str) {
    if let Err(e) = chat.send_text(text).await {
        warn!(error = %e, "Failed to send reply");
    }
}
