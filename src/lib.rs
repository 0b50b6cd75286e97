//! drive_relay - A Telegram bot that relays Google Drive folders into a chat.
//!
//! A user sends a folder link; the bot lists the folder, fetches every file
//! (exporting Google Docs, Sheets and Slides to portable formats) and sends
//! each one back as a document attachment.
//!
//! # Example
//!
//! ```no_run
//! use drive_relay::{DriveSession, RelayBot, TelegramApi};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let api = TelegramApi::new("123456:bot-token");
//!     let session = DriveSession::new("token.json");
//!
//!     RelayBot::new(api, session).run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod bot;
pub mod client;
pub mod error;
pub mod export;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod telegram;
pub mod transfer;
pub mod url_parser;

// Re-exports for convenience
pub use auth::Authenticator;
pub use bot::RelayBot;
pub use client::{list_folder, DriveApi, DriveClient, DriveSession};
pub use error::{RelayError, Result};
pub use media::{Chunk, ChunkSource, MediaDownload};
pub use models::FileDescriptor;
pub use pipeline::{dispatch, relay_folder, RelaySummary, TransferOutcome};
pub use telegram::{ChatSink, TelegramApi, TelegramChat};
pub use url_parser::extract_folder_id;
