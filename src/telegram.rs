//! Minimal Telegram Bot API client and the chat seam used by the pipeline.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::{RelayError, Result};

/// Base URL for the Telegram Bot API.
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Longest text Telegram accepts in one message.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Where progress, outcomes and attachments of a relay are sent.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Send a plain text message.
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Send a local file as a document attachment named `file_name`.
    async fn send_document(&self, path: &Path, file_name: &str) -> Result<()>;
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// Client for the Telegram Bot API.
pub struct TelegramApi {
    token: String,
    base_url: String,
    http: Client,
}

impl TelegramApi {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: TELEGRAM_API_BASE.to_string(),
            http: Client::new(),
        }
    }

    /// Point the client at another API root, e.g. a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Identity of the bot behind the token.
    pub async fn get_me(&self) -> Result<User> {
        let response = self
            .http
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(without_url)?;
        decode(response).await
    }

    /// Long-poll for message updates starting at `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });

        let response = self
            .http
            .post(self.api_url("getUpdates"))
            .json(&body)
            .send()
            .await
            .map_err(without_url)?;
        decode(response).await
    }

    /// Send a text message, optionally as a reply.
    pub async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<()> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": truncate_text(text),
        });
        if let Some(message_id) = reply_to {
            body["reply_to_message_id"] = message_id.into();
        }

        let response = self
            .http
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(without_url)?;
        decode::<IgnoredAny>(response).await?;

        debug!(chat_id, "Telegram message sent");
        Ok(())
    }

    /// Stream a local file into the chat as a document.
    pub async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        file_name: &str,
        reply_to: Option<i64>,
    ) -> Result<()> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let mime_type = mime_guess::from_path(file_name).first_or_octet_stream();

        let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), length)
            .file_name(file_name.to_string())
            .mime_str(mime_type.as_ref())?;

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);
        if let Some(message_id) = reply_to {
            form = form.text("reply_to_message_id", message_id.to_string());
        }

        let response = self
            .http
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(without_url)?;
        decode::<IgnoredAny>(response).await?;

        info!(chat_id, file_name, bytes = length, "Telegram document sent");
        Ok(())
    }
}

/// A [`TelegramApi`] bound to one conversation, replying to one message.
pub struct TelegramChat<'a> {
    api: &'a TelegramApi,
    chat_id: i64,
    reply_to: Option<i64>,
}

impl<'a> TelegramChat<'a> {
    pub fn new(api: &'a TelegramApi, chat_id: i64, reply_to: Option<i64>) -> Self {
        Self {
            api,
            chat_id,
            reply_to,
        }
    }
}

#[async_trait]
impl ChatSink for TelegramChat<'_> {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.api.send_message(self.chat_id, text, self.reply_to).await
    }

    async fn send_document(&self, path: &Path, file_name: &str) -> Result<()> {
        self.api
            .send_document(self.chat_id, path, file_name, self.reply_to)
            .await
    }
}

/// Request URLs carry the bot token, keep it out of error text.
fn without_url(e: reqwest::Error) -> RelayError {
    RelayError::Http(e.without_url())
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await.map_err(without_url)?;

    let parsed: ApiResponse<T> = serde_json::from_str(&body).map_err(|_| RelayError::Telegram {
        code: i64::from(status.as_u16()),
        description: body.clone(),
    })?;

    if !parsed.ok {
        return Err(RelayError::Telegram {
            code: parsed.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
            description: parsed
                .description
                .unwrap_or_else(|| "unknown Telegram API error".to_string()),
        });
    }

    parsed
        .result
        .ok_or_else(|| RelayError::UnexpectedResponse("Telegram response without result".to_string()))
}

fn truncate_text(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    truncated.push('…');
    truncated
}
