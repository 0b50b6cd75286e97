//! Error types for the drive_relay crate.

use thiserror::Error;

/// Errors that can occur while relaying Drive files into a chat.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Google Drive authentication is not set up properly: {0}")]
    Setup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Telegram API error ({code}): {description}")]
    Telegram { code: i64, description: String },

    #[error("Invalid Google Drive link: {0}")]
    InvalidLink(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("JWT encoding error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),
}

/// Result type alias for RelayError.
pub type Result<T> = std::result::Result<T, RelayError>;
