//! Folder link parsing for free-text chat messages.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{RelayError, Result};

/// Host that every accepted link must mention.
const DRIVE_HOST: &str = "drive.google.com";

/// Everything after the first `folders/` up to the first `?`.
static FOLDER_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"folders/([^?]*)").expect("Invalid folder id regex"));

/// Whether a message looks like a Drive folder link at all.
pub fn is_folder_link(text: &str) -> bool {
    text.contains(DRIVE_HOST) && text.contains("folders")
}

/// Extract a folder ID from a message containing a Drive folder link.
///
/// Returns the text between the first `folders/` and the first `?` that
/// follows it (or the end of the message). A missing marker or an empty ID
/// yields `None`.
///
/// # Examples
///
/// ```
/// use drive_relay::url_parser::extract_folder_id;
///
/// let id = extract_folder_id("https://drive.google.com/drive/folders/1abc123?usp=sharing");
/// assert_eq!(id.as_deref(), Some("1abc123"));
///
/// assert_eq!(extract_folder_id("https://drive.google.com/drive/my-drive"), None);
/// ```
pub fn extract_folder_id(text: &str) -> Option<String> {
    FOLDER_ID_REGEX
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Like [`extract_folder_id`], but rejects anything that is not a folder link.
pub fn require_folder_id(text: &str) -> Result<String> {
    if !is_folder_link(text) {
        return Err(RelayError::InvalidLink(text.to_string()));
    }
    extract_folder_id(text).ok_or_else(|| RelayError::InvalidLink(text.to_string()))
}
