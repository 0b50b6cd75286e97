//! Google Drive API client and folder listing.

use std::collections::VecDeque;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use reqwest::{Client, Response};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::auth::Authenticator;
use crate::error::{RelayError, Result};
use crate::media::{ChunkSource, MediaDownload};
use crate::models::{ApiErrorResponse, FileDescriptor, FileListResponse};

/// Base URL for Google Drive API v3.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Page size for folder listings.
pub const PAGE_SIZE: u32 = 10;

/// Fields requested for every listed file.
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType)";

/// The Drive operations the relay pipeline needs.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Fetch one page of a `files.list` query.
    async fn list_page(&self, query: &str, page_token: Option<&str>) -> Result<FileListResponse>;

    /// Open a byte-for-byte download of a stored file.
    async fn open_download(&self, file_id: &str) -> Result<Box<dyn ChunkSource>>;

    /// Open an export of a Google editor file to `mime_type`.
    async fn open_export(&self, file_id: &str, mime_type: &str) -> Result<Box<dyn ChunkSource>>;
}

/// Client for the Google Drive v3 REST API.
pub struct DriveClient {
    auth: Authenticator,
    http: Client,
    base_url: String,
    chunk_size: u64,
}

impl DriveClient {
    /// Create a new DriveClient.
    pub fn new(auth: Authenticator) -> Self {
        Self {
            auth,
            http: Client::new(),
            base_url: DRIVE_API_BASE.to_string(),
            chunk_size: crate::media::DEFAULT_CHUNK_SIZE,
        }
    }

    /// Point the client at another API root, e.g. a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    async fn media(&self, url: String, query: Vec<(String, String)>) -> Result<Box<dyn ChunkSource>> {
        let download = MediaDownload::new(self.http.clone(), url, self.auth.clone(), query)
            .with_chunk_size(self.chunk_size);
        Ok(Box::new(download))
    }
}

#[async_trait]
impl DriveApi for DriveClient {
    async fn list_page(&self, query: &str, page_token: Option<&str>) -> Result<FileListResponse> {
        let token = self.auth.get_access_token().await?;
        let page_size = PAGE_SIZE.to_string();

        let mut request = self
            .http
            .get(format!("{}/files", self.base_url))
            .bearer_auth(&token)
            .query(&[
                ("q", query),
                ("pageSize", page_size.as_str()),
                ("fields", LIST_FIELDS),
                ("includeItemsFromAllDrives", "true"),
                ("supportsAllDrives", "true"),
            ]);

        if let Some(page_token) = page_token {
            request = request.query(&[("pageToken", page_token)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let page: FileListResponse = response.json().await?;
        debug!(
            files = page.files.len(),
            has_more = page.next_page_token.is_some(),
            "Fetched listing page"
        );
        Ok(page)
    }

    async fn open_download(&self, file_id: &str) -> Result<Box<dyn ChunkSource>> {
        let url = format!("{}/files/{}", self.base_url, file_id);
        let query = vec![
            ("alt".to_string(), "media".to_string()),
            ("supportsAllDrives".to_string(), "true".to_string()),
        ];
        self.media(url, query).await
    }

    async fn open_export(&self, file_id: &str, mime_type: &str) -> Result<Box<dyn ChunkSource>> {
        let url = format!("{}/files/{}/export", self.base_url, file_id);
        let query = vec![("mimeType".to_string(), mime_type.to_string())];
        self.media(url, query).await
    }
}

/// Where the lister is in the page sequence.
enum PageCursor {
    First,
    Next(String),
    Exhausted,
}

struct Pager {
    query: String,
    pending: VecDeque<FileDescriptor>,
    cursor: PageCursor,
}

/// List the files directly inside a folder.
///
/// The stream is lazy: a page is only requested once every file of the
/// previous page has been taken. It ends after the first page without a
/// continuation token, or right after yielding a listing error.
pub fn list_folder<'a, D>(drive: &'a D, folder_id: &str) -> impl Stream<Item = Result<FileDescriptor>> + 'a
where
    D: DriveApi + ?Sized,
{
    let pager = Pager {
        query: format!("'{}' in parents", folder_id.replace('\'', "\\'")),
        pending: VecDeque::new(),
        cursor: PageCursor::First,
    };

    stream::unfold(Some(pager), move |state| async move {
        let mut pager = state?;
        loop {
            if let Some(file) = pager.pending.pop_front() {
                return Some((Ok(file), Some(pager)));
            }

            let page_token = match &pager.cursor {
                PageCursor::Exhausted => return None,
                PageCursor::First => None,
                PageCursor::Next(token) => Some(token.clone()),
            };

            match drive.list_page(&pager.query, page_token.as_deref()).await {
                Ok(page) => {
                    pager.pending.extend(page.files);
                    pager.cursor = match page.next_page_token {
                        Some(token) => PageCursor::Next(token),
                        None => PageCursor::Exhausted,
                    };
                }
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
}

/// Process-wide access to one lazily built [`DriveClient`].
///
/// The credential file is read on first use. A failed load is returned to
/// the caller and attempted again on the next call.
pub struct DriveSession {
    credentials_path: PathBuf,
    client: OnceCell<DriveClient>,
}

impl DriveSession {
    pub fn new(credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            client: OnceCell::new(),
        }
    }

    /// Get the shared client, loading credentials if needed.
    pub async fn client(&self) -> Result<&DriveClient> {
        self.client
            .get_or_try_init(|| async {
                let auth = Authenticator::from_file(&self.credentials_path)?;
                // Surface unusable credentials now rather than mid-transfer.
                auth.get_access_token().await?;
                info!(path = %self.credentials_path.display(), "Loaded Google Drive credentials");
                Ok::<_, RelayError>(DriveClient::new(auth))
            })
            .await
    }
}

/// Turn a failed Drive response into an error, preferring the API's own message.
pub(crate) async fn api_error(response: Response) -> RelayError {
    let status = response.status();
    let error_body = response.text().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&error_body) {
        return RelayError::Api {
            status: api_error.error.code,
            message: api_error.error.message,
        };
    }
    RelayError::Api {
        status: status.as_u16(),
        message: error_body,
    }
}
