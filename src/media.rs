//! Chunked media downloads from the Drive API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::client::api_error;
use crate::error::Result;

/// Default chunk size (100 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Retries per chunk before the error is returned.
pub const DEFAULT_NUM_RETRIES: u32 = 3;

/// One received piece of remote content.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub data: Vec<u8>,
    /// Cumulative fraction of the content received, 0.0 to 1.0.
    pub progress: f64,
    pub done: bool,
}

impl Chunk {
    /// Progress as a whole percentage, rounded down.
    pub fn percent(&self) -> u8 {
        (self.progress * 100.0).floor().clamp(0.0, 100.0) as u8
    }
}

/// A source of remote content delivered chunk by chunk.
#[async_trait]
pub trait ChunkSource: Send {
    /// Fetch the next chunk. Once a chunk with `done` set has been returned
    /// the source is exhausted.
    async fn next_chunk(&mut self) -> Result<Chunk>;
}

/// Ranged `GET` download of a Drive media or export URL.
pub struct MediaDownload {
    http: Client,
    url: String,
    auth: Authenticator,
    query: Vec<(String, String)>,
    chunk_size: u64,
    num_retries: u32,
    retry_delay: Duration,
    received: u64,
    total_size: Option<u64>,
    done: bool,
}

impl MediaDownload {
    /// Create a download of `url`. Every request asks `auth` for a current
    /// access token, so long downloads survive a token refresh.
    pub fn new(http: Client, url: String, auth: Authenticator, query: Vec<(String, String)>) -> Self {
        Self {
            http,
            url,
            auth,
            query,
            chunk_size: DEFAULT_CHUNK_SIZE,
            num_retries: DEFAULT_NUM_RETRIES,
            retry_delay: Duration::from_secs(1),
            received: 0,
            total_size: None,
            done: false,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set the retry count and the delay before the first retry. The delay
    /// doubles on every further attempt.
    pub fn with_retries(mut self, num_retries: u32, retry_delay: Duration) -> Self {
        self.num_retries = num_retries;
        self.retry_delay = retry_delay;
        self
    }

    async fn send_with_retries(&self, start: u64, end: u64) -> Result<Response> {
        let mut attempt = 0;
        loop {
            let token = self.auth.get_access_token().await?;
            let result = self
                .http
                .get(&self.url)
                .bearer_auth(&token)
                .query(&self.query)
                .header(RANGE, format!("bytes={}-{}", start, end))
                .send()
                .await;

            let retryable = match &result {
                Ok(response) => is_retryable(response.status()),
                Err(_) => true,
            };
            if !retryable || attempt >= self.num_retries {
                return Ok(result?);
            }

            attempt += 1;
            let delay = self.retry_delay * 2u32.pow(attempt - 1);
            match &result {
                Ok(response) => warn!(status = %response.status(), attempt, "Retrying chunk request"),
                Err(e) => warn!(error = %e, attempt, "Retrying chunk request"),
            }
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ChunkSource for MediaDownload {
    async fn next_chunk(&mut self) -> Result<Chunk> {
        if self.done {
            return Ok(Chunk {
                data: Vec::new(),
                progress: 1.0,
                done: true,
            });
        }

        let start = self.received;
        let end = start + self.chunk_size - 1;
        let response = self.send_with_retries(start, end).await?;
        let status = response.status();

        // Drive answers 416 to any range request on an empty file.
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            self.total_size = Some(0);
            self.done = true;
            return Ok(Chunk {
                data: Vec::new(),
                progress: 1.0,
                done: true,
            });
        }

        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let total = content_range_total(&response).or_else(|| {
            response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|_| status == StatusCode::OK)
        });

        let data = response.bytes().await?.to_vec();
        self.received += data.len() as u64;
        if total.is_some() {
            self.total_size = total;
        }

        self.done = match self.total_size {
            Some(total) => self.received >= total || data.is_empty(),
            None => true,
        };

        let progress = match self.total_size {
            _ if self.done => 1.0,
            Some(total) if total > 0 => self.received as f64 / total as f64,
            _ => 0.0,
        };

        debug!(url = %self.url, received = self.received, total = ?self.total_size, "Received chunk");

        Ok(Chunk {
            data,
            progress,
            done: self.done,
        })
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Total length from a `Content-Range: bytes a-b/total` header.
fn content_range_total(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total)
}

fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/').and_then(|(_, total)| total.trim().parse().ok())
}
