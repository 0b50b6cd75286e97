//! Scratch-file transfers: fetch remote chunks to disk, then upload to the chat.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::export::{delivered_name, TransferPlan};
use crate::media::ChunkSource;
use crate::models::{format_size, FileDescriptor};
use crate::telegram::ChatSink;

/// Directory that holds in-flight downloads.
pub const SCRATCH_DIR: &str = "downloads";

/// One file on its way from Drive to the chat.
#[derive(Debug)]
pub struct TransferJob {
    file: FileDescriptor,
    file_name: String,
    path: PathBuf,
    progress: u8,
}

impl TransferJob {
    /// Prepare a job for `file`, creating the scratch directory if needed.
    pub async fn create(file: FileDescriptor, plan: TransferPlan, scratch_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(scratch_dir).await?;
        let file_name = delivered_name(&file.name, plan);
        let path = scratch_dir.join(sanitize_file_name(&file_name));
        Ok(Self {
            file,
            file_name,
            path,
            progress: 0,
        })
    }

    pub fn file(&self) -> &FileDescriptor {
        &self.file
    }

    /// Name the attachment is delivered under.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last reported progress percentage.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    fn record_progress(&mut self, percent: u8) {
        self.progress = self.progress.max(percent.min(100));
    }
}

/// Stream every chunk from `source` into the job's scratch file.
///
/// A progress message goes to the chat after each chunk. The first failing
/// chunk ends the transfer; bytes already written stay on disk.
pub async fn fetch<S, C>(source: &mut S, job: &mut TransferJob, chat: &C) -> Result<u64>
where
    S: ChunkSource + ?Sized,
    C: ChatSink + ?Sized,
{
    let mut file = File::create(&job.path).await?;
    let mut written = 0u64;

    loop {
        let chunk = source.next_chunk().await?;
        file.write_all(&chunk.data).await?;
        file.flush().await?;
        written += chunk.data.len() as u64;

        job.record_progress(chunk.percent());
        debug!(file_id = %job.file.id, written, progress = job.progress, "Chunk written");

        let message = format!("Downloading {}: {}%", job.file_name, job.progress);
        if let Err(e) = chat.send_text(&message).await {
            warn!(error = %e, "Failed to send progress message");
        }

        if chunk.done {
            break;
        }
    }

    info!(file_id = %job.file.id, path = %job.path.display(), bytes = written, "Fetched file");
    Ok(written)
}

/// Deliver a fetched job as an attachment, then delete its scratch file.
///
/// On failure the scratch file is kept.
pub async fn upload<C>(chat: &C, job: TransferJob) -> Result<()>
where
    C: ChatSink + ?Sized,
{
    let size = tokio::fs::metadata(&job.path).await?.len();
    chat.send_text(&format!(
        "Download completed: {} ({})",
        job.file_name,
        format_size(size)
    ))
    .await?;
    chat.send_document(&job.path, &job.file_name).await?;
    tokio::fs::remove_file(&job.path).await?;
    Ok(())
}

/// Make a Drive file name safe to use as a single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();

    match cleaned {
        "" | "." | ".." => "file".to_string(),
        _ => cleaned.to_string(),
    }
}
