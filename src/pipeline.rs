//! The folder relay workflow: list, classify, fetch and upload each file in turn.

use std::path::Path;

use futures::StreamExt;
use tracing::{error, info, warn};

use crate::client::{list_folder, DriveApi};
use crate::error::RelayError;
use crate::export::{classify, TransferPlan};
use crate::models::FileDescriptor;
use crate::telegram::ChatSink;
use crate::transfer::{fetch, upload, TransferJob};

/// What happened to one listed file.
#[derive(Debug)]
pub enum TransferOutcome {
    Delivered { file_name: String },
    Skipped(String),
    Failed(RelayError),
}

/// Per-folder tally of outcomes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Listing stopped early because a page could not be fetched.
    pub listing_failed: bool,
}

impl RelaySummary {
    pub fn total(&self) -> usize {
        self.delivered + self.skipped + self.failed
    }

    fn record(&mut self, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Delivered { .. } => self.delivered += 1,
            TransferOutcome::Skipped(_) => self.skipped += 1,
            TransferOutcome::Failed(_) => self.failed += 1,
        }
    }
}

impl std::fmt::Display for RelaySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Finished: {} delivered, {} skipped, {} failed.",
            self.delivered, self.skipped, self.failed
        )
    }
}

/// Fetch one file and deliver it to the chat.
///
/// Never returns an error: every failure is captured in the outcome.
pub async fn dispatch<D, C>(drive: &D, chat: &C, scratch_dir: &Path, file: FileDescriptor) -> TransferOutcome
where
    D: DriveApi + ?Sized,
    C: ChatSink + ?Sized,
{
    let plan = classify(&file.mime_type);
    if plan == TransferPlan::Unsupported {
        return TransferOutcome::Skipped(format!("unsupported export type {}", file.mime_type));
    }

    let mut job = match TransferJob::create(file, plan, scratch_dir).await {
        Ok(job) => job,
        Err(e) => return TransferOutcome::Failed(e),
    };

    let source = match plan {
        TransferPlan::Export(format) => drive.open_export(&job.file().id, format.mime_type).await,
        _ => drive.open_download(&job.file().id).await,
    };
    let mut source = match source {
        Ok(source) => source,
        Err(e) => return TransferOutcome::Failed(e),
    };

    if let Err(e) = fetch(source.as_mut(), &mut job, chat).await {
        return TransferOutcome::Failed(e);
    }

    let file_name = job.file_name().to_string();
    match upload(chat, job).await {
        Ok(()) => TransferOutcome::Delivered { file_name },
        Err(e) => TransferOutcome::Failed(e),
    }
}

/// Relay every file directly inside `folder_id` to the chat, in listing order.
///
/// A failing file is reported and skipped; a failing listing page ends the
/// folder. The chat always receives a closing summary.
pub async fn relay_folder<D, C>(drive: &D, chat: &C, scratch_dir: &Path, folder_id: &str) -> RelaySummary
where
    D: DriveApi + ?Sized,
    C: ChatSink + ?Sized,
{
    let mut summary = RelaySummary::default();
    let mut files = std::pin::pin!(list_folder(drive, folder_id));

    while let Some(next) = files.next().await {
        let file = match next {
            Ok(file) => file,
            Err(e) => {
                error!(folder_id, error = %e, "Failed to list folder");
                notify(chat, &format!("Error listing folder: {}", e)).await;
                summary.listing_failed = true;
                break;
            }
        };

        let name = file.name.clone();
        let file_id = file.id.clone();
        let outcome = dispatch(drive, chat, scratch_dir, file).await;

        match &outcome {
            TransferOutcome::Delivered { file_name } => {
                info!(%file_id, file_name = %file_name, "Delivered file");
            }
            TransferOutcome::Skipped(reason) => {
                info!(%file_id, name = %name, reason = %reason, "Skipped file");
                notify(chat, &format!("Skipped {}: {}", name, reason)).await;
            }
            TransferOutcome::Failed(e) => {
                error!(%file_id, name = %name, error = %e, "Failed to relay file");
                notify(chat, &format!("Error downloading {}: {}", name, e)).await;
            }
        }
        summary.record(&outcome);
    }

    if summary.total() == 0 && !summary.listing_failed {
        notify(chat, "No files found in this folder.").await;
    } else {
        notify(chat, &summary.to_string()).await;
    }
    summary
}

async fn notify<C: ChatSink + ?Sized>(chat: &C, text: &str) {
    if let Err(e) = chat.send_text(text).await {
        warn!(error = %e, "Failed to send chat message");
    }
}
