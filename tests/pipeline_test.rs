//! Tests for folder listing, dispatch and the relay workflow using in-memory fakes.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use drive_relay::client::PAGE_SIZE;
use drive_relay::error::{RelayError, Result};
use drive_relay::export::TransferPlan;
use drive_relay::models::FileListResponse;
use drive_relay::transfer::{fetch, TransferJob};
use drive_relay::{
    dispatch, list_folder, relay_folder, ChatSink, Chunk, ChunkSource, DriveApi, FileDescriptor,
    TransferOutcome,
};
use futures::StreamExt;

/// Serves chunks in order, failing at a chosen (1-based) chunk.
struct FakeSource {
    chunks: VecDeque<Vec<u8>>,
    total: usize,
    served: usize,
    fail_at: Option<usize>,
}

impl FakeSource {
    fn new(chunks: Vec<Vec<u8>>, fail_at: Option<usize>) -> Self {
        Self {
            total: chunks.len(),
            chunks: chunks.into(),
            served: 0,
            fail_at,
        }
    }
}

#[async_trait]
impl ChunkSource for FakeSource {
    async fn next_chunk(&mut self) -> Result<Chunk> {
        self.served += 1;
        if self.fail_at == Some(self.served) {
            return Err(RelayError::Api {
                status: 503,
                message: "backend error".to_string(),
            });
        }
        let data = self.chunks.pop_front().unwrap_or_default();
        Ok(Chunk {
            data,
            progress: self.served as f64 / self.total.max(1) as f64,
            done: self.served >= self.total,
        })
    }
}

#[derive(Default)]
struct FakeDrive {
    files: Vec<FileDescriptor>,
    /// Return a continuation token even after the last file.
    trailing_empty_page: bool,
    fail_listing: bool,
    contents: HashMap<String, Vec<Vec<u8>>>,
    fail_at: HashMap<String, usize>,
    queries: Mutex<Vec<(String, Option<String>)>>,
    opened: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeDrive {
    fn with_files(files: Vec<FileDescriptor>) -> Self {
        Self {
            files,
            ..Default::default()
        }
    }

    fn with_content(mut self, id: &str, chunks: &[&[u8]]) -> Self {
        self.contents
            .insert(id.to_string(), chunks.iter().map(|c| c.to_vec()).collect());
        self
    }

    fn pages_requested(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    fn source(&self, file_id: &str) -> Box<dyn ChunkSource> {
        let chunks = self
            .contents
            .get(file_id)
            .cloned()
            .unwrap_or_else(|| vec![file_id.as_bytes().to_vec()]);
        Box::new(FakeSource::new(chunks, self.fail_at.get(file_id).copied()))
    }
}

#[async_trait]
impl DriveApi for FakeDrive {
    async fn list_page(&self, query: &str, page_token: Option<&str>) -> Result<FileListResponse> {
        self.queries
            .lock()
            .unwrap()
            .push((query.to_string(), page_token.map(str::to_string)));
        if self.fail_listing {
            return Err(RelayError::Api {
                status: 500,
                message: "listing broke".to_string(),
            });
        }

        let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let page = PAGE_SIZE as usize;
        let end = (start + page).min(self.files.len());
        let files = self.files.get(start..end).unwrap_or_default().to_vec();

        let more = end < self.files.len() || (self.trailing_empty_page && start < self.files.len());
        Ok(FileListResponse {
            files,
            next_page_token: more.then(|| end.to_string()),
        })
    }

    async fn open_download(&self, file_id: &str) -> Result<Box<dyn ChunkSource>> {
        self.opened.lock().unwrap().push((file_id.to_string(), None));
        Ok(self.source(file_id))
    }

    async fn open_export(&self, file_id: &str, mime_type: &str) -> Result<Box<dyn ChunkSource>> {
        self.opened
            .lock()
            .unwrap()
            .push((file_id.to_string(), Some(mime_type.to_string())));
        Ok(self.source(file_id))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ChatEvent {
    Text(String),
    Document { name: String, body: Vec<u8> },
}

#[derive(Default)]
struct RecordingChat {
    events: Mutex<Vec<ChatEvent>>,
    reject_documents: bool,
}

impl RecordingChat {
    fn events(&self) -> Vec<ChatEvent> {
        self.events.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ChatEvent::Text(text) => Some(text),
                ChatEvent::Document { .. } => None,
            })
            .collect()
    }

    fn documents(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ChatEvent::Document { name, .. } => Some(name),
                ChatEvent::Text(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatSink for RecordingChat {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.events.lock().unwrap().push(ChatEvent::Text(text.to_string()));
        Ok(())
    }

    async fn send_document(&self, path: &Path, file_name: &str) -> Result<()> {
        if self.reject_documents {
            return Err(RelayError::Telegram {
                code: 413,
                description: "Request Entity Too Large".to_string(),
            });
        }
        let body = std::fs::read(path)?;
        self.events.lock().unwrap().push(ChatEvent::Document {
            name: file_name.to_string(),
            body,
        });
        Ok(())
    }
}

fn native(n: usize) -> Vec<FileDescriptor> {
    (0..n)
        .map(|i| FileDescriptor::new(format!("id{i}"), format!("file{i}.bin"), "application/octet-stream"))
        .collect()
}

mod listing {
    use super::*;

    async fn count_listed(drive: &FakeDrive) -> usize {
        let items: Vec<_> = list_folder(drive, "folder").collect().await;
        assert!(items.iter().all(|item| item.is_ok()));
        items.len()
    }

    #[tokio::test]
    async fn yields_every_file_around_page_boundaries() {
        for n in [0, 1, 9, 10, 11, 20, 25] {
            let drive = FakeDrive::with_files(native(n));
            assert_eq!(count_listed(&drive).await, n, "folder with {n} files");
            assert_eq!(drive.pages_requested(), n.div_ceil(10).max(1), "pages for {n} files");
        }
    }

    #[tokio::test]
    async fn follows_token_to_trailing_empty_page() {
        let mut drive = FakeDrive::with_files(native(10));
        drive.trailing_empty_page = true;

        assert_eq!(count_listed(&drive).await, 10);
        assert_eq!(drive.pages_requested(), 2);
    }

    #[tokio::test]
    async fn keeps_listing_order_and_query() {
        let drive = FakeDrive::with_files(native(11));
        let names: Vec<String> = list_folder(&drive, "folder")
            .map(|item| item.unwrap().name)
            .collect()
            .await;

        let expected: Vec<String> = (0..11).map(|i| format!("file{i}.bin")).collect();
        assert_eq!(names, expected);

        let queries = drive.queries.lock().unwrap();
        assert_eq!(queries[0], ("'folder' in parents".to_string(), None));
        assert_eq!(queries[1], ("'folder' in parents".to_string(), Some("10".to_string())));
    }

    #[tokio::test]
    async fn next_page_waits_until_current_page_is_consumed() {
        let drive = FakeDrive::with_files(native(11));
        let mut files = std::pin::pin!(list_folder(&drive, "folder"));

        assert_eq!(drive.pages_requested(), 0);
        for _ in 0..10 {
            files.next().await.unwrap().unwrap();
        }
        assert_eq!(drive.pages_requested(), 1);

        files.next().await.unwrap().unwrap();
        assert_eq!(drive.pages_requested(), 2);
        assert!(files.next().await.is_none());
    }

    #[tokio::test]
    async fn listing_error_ends_stream() {
        let mut drive = FakeDrive::with_files(native(3));
        drive.fail_listing = true;

        let items: Vec<_> = list_folder(&drive, "folder").collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}

mod dispatching {
    use super::*;

    #[tokio::test]
    async fn google_doc_is_exported_to_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let doc = FileDescriptor::new("doc1", "Minutes", "application/vnd.google-apps.document");
        let drive = FakeDrive::default().with_content("doc1", &[b"%PDF"]);
        let chat = RecordingChat::default();

        let outcome = dispatch(&drive, &chat, dir.path(), doc).await;

        assert!(matches!(outcome, TransferOutcome::Delivered { ref file_name } if file_name == "Minutes.pdf"));
        assert_eq!(
            *drive.opened.lock().unwrap(),
            vec![("doc1".to_string(), Some("application/pdf".to_string()))]
        );
        assert_eq!(
            chat.events().last(),
            Some(&ChatEvent::Document {
                name: "Minutes.pdf".to_string(),
                body: b"%PDF".to_vec()
            })
        );
    }

    #[tokio::test]
    async fn pdf_is_downloaded_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = FileDescriptor::new("pdf1", "paper.pdf", "application/pdf");
        let drive = FakeDrive::default();
        let chat = RecordingChat::default();

        let outcome = dispatch(&drive, &chat, dir.path(), pdf).await;

        assert!(matches!(outcome, TransferOutcome::Delivered { ref file_name } if file_name == "paper.pdf"));
        assert_eq!(*drive.opened.lock().unwrap(), vec![("pdf1".to_string(), None)]);
    }

    #[tokio::test]
    async fn unsupported_editor_type_is_skipped_without_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("downloads");
        let drawing = FileDescriptor::new("d1", "Diagram", "application/vnd.google-apps.drawing");
        let drive = FakeDrive::default();
        let chat = RecordingChat::default();

        let outcome = dispatch(&drive, &chat, &scratch, drawing).await;

        assert!(matches!(outcome, TransferOutcome::Skipped(_)));
        assert!(drive.opened.lock().unwrap().is_empty());
        assert!(!scratch.exists());
        assert!(chat.events().is_empty());
    }

    #[tokio::test]
    async fn delivered_file_is_removed_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileDescriptor::new("f1", "a.txt", "text/plain");
        let drive = FakeDrive::default().with_content("f1", &[b"hello ", b"world"]);
        let chat = RecordingChat::default();

        let outcome = dispatch(&drive, &chat, dir.path(), file).await;

        assert!(matches!(outcome, TransferOutcome::Delivered { .. }));
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(
            chat.events(),
            vec![
                ChatEvent::Text("Downloading a.txt: 50%".to_string()),
                ChatEvent::Text("Downloading a.txt: 100%".to_string()),
                ChatEvent::Text("Download completed: a.txt (11 B)".to_string()),
                ChatEvent::Document {
                    name: "a.txt".to_string(),
                    body: b"hello world".to_vec()
                },
            ]
        );
    }

    #[tokio::test]
    async fn failed_upload_keeps_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileDescriptor::new("f1", "big.iso", "application/octet-stream");
        let drive = FakeDrive::default().with_content("f1", &[b"iso"]);
        let chat = RecordingChat {
            reject_documents: true,
            ..Default::default()
        };

        let outcome = dispatch(&drive, &chat, dir.path(), file).await;

        assert!(matches!(outcome, TransferOutcome::Failed(RelayError::Telegram { code: 413, .. })));
        assert_eq!(std::fs::read(dir.path().join("big.iso")).unwrap(), b"iso");
    }
}

mod chunk_failures {
    use super::*;

    #[tokio::test]
    async fn failure_at_second_of_five_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileDescriptor::new("f1", "big.bin", "application/octet-stream");
        let mut job = TransferJob::create(file, TransferPlan::Download, dir.path())
            .await
            .unwrap();
        let chunks = vec![b"1111".to_vec(), b"2222".to_vec(), b"3333".to_vec(), b"4444".to_vec(), b"5555".to_vec()];
        let mut source = FakeSource::new(chunks, Some(2));
        let chat = RecordingChat::default();

        let result = fetch(&mut source, &mut job, &chat).await;

        assert!(matches!(result, Err(RelayError::Api { status: 503, .. })));
        assert_eq!(source.served, 2);
        assert_eq!(chat.texts(), vec!["Downloading big.bin: 20%".to_string()]);
        assert_eq!(job.progress(), 20);
        assert_eq!(std::fs::read(job.path()).unwrap(), b"1111");
    }

    #[tokio::test]
    async fn dispatch_reports_failure_and_leaves_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileDescriptor::new("f1", "big.bin", "application/octet-stream");
        let mut drive = FakeDrive::default().with_content("f1", &[b"aa", b"bb", b"cc", b"dd", b"ee"]);
        drive.fail_at.insert("f1".to_string(), 2);
        let chat = RecordingChat::default();

        let outcome = dispatch(&drive, &chat, dir.path(), file).await;

        assert!(matches!(outcome, TransferOutcome::Failed(_)));
        assert!(chat.documents().is_empty());
        assert_eq!(std::fs::read(dir.path().join("big.bin")).unwrap(), b"aa");
    }
}

mod relaying {
    use super::*;

    #[tokio::test]
    async fn two_native_files_and_one_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            FileDescriptor::new("a", "a.txt", "text/plain"),
            FileDescriptor::new("form", "Survey", "application/vnd.google-apps.form"),
            FileDescriptor::new("b", "b.png", "image/png"),
        ];
        let drive = FakeDrive::with_files(files)
            .with_content("a", &[b"alpha"])
            .with_content("b", &[b"beta"]);
        let chat = RecordingChat::default();

        let summary = relay_folder(&drive, &chat, dir.path(), "folder").await;

        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert!(!summary.listing_failed);
        assert_eq!(chat.documents(), vec!["a.txt".to_string(), "b.png".to_string()]);

        // The skip notice sits between the two deliveries, in listing order.
        let events = chat.events();
        let position = |needle: &dyn Fn(&ChatEvent) -> bool| events.iter().position(needle).unwrap();
        let first_doc = position(&|e| matches!(e, ChatEvent::Document { name, .. } if name == "a.txt"));
        let skip = position(&|e| matches!(e, ChatEvent::Text(t) if t.starts_with("Skipped Survey")));
        let second_doc = position(&|e| matches!(e, ChatEvent::Document { name, .. } if name == "b.png"));
        assert!(first_doc < skip && skip < second_doc);

        let skips = chat.texts().iter().filter(|t| t.starts_with("Skipped")).count();
        assert_eq!(skips, 1);
        assert_eq!(
            chat.texts().last().map(String::as_str),
            Some("Finished: 2 delivered, 1 skipped, 0 failed.")
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failing_file_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let mut drive = FakeDrive::with_files(native(3));
        drive.fail_at.insert("id1".to_string(), 1);
        let chat = RecordingChat::default();

        let summary = relay_folder(&drive, &chat, dir.path(), "folder").await;

        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(chat.documents(), vec!["file0.bin".to_string(), "file2.bin".to_string()]);
        assert!(chat
            .texts()
            .iter()
            .any(|t| t.starts_with("Error downloading file1.bin: API error (503)")));
    }

    #[tokio::test]
    async fn empty_folder_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FakeDrive::default();
        let chat = RecordingChat::default();

        let summary = relay_folder(&drive, &chat, dir.path(), "folder").await;

        assert_eq!(summary.total(), 0);
        assert_eq!(chat.texts(), vec!["No files found in this folder.".to_string()]);
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut drive = FakeDrive::with_files(native(2));
        drive.fail_listing = true;
        let chat = RecordingChat::default();

        let summary = relay_folder(&drive, &chat, dir.path(), "folder").await;

        assert!(summary.listing_failed);
        assert_eq!(summary.total(), 0);
        assert!(chat.texts()[0].starts_with("Error listing folder: API error (500)"));
    }
}
