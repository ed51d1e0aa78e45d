//! Per-file processing pipeline and batch orchestration.
//!
//! Each file moves through convert → validate → chunk, with its outcome
//! (success flag, chunk count, byte size, elapsed time, error text) captured
//! in a [`FileRecord`] regardless of how it went. One file's failure never
//! aborts the batch: per-file errors are recorded on the knowledge base and
//! never raised to the caller.
//!
//! Files are processed strictly in input order, and the progress reporter is
//! notified once per file before that file's pipeline begins. Reporting is
//! best-effort; the pipeline does not depend on it.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::chunker::TextChunker;
use crate::convert;
use crate::knowledge_base::{FileRecord, KnowledgeBase};
use crate::models::Chunk;
use crate::progress::{ProgressEvent, ProgressReporter};

pub struct FileProcessor {
    chunker: TextChunker,
    max_file_bytes: u64,
}

impl FileProcessor {
    pub fn new(chunker: TextChunker, max_file_size_mb: u64) -> Self {
        Self {
            chunker,
            max_file_bytes: max_file_size_mb * 1024 * 1024,
        }
    }

    /// Process a single file. Infallible: failures come back as a
    /// `FileRecord` with `success = false` and an empty chunk list.
    pub async fn process_file(
        &self,
        path: &Path,
        base_metadata: &Map<String, Value>,
        reporter: &dyn ProgressReporter,
    ) -> (FileRecord, Vec<Chunk>) {
        let filename = filename_of(path);
        let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let started = Instant::now();

        let outcome = self
            .run_pipeline(path, &filename, file_size, base_metadata, reporter)
            .await;

        reporter.report(ProgressEvent::Stage {
            filename: filename.clone(),
            percent: 100,
        });

        let processing_time_secs = started.elapsed().as_secs_f64();
        match outcome {
            Ok(chunks) => (
                FileRecord {
                    filename,
                    success: true,
                    chunks: chunks.len() as u64,
                    error: None,
                    file_size,
                    processing_time_secs,
                },
                chunks,
            ),
            Err(e) => (
                FileRecord {
                    filename,
                    success: false,
                    chunks: 0,
                    error: Some(format!("{:#}", e)),
                    file_size,
                    processing_time_secs,
                },
                Vec::new(),
            ),
        }
    }

    async fn run_pipeline(
        &self,
        path: &Path,
        filename: &str,
        file_size: u64,
        base_metadata: &Map<String, Value>,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<Chunk>> {
        if file_size > self.max_file_bytes {
            bail!(
                "file exceeds size limit ({} bytes > {} bytes)",
                file_size,
                self.max_file_bytes
            );
        }

        reporter.report(ProgressEvent::Stage {
            filename: filename.to_string(),
            percent: 0,
        });

        // Conversion is file I/O plus parsing; keep it off the async runtime.
        let owned = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || convert::convert(&owned))
            .await
            .context("conversion task failed")??;

        if text.trim().is_empty() {
            bail!("no text extracted from file");
        }

        reporter.report(ProgressEvent::Stage {
            filename: filename.to_string(),
            percent: 50,
        });

        let mut metadata = base_metadata.clone();
        metadata.insert("filename".to_string(), Value::from(filename));
        metadata.insert(
            "file_type".to_string(),
            Value::from(file_type_of(path)),
        );
        metadata.insert("file_size".to_string(), Value::from(file_size));

        Ok(self.chunker.chunk_with_metadata(&text, &metadata))
    }

    /// Process a batch of files in input order, mutating `kb` as each file
    /// completes: successes append a file record and bump
    /// `processed_files`/`total_chunks`; failures append to the error log
    /// and bump `failed_files`.
    ///
    /// Returns the flat sequence of chunks from all succeeded files.
    pub async fn process_files(
        &self,
        paths: &[PathBuf],
        kb: &mut KnowledgeBase,
        base_metadata: &Map<String, Value>,
        reporter: &dyn ProgressReporter,
    ) -> Vec<Chunk> {
        let total = paths.len();
        let mut all_chunks = Vec::new();

        for (i, path) in paths.iter().enumerate() {
            reporter.report(ProgressEvent::File {
                filename: filename_of(path),
                index: i + 1,
                total,
            });

            let (record, chunks) = self.process_file(path, base_metadata, reporter).await;
            if record.success {
                kb.add_file(record);
                all_chunks.extend(chunks);
            } else {
                let error = record
                    .error
                    .as_deref()
                    .unwrap_or("unknown error")
                    .to_string();
                kb.add_error(&record.filename, &error);
            }
        }

        all_chunks
    }
}

fn filename_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// File extension with its leading dot, lowercased (e.g. `".pdf"`).
fn file_type_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}
