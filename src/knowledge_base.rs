//! The knowledge-base record and its processing state machine.
//!
//! A [`KnowledgeBase`] is the mutable record of one owner's named collection:
//! status, per-file outcomes, chunk counts, and an error log. It is created
//! `pending` with `total_files` fixed, mutated additively as each file
//! completes, and becomes immutable once it reaches a terminal status
//! (`success`, `failed`, `partial`) — the only further lifecycle event is
//! deletion.
//!
//! Records are exclusively owned by the
//! [`KnowledgeBaseManager`](crate::manager::KnowledgeBaseManager); callers
//! hold transient clones and route mutations back through the manager so
//! persistence stays consistent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing status, recomputed from the counters on every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// No files attempted yet.
    Pending,
    /// Attempted count is below the total.
    Processing,
    /// Every attempted file succeeded.
    Success,
    /// Every file failed (or a system-level fault forced this state).
    Failed,
    /// Some files succeeded, some failed, all attempted.
    Partial,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Success => "success",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Partial => "partial",
        };
        f.write_str(s)
    }
}

/// Outcome of processing a single input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub success: bool,
    pub chunks: u64,
    pub error: Option<String>,
    pub file_size: u64,
    pub processing_time_secs: f64,
}

/// One entry in the knowledge base's error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileError {
    pub filename: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// A named, owned collection of ingested document chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub owner_name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ProcessingStatus,
    pub total_files: u32,
    pub processed_files: u32,
    pub failed_files: u32,
    pub total_chunks: u64,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub errors: Vec<FileError>,
}

impl KnowledgeBase {
    pub fn new(
        id: String,
        name: String,
        owner_id: String,
        owner_name: String,
        description: String,
        total_files: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            owner_id,
            owner_name,
            description,
            created_at: now,
            updated_at: now,
            status: ProcessingStatus::Pending,
            total_files,
            processed_files: 0,
            failed_files: 0,
            total_chunks: 0,
            files: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Record a successfully processed file.
    pub fn add_file(&mut self, record: FileRecord) {
        self.total_chunks += record.chunks;
        self.files.push(record);
        self.processed_files += 1;
        self.touch();
    }

    /// Record a file-level processing failure.
    pub fn add_error(&mut self, filename: &str, error: &str) {
        self.errors.push(FileError {
            filename: filename.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        self.failed_files += 1;
        self.touch();
    }

    /// Record a system-level orchestration fault.
    ///
    /// Unlike [`add_error`](Self::add_error) this does not bump
    /// `failed_files`: the invariant `processed_files + failed_files <=
    /// total_files` must hold even when the fault strikes after every file
    /// already completed.
    pub fn add_system_error(&mut self, error: String) {
        self.errors.push(FileError {
            filename: "system".to_string(),
            error,
            timestamp: Utc::now(),
        });
        self.touch();
    }

    /// Number of files attempted so far.
    pub fn attempted_files(&self) -> u32 {
        self.processed_files + self.failed_files
    }

    /// Recompute `status` from the counters.
    pub fn update_status(&mut self) {
        let attempted = self.attempted_files();
        self.status = if attempted == 0 {
            ProcessingStatus::Pending
        } else if attempted < self.total_files {
            ProcessingStatus::Processing
        } else if self.failed_files == self.total_files {
            ProcessingStatus::Failed
        } else if self.failed_files > 0 {
            ProcessingStatus::Partial
        } else {
            ProcessingStatus::Success
        };
    }

    /// Batch progress as a whole percentage (0 when there are no files).
    pub fn progress_percentage(&self) -> u8 {
        if self.total_files == 0 {
            return 0;
        }
        ((self.attempted_files() as u64 * 100) / self.total_files as u64) as u8
    }

    /// Only fully successful knowledge bases accept queries.
    pub fn is_queryable(&self) -> bool {
        self.status == ProcessingStatus::Success
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
