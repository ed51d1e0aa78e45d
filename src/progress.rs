//! Ingestion progress reporting.
//!
//! Reports observable progress while a knowledge base is being created so
//! callers see which file is being worked on and how much of the batch is
//! left. Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.
//!
//! Reporting is purely observational and best-effort: the pipeline never
//! depends on a reporter succeeding, and reporters must not fail the batch.

use std::io::Write;

/// A single progress event during knowledge-base creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Batch position: about to start file `index` of `total`.
    File {
        filename: String,
        index: usize,
        total: usize,
    },
    /// Stage within a single file: 0 converting, 50 chunking, 100 done.
    Stage { filename: String, percent: u8 },
}

/// Observer for ingest progress. Implementations write to stderr (human or
/// JSON) or swallow events entirely.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr:
/// `ingest notes.pdf  file 2 / 5`.
pub struct StderrProgress;

fn human_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::File {
            filename,
            index,
            total,
        } => format!("ingest {}  file {} / {}\n", filename, index, total),
        ProgressEvent::Stage { filename, percent } => {
            format!("ingest {}  {}%\n", filename, percent)
        }
    }
}

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = human_line(&event);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::File {
                filename,
                index,
                total,
            } => serde_json::json!({
                "event": "progress",
                "file": filename,
                "n": index,
                "total": total
            }),
            ProgressEvent::Stage { filename, percent } => serde_json::json!({
                "event": "progress",
                "file": filename,
                "percent": percent
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
