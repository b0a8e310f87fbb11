//! Sync progress reporting.
//!
//! Reports observable progress during `folio sync` so users see which
//! files changed and how many are left. Progress goes to **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event emitted by the sync pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncProgressEvent {
    /// Walking the watched root. Total unknown.
    Scanning,
    /// Scan finished: `changed` of `total` files need processing.
    Diffed { total: u64, changed: u64 },
    /// About to process file `n` of `total`.
    Processing { n: u64, total: u64, file: String },
}

/// Receives progress events. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress: "sync  processing  3 / 12  notes/a.md".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Scanning => "sync  scanning...\n".to_string(),
            SyncProgressEvent::Diffed { total, changed } => format!(
                "sync  {} of {} files changed\n",
                format_number(*changed),
                format_number(*total)
            ),
            SyncProgressEvent::Processing { n, total, file } => format!(
                "sync  processing  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                file
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Scanning => serde_json::json!({
                "event": "progress",
                "phase": "scanning"
            }),
            SyncProgressEvent::Diffed { total, changed } => serde_json::json!({
                "event": "progress",
                "phase": "diffed",
                "total": total,
                "changed": changed
            }),
            SyncProgressEvent::Processing { n, total, file } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "n": n,
                "total": total,
                "file": file
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
