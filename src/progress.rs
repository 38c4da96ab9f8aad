//! Terminal progress reporting for `sage index`.
//!
//! The authoritative progress of a run lives in the store (see
//! `Store::advance_progress`) so any process can poll it. This module only
//! mirrors those updates to **stderr** while the CLI runs, keeping stdout
//! parseable for scripts.

use std::io::Write;

/// A single progress event of an indexing run.
#[derive(Clone, Debug)]
pub enum IndexProgressEvent {
    /// Walking the repository. Total unknown.
    Discovering { project: String },
    /// `n` of `total` files handled (indexed, skipped, or failed).
    Indexing {
        project: String,
        n: u64,
        total: u64,
        failed: u64,
    },
    Finished {
        project: String,
        total: u64,
        failed: u64,
    },
}

/// Reports indexing progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index my-app  1,234 / 5,000 files".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Discovering { project } => {
                format!("index {}  discovering...\n", project)
            }
            IndexProgressEvent::Indexing {
                project,
                n,
                total,
                failed,
            } => {
                let mut line = format!(
                    "index {}  {} / {} files",
                    project,
                    format_number(*n),
                    format_number(*total)
                );
                if *failed > 0 {
                    line.push_str(&format!("  ({} failed)", format_number(*failed)));
                }
                line.push('\n');
                line
            }
            IndexProgressEvent::Finished {
                project,
                total,
                failed,
            } => format!(
                "index {}  done: {} files, {} failed\n",
                project,
                format_number(*total),
                format_number(*failed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Discovering { project } => serde_json::json!({
                "event": "progress",
                "project": project,
                "phase": "discovering"
            }),
            IndexProgressEvent::Indexing {
                project,
                n,
                total,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "project": project,
                "phase": "indexing",
                "n": n,
                "total": total,
                "failed": failed
            }),
            IndexProgressEvent::Finished {
                project,
                total,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "project": project,
                "phase": "finished",
                "total": total,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
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

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
