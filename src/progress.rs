//! Request-scoped progress reporting.
//!
//! The preparer reports what it is doing (checking the branch, reading
//! files, embedding, ranking) through a [`ProgressSink`] injected per call.
//! The CLI writes progress on **stderr** so stdout remains parseable for
//! scripts; a streaming transport can drain a [`ChannelProgress`] instead.

use serde::Serialize;
use std::io::Write;
use tokio::sync::mpsc;

/// A single progress event for one task.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Comparing the stored commit marker with the branch head.
    Checking { branch: String },
    /// The stored index already reflects `commit`.
    UpToDate { commit: String, files: usize },
    /// Listing the tree at `commit`.
    Listing { commit: String },
    /// n files read out of total.
    Reading { n: usize, total: usize },
    /// Embedding files whose content changed or is new.
    Embedding { files: usize },
    /// n records written out of total.
    Saving { n: usize, total: usize },
    /// A reindex pass finished and the commit marker advanced.
    Indexed {
        commit: String,
        embedded: usize,
        reused: usize,
        skipped: usize,
        pruned: usize,
    },
    /// Ranking files against the task.
    Ranking { files: usize },
    /// Final selection under the model's token ceiling.
    Selected { files: usize, total_tokens: usize },
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressEvent::Checking { branch } => write!(f, "checking {}", branch),
            ProgressEvent::UpToDate { commit, files } => write!(
                f,
                "up to date at {}  {} files",
                short_sha(commit),
                format_number(*files)
            ),
            ProgressEvent::Listing { commit } => write!(f, "listing {}", short_sha(commit)),
            ProgressEvent::Reading { n, total } => write!(
                f,
                "reading  {} / {} files",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Embedding { files } => {
                write!(f, "embedding  {} files", format_number(*files))
            }
            ProgressEvent::Saving { n, total } => write!(
                f,
                "saving  {} / {} files",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Indexed {
                commit,
                embedded,
                reused,
                skipped,
                pruned,
            } => write!(
                f,
                "indexed {}  embedded {}, reused {}, skipped {}, pruned {}",
                short_sha(commit),
                embedded,
                reused,
                skipped,
                pruned
            ),
            ProgressEvent::Ranking { files } => {
                write!(f, "ranking  {} files", format_number(*files))
            }
            ProgressEvent::Selected {
                files,
                total_tokens,
            } => write!(
                f,
                "selected  {} files, {} tokens",
                format_number(*files),
                format_number(*total_tokens)
            ),
        }
    }
}

/// Receives progress for a task. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, task_id: &str, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "prepare t-42  reading  120 / 1,204 files".
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn emit(&self, task_id: &str, event: ProgressEvent) {
        let line = format!("prepare {}  {}\n", task_id, event);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressSink for JsonProgress {
    fn emit(&self, task_id: &str, event: ProgressEvent) {
        let update = ProgressUpdate {
            task_id: task_id.to_string(),
            event,
        };
        if let Ok(line) = serde_json::to_string(&update) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op sink when progress is disabled.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _task_id: &str, _event: ProgressEvent) {}
}

/// An event tagged with the task it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub task_id: String,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

/// Forwards events into an unbounded channel. Events emitted after the
/// receiver is dropped are discarded.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelProgress {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, task_id: &str, event: ProgressEvent) {
        let _ = self.tx.send(ProgressUpdate {
            task_id: task_id.to_string(),
            event,
        });
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
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

    pub fn sink(&self) -> Box<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn human_lines() {
        let e = ProgressEvent::Reading { n: 120, total: 1204 };
        assert_eq!(e.to_string(), "reading  120 / 1,204 files");
        let e = ProgressEvent::UpToDate {
            commit: "0123456789abcdef".into(),
            files: 3,
        };
        assert_eq!(e.to_string(), "up to date at 0123456789ab  3 files");
    }

    #[test]
    fn json_shape() {
        let update = ProgressUpdate {
            task_id: "t1".into(),
            event: ProgressEvent::Selected {
                files: 2,
                total_tokens: 260,
            },
        };
        let v: serde_json::Value = serde_json::to_value(&update).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "task_id": "t1",
                "phase": "selected",
                "files": 2,
                "total_tokens": 260
            })
        );
    }

    #[tokio::test]
    async fn channel_sink_forwards_and_tolerates_closed_receiver() {
        let (sink, mut rx) = ChannelProgress::channel();
        sink.emit("t1", ProgressEvent::Ranking { files: 4 });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.task_id, "t1");
        assert_eq!(got.event, ProgressEvent::Ranking { files: 4 });

        drop(rx);
        sink.emit("t1", ProgressEvent::Ranking { files: 5 });
    }
}
