//! Job trace recording.
//!
//! Every pipeline run emits a stream of diagnostic events keyed by job id:
//! stage boundaries, the accepted plan, tool wiring, artifact summaries,
//! free-form logs, and classified failures. Recorders buffer events until an
//! explicit `flush()` checkpoint; the orchestrator treats both calls as
//! best-effort and never fails a job over them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::TraceError;

/// One diagnostic event in a job's trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A pipeline stage boundary.
    Stage {
        /// Stage name (e.g., "plan", "execute").
        name: String,
        /// Short human-readable detail.
        detail: String,
    },
    /// The accepted plan.
    Plan {
        /// Number of steps in the plan.
        steps: usize,
        /// Why the planner chose this approach.
        rationale: String,
    },
    /// Integration tooling handed to the agent.
    Tool {
        /// Integration kind (e.g., "github").
        integration: String,
        /// Gateway endpoint, redacted to scheme and host.
        endpoint: String,
    },
    /// A produced artifact.
    Artifact {
        /// Artifact summary text.
        summary: String,
        /// Number of files in the artifact.
        files: usize,
    },
    /// Free-form diagnostic payload.
    Log {
        /// What the payload describes.
        message: String,
        /// Structured payload.
        payload: serde_json::Value,
    },
    /// A classified failure.
    Error {
        /// Stable error code.
        code: String,
        /// User-facing message.
        message: String,
    },
}

/// One recorded line: an event plus when it happened and for which job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceLine {
    /// Job the event belongs to.
    pub job_id: Uuid,
    /// When the event was recorded.
    pub at: DateTime<Utc>,
    /// The event itself.
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// Sink for job trace events.
#[async_trait]
pub trait TraceRecorder: Send + Sync {
    /// Record one event for a job.
    async fn record(&self, job_id: Uuid, event: TraceEvent) -> Result<(), TraceError>;

    /// Persist everything recorded for a job since the last flush.
    async fn flush(&self, job_id: Uuid) -> Result<(), TraceError>;
}

/// Trace recorder writing one JSONL file per job.
///
/// Events are buffered in memory per job; `flush()` appends the buffered
/// lines to `<dir>/<job_id>.jsonl` and clears the buffer. Repeated flushes
/// append, so a resumed job keeps extending the same file.
pub struct JsonlTraceRecorder {
    dir: PathBuf,
    pending: Mutex<HashMap<Uuid, Vec<TraceLine>>>,
}

impl JsonlTraceRecorder {
    /// Creates a recorder writing under the given directory.
    ///
    /// The directory is created lazily on first flush.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the file path a job's trace is written to.
    pub fn trace_path(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.jsonl", job_id))
    }

    /// Returns the base trace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn drain_pending(&self, job_id: Uuid) -> Vec<TraceLine> {
        let mut pending = self.pending.lock().expect("lock not poisoned");
        pending.remove(&job_id).unwrap_or_default()
    }
}

#[async_trait]
impl TraceRecorder for JsonlTraceRecorder {
    async fn record(&self, job_id: Uuid, event: TraceEvent) -> Result<(), TraceError> {
        let line = TraceLine {
            job_id,
            at: Utc::now(),
            event,
        };

        let mut pending = self.pending.lock().expect("lock not poisoned");
        pending.entry(job_id).or_default().push(line);

        Ok(())
    }

    async fn flush(&self, job_id: Uuid) -> Result<(), TraceError> {
        let lines = self.drain_pending(job_id);
        if lines.is_empty() {
            return Ok(());
        }

        // Serialize before touching the filesystem so a bad line leaves
        // the file untouched.
        let mut buffer = String::new();
        for line in &lines {
            buffer.push_str(&serde_json::to_string(line)?);
            buffer.push('\n');
        }

        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
        }

        let path = self.trace_path(job_id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.sync_all().await?;

        tracing::debug!(
            job_id = %job_id,
            lines = lines.len(),
            path = %path.display(),
            "Flushed job trace"
        );

        Ok(())
    }
}

/// In-memory trace recorder for tests.
///
/// Keeps every recorded line and counts flush checkpoints per job.
#[derive(Default)]
pub struct MemoryTraceRecorder {
    events: Mutex<HashMap<Uuid, Vec<TraceLine>>>,
    flushes: Mutex<HashMap<Uuid, usize>>,
}

impl MemoryTraceRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All lines recorded for a job, in order.
    pub fn lines_for(&self, job_id: Uuid) -> Vec<TraceLine> {
        let events = self.events.lock().expect("lock not poisoned");
        events.get(&job_id).cloned().unwrap_or_default()
    }

    /// Number of flush checkpoints seen for a job.
    pub fn flush_count(&self, job_id: Uuid) -> usize {
        let flushes = self.flushes.lock().expect("lock not poisoned");
        flushes.get(&job_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TraceRecorder for MemoryTraceRecorder {
    async fn record(&self, job_id: Uuid, event: TraceEvent) -> Result<(), TraceError> {
        let line = TraceLine {
            job_id,
            at: Utc::now(),
            event,
        };

        let mut events = self.events.lock().expect("lock not poisoned");
        events.entry(job_id).or_default().push(line);

        Ok(())
    }

    async fn flush(&self, job_id: Uuid) -> Result<(), TraceError> {
        let mut flushes = self.flushes.lock().expect("lock not poisoned");
        *flushes.entry(job_id).or_insert(0) += 1;
        Ok(())
    }
}
