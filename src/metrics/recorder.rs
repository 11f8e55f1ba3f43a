//! Per-job metric recording on top of the raw Prometheus metrics.
//!
//! The `JobMetricsRecorder` observes AI calls through [`AiCallObserver`],
//! feeds the Prometheus metrics, and keeps a per-job accumulator so the
//! orchestrator can persist a summary onto the job trace when the run ends.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use uuid::Uuid;

use crate::ai::{AiCallEvent, AiCallObserver};
use crate::job::JobType;

use super::prometheus::{
    AI_CALLS_TOTAL, AI_CALL_LATENCY, AI_TOKENS_TOTAL, JOBS_IN_FLIGHT, JOBS_TOTAL,
    JOB_DURATION, JOB_FAILURES_TOTAL, VALIDATION_SCORE,
};

/// Summary of AI usage accumulated over one job run.
///
/// Serialized onto the job trace when the pipeline reaches a terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Number of AI calls made during the run.
    pub ai_calls: u32,
    /// Number of AI calls that failed.
    pub ai_failures: u32,
    /// Prompt tokens consumed across all calls.
    pub prompt_tokens: u64,
    /// Completion tokens consumed across all calls.
    pub completion_tokens: u64,
    /// Total wall-clock time spent in AI calls, in milliseconds.
    pub ai_time_ms: u64,
}

impl MetricsSnapshot {
    /// Total tokens consumed (prompt + completion).
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Metrics recorder for job pipeline runs.
///
/// One instance is shared by the orchestrator and the AI service. It records
/// job lifecycle and AI call metrics into the global Prometheus registry
/// (when initialized with `init_metrics()`), and accumulates per-job AI usage
/// that can be drained as a [`MetricsSnapshot`] when the job finishes.
#[derive(Debug, Default)]
pub struct JobMetricsRecorder {
    per_job: Mutex<HashMap<Uuid, MetricsSnapshot>>,
}

impl JobMetricsRecorder {
    /// Create a new recorder with no accumulated state.
    ///
    /// Note: Prometheus metrics must be initialized with `init_metrics()`
    /// before recording reaches the registry; recording without it only
    /// updates the per-job accumulators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job reaching a terminal state.
    ///
    /// # Arguments
    ///
    /// * `status` - Terminal status (e.g., "completed", "failed")
    /// * `job_type` - Job type the pipeline ran
    /// * `duration_secs` - Wall-clock pipeline duration in seconds
    pub fn record_job_finished(&self, status: &str, job_type: JobType, duration_secs: f64) {
        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total
                .with_label_values(&[status, job_type.as_str()])
                .inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[job_type.as_str()])
                .observe(duration_secs);
        }

        tracing::trace!(
            status = status,
            job_type = %job_type,
            duration_secs = duration_secs,
            "Recorded job terminal metric"
        );
    }

    /// Record a classified job failure.
    ///
    /// # Arguments
    ///
    /// * `code` - Stable error code from classification
    /// * `phase` - Pipeline phase that raised, or "none" when outside a phase
    pub fn record_job_failure(&self, code: &str, phase: &str) {
        if let Some(failures) = JOB_FAILURES_TOTAL.get() {
            failures.with_label_values(&[code, phase]).inc();
        }

        tracing::trace!(code = code, phase = phase, "Recorded job failure metric");
    }

    /// Record a strict-validation score.
    pub fn record_validation_score(&self, score: f64) {
        if let Some(validation_score) = VALIDATION_SCORE.get() {
            validation_score.observe(score);
        }

        tracing::trace!(score = score, "Recorded validation score metric");
    }

    /// Increment the count of jobs in flight by 1.
    pub fn inc_jobs_in_flight(&self) {
        if let Some(jobs_in_flight) = JOBS_IN_FLIGHT.get() {
            jobs_in_flight.inc();
        }
    }

    /// Decrement the count of jobs in flight by 1.
    pub fn dec_jobs_in_flight(&self) {
        if let Some(jobs_in_flight) = JOBS_IN_FLIGHT.get() {
            jobs_in_flight.dec();
        }
    }

    /// Current AI usage summary for a job, without clearing it.
    pub fn snapshot(&self, job_id: Uuid) -> Option<MetricsSnapshot> {
        let per_job = self.per_job.lock().expect("lock not poisoned");
        per_job.get(&job_id).copied()
    }

    /// Drain the AI usage summary for a finished job.
    ///
    /// Removes the per-job accumulator so long-lived recorders do not grow
    /// without bound. Returns `None` if the job made no AI calls.
    pub fn take_snapshot(&self, job_id: Uuid) -> Option<MetricsSnapshot> {
        let mut per_job = self.per_job.lock().expect("lock not poisoned");
        per_job.remove(&job_id)
    }
}

impl AiCallObserver for JobMetricsRecorder {
    fn on_ai_call(&self, job_id: Uuid, event: AiCallEvent) {
        let status = if event.success { "success" } else { "failure" };

        if let Some(ai_calls) = AI_CALLS_TOTAL.get() {
            ai_calls
                .with_label_values(&[event.purpose.as_str(), event.provider.as_str(), status])
                .inc();
        }

        if let Some(ai_latency) = AI_CALL_LATENCY.get() {
            ai_latency
                .with_label_values(&[event.provider.as_str()])
                .observe(event.duration_ms as f64 / 1000.0);
        }

        if let Some(ai_tokens) = AI_TOKENS_TOTAL.get() {
            ai_tokens
                .with_label_values(&[event.provider.as_str(), "prompt"])
                .inc_by(f64::from(event.prompt_tokens));
            ai_tokens
                .with_label_values(&[event.provider.as_str(), "completion"])
                .inc_by(f64::from(event.completion_tokens));
        }

        let mut per_job = self.per_job.lock().expect("lock not poisoned");
        let entry = per_job.entry(job_id).or_default();
        entry.ai_calls += 1;
        if !event.success {
            entry.ai_failures += 1;
        }
        entry.prompt_tokens += u64::from(event.prompt_tokens);
        entry.completion_tokens += u64::from(event.completion_tokens);
        entry.ai_time_ms += event.duration_ms;
        drop(per_job);

        tracing::trace!(
            job_id = %job_id,
            purpose = %event.purpose,
            provider = %event.provider,
            model = %event.model,
            duration_ms = event.duration_ms,
            status = status,
            "Recorded AI call metric"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::CallPurpose;
    use crate::metrics::init_metrics;
    use crate::resolver::Provider;

    fn ensure_metrics_init() {
        // Initialize metrics if not already done
        let _ = init_metrics();
    }

    fn call_event(success: bool) -> AiCallEvent {
        AiCallEvent {
            purpose: CallPurpose::Generate,
            provider: Provider::OpenAi,
            model: "gpt-4o".to_string(),
            duration_ms: 1200,
            prompt_tokens: 800,
            completion_tokens: 300,
            success,
            error_code: if success {
                None
            } else {
                Some("AI_RATE_LIMITED".to_string())
            },
        }
    }

    #[test]
    fn test_snapshot_accumulates_per_job() {
        let recorder = JobMetricsRecorder::new();
        let job_id = Uuid::new_v4();

        recorder.on_ai_call(job_id, call_event(true));
        recorder.on_ai_call(job_id, call_event(false));
        recorder.on_ai_call(Uuid::new_v4(), call_event(true));

        let snapshot = recorder.snapshot(job_id).unwrap();
        assert_eq!(snapshot.ai_calls, 2);
        assert_eq!(snapshot.ai_failures, 1);
        assert_eq!(snapshot.prompt_tokens, 1600);
        assert_eq!(snapshot.completion_tokens, 600);
        assert_eq!(snapshot.ai_time_ms, 2400);
        assert_eq!(snapshot.total_tokens(), 2200);
    }

    #[test]
    fn test_take_snapshot_drains_entry() {
        let recorder = JobMetricsRecorder::new();
        let job_id = Uuid::new_v4();

        recorder.on_ai_call(job_id, call_event(true));

        assert!(recorder.take_snapshot(job_id).is_some());
        assert!(recorder.take_snapshot(job_id).is_none());
    }

    #[test]
    fn test_snapshot_missing_job() {
        let recorder = JobMetricsRecorder::new();
        assert!(recorder.snapshot(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_record_job_lifecycle() {
        ensure_metrics_init();
        let recorder = JobMetricsRecorder::new();

        // Should not panic regardless of global registry state
        recorder.inc_jobs_in_flight();
        recorder.record_job_finished("completed", JobType::Documentation, 42.5);
        recorder.record_job_failure("AI_RATE_LIMITED", "execute");
        recorder.record_validation_score(0.85);
        recorder.dec_jobs_in_flight();
    }
}
