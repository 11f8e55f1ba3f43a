//! Metrics module for Prometheus-based monitoring.
//!
//! This module provides metrics collection and export for taskforge
//! operations, covering job lifecycle, AI usage, and validation scores.
//!
//! # Example
//!
//! ```ignore
//! use taskforge::metrics::{init_metrics, export_metrics, JobMetricsRecorder};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! // Create a recorder shared by the orchestrator and AI service
//! let recorder = JobMetricsRecorder::new();
//!
//! // Record a finished job
//! recorder.record_job_finished("completed", taskforge::job::JobType::Scaffold, 42.5);
//!
//! // Export metrics for Prometheus scraping
//! let metrics_text = export_metrics();
//! ```

pub mod prometheus;
pub mod recorder;

// Re-export key types for convenient access
pub use prometheus::{export_metrics, init_metrics, metrics_handler};
pub use recorder::{JobMetricsRecorder, MetricsSnapshot};

// Re-export metric constants for direct access when needed
pub use prometheus::{
    AI_CALLS_TOTAL, AI_CALL_LATENCY, AI_TOKENS_TOTAL, JOBS_IN_FLIGHT, JOBS_TOTAL, JOB_DURATION,
    JOB_FAILURES_TOTAL, REGISTRY, VALIDATION_SCORE,
};
