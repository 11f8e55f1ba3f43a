//! Error types for taskforge operations.
//!
//! Defines error types for all major subsystems:
//! - Job lifecycle and state transitions
//! - AI provider resolution and API interactions
//! - External integration connectivity
//! - Persistence (Postgres and in-memory stores)
//! - Trace recording
//! - Engine configuration

use crate::job::{JobAction, JobState};
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type surfaced by orchestrator operations.
///
/// This is a closed taxonomy: every failure a job can hit is expressed as one
/// of these variants, and the error classifier keys off the variant rather
/// than inspecting message text.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Job '{job_id}' not found")]
    NotFound { job_id: Uuid },

    #[error("Invalid state transition for job '{job_id}': cannot apply '{attempted_action}' in state '{current_state}'")]
    InvalidStateTransition {
        job_id: Uuid,
        current_state: JobState,
        attempted_action: JobAction,
    },

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Missing dependency '{dependency}': {hint}")]
    MissingDependency { dependency: String, hint: String },

    #[error("Integration '{kind}' is not connected for this user")]
    IntegrationNotConnected { kind: String },

    #[error("AI provider failure: {0}")]
    AiProvider(#[from] AiProviderError),

    #[error("Integration protocol failure ({code}) [correlation {correlation_id}] at {endpoint}")]
    IntegrationProtocol {
        code: String,
        correlation_id: Uuid,
        endpoint: String,
    },
}

impl OrchestratorError {
    /// Returns the stable code persisted with classified failures.
    pub fn code(&self) -> &str {
        match self {
            OrchestratorError::NotFound { .. } => "JOB_NOT_FOUND",
            OrchestratorError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            OrchestratorError::Storage(_) => "STORAGE_FAILURE",
            OrchestratorError::MissingDependency { .. } => "MISSING_DEPENDENCY",
            OrchestratorError::IntegrationNotConnected { .. } => "INTEGRATION_NOT_CONNECTED",
            OrchestratorError::AiProvider(e) => e.code(),
            OrchestratorError::IntegrationProtocol { code, .. } => code,
        }
    }
}

/// Errors raised by calls to an AI provider.
#[derive(Debug, Error)]
pub enum AiProviderError {
    #[error("Rate limited by provider '{provider}': {detail}")]
    RateLimited { provider: String, detail: String },

    #[error("Authentication rejected by provider '{provider}': {detail}")]
    Auth { provider: String, detail: String },

    #[error("Provider '{provider}' returned an error: {detail}")]
    Provider { provider: String, detail: String },

    #[error("Network error reaching AI provider: {detail}")]
    Network { detail: String },

    #[error("AI provider returned an unusable response: {detail}")]
    InvalidResponse { detail: String },
}

impl AiProviderError {
    /// Returns the stable code persisted with classified failures.
    pub fn code(&self) -> &'static str {
        match self {
            AiProviderError::RateLimited { .. } => "AI_RATE_LIMITED",
            AiProviderError::Auth { .. } => "AI_AUTH_FAILED",
            AiProviderError::Provider { .. } => "AI_PROVIDER_ERROR",
            AiProviderError::Network { .. } => "AI_NETWORK_ERROR",
            AiProviderError::InvalidResponse { .. } => "AI_INVALID_RESPONSE",
        }
    }
}

/// Errors that can occur in the job store implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration '{name}' failed: {message}")]
    Migration { name: String, message: String },

    #[error("No row for {entity} '{id}'")]
    RowNotFound { entity: String, id: Uuid },

    #[error("Invalid value in column '{column}': {message}")]
    Decode { column: String, message: String },
}

/// Errors that can occur while recording or flushing traces.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
