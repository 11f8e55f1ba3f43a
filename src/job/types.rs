//! Core job types for the orchestration engine.
//!
//! This module defines the data model tracked by the orchestrator:
//!
//! - `Job`: A unit of agent work with lifecycle state and diagnostics
//! - `JobUpdate`: Partial-field update applied through the job store
//! - `Plan`: Ordered steps produced by the planning phase
//! - `AuditEntry`: Append-only snapshot of a pipeline phase

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of agent work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Generate documentation for a codebase or module.
    Documentation,
    /// Generate test suites for existing code.
    TestGeneration,
    /// Scaffold a new project or component skeleton.
    Scaffold,
}

impl JobType {
    /// Returns the canonical string form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Documentation => "documentation",
            JobType::TestGeneration => "test_generation",
            JobType::Scaffold => "scaffold",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "documentation" => Ok(JobType::Documentation),
            "test_generation" => Ok(JobType::TestGeneration),
            "scaffold" => Ok(JobType::Scaffold),
            other => Err(format!(
                "unknown job type '{other}': expected documentation, test_generation or scaffold"
            )),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted but not yet started.
    Pending,
    /// Pipeline is executing.
    Running,
    /// Terminal: pipeline finished and a result is persisted.
    Completed,
    /// Terminal: pipeline aborted and classified error fields are persisted.
    Failed,
    /// Paused until a human approves the plan.
    AwaitingApproval,
}

impl JobState {
    /// Returns the canonical string form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::AwaitingApproval => "awaiting_approval",
        }
    }

    /// Returns whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "awaiting_approval" => Ok(JobState::AwaitingApproval),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// A unit of agent work tracked through the lifecycle state machine.
///
/// Jobs are created in `pending`, mutated only by orchestrator methods, and
/// become immutable once terminal. `result` is set only on `completed`; the
/// `error_*` fields only on `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: Uuid,
    /// Owner of the job; used for credential and integration lookups.
    pub user_id: Uuid,
    /// The kind of agent work to perform.
    pub job_type: JobType,
    /// Current lifecycle state.
    pub state: JobState,
    /// Opaque request payload; may carry `provider` and `model` overrides.
    pub payload: serde_json::Value,
    /// Final artifact, present iff the job completed.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Stable classified error code, present iff the job failed.
    #[serde(default)]
    pub error_code: Option<String>,
    /// Human-readable error message, capped before persistence.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Raw error detail, capped before persistence.
    #[serde(default)]
    pub error_detail: Option<String>,
    /// Redacted integration endpoint involved in the failure, if any.
    #[serde(default)]
    pub error_gateway_url: Option<String>,
    /// Pipeline phase that was active when the job failed.
    #[serde(default)]
    pub failed_phase: Option<String>,
    /// Resolved AI provider, persisted for diagnostics.
    #[serde(default)]
    pub ai_provider: Option<String>,
    /// Resolved AI model, persisted for diagnostics.
    #[serde(default)]
    pub ai_model: Option<String>,
    /// Which credential source the resolution used (`user` or `env`).
    #[serde(default)]
    pub ai_key_source: Option<String>,
    /// Which precedence branch produced the resolution.
    #[serde(default)]
    pub ai_fallback_reason: Option<String>,
    /// Score reported by the strict validation pass, if it ran.
    #[serde(default)]
    pub quality_score: Option<f64>,
    /// Whether the validate phase must run for this job.
    pub requires_strict_validation: bool,
    /// Whether a human must approve the plan before execution.
    pub requires_approval: bool,
    /// Identity of the approver, recorded before resumption.
    #[serde(default)]
    pub approved_by: Option<String>,
    /// When the approval was recorded.
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    /// When this job was created.
    pub created_at: DateTime<Utc>,
    /// When this job was last mutated.
    pub updated_at: DateTime<Utc>,
    /// When the pipeline started running.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a new pending job with default flags.
    pub fn new(user_id: Uuid, job_type: JobType, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            job_type,
            state: JobState::Pending,
            payload,
            result: None,
            error_code: None,
            error_message: None,
            error_detail: None,
            error_gateway_url: None,
            failed_phase: None,
            ai_provider: None,
            ai_model: None,
            ai_key_source: None,
            ai_fallback_reason: None,
            quality_score: None,
            requires_strict_validation: false,
            requires_approval: false,
            approved_by: None,
            approved_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Sets whether the strict validation pass must run.
    pub fn with_strict_validation(mut self, required: bool) -> Self {
        self.requires_strict_validation = required;
        self
    }

    /// Sets whether a human must approve the plan before execution.
    pub fn with_approval_required(mut self, required: bool) -> Self {
        self.requires_approval = required;
        self
    }

    /// Returns the explicit provider override from the payload, if present.
    pub fn provider_override(&self) -> Option<&str> {
        self.payload.get("provider").and_then(|v| v.as_str())
    }

    /// Returns the explicit model override from the payload, if present.
    pub fn model_override(&self) -> Option<&str> {
        self.payload.get("model").and_then(|v| v.as_str())
    }

    /// Returns whether approver identity and timestamp are both recorded.
    pub fn has_approval(&self) -> bool {
        self.approved_by.is_some() && self.approved_at.is_some()
    }

    /// Returns how long ago the job was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// Partial update applied to a stored job.
///
/// `None` fields are left unchanged by the store; `updated_at` is stamped on
/// every write.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub state: Option<JobState>,
    pub result: Option<serde_json::Value>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub error_detail: Option<String>,
    pub error_gateway_url: Option<String>,
    pub failed_phase: Option<String>,
    pub ai_provider: Option<String>,
    pub ai_model: Option<String>,
    pub ai_key_source: Option<String>,
    pub ai_fallback_reason: Option<String>,
    pub quality_score: Option<f64>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    /// Builds an update that only changes the lifecycle state.
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    /// Builds the terminal update for a completed job.
    pub fn completed(result: serde_json::Value, quality_score: Option<f64>) -> Self {
        Self {
            state: Some(JobState::Completed),
            result: Some(result),
            quality_score,
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Builds the terminal update for a failed job from classified error fields.
    pub fn failed(
        phase: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        detail: impl Into<String>,
        gateway_url: Option<String>,
    ) -> Self {
        Self {
            state: Some(JobState::Failed),
            failed_phase: Some(phase.into()),
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            error_detail: Some(detail.into()),
            error_gateway_url: gateway_url,
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Builds the diagnostic update persisting an AI resolution onto the job.
    pub fn ai_resolution(
        provider: impl Into<String>,
        model: impl Into<String>,
        key_source: impl Into<String>,
        fallback_reason: impl Into<String>,
    ) -> Self {
        Self {
            ai_provider: Some(provider.into()),
            ai_model: Some(model.into()),
            ai_key_source: Some(key_source.into()),
            ai_fallback_reason: Some(fallback_reason.into()),
            ..Default::default()
        }
    }

    /// Builds the update recording an approval.
    pub fn approval(approved_by: impl Into<String>) -> Self {
        Self {
            approved_by: Some(approved_by.into()),
            approved_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Applies this update to an in-memory job, stamping `updated_at`.
    pub fn apply_to(&self, job: &mut Job) {
        if let Some(state) = self.state {
            job.state = state;
        }
        if let Some(ref result) = self.result {
            job.result = Some(result.clone());
        }
        if let Some(ref code) = self.error_code {
            job.error_code = Some(code.clone());
        }
        if let Some(ref message) = self.error_message {
            job.error_message = Some(message.clone());
        }
        if let Some(ref detail) = self.error_detail {
            job.error_detail = Some(detail.clone());
        }
        if let Some(ref url) = self.error_gateway_url {
            job.error_gateway_url = Some(url.clone());
        }
        if let Some(ref phase) = self.failed_phase {
            job.failed_phase = Some(phase.clone());
        }
        if let Some(ref provider) = self.ai_provider {
            job.ai_provider = Some(provider.clone());
        }
        if let Some(ref model) = self.ai_model {
            job.ai_model = Some(model.clone());
        }
        if let Some(ref source) = self.ai_key_source {
            job.ai_key_source = Some(source.clone());
        }
        if let Some(ref reason) = self.ai_fallback_reason {
            job.ai_fallback_reason = Some(reason.clone());
        }
        if let Some(score) = self.quality_score {
            job.quality_score = Some(score);
        }
        if let Some(ref approver) = self.approved_by {
            job.approved_by = Some(approver.clone());
        }
        if let Some(at) = self.approved_at {
            job.approved_at = Some(at);
        }
        if let Some(at) = self.started_at {
            job.started_at = Some(at);
        }
        if let Some(at) = self.finished_at {
            job.finished_at = Some(at);
        }
        job.updated_at = Utc::now();
    }
}

/// A single ordered step within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Zero-based position of this step.
    pub index: u32,
    /// Short imperative title.
    pub title: String,
    /// Longer description of what the step does.
    pub detail: String,
}

/// Output of the planning phase for a job.
///
/// At most one live plan exists per job; re-planning replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Job this plan belongs to.
    pub job_id: Uuid,
    /// Ordered steps to execute.
    pub steps: Vec<PlanStep>,
    /// Why the planner chose this approach.
    pub rationale: String,
    /// When the plan was produced.
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Creates a new plan for a job.
    pub fn new(job_id: Uuid, steps: Vec<PlanStep>, rationale: impl Into<String>) -> Self {
        Self {
            job_id,
            steps,
            rationale: rationale.into(),
            created_at: Utc::now(),
        }
    }
}

/// Pipeline phase an audit entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    Plan,
    Execute,
    Reflect,
    Validate,
}

impl AuditPhase {
    /// Returns the canonical string form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditPhase::Plan => "plan",
            AuditPhase::Execute => "execute",
            AuditPhase::Reflect => "reflect",
            AuditPhase::Validate => "validate",
        }
    }
}

impl std::fmt::Display for AuditPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuditPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(AuditPhase::Plan),
            "execute" => Ok(AuditPhase::Execute),
            "reflect" => Ok(AuditPhase::Reflect),
            "validate" => Ok(AuditPhase::Validate),
            other => Err(format!("unknown audit phase '{other}'")),
        }
    }
}

/// Append-only snapshot of a pipeline phase outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier for this entry.
    pub id: Uuid,
    /// Job this entry belongs to.
    pub job_id: Uuid,
    /// Phase that produced the snapshot.
    pub phase: AuditPhase,
    /// Opaque snapshot of the phase output.
    pub payload: serde_json::Value,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Creates a new audit entry for a phase.
    pub fn new(job_id: Uuid, phase: AuditPhase, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            phase,
            payload,
            created_at: Utc::now(),
        }
    }
}
