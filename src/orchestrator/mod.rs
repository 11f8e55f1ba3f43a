//! The job orchestration engine.
//!
//! Composes the state machine, the AI resolver, the agent registry and the
//! error classifier into the full job lifecycle: submit, start (which drives
//! the plan/execute/reflect/validate pipeline), complete, fail, approval
//! pause and resumption.
//!
//! The failure discipline is the heart of this module. Setup failures, plan
//! phase failures and state transition writes are fatal and abort the job.
//! Reflection, strict validation, audit entries for the later phases, trace
//! flushes and metrics are diagnostics: their failures are caught, logged and
//! never change the job's outcome. Every fatal failure crosses exactly one
//! top-level boundary, where it is classified, persisted through `fail_job`
//! and re-returned to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, AgentContext, AgentRegistry, Artifact};
use crate::ai::{AiService, LiveAiService};
use crate::checks::{CheckRunner, StaticCheckRunner};
use crate::classify::{classify, ClassifiedError};
use crate::config::EngineConfig;
use crate::credentials::{load_env_keys, ApiKey, CredentialStore, StaticCredentials};
use crate::error::OrchestratorError;
use crate::integrations::{EnvIntegrationGateway, IntegrationGateway};
use crate::job::{
    AuditEntry, AuditPhase, Job, JobAction, JobState, JobType, JobUpdate, Plan, StateMachine,
};
use crate::metrics::JobMetricsRecorder;
use crate::resolver::{resolve, Provider, ResolvedAi, ResolverSnapshot};
use crate::storage::{JobStore, MemoryJobStore};
use crate::trace::{JsonlTraceRecorder, TraceEvent, TraceRecorder};

/// Phase label persisted when a failure happens outside the named phases.
const PHASE_SETUP: &str = "setup";
/// Phase label for finalization (trace flush, completion write).
const PHASE_FINALIZE: &str = "finalize";

/// Flags accepted at job submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    /// Run the strong-model validation pass over the finished artifact.
    pub requires_strict_validation: bool,
    /// Pause the pipeline for human approval before execution.
    pub requires_approval: bool,
}

impl SubmitOptions {
    /// Creates options with every flag off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the strict validation pass.
    pub fn with_strict_validation(mut self) -> Self {
        self.requires_strict_validation = true;
        self
    }

    /// Requires human approval before execution.
    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

/// How far the pipeline got on one `start_job` or resume pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineOutcome {
    /// The job ran to completion.
    Completed,
    /// The job paused for human approval.
    AwaitingApproval,
}

/// A fatal pipeline failure tagged with the phase that raised it.
struct PhaseFailure {
    phase: &'static str,
    error: OrchestratorError,
}

impl PhaseFailure {
    fn new(phase: &'static str, error: OrchestratorError) -> Self {
        Self { phase, error }
    }
}

/// Builder for [`Orchestrator`].
///
/// Every collaborator has a standalone default, so tests and the CLI's
/// store-less mode can build an engine from nothing, while deployments swap
/// in the Postgres store and a real credential service.
pub struct OrchestratorBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn JobStore>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    integrations: Option<Arc<dyn IntegrationGateway>>,
    ai: Option<Arc<dyn AiService>>,
    trace: Option<Arc<dyn TraceRecorder>>,
    checks: Option<Arc<dyn CheckRunner>>,
    registry: Option<AgentRegistry>,
    env_keys: Option<HashMap<Provider, ApiKey>>,
}

impl OrchestratorBuilder {
    /// Starts a builder from the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            credentials: None,
            integrations: None,
            ai: None,
            trace: None,
            checks: None,
            registry: None,
            env_keys: None,
        }
    }

    /// Sets the job store.
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the credential store.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the integration gateway.
    pub fn with_integrations(mut self, integrations: Arc<dyn IntegrationGateway>) -> Self {
        self.integrations = Some(integrations);
        self
    }

    /// Sets the AI service.
    pub fn with_ai(mut self, ai: Arc<dyn AiService>) -> Self {
        self.ai = Some(ai);
        self
    }

    /// Sets the trace recorder.
    pub fn with_trace(mut self, trace: Arc<dyn TraceRecorder>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Sets the static check runner.
    pub fn with_checks(mut self, checks: Arc<dyn CheckRunner>) -> Self {
        self.checks = Some(checks);
        self
    }

    /// Sets the agent registry.
    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the environment credential map.
    ///
    /// Defaults to the per-provider `*_API_KEY` environment variables.
    pub fn with_env_keys(mut self, env_keys: HashMap<Provider, ApiKey>) -> Self {
        self.env_keys = Some(env_keys);
        self
    }

    /// Builds the orchestrator, filling in defaults for unset collaborators.
    pub fn build(self) -> Arc<Orchestrator> {
        let metrics = Arc::new(JobMetricsRecorder::new());
        let ai = self.ai.unwrap_or_else(|| {
            Arc::new(
                LiveAiService::new()
                    .with_observer(metrics.clone())
                    .with_temperature(self.config.temperature)
                    .with_max_tokens(self.config.max_tokens),
            )
        });
        let trace = self
            .trace
            .unwrap_or_else(|| Arc::new(JsonlTraceRecorder::new(self.config.trace_dir.clone())));

        Arc::new(Orchestrator {
            store: self.store.unwrap_or_else(|| Arc::new(MemoryJobStore::new())),
            credentials: self
                .credentials
                .unwrap_or_else(|| Arc::new(StaticCredentials::new())),
            integrations: self
                .integrations
                .unwrap_or_else(|| Arc::new(EnvIntegrationGateway::from_env())),
            ai,
            trace,
            checks: self.checks.unwrap_or_else(|| Arc::new(StaticCheckRunner::new())),
            registry: self.registry.unwrap_or_else(AgentRegistry::with_defaults),
            env_keys: self.env_keys.unwrap_or_else(load_env_keys),
            metrics,
            machines: Mutex::new(HashMap::new()),
            config: self.config,
        })
    }
}

/// The agent job orchestration engine.
///
/// One instance serves every job; each job runs as one independent tokio
/// task with strictly sequential phases. The engine imposes no timeouts of
/// its own on collaborator calls.
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    credentials: Arc<dyn CredentialStore>,
    integrations: Arc<dyn IntegrationGateway>,
    ai: Arc<dyn AiService>,
    trace: Arc<dyn TraceRecorder>,
    checks: Arc<dyn CheckRunner>,
    registry: AgentRegistry,
    env_keys: HashMap<Provider, ApiKey>,
    metrics: Arc<JobMetricsRecorder>,
    /// State machine cache. Pure optimization: a miss reconstructs the
    /// machine from the stored job row, so losing it never loses correctness.
    machines: Mutex<HashMap<Uuid, StateMachine>>,
    config: EngineConfig,
}

impl Orchestrator {
    /// Starts a builder with the given configuration.
    pub fn builder(config: EngineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Returns the shared metrics recorder.
    pub fn metrics(&self) -> &Arc<JobMetricsRecorder> {
        &self.metrics
    }

    /// Returns the job store, for read-side callers (status views, tests).
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    // ---- lifecycle surface -------------------------------------------------

    /// Creates a job in `pending` and returns its id.
    pub async fn submit_job(
        &self,
        user_id: Uuid,
        job_type: JobType,
        payload: serde_json::Value,
        options: SubmitOptions,
    ) -> Result<Uuid, OrchestratorError> {
        let job = Job::new(user_id, job_type, payload)
            .with_strict_validation(options.requires_strict_validation)
            .with_approval_required(options.requires_approval);

        self.store.insert_job(&job).await?;
        self.cache_machine(StateMachine::new(job.id, job.state));

        info!(
            job_id = %job.id,
            job_type = %job_type,
            strict_validation = options.requires_strict_validation,
            requires_approval = options.requires_approval,
            "Job submitted"
        );
        Ok(job.id)
    }

    /// Runs the pipeline for a pending job.
    ///
    /// Transition failures out of `pending` propagate untouched: a job that
    /// is already running or terminal is not failed over a misuse of the API.
    /// Once the job is `running`, every fatal failure is classified, routed
    /// through `fail_job` and returned to the caller.
    pub async fn start_job(&self, job_id: Uuid) -> Result<(), OrchestratorError> {
        let mut job = self.load_job(job_id).await?;

        self.apply_transition(
            job_id,
            JobAction::Start,
            JobUpdate {
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?;
        job.state = JobState::Running;
        job.started_at = Some(Utc::now());

        self.metrics.inc_jobs_in_flight();
        let outcome = self.run_pipeline(&job).await;
        self.metrics.dec_jobs_in_flight();

        match outcome {
            Ok(PipelineOutcome::Completed) => Ok(()),
            Ok(PipelineOutcome::AwaitingApproval) => {
                info!(job_id = %job_id, "Job paused for approval");
                Ok(())
            }
            Err(failure) => Err(self.handle_pipeline_failure(&job, failure).await),
        }
    }

    /// Marks a running job completed and persists its result.
    pub async fn complete_job(
        &self,
        job_id: Uuid,
        result: serde_json::Value,
        quality_score: Option<f64>,
    ) -> Result<(), OrchestratorError> {
        self.apply_transition(
            job_id,
            JobAction::Complete,
            JobUpdate::completed(result, quality_score),
        )
        .await?;
        info!(job_id = %job_id, "Job completed");
        Ok(())
    }

    /// Marks a pending or running job failed with classified error fields.
    pub async fn fail_job(
        &self,
        job_id: Uuid,
        phase: &str,
        classified: &ClassifiedError,
    ) -> Result<(), OrchestratorError> {
        self.apply_transition(
            job_id,
            JobAction::Fail,
            JobUpdate::failed(
                phase,
                classified.code.clone(),
                classified.user_message.clone(),
                classified.raw_detail.clone(),
                classified.integration_gateway_url.clone(),
            ),
        )
        .await?;
        info!(job_id = %job_id, code = %classified.code, phase = phase, "Job failed");
        Ok(())
    }

    /// Pauses a running job for human approval.
    pub async fn await_approval(&self, job_id: Uuid) -> Result<(), OrchestratorError> {
        self.apply_transition(job_id, JobAction::AwaitApproval, JobUpdate::default())
            .await?;
        info!(job_id = %job_id, "Job awaiting approval");
        Ok(())
    }

    /// Records who approved the job and when.
    ///
    /// Not a state transition; resumption checks these fields.
    pub async fn record_approval(
        &self,
        job_id: Uuid,
        approved_by: &str,
    ) -> Result<(), OrchestratorError> {
        // Existence check so an unknown id is NotFound, not a silent no-op.
        self.load_job(job_id).await?;
        self.store
            .update_job(job_id, &JobUpdate::approval(approved_by))
            .await?;
        info!(job_id = %job_id, approved_by = approved_by, "Approval recorded");
        Ok(())
    }

    /// Resumes an approved job and continues its pipeline in the background.
    ///
    /// The continuation runs as a detached task with its own error boundary:
    /// a failure there still lands in `fail_job`, it just cannot be returned
    /// to this caller anymore.
    pub async fn resume_approved_job(self: &Arc<Self>, job_id: Uuid) -> Result<(), OrchestratorError> {
        let mut job = self.load_job(job_id).await?;

        if !job.has_approval() {
            return Err(OrchestratorError::InvalidStateTransition {
                job_id,
                current_state: job.state,
                attempted_action: JobAction::Resume,
            });
        }

        self.apply_transition(job_id, JobAction::Resume, JobUpdate::default())
            .await?;
        job.state = JobState::Running;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.metrics.inc_jobs_in_flight();
            let outcome = this.resume_pipeline(&job).await;
            this.metrics.dec_jobs_in_flight();

            if let Err(failure) = outcome {
                let error = this.handle_pipeline_failure(&job, failure).await;
                error!(
                    job_id = %job.id,
                    error = %error,
                    "Resumed pipeline failed"
                );
            } else {
                info!(job_id = %job.id, "Resumed pipeline finished");
            }
        });

        Ok(())
    }

    /// Runs an agent once without creating a job.
    ///
    /// Resolution and execution only; no planning, reflection, validation or
    /// persistence. Errors propagate unclassified since nothing is stored.
    pub async fn execute_agent(
        &self,
        user_id: Uuid,
        job_type: JobType,
        payload: serde_json::Value,
    ) -> Result<Artifact, OrchestratorError> {
        let agent = self.agent_for(job_type)?;
        let provider_override = payload.get("provider").and_then(|v| v.as_str());
        let model_override = payload.get("model").and_then(|v| v.as_str());
        let resolved = self
            .resolve_ai(user_id, provider_override, model_override)
            .await?;

        let mut ctx = AgentContext::new(
            Uuid::new_v4(),
            user_id,
            job_type,
            payload,
            resolved,
            self.ai.clone(),
        );
        if let Some(kind) = agent.playbook().required_integration {
            let connection = self.integrations.connection_for(user_id, kind).await?;
            ctx = ctx.with_integration(connection);
        }

        match &ctx.integration {
            Some(connection) => agent.execute_with_tools(connection, None, &ctx).await,
            None => agent.execute(&ctx).await,
        }
    }

    // ---- pipeline ----------------------------------------------------------

    /// Steps 2-8 of a fresh start: setup, plan, then the tail of the pipeline
    /// (or the approval pause).
    async fn run_pipeline(&self, job: &Job) -> Result<PipelineOutcome, PhaseFailure> {
        let (agent, ctx) = self.setup(job).await?;
        let playbook = agent.playbook();

        let plan = if playbook.requires_planning {
            Some(self.plan_phase(job, agent.as_ref(), &ctx).await?)
        } else {
            None
        };

        if job.requires_approval && !job.has_approval() {
            self.apply_transition(job.id, JobAction::AwaitApproval, JobUpdate::default())
                .await
                .map_err(|e| PhaseFailure::new(PHASE_SETUP, e))?;
            self.trace_best_effort(
                job.id,
                TraceEvent::Stage {
                    name: "await_approval".to_string(),
                    detail: "pipeline paused for human approval".to_string(),
                },
            )
            .await;
            self.flush_best_effort(job.id).await;
            return Ok(PipelineOutcome::AwaitingApproval);
        }

        self.finish_pipeline(job, agent, ctx, plan).await?;
        Ok(PipelineOutcome::Completed)
    }

    /// Continuation after approval: setup again (credentials are never
    /// persisted), reload the stored plan, then run the pipeline tail.
    async fn resume_pipeline(&self, job: &Job) -> Result<(), PhaseFailure> {
        let (agent, ctx) = self.setup(job).await?;
        let plan = self
            .store
            .get_plan(job.id)
            .await
            .map_err(|e| PhaseFailure::new(PHASE_SETUP, e.into()))?;

        self.finish_pipeline(job, agent, ctx, plan).await
    }

    /// Resolves the agent, the AI backend and any required integration.
    async fn setup(
        &self,
        job: &Job,
    ) -> Result<(Arc<dyn Agent>, AgentContext), PhaseFailure> {
        let fatal = |e| PhaseFailure::new(PHASE_SETUP, e);

        let agent = self.agent_for(job.job_type).map_err(fatal)?;

        let resolved = self
            .resolve_ai(job.user_id, job.provider_override(), job.model_override())
            .await
            .map_err(fatal)?;

        // Diagnostic write; the pipeline runs fine without it.
        let resolution = resolved.resolution();
        if let Err(e) = self
            .store
            .update_job(
                job.id,
                &JobUpdate::ai_resolution(
                    resolution.provider.as_str(),
                    resolution.model.clone(),
                    resolution.key_source.as_str(),
                    resolution.fallback_reason.as_str(),
                ),
            )
            .await
        {
            warn!(job_id = %job.id, error = %e, "Could not persist AI resolution");
        }

        let mut ctx = AgentContext::new(
            job.id,
            job.user_id,
            job.job_type,
            job.payload.clone(),
            resolved,
            self.ai.clone(),
        );

        if let Some(kind) = agent.playbook().required_integration {
            let connection = self
                .integrations
                .connection_for(job.user_id, kind)
                .await
                .map_err(fatal)?;
            self.trace_best_effort(
                job.id,
                TraceEvent::Tool {
                    integration: kind.as_str().to_string(),
                    endpoint: crate::integrations::redact_endpoint(&connection.endpoint),
                },
            )
            .await;
            ctx = ctx.with_integration(connection);
        }

        Ok((agent, ctx))
    }

    /// Plan phase. Planner failures, structurally invalid plans and plan
    /// persistence failures all abort the job.
    async fn plan_phase(
        &self,
        job: &Job,
        agent: &dyn Agent,
        ctx: &AgentContext,
    ) -> Result<Plan, PhaseFailure> {
        let fatal = |e| PhaseFailure::new(AuditPhase::Plan.as_str(), e);

        self.trace_best_effort(
            job.id,
            TraceEvent::Stage {
                name: AuditPhase::Plan.as_str().to_string(),
                detail: format!("planning with {}", agent.name()),
            },
        )
        .await;

        let draft = agent.plan(self.ai.planner(), ctx).await.map_err(fatal)?;
        let plan = draft
            .into_plan(job.id)
            .map_err(|e| fatal(OrchestratorError::AiProvider(e)))?;

        self.store
            .upsert_plan(&plan)
            .await
            .map_err(|e| fatal(e.into()))?;

        self.trace_best_effort(
            job.id,
            TraceEvent::Plan {
                steps: plan.steps.len(),
                rationale: plan.rationale.clone(),
            },
        )
        .await;
        self.audit_best_effort(
            job.id,
            AuditPhase::Plan,
            json!({ "steps": plan.steps, "rationale": plan.rationale }),
        )
        .await;

        Ok(plan)
    }

    /// Pipeline tail shared by fresh starts and approval resumptions:
    /// execute, reflect, validate, flush, complete.
    async fn finish_pipeline(
        &self,
        job: &Job,
        agent: Arc<dyn Agent>,
        ctx: AgentContext,
        plan: Option<Plan>,
    ) -> Result<(), PhaseFailure> {
        let playbook = agent.playbook();

        // Execute: the only phase that must produce something.
        self.trace_best_effort(
            job.id,
            TraceEvent::Stage {
                name: AuditPhase::Execute.as_str().to_string(),
                detail: format!("executing {}", agent.name()),
            },
        )
        .await;

        let mut artifact = match &ctx.integration {
            Some(connection) => agent.execute_with_tools(connection, plan.as_ref(), &ctx).await,
            None => agent.execute(&ctx).await,
        }
        .map_err(|e| PhaseFailure::new(AuditPhase::Execute.as_str(), e))?;

        self.trace_best_effort(
            job.id,
            TraceEvent::Artifact {
                summary: artifact.summary.clone(),
                files: artifact.files.len(),
            },
        )
        .await;
        self.audit_best_effort(
            job.id,
            AuditPhase::Execute,
            json!({ "summary": artifact.summary, "files": artifact.files.len() }),
        )
        .await;

        // Reflect: advisory. Any failure leaves the artifact untouched.
        if playbook.requires_reflection {
            match self.reflect_phase(job, agent.as_ref(), &ctx, &artifact).await {
                Ok(Some(revised)) => {
                    debug!(job_id = %job.id, "Reflection revised the artifact");
                    artifact = revised;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        job_id = %job.id,
                        error = %e,
                        "Reflection failed; continuing with unmodified artifact"
                    );
                }
            }
        }

        // Validate: advisory. Verdicts and errors both become diagnostics.
        let mut result = artifact.to_value();
        let mut quality_score = None;
        if job.requires_strict_validation {
            let diagnostic = match self.ai.validate_with_strong_model(&ctx, &artifact).await {
                Ok(verdict) => {
                    quality_score = Some(verdict.score);
                    self.metrics.record_validation_score(verdict.score);
                    if verdict.passed {
                        None
                    } else {
                        Some(json!({
                            "passed": false,
                            "score": verdict.score,
                            "detail": verdict.detail,
                        }))
                    }
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Strict validation raised");
                    Some(json!({ "error": e.to_string() }))
                }
            };
            if let Some(diagnostic) = diagnostic {
                if let Some(map) = result.as_object_mut() {
                    map.insert("validation_failure".to_string(), diagnostic);
                }
            }
            self.audit_best_effort(
                job.id,
                AuditPhase::Validate,
                json!({ "quality_score": quality_score }),
            )
            .await;
        }

        // Finalize: diagnostics first (best-effort), then the terminal write.
        if let Some(snapshot) = self.metrics.take_snapshot(job.id) {
            self.trace_best_effort(
                job.id,
                TraceEvent::Log {
                    message: "ai usage".to_string(),
                    payload: serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null),
                },
            )
            .await;
        }
        self.flush_best_effort(job.id).await;

        self.complete_job(job.id, result, quality_score)
            .await
            .map_err(|e| PhaseFailure::new(PHASE_FINALIZE, e))?;

        let duration_secs = job
            .started_at
            .map(|at| (Utc::now() - at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        self.metrics
            .record_job_finished(JobState::Completed.as_str(), job.job_type, duration_secs);

        Ok(())
    }

    /// Runs the checks (best-effort) and the reflector, returning a revised
    /// artifact when the critique produced one.
    async fn reflect_phase(
        &self,
        job: &Job,
        agent: &dyn Agent,
        ctx: &AgentContext,
        artifact: &Artifact,
    ) -> Result<Option<Artifact>, OrchestratorError> {
        self.trace_best_effort(
            job.id,
            TraceEvent::Stage {
                name: AuditPhase::Reflect.as_str().to_string(),
                detail: format!("reflecting with {}", agent.name()),
            },
        )
        .await;

        let checks = match self.checks.run_checks(artifact).await {
            Ok(reports) => Some(reports),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Static checks failed; reflecting without them");
                None
            }
        };

        let critique = agent
            .reflect(self.ai.reflector(), artifact, checks.as_deref(), ctx)
            .await?;

        self.audit_best_effort(
            job.id,
            AuditPhase::Reflect,
            json!({
                "summary": critique.summary,
                "issues": critique.issues,
                "revised": critique.revised_artifact.is_some(),
            }),
        )
        .await;

        Ok(critique.revised_artifact)
    }

    /// One top-level failure boundary per job run.
    ///
    /// Classifies, trace-records, persists metrics and attempts `fail_job`;
    /// a failure inside `fail_job` is logged and swallowed so it never masks
    /// the root cause, which is returned for the caller.
    async fn handle_pipeline_failure(
        &self,
        job: &Job,
        failure: PhaseFailure,
    ) -> OrchestratorError {
        let PhaseFailure { phase, error } = failure;
        let classified = classify(&error);

        error!(
            job_id = %job.id,
            phase = phase,
            code = %classified.code,
            error = %error,
            "Job pipeline failed"
        );

        self.trace_best_effort(
            job.id,
            TraceEvent::Error {
                code: classified.code.clone(),
                message: classified.user_message.clone(),
            },
        )
        .await;
        self.flush_best_effort(job.id).await;

        self.metrics.record_job_failure(&classified.code, phase);
        let duration_secs = job
            .started_at
            .map(|at| (Utc::now() - at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        self.metrics
            .record_job_finished(JobState::Failed.as_str(), job.job_type, duration_secs);

        if let Err(fail_error) = self.fail_job(job.id, phase, &classified).await {
            error!(
                job_id = %job.id,
                error = %fail_error,
                "Could not persist job failure; surfacing the original error"
            );
        }

        error
    }

    // ---- resolution --------------------------------------------------------

    /// Builds the resolver snapshot from the stores and runs resolution.
    async fn resolve_ai(
        &self,
        user_id: Uuid,
        provider_override: Option<&str>,
        model_override: Option<&str>,
    ) -> Result<ResolvedAi, OrchestratorError> {
        let mut snapshot = ResolverSnapshot::new(self.config.default_provider);
        snapshot.env_keys = self.env_keys.clone();

        if let Some(name) = provider_override {
            let provider =
                name.parse::<Provider>()
                    .map_err(|_| OrchestratorError::MissingDependency {
                        dependency: format!("provider '{name}'"),
                        hint: "Use one of: openai, anthropic, openrouter, google".to_string(),
                    })?;
            snapshot.provider_override = Some(provider);
        }
        if let Some(model) = model_override {
            snapshot.model_override = Some(model.to_string());
        }

        snapshot.user_preference = self.credentials.active_provider_for(user_id).await;

        let providers = [
            Provider::OpenAi,
            Provider::Anthropic,
            Provider::OpenRouter,
            Provider::Google,
        ];
        let lookups = join_all(
            providers
                .iter()
                .map(|&provider| self.credentials.credential_for(user_id, provider)),
        )
        .await;
        for (provider, key) in providers.into_iter().zip(lookups) {
            if let Some(key) = key {
                snapshot.user_keys.insert(provider, key);
            }
        }

        resolve(&snapshot)
    }

    fn agent_for(&self, job_type: JobType) -> Result<Arc<dyn Agent>, OrchestratorError> {
        self.registry
            .get(job_type)
            .ok_or_else(|| OrchestratorError::MissingDependency {
                dependency: format!("agent for job type '{job_type}'"),
                hint: "Register an agent for this job type in the registry".to_string(),
            })
    }

    // ---- state machine cache ----------------------------------------------

    fn cache_machine(&self, machine: StateMachine) {
        let mut machines = self.machines.lock().expect("lock not poisoned");
        machines.insert(machine.job_id(), machine);
    }

    fn evict_machine(&self, job_id: Uuid) {
        let mut machines = self.machines.lock().expect("lock not poisoned");
        machines.remove(&job_id);
    }

    /// Returns the cached machine, reconstructing from the store on a miss.
    async fn machine_for(&self, job_id: Uuid) -> Result<StateMachine, OrchestratorError> {
        {
            let machines = self.machines.lock().expect("lock not poisoned");
            if let Some(machine) = machines.get(&job_id) {
                return Ok(machine.clone());
            }
        }

        let job = self.load_job(job_id).await?;
        let machine = StateMachine::new(job.id, job.state);
        self.cache_machine(machine.clone());
        debug!(job_id = %job_id, state = %job.state, "Reconstructed state machine from store");
        Ok(machine)
    }

    /// Applies one transition and persists it atomically from the cache's
    /// point of view: on a persistence failure the cache entry is evicted so
    /// the next operation reconstructs from the store.
    async fn apply_transition(
        &self,
        job_id: Uuid,
        action: JobAction,
        mut update: JobUpdate,
    ) -> Result<JobState, OrchestratorError> {
        let mut machine = self.machine_for(job_id).await?;
        let next = machine.apply(action)?;
        update.state = Some(next);

        match self.store.update_job(job_id, &update).await {
            Ok(()) => {
                self.cache_machine(machine);
                Ok(next)
            }
            Err(e) => {
                self.evict_machine(job_id);
                Err(e.into())
            }
        }
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Job, OrchestratorError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(OrchestratorError::NotFound { job_id })
    }

    // ---- best-effort diagnostics -------------------------------------------

    async fn trace_best_effort(&self, job_id: Uuid, event: TraceEvent) {
        if let Err(e) = self.trace.record(job_id, event).await {
            warn!(job_id = %job_id, error = %e, "Could not record trace event");
        }
    }

    async fn flush_best_effort(&self, job_id: Uuid) {
        if let Err(e) = self.trace.flush(job_id).await {
            warn!(job_id = %job_id, error = %e, "Could not flush job trace");
        }
    }

    async fn audit_best_effort(&self, job_id: Uuid, phase: AuditPhase, payload: serde_json::Value) {
        let entry = AuditEntry::new(job_id, phase, payload);
        if let Err(e) = self.store.append_audit(&entry).await {
            warn!(job_id = %job_id, phase = %phase, error = %e, "Could not append audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_orchestrator() -> Arc<Orchestrator> {
        Orchestrator::builder(EngineConfig::default())
            .with_env_keys(HashMap::from([(Provider::OpenAi, ApiKey::new("sk-env"))]))
            .build()
    }

    #[tokio::test]
    async fn test_submit_creates_pending_job() {
        let orchestrator = test_orchestrator();
        let user = Uuid::new_v4();

        let job_id = orchestrator
            .submit_job(
                user,
                JobType::Scaffold,
                json!({ "name": "widget" }),
                SubmitOptions::new().with_strict_validation(),
            )
            .await
            .expect("submit should succeed");

        let job = orchestrator.load_job(job_id).await.expect("job exists");
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.user_id, user);
        assert!(job.requires_strict_validation);
        assert!(!job.requires_approval);
    }

    #[tokio::test]
    async fn test_start_unknown_job_is_not_found() {
        let orchestrator = test_orchestrator();

        let err = orchestrator
            .start_job(Uuid::new_v4())
            .await
            .expect_err("start should fail");
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_complete_requires_running_state() {
        let orchestrator = test_orchestrator();
        let job_id = orchestrator
            .submit_job(
                Uuid::new_v4(),
                JobType::Scaffold,
                json!({}),
                SubmitOptions::new(),
            )
            .await
            .expect("submit should succeed");

        let err = orchestrator
            .complete_job(job_id, json!({}), None)
            .await
            .expect_err("complete from pending should fail");
        assert!(matches!(
            err,
            OrchestratorError::InvalidStateTransition {
                current_state: JobState::Pending,
                attempted_action: JobAction::Complete,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fail_job_from_pending_persists_error_fields() {
        let orchestrator = test_orchestrator();
        let job_id = orchestrator
            .submit_job(
                Uuid::new_v4(),
                JobType::Documentation,
                json!({}),
                SubmitOptions::new(),
            )
            .await
            .expect("submit should succeed");

        let classified = classify(&OrchestratorError::MissingDependency {
            dependency: "openai API key".to_string(),
            hint: "connect a credential".to_string(),
        });
        orchestrator
            .fail_job(job_id, PHASE_SETUP, &classified)
            .await
            .expect("fail should succeed");

        let job = orchestrator.load_job(job_id).await.expect("job exists");
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error_code.as_deref(), Some("MISSING_DEPENDENCY"));
        assert_eq!(job.failed_phase.as_deref(), Some("setup"));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_machine_cache_reconstructs_after_eviction() {
        let orchestrator = test_orchestrator();
        let job_id = orchestrator
            .submit_job(
                Uuid::new_v4(),
                JobType::Scaffold,
                json!({}),
                SubmitOptions::new(),
            )
            .await
            .expect("submit should succeed");

        // Simulate a process restart losing the cache.
        orchestrator.evict_machine(job_id);

        let machine = orchestrator
            .machine_for(job_id)
            .await
            .expect("machine reconstructs from store");
        assert_eq!(machine.current(), JobState::Pending);
    }

    #[tokio::test]
    async fn test_resolve_ai_rejects_unknown_provider_name() {
        let orchestrator = test_orchestrator();

        let err = orchestrator
            .resolve_ai(Uuid::new_v4(), Some("cohere"), None)
            .await
            .expect_err("resolution should fail");
        match err {
            OrchestratorError::MissingDependency { dependency, .. } => {
                assert!(dependency.contains("cohere"));
            }
            other => panic!("expected MissingDependency, got {other:?}"),
        }
    }
}
