//! End-to-end tests for the orchestration engine.
//!
//! Runs the full orchestrator against the in-memory job store with a
//! scripted AI service, exercising the lifecycle surface, the fail-closed
//! resolution rules, the fatal-vs-advisory phase discipline and the
//! approval pause/resume flow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use taskforge::agent::{AgentContext, Artifact, Critique};
use taskforge::ai::{
    AiService, DraftPlan, DraftStep, Planner, Reflector, ValidationVerdict,
};
use taskforge::checks::CheckReport;
use taskforge::config::EngineConfig;
use taskforge::credentials::{ApiKey, StaticCredentials};
use taskforge::error::{AiProviderError, OrchestratorError};
use taskforge::integrations::{EnvIntegrationGateway, IntegrationKind};
use taskforge::job::{AuditPhase, JobAction, JobState, JobType};
use taskforge::orchestrator::{Orchestrator, SubmitOptions};
use taskforge::resolver::Provider;
use taskforge::storage::{JobStore, MemoryJobStore};
use taskforge::trace::MemoryTraceRecorder;

/// How the scripted validation pass behaves.
#[derive(Clone)]
enum ValidateScript {
    Pass(f64),
    Fail(f64, &'static str),
    Raise,
}

/// AI service double with per-phase scripted outcomes and a call log.
struct ScriptedAi {
    plan_error: Option<String>,
    generate_error: Option<String>,
    reflect_error: bool,
    validate: ValidateScript,
    calls: Mutex<Vec<&'static str>>,
}

impl Default for ScriptedAi {
    fn default() -> Self {
        Self {
            plan_error: None,
            generate_error: None,
            reflect_error: false,
            validate: ValidateScript::Pass(0.9),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedAi {
    fn log(&self, call: &'static str) {
        self.calls.lock().expect("lock not poisoned").push(call);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("lock not poisoned").clone()
    }
}

#[async_trait]
impl Planner for ScriptedAi {
    async fn draft_plan(&self, _ctx: &AgentContext) -> Result<DraftPlan, AiProviderError> {
        self.log("plan");
        if let Some(detail) = &self.plan_error {
            return Err(AiProviderError::Provider {
                provider: "scripted".to_string(),
                detail: detail.clone(),
            });
        }
        Ok(DraftPlan {
            steps: vec![
                DraftStep {
                    title: "Survey the request".to_string(),
                    detail: String::new(),
                },
                DraftStep {
                    title: "Produce the artifact".to_string(),
                    detail: String::new(),
                },
            ],
            rationale: "two passes".to_string(),
        })
    }
}

#[async_trait]
impl Reflector for ScriptedAi {
    async fn critique(
        &self,
        _ctx: &AgentContext,
        _artifact: &Artifact,
        _checks: Option<&[CheckReport]>,
    ) -> Result<Critique, AiProviderError> {
        self.log("reflect");
        if self.reflect_error {
            return Err(AiProviderError::Network {
                detail: "reflector unreachable".to_string(),
            });
        }
        Ok(Critique {
            summary: "acceptable".to_string(),
            issues: vec![],
            revised_artifact: None,
        })
    }
}

#[async_trait]
impl AiService for ScriptedAi {
    fn planner(&self) -> &dyn Planner {
        self
    }

    fn reflector(&self) -> &dyn Reflector {
        self
    }

    async fn generate_work_artifact(
        &self,
        ctx: &AgentContext,
        _instruction: &str,
    ) -> Result<Artifact, AiProviderError> {
        self.log("generate");
        if let Some(detail) = &self.generate_error {
            return Err(AiProviderError::Provider {
                provider: "scripted".to_string(),
                detail: detail.clone(),
            });
        }
        Ok(Artifact::new(ctx.job_type, "scripted artifact")
            .with_file("out/result.md", "# Result"))
    }

    async fn validate_with_strong_model(
        &self,
        _ctx: &AgentContext,
        _artifact: &Artifact,
    ) -> Result<ValidationVerdict, AiProviderError> {
        self.log("validate");
        match &self.validate {
            ValidateScript::Pass(score) => Ok(ValidationVerdict {
                passed: true,
                score: *score,
                detail: String::new(),
            }),
            ValidateScript::Fail(score, detail) => Ok(ValidationVerdict {
                passed: false,
                score: *score,
                detail: detail.to_string(),
            }),
            ValidateScript::Raise => Err(AiProviderError::InvalidResponse {
                detail: "validator returned garbage".to_string(),
            }),
        }
    }
}

/// Fully wired engine over in-memory collaborators.
struct Harness {
    orchestrator: Arc<Orchestrator>,
    store: Arc<MemoryJobStore>,
    trace: Arc<MemoryTraceRecorder>,
    ai: Arc<ScriptedAi>,
    user_id: Uuid,
}

impl Harness {
    /// Engine with an openai environment default and a matching env key.
    fn new(ai: ScriptedAi) -> Self {
        Self::with_config(ai, EngineConfig::new(), HashMap::new())
    }

    fn with_config(
        ai: ScriptedAi,
        config: EngineConfig,
        user_keys: HashMap<Provider, ApiKey>,
    ) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let trace = Arc::new(MemoryTraceRecorder::new());
        let ai = Arc::new(ai);
        let user_id = Uuid::new_v4();

        let mut credentials = StaticCredentials::new();
        for (provider, key) in user_keys {
            credentials = credentials.with_key(user_id, provider, key);
        }

        let orchestrator = Orchestrator::builder(config)
            .with_store(store.clone())
            .with_trace(trace.clone())
            .with_ai(ai.clone())
            .with_credentials(Arc::new(credentials))
            .with_env_keys(HashMap::from([(
                Provider::OpenAi,
                ApiKey::new("sk-env-openai"),
            )]))
            .with_integrations(Arc::new(
                EnvIntegrationGateway::new()
                    .with_token(IntegrationKind::Github, ApiKey::new("ghp-test")),
            ))
            .build();

        Self {
            orchestrator,
            store,
            trace,
            ai,
            user_id,
        }
    }

    async fn submit(&self, job_type: JobType, options: SubmitOptions) -> Uuid {
        self.orchestrator
            .submit_job(self.user_id, job_type, json!({}), options)
            .await
            .expect("submit should succeed")
    }

    async fn job_state(&self, job_id: Uuid) -> JobState {
        self.store
            .get_job(job_id)
            .await
            .expect("store should answer")
            .expect("job should exist")
            .state
    }

    async fn wait_for_terminal(&self, job_id: Uuid) -> JobState {
        for _ in 0..200 {
            let state = self.job_state(job_id).await;
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached a terminal state");
    }
}

#[tokio::test]
async fn scaffold_job_runs_plan_and_execute_to_completion() {
    let harness = Harness::new(ScriptedAi::default());
    let job_id = harness
        .submit(JobType::Scaffold, SubmitOptions::new())
        .await;

    harness
        .orchestrator
        .start_job(job_id)
        .await
        .expect("pipeline should complete");

    let job = harness
        .store
        .get_job(job_id)
        .await
        .unwrap()
        .expect("job exists");
    assert_eq!(job.state, JobState::Completed);
    assert!(job.result.is_some());
    assert!(job.error_code.is_none());
    // Resolution diagnostics were persisted onto the job.
    assert_eq!(job.ai_provider.as_deref(), Some("openai"));
    assert_eq!(job.ai_key_source.as_deref(), Some("env"));
    assert_eq!(
        job.ai_fallback_reason.as_deref(),
        Some("environment_default_env_key")
    );
    // Scaffold playbook: plan then execute, no reflection, no validation.
    assert_eq!(harness.ai.calls(), vec!["plan", "generate"]);

    let plan = harness
        .store
        .get_plan(job_id)
        .await
        .unwrap()
        .expect("plan persisted");
    assert_eq!(plan.steps.len(), 2);

    // Trace was flushed at least once during finalization.
    assert!(harness.trace.flush_count(job_id) >= 1);
}

#[tokio::test]
async fn starting_twice_raises_invalid_transition() {
    let harness = Harness::new(ScriptedAi::default());
    let job_id = harness
        .submit(JobType::Scaffold, SubmitOptions::new())
        .await;

    harness.orchestrator.start_job(job_id).await.unwrap();

    let err = harness
        .orchestrator
        .start_job(job_id)
        .await
        .expect_err("second start must fail");
    match err {
        OrchestratorError::InvalidStateTransition {
            current_state,
            attempted_action,
            ..
        } => {
            assert_eq!(current_state, JobState::Completed);
            assert_eq!(attempted_action, JobAction::Start);
        }
        other => panic!("expected InvalidStateTransition, got {other:?}"),
    }

    // Misuse does not disturb the completed job.
    let job = harness.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.error_code.is_none());
}

#[tokio::test]
async fn explicit_override_without_credential_fails_closed() {
    // Environment default is openrouter (with an env key for openai absent);
    // the payload demands openai, for which no credential exists. The job
    // must fail naming openai, never borrowing another provider's key.
    let ai = ScriptedAi::default();
    let store = Arc::new(MemoryJobStore::new());
    let user_id = Uuid::new_v4();
    let orchestrator = Orchestrator::builder(
        EngineConfig::new().with_default_provider(Provider::OpenRouter),
    )
    .with_store(store.clone())
    .with_ai(Arc::new(ai))
    .with_env_keys(HashMap::from([(
        Provider::OpenRouter,
        ApiKey::new("sk-env-openrouter"),
    )]))
    .build();

    let job_id = orchestrator
        .submit_job(
            user_id,
            JobType::Scaffold,
            json!({ "provider": "openai" }),
            SubmitOptions::new(),
        )
        .await
        .unwrap();

    let err = orchestrator
        .start_job(job_id)
        .await
        .expect_err("resolution must fail closed");
    match err {
        OrchestratorError::MissingDependency { dependency, .. } => {
            assert!(dependency.contains("openai"), "got: {dependency}");
        }
        other => panic!("expected MissingDependency, got {other:?}"),
    }

    let job = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error_code.as_deref(), Some("MISSING_DEPENDENCY"));
    assert_eq!(job.failed_phase.as_deref(), Some("setup"));
    assert!(job.result.is_none());
}

#[tokio::test]
async fn reflection_failure_never_fails_the_job() {
    let harness = Harness::new(ScriptedAi {
        reflect_error: true,
        ..Default::default()
    });
    // Documentation playbook reflects after execution.
    let job_id = harness
        .submit(JobType::Documentation, SubmitOptions::new())
        .await;

    harness
        .orchestrator
        .start_job(job_id)
        .await
        .expect("reflection failure is advisory");

    let job = harness.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.result.is_some());
    assert!(harness.ai.calls().contains(&"reflect"));
}

#[tokio::test]
async fn failed_validation_is_embedded_not_fatal() {
    let harness = Harness::new(ScriptedAi {
        validate: ValidateScript::Fail(0.3, "incomplete coverage"),
        ..Default::default()
    });
    let job_id = harness
        .submit(
            JobType::Scaffold,
            SubmitOptions::new().with_strict_validation(),
        )
        .await;

    harness.orchestrator.start_job(job_id).await.unwrap();

    let job = harness.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.quality_score, Some(0.3));

    let result = job.result.expect("result present");
    assert_eq!(result["validation_failure"]["passed"], false);
    assert_eq!(result["validation_failure"]["detail"], "incomplete coverage");
}

#[tokio::test]
async fn raised_validation_is_embedded_not_fatal() {
    let harness = Harness::new(ScriptedAi {
        validate: ValidateScript::Raise,
        ..Default::default()
    });
    let job_id = harness
        .submit(
            JobType::Scaffold,
            SubmitOptions::new().with_strict_validation(),
        )
        .await;

    harness.orchestrator.start_job(job_id).await.unwrap();

    let job = harness.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    // The verdict never arrived, so no score was recorded.
    assert!(job.quality_score.is_none());
    let result = job.result.expect("result present");
    assert!(result["validation_failure"]["error"]
        .as_str()
        .expect("error embedded")
        .contains("garbage"));
}

#[tokio::test]
async fn planner_failure_is_fatal_and_leaves_no_artifacts() {
    let harness = Harness::new(ScriptedAi {
        plan_error: Some("model melted".to_string()),
        ..Default::default()
    });
    let job_id = harness
        .submit(JobType::Scaffold, SubmitOptions::new())
        .await;

    let err = harness
        .orchestrator
        .start_job(job_id)
        .await
        .expect_err("planning failure is fatal");
    assert!(matches!(err, OrchestratorError::AiProvider(_)));

    let job = harness.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failed_phase.as_deref(), Some("plan"));
    assert_eq!(job.error_code.as_deref(), Some("AI_PROVIDER_ERROR"));
    assert!(job.result.is_none());

    // No plan, no execute call, no execute audit entry.
    assert!(harness.store.get_plan(job_id).await.unwrap().is_none());
    assert_eq!(harness.ai.calls(), vec!["plan"]);
    let audit = harness.store.list_audit(job_id).await.unwrap();
    assert!(audit
        .iter()
        .all(|entry| entry.phase != AuditPhase::Execute));
}

#[tokio::test]
async fn oversized_error_detail_is_capped_with_marker() {
    let harness = Harness::new(ScriptedAi {
        generate_error: Some("x".repeat(1500)),
        ..Default::default()
    });
    let job_id = harness
        .submit(JobType::Scaffold, SubmitOptions::new())
        .await;

    harness
        .orchestrator
        .start_job(job_id)
        .await
        .expect_err("generation failure is fatal");

    let job = harness.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failed_phase.as_deref(), Some("execute"));

    let detail = job.error_detail.expect("detail persisted");
    assert_eq!(detail.chars().count(), 1000);
    assert!(detail.ends_with("... [truncated]"));

    let message = job.error_message.expect("message persisted");
    assert!(message.chars().count() <= 500);
}

#[tokio::test]
async fn approval_pause_and_resume_scenario() {
    let harness = Harness::new(ScriptedAi::default());
    let job_id = harness
        .submit(JobType::Scaffold, SubmitOptions::new().with_approval())
        .await;

    // Start runs the plan phase, then pauses.
    harness.orchestrator.start_job(job_id).await.unwrap();
    assert_eq!(harness.job_state(job_id).await, JobState::AwaitingApproval);
    assert!(harness.store.get_plan(job_id).await.unwrap().is_some());
    assert_eq!(harness.ai.calls(), vec!["plan"]);

    // Resuming without a recorded approver is a transition misuse.
    let err = harness
        .orchestrator
        .resume_approved_job(job_id)
        .await
        .expect_err("resume without approver must fail");
    match err {
        OrchestratorError::InvalidStateTransition {
            current_state,
            attempted_action,
            ..
        } => {
            assert_eq!(current_state, JobState::AwaitingApproval);
            assert_eq!(attempted_action, JobAction::Resume);
        }
        other => panic!("expected InvalidStateTransition, got {other:?}"),
    }
    assert_eq!(harness.job_state(job_id).await, JobState::AwaitingApproval);

    // With approver fields recorded, resume continues in the background.
    harness
        .orchestrator
        .record_approval(job_id, "reviewer@example.com")
        .await
        .unwrap();
    harness
        .orchestrator
        .resume_approved_job(job_id)
        .await
        .unwrap();

    assert_eq!(harness.wait_for_terminal(job_id).await, JobState::Completed);

    let job = harness.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.approved_by.as_deref(), Some("reviewer@example.com"));
    assert!(job.approved_at.is_some());
    assert!(job.result.is_some());
    // The continuation executed exactly once after the resume.
    assert_eq!(harness.ai.calls(), vec!["plan", "generate"]);
}

#[tokio::test]
async fn failing_resumed_continuation_routes_through_fail_job() {
    let harness = Harness::new(ScriptedAi {
        generate_error: Some("exploded after approval".to_string()),
        ..Default::default()
    });
    let job_id = harness
        .submit(JobType::Scaffold, SubmitOptions::new().with_approval())
        .await;

    harness.orchestrator.start_job(job_id).await.unwrap();
    harness
        .orchestrator
        .record_approval(job_id, "reviewer@example.com")
        .await
        .unwrap();
    harness
        .orchestrator
        .resume_approved_job(job_id)
        .await
        .unwrap();

    // The detached continuation's failure is not lost.
    assert_eq!(harness.wait_for_terminal(job_id).await, JobState::Failed);
    let job = harness.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.error_code.as_deref(), Some("AI_PROVIDER_ERROR"));
    assert_eq!(job.failed_phase.as_deref(), Some("execute"));
}

#[tokio::test]
async fn approved_before_start_skips_the_pause() {
    let harness = Harness::new(ScriptedAi::default());
    let job_id = harness
        .submit(JobType::Scaffold, SubmitOptions::new().with_approval())
        .await;

    harness
        .orchestrator
        .record_approval(job_id, "reviewer@example.com")
        .await
        .unwrap();
    harness.orchestrator.start_job(job_id).await.unwrap();

    assert_eq!(harness.job_state(job_id).await, JobState::Completed);
}

#[tokio::test]
async fn missing_integration_token_is_fatal_setup_failure() {
    // Documentation requires a connected GitHub integration; build an engine
    // whose gateway has no tokens at all.
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::builder(EngineConfig::new())
        .with_store(store.clone())
        .with_ai(Arc::new(ScriptedAi::default()))
        .with_env_keys(HashMap::from([(
            Provider::OpenAi,
            ApiKey::new("sk-env-openai"),
        )]))
        .with_integrations(Arc::new(EnvIntegrationGateway::new()))
        .build();

    let job_id = orchestrator
        .submit_job(
            Uuid::new_v4(),
            JobType::Documentation,
            json!({}),
            SubmitOptions::new(),
        )
        .await
        .unwrap();

    let err = orchestrator
        .start_job(job_id)
        .await
        .expect_err("missing integration is fatal");
    assert!(matches!(
        err,
        OrchestratorError::IntegrationNotConnected { .. }
    ));

    let job = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(
        job.error_code.as_deref(),
        Some("INTEGRATION_NOT_CONNECTED")
    );
}

#[tokio::test]
async fn user_key_beats_env_key_for_same_provider() {
    let harness = Harness::with_config(
        ScriptedAi::default(),
        EngineConfig::new(),
        HashMap::from([(Provider::OpenAi, ApiKey::new("sk-user-openai"))]),
    );
    let job_id = harness
        .submit(JobType::Scaffold, SubmitOptions::new())
        .await;

    harness.orchestrator.start_job(job_id).await.unwrap();

    let job = harness.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.ai_key_source.as_deref(), Some("user"));
    assert_eq!(
        job.ai_fallback_reason.as_deref(),
        Some("environment_default_user_key")
    );
}

#[tokio::test]
async fn execute_agent_is_ephemeral() {
    let harness = Harness::new(ScriptedAi::default());

    let artifact = harness
        .orchestrator
        .execute_agent(harness.user_id, JobType::Scaffold, json!({ "name": "w" }))
        .await
        .expect("one-off execution should succeed");

    assert_eq!(artifact.kind, JobType::Scaffold);
    assert_eq!(artifact.summary, "scripted artifact");
    // Nothing was persisted and no planning ran.
    assert_eq!(harness.store.job_count(), 0);
    assert_eq!(harness.ai.calls(), vec!["generate"]);
}

#[tokio::test]
async fn audit_entries_are_recorded_per_phase() {
    let harness = Harness::new(ScriptedAi::default());
    let job_id = harness
        .submit(
            JobType::Documentation,
            SubmitOptions::new().with_strict_validation(),
        )
        .await;

    harness.orchestrator.start_job(job_id).await.unwrap();

    let phases: Vec<AuditPhase> = harness
        .store
        .list_audit(job_id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.phase)
        .collect();
    assert_eq!(
        phases,
        vec![
            AuditPhase::Plan,
            AuditPhase::Execute,
            AuditPhase::Reflect,
            AuditPhase::Validate,
        ]
    );
}
