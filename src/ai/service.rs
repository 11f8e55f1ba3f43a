//! AI service surface used by the pipeline.
//!
//! Exposes the planner, reflector, work-artifact generation and the strong
//! validation pass behind one trait, and emits an observability event for
//! every AI call through an injected observer. The live implementation
//! drives the OpenAI-compatible client with the provider, model and
//! credential resolved for the job.

use crate::agent::{AgentContext, Artifact, ArtifactFile, Critique};
use crate::ai::client::{ChatMessage, ChatRequest, ProviderClient};
use crate::checks::CheckReport;
use crate::error::AiProviderError;
use crate::job::{Plan, PlanStep};
use crate::resolver::Provider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Maximum number of steps a structurally valid plan may carry.
const MAX_PLAN_STEPS: usize = 50;

/// Default sampling temperature for pipeline calls.
const DEFAULT_TEMPERATURE: f64 = 0.2;

/// Default token budget for generated artifacts.
const DEFAULT_MAX_TOKENS: u32 = 4000;

/// What a given AI call was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPurpose {
    Plan,
    Generate,
    Reflect,
    Validate,
}

impl CallPurpose {
    /// Returns the canonical string form used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPurpose::Plan => "plan",
            CallPurpose::Generate => "generate",
            CallPurpose::Reflect => "reflect",
            CallPurpose::Validate => "validate",
        }
    }
}

impl std::fmt::Display for CallPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observability event emitted once per AI call.
#[derive(Debug, Clone, Serialize)]
pub struct AiCallEvent {
    /// What the call was for.
    pub purpose: CallPurpose,
    /// Provider that served the call.
    pub provider: Provider,
    /// Model that served the call.
    pub model: String,
    /// Wall-clock duration of the call in milliseconds.
    pub duration_ms: u64,
    /// Prompt tokens consumed, when the provider reported usage.
    pub prompt_tokens: u32,
    /// Completion tokens consumed, when the provider reported usage.
    pub completion_tokens: u32,
    /// Whether the call succeeded.
    pub success: bool,
    /// Stable error code when the call failed.
    pub error_code: Option<String>,
}

/// Callback invoked synchronously after every AI call.
pub trait AiCallObserver: Send + Sync {
    /// Receives the event for one finished call.
    fn on_ai_call(&self, job_id: Uuid, event: AiCallEvent);
}

/// Observer that discards every event.
#[derive(Default)]
pub struct NoopObserver;

impl AiCallObserver for NoopObserver {
    fn on_ai_call(&self, _job_id: Uuid, _event: AiCallEvent) {}
}

/// A plan as returned by the planner, before structural validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftPlan {
    /// Proposed steps in execution order.
    pub steps: Vec<DraftStep>,
    /// Why the planner chose this approach.
    #[serde(default)]
    pub rationale: String,
}

/// A single proposed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftStep {
    /// Short imperative title.
    pub title: String,
    /// Longer description of what the step does.
    #[serde(default)]
    pub detail: String,
}

impl DraftPlan {
    /// Validates the draft's structure and converts it into a stored plan.
    ///
    /// A draft with no steps, an empty step title, or more steps than
    /// [`MAX_PLAN_STEPS`] is an unusable planner response.
    pub fn into_plan(self, job_id: Uuid) -> Result<Plan, AiProviderError> {
        if self.steps.is_empty() {
            return Err(AiProviderError::InvalidResponse {
                detail: "planner returned a plan with no steps".to_string(),
            });
        }
        if self.steps.len() > MAX_PLAN_STEPS {
            return Err(AiProviderError::InvalidResponse {
                detail: format!(
                    "planner returned {} steps, limit is {MAX_PLAN_STEPS}",
                    self.steps.len()
                ),
            });
        }
        let mut steps = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.into_iter().enumerate() {
            if step.title.trim().is_empty() {
                return Err(AiProviderError::InvalidResponse {
                    detail: format!("planner step {index} has an empty title"),
                });
            }
            steps.push(PlanStep {
                index: index as u32,
                title: step.title,
                detail: step.detail,
            });
        }
        Ok(Plan::new(job_id, steps, self.rationale))
    }
}

/// Verdict of the strong-model validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Whether the artifact passed validation.
    pub passed: bool,
    /// Quality score in `[0.0, 1.0]`.
    pub score: f64,
    /// Human-readable explanation of the verdict.
    #[serde(default)]
    pub detail: String,
}

/// Planning contract handed to agents.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produces a draft plan for the job in `ctx`.
    async fn draft_plan(&self, ctx: &AgentContext) -> Result<DraftPlan, AiProviderError>;
}

/// Reflection contract handed to agents.
#[async_trait]
pub trait Reflector: Send + Sync {
    /// Critiques an execution artifact, optionally informed by static checks.
    async fn critique(
        &self,
        ctx: &AgentContext,
        artifact: &Artifact,
        checks: Option<&[CheckReport]>,
    ) -> Result<Critique, AiProviderError>;
}

/// The AI capability surface consumed by the orchestrator and agents.
#[async_trait]
pub trait AiService: Send + Sync {
    /// Returns the planner for the planning phase.
    fn planner(&self) -> &dyn Planner;

    /// Returns the reflector for the reflection phase.
    fn reflector(&self) -> &dyn Reflector;

    /// Generates the work artifact for the execute phase.
    async fn generate_work_artifact(
        &self,
        ctx: &AgentContext,
        instruction: &str,
    ) -> Result<Artifact, AiProviderError>;

    /// Runs the strong-model validation pass over a finished artifact.
    async fn validate_with_strong_model(
        &self,
        ctx: &AgentContext,
        artifact: &Artifact,
    ) -> Result<ValidationVerdict, AiProviderError>;
}

/// System prompt for the planning call.
const PLANNING_PROMPT: &str = r#"
You are a planning assistant for engineering agents. Break the requested work
into a short ordered list of concrete steps.

Respond with JSON only, in this shape:
{"steps": [{"title": "...", "detail": "..."}], "rationale": "..."}
"#;

/// System prompt for the artifact generation call.
const GENERATION_PROMPT: &str = r#"
You are an engineering agent producing a work artifact. Follow the instruction
exactly and produce complete file contents, not fragments.

Respond with JSON only, in this shape:
{"summary": "...", "files": [{"path": "...", "content": "..."}], "metadata": {}}
"#;

/// System prompt for the reflection call.
const REFLECTION_PROMPT: &str = r#"
You are a reviewer critiquing an agent's work artifact. Identify concrete
issues and, when they are worth fixing, produce a fully revised artifact.

Respond with JSON only, in this shape:
{"summary": "...", "issues": ["..."], "revised": {"summary": "...", "files": [{"path": "...", "content": "..."}]}}
Set "revised" to null when the artifact needs no changes.
"#;

/// System prompt for the strong-model validation call.
const VALIDATION_PROMPT: &str = r#"
You are a strict validator scoring an agent's work artifact against its
original request. Score 0.0 to 1.0 and fail anything incomplete or wrong.

Respond with JSON only, in this shape:
{"passed": true, "score": 0.0, "detail": "..."}
"#;

/// Raw artifact shape parsed from model output.
#[derive(Debug, Deserialize)]
struct RawArtifact {
    summary: String,
    #[serde(default)]
    files: Vec<ArtifactFile>,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// Raw critique shape parsed from model output.
#[derive(Debug, Deserialize)]
struct RawCritique {
    summary: String,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    revised: Option<RawArtifact>,
}

/// Live AI service backed by the provider HTTP client.
pub struct LiveAiService {
    /// Observer receiving one event per call.
    observer: Arc<dyn AiCallObserver>,
    /// Sampling temperature for all calls.
    temperature: f64,
    /// Token budget for generation calls.
    max_tokens: u32,
    /// Optional API base override, used by tests.
    api_base_override: Option<String>,
}

impl LiveAiService {
    /// Creates a service that discards observability events.
    pub fn new() -> Self {
        Self {
            observer: Arc::new(NoopObserver),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            api_base_override: None,
        }
    }

    /// Sets the observer receiving per-call events.
    pub fn with_observer(mut self, observer: Arc<dyn AiCallObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the generation token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Overrides the API base for every provider.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base_override = Some(api_base.into());
        self
    }

    fn client_for(&self, ctx: &AgentContext) -> ProviderClient {
        let mut client = ProviderClient::new(ctx.resolved.provider, ctx.resolved.api_key.clone());
        if let Some(ref base) = self.api_base_override {
            client = client.with_api_base(base.clone());
        }
        client
    }

    /// Issues one chat call, emitting the observability event either way.
    async fn chat(
        &self,
        ctx: &AgentContext,
        purpose: CallPurpose,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<String, AiProviderError> {
        let client = self.client_for(ctx);
        let request = ChatRequest::new(model, messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let started = Instant::now();
        let result = client.chat(request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let event = match &result {
            Ok(response) => AiCallEvent {
                purpose,
                provider: ctx.resolved.provider,
                model: model.to_string(),
                duration_ms,
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
                success: true,
                error_code: None,
            },
            Err(error) => AiCallEvent {
                purpose,
                provider: ctx.resolved.provider,
                model: model.to_string(),
                duration_ms,
                prompt_tokens: 0,
                completion_tokens: 0,
                success: false,
                error_code: Some(error.code().to_string()),
            },
        };
        self.observer.on_ai_call(ctx.job_id, event);

        let response = result?;
        response
            .first_content()
            .map(str::to_string)
            .ok_or_else(|| AiProviderError::InvalidResponse {
                detail: "no content in chat response".to_string(),
            })
    }
}

impl Default for LiveAiService {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a JSON payload out of model output, tolerating code fences.
fn parse_json_payload<T: serde::de::DeserializeOwned>(
    content: &str,
) -> Result<T, AiProviderError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim()).map_err(|e| AiProviderError::InvalidResponse {
        detail: format!("could not parse model output as JSON: {e}"),
    })
}

fn artifact_from_raw(ctx: &AgentContext, raw: RawArtifact) -> Artifact {
    Artifact::new(ctx.job_type, raw.summary)
        .with_files(raw.files)
        .with_metadata(raw.metadata)
}

#[async_trait]
impl Planner for LiveAiService {
    async fn draft_plan(&self, ctx: &AgentContext) -> Result<DraftPlan, AiProviderError> {
        let messages = vec![
            ChatMessage::system(PLANNING_PROMPT),
            ChatMessage::user(format!(
                "Job type: {}\nRequest payload:\n{}",
                ctx.job_type, ctx.payload
            )),
        ];
        let content = self
            .chat(ctx, CallPurpose::Plan, &ctx.resolved.model, messages)
            .await?;
        parse_json_payload(&content)
    }
}

#[async_trait]
impl Reflector for LiveAiService {
    async fn critique(
        &self,
        ctx: &AgentContext,
        artifact: &Artifact,
        checks: Option<&[CheckReport]>,
    ) -> Result<Critique, AiProviderError> {
        let checks_block = match checks {
            Some(reports) => format!(
                "\nStatic check results:\n{}",
                serde_json::to_string_pretty(reports).unwrap_or_else(|_| "[]".to_string())
            ),
            None => String::new(),
        };
        let messages = vec![
            ChatMessage::system(REFLECTION_PROMPT),
            ChatMessage::user(format!(
                "Artifact:\n{}{checks_block}",
                artifact.to_value()
            )),
        ];
        let content = self
            .chat(ctx, CallPurpose::Reflect, &ctx.resolved.model, messages)
            .await?;
        let raw: RawCritique = parse_json_payload(&content)?;
        Ok(Critique {
            summary: raw.summary,
            issues: raw.issues,
            revised_artifact: raw.revised.map(|r| artifact_from_raw(ctx, r)),
        })
    }
}

#[async_trait]
impl AiService for LiveAiService {
    fn planner(&self) -> &dyn Planner {
        self
    }

    fn reflector(&self) -> &dyn Reflector {
        self
    }

    async fn generate_work_artifact(
        &self,
        ctx: &AgentContext,
        instruction: &str,
    ) -> Result<Artifact, AiProviderError> {
        let messages = vec![
            ChatMessage::system(GENERATION_PROMPT),
            ChatMessage::user(instruction.to_string()),
        ];
        let content = self
            .chat(ctx, CallPurpose::Generate, &ctx.resolved.model, messages)
            .await?;
        let raw: RawArtifact = parse_json_payload(&content)?;
        Ok(artifact_from_raw(ctx, raw))
    }

    async fn validate_with_strong_model(
        &self,
        ctx: &AgentContext,
        artifact: &Artifact,
    ) -> Result<ValidationVerdict, AiProviderError> {
        let messages = vec![
            ChatMessage::system(VALIDATION_PROMPT),
            ChatMessage::user(format!(
                "Original request:\n{}\n\nArtifact:\n{}",
                ctx.payload,
                artifact.to_value()
            )),
        ];
        let strong_model = ctx.resolved.provider.strong_model();
        let content = self
            .chat(ctx, CallPurpose::Validate, strong_model, messages)
            .await?;
        parse_json_payload(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_plan_into_plan() {
        let job_id = Uuid::new_v4();
        let draft = DraftPlan {
            steps: vec![
                DraftStep {
                    title: "Survey module".to_string(),
                    detail: "List public items".to_string(),
                },
                DraftStep {
                    title: "Write docs".to_string(),
                    detail: String::new(),
                },
            ],
            rationale: "Two passes keep it simple".to_string(),
        };

        let plan = draft.into_plan(job_id).expect("conversion should succeed");

        assert_eq!(plan.job_id, job_id);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].index, 0);
        assert_eq!(plan.steps[1].index, 1);
        assert_eq!(plan.rationale, "Two passes keep it simple");
    }

    #[test]
    fn test_empty_draft_plan_is_invalid() {
        let draft = DraftPlan {
            steps: vec![],
            rationale: String::new(),
        };

        let err = draft
            .into_plan(Uuid::new_v4())
            .expect_err("conversion should fail");
        assert!(matches!(err, AiProviderError::InvalidResponse { .. }));
    }

    #[test]
    fn test_blank_step_title_is_invalid() {
        let draft = DraftPlan {
            steps: vec![DraftStep {
                title: "   ".to_string(),
                detail: "whitespace only".to_string(),
            }],
            rationale: String::new(),
        };

        let err = draft
            .into_plan(Uuid::new_v4())
            .expect_err("conversion should fail");
        match err {
            AiProviderError::InvalidResponse { detail } => {
                assert!(detail.contains("empty title"), "got: {detail}");
            }
            other => panic!("expected InvalidResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_draft_plan_is_invalid() {
        let steps = (0..MAX_PLAN_STEPS + 1)
            .map(|i| DraftStep {
                title: format!("step {i}"),
                detail: String::new(),
            })
            .collect();
        let draft = DraftPlan {
            steps,
            rationale: String::new(),
        };

        assert!(draft.into_plan(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_parse_json_payload_tolerates_fences() {
        let fenced = "```json\n{\"passed\": true, \"score\": 0.8, \"detail\": \"ok\"}\n```";
        let verdict: ValidationVerdict =
            parse_json_payload(fenced).expect("parse should succeed");
        assert!(verdict.passed);
        assert!((verdict.score - 0.8).abs() < 1e-9);

        let bare = "{\"steps\": [{\"title\": \"a\"}], \"rationale\": \"r\"}";
        let draft: DraftPlan = parse_json_payload(bare).expect("parse should succeed");
        assert_eq!(draft.steps.len(), 1);

        let junk = "not json at all";
        assert!(parse_json_payload::<DraftPlan>(junk).is_err());
    }

    #[test]
    fn test_call_purpose_display() {
        assert_eq!(format!("{}", CallPurpose::Plan), "plan");
        assert_eq!(format!("{}", CallPurpose::Generate), "generate");
        assert_eq!(format!("{}", CallPurpose::Reflect), "reflect");
        assert_eq!(format!("{}", CallPurpose::Validate), "validate");
    }
}
