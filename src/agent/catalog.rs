//! Built-in agents for the default job types.
//!
//! Each agent exercises a different slice of the pipeline: `DocAgent` plans,
//! works against a repository and reflects; `TestGenAgent` skips planning;
//! `ScaffoldAgent` needs no integration and no reflection.

use super::{Agent, AgentContext, Artifact, Critique, Playbook};
use crate::ai::{DraftPlan, Planner, Reflector};
use crate::checks::CheckReport;
use crate::error::OrchestratorError;
use crate::integrations::{IntegrationConnection, IntegrationKind};
use crate::job::Plan;
use async_trait::async_trait;
use std::fmt::Write as _;

/// Renders a stored plan as a numbered block for generation instructions.
fn describe_plan(plan: Option<&Plan>) -> String {
    let Some(plan) = plan else {
        return String::new();
    };
    let mut block = String::from("\nFollow this plan:\n");
    for step in &plan.steps {
        let _ = write!(block, "{}. {}", step.index + 1, step.title);
        if !step.detail.is_empty() {
            let _ = write!(block, " ({})", step.detail);
        }
        block.push('\n');
    }
    block
}

/// Writes repository documentation. Plans first, revises after reflection.
#[derive(Debug, Default)]
pub struct DocAgent;

impl DocAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for DocAgent {
    fn name(&self) -> &'static str {
        "doc-agent"
    }

    fn playbook(&self) -> Playbook {
        Playbook::new()
            .with_planning()
            .with_reflection()
            .with_integration(IntegrationKind::Github)
    }

    async fn plan(
        &self,
        planner: &dyn Planner,
        ctx: &AgentContext,
    ) -> Result<DraftPlan, OrchestratorError> {
        Ok(planner.draft_plan(ctx).await?)
    }

    async fn execute_with_tools(
        &self,
        tools: &IntegrationConnection,
        plan: Option<&Plan>,
        ctx: &AgentContext,
    ) -> Result<Artifact, OrchestratorError> {
        let instruction = format!(
            "Write documentation for the repository at {}.\n\
             Produce complete Markdown files covering the request below.\n\
             Request payload:\n{}{}",
            tools.endpoint,
            ctx.payload,
            describe_plan(plan),
        );
        Ok(ctx.ai.generate_work_artifact(ctx, &instruction).await?)
    }

    async fn reflect(
        &self,
        reflector: &dyn Reflector,
        artifact: &Artifact,
        checks: Option<&[CheckReport]>,
        ctx: &AgentContext,
    ) -> Result<Critique, OrchestratorError> {
        Ok(reflector.critique(ctx, artifact, checks).await?)
    }
}

/// Generates test files for an existing repository. No planning phase.
#[derive(Debug, Default)]
pub struct TestGenAgent;

impl TestGenAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for TestGenAgent {
    fn name(&self) -> &'static str {
        "testgen-agent"
    }

    fn playbook(&self) -> Playbook {
        Playbook::new()
            .with_reflection()
            .with_integration(IntegrationKind::Github)
    }

    async fn execute_with_tools(
        &self,
        tools: &IntegrationConnection,
        plan: Option<&Plan>,
        ctx: &AgentContext,
    ) -> Result<Artifact, OrchestratorError> {
        let instruction = format!(
            "Generate tests for the repository at {}.\n\
             Cover the behavior described in the request with runnable test files.\n\
             Request payload:\n{}{}",
            tools.endpoint,
            ctx.payload,
            describe_plan(plan),
        );
        Ok(ctx.ai.generate_work_artifact(ctx, &instruction).await?)
    }

    async fn reflect(
        &self,
        reflector: &dyn Reflector,
        artifact: &Artifact,
        checks: Option<&[CheckReport]>,
        ctx: &AgentContext,
    ) -> Result<Critique, OrchestratorError> {
        Ok(reflector.critique(ctx, artifact, checks).await?)
    }
}

/// Scaffolds a new project skeleton from a description. Plans, then generates
/// locally with no integration and no reflection pass.
#[derive(Debug, Default)]
pub struct ScaffoldAgent;

impl ScaffoldAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for ScaffoldAgent {
    fn name(&self) -> &'static str {
        "scaffold-agent"
    }

    fn playbook(&self) -> Playbook {
        Playbook::new().with_planning()
    }

    async fn plan(
        &self,
        planner: &dyn Planner,
        ctx: &AgentContext,
    ) -> Result<DraftPlan, OrchestratorError> {
        Ok(planner.draft_plan(ctx).await?)
    }

    async fn execute(&self, ctx: &AgentContext) -> Result<Artifact, OrchestratorError> {
        let instruction = format!(
            "Scaffold a new project skeleton.\n\
             Produce every file a fresh checkout needs, including build manifests.\n\
             Request payload:\n{}",
            ctx.payload,
        );
        Ok(ctx.ai.generate_work_artifact(ctx, &instruction).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiService, ValidationVerdict};
    use crate::credentials::ApiKey;
    use crate::error::AiProviderError;
    use crate::job::{JobType, PlanStep};
    use crate::resolver::{FallbackReason, KeySource, Provider, ResolvedAi};
    use std::sync::Arc;
    use uuid::Uuid;

    struct StubAi {
        summary: String,
    }

    #[async_trait]
    impl Planner for StubAi {
        async fn draft_plan(&self, _ctx: &AgentContext) -> Result<DraftPlan, AiProviderError> {
            Ok(DraftPlan {
                steps: vec![crate::ai::DraftStep {
                    title: "Only step".to_string(),
                    detail: String::new(),
                }],
                rationale: "stub".to_string(),
            })
        }
    }

    #[async_trait]
    impl Reflector for StubAi {
        async fn critique(
            &self,
            _ctx: &AgentContext,
            _artifact: &Artifact,
            _checks: Option<&[CheckReport]>,
        ) -> Result<Critique, AiProviderError> {
            Ok(Critique {
                summary: "looks fine".to_string(),
                issues: vec![],
                revised_artifact: None,
            })
        }
    }

    #[async_trait]
    impl AiService for StubAi {
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
            Ok(Artifact::new(ctx.job_type, self.summary.clone()))
        }

        async fn validate_with_strong_model(
            &self,
            _ctx: &AgentContext,
            _artifact: &Artifact,
        ) -> Result<ValidationVerdict, AiProviderError> {
            Ok(ValidationVerdict {
                passed: true,
                score: 1.0,
                detail: String::new(),
            })
        }
    }

    fn test_context(job_type: JobType) -> AgentContext {
        let resolved = ResolvedAi {
            provider: Provider::OpenAi,
            model: "gpt-4o".to_string(),
            key_source: KeySource::User,
            fallback_reason: FallbackReason::ExplicitOverrideUserKey,
            api_key: ApiKey::new("sk-test"),
        };
        AgentContext::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            job_type,
            serde_json::json!({ "target": "docs" }),
            resolved,
            Arc::new(StubAi {
                summary: "stub artifact".to_string(),
            }),
        )
    }

    fn test_connection() -> IntegrationConnection {
        IntegrationConnection {
            kind: IntegrationKind::Github,
            endpoint: "https://api.github.com".to_string(),
            token: ApiKey::new("ghp-test"),
            connected_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_doc_agent_executes_through_service() {
        let ctx = test_context(JobType::Documentation);
        let connection = test_connection();

        let artifact = DocAgent::new()
            .execute_with_tools(&connection, None, &ctx)
            .await
            .expect("execution should succeed");

        assert_eq!(artifact.kind, JobType::Documentation);
        assert_eq!(artifact.summary, "stub artifact");
    }

    #[tokio::test]
    async fn test_scaffold_agent_rejects_reflection() {
        let ctx = test_context(JobType::Scaffold);
        let stub = StubAi {
            summary: String::new(),
        };
        let artifact = Artifact::new(JobType::Scaffold, "skeleton");

        let err = ScaffoldAgent::new()
            .reflect(&stub, &artifact, None, &ctx)
            .await
            .expect_err("reflection is not in the scaffold playbook");

        assert!(matches!(err, OrchestratorError::MissingDependency { .. }));
    }

    #[tokio::test]
    async fn test_testgen_agent_rejects_planning() {
        let ctx = test_context(JobType::TestGeneration);
        let stub = StubAi {
            summary: String::new(),
        };

        let err = TestGenAgent::new()
            .plan(&stub, &ctx)
            .await
            .expect_err("planning is not in the testgen playbook");

        assert!(matches!(err, OrchestratorError::MissingDependency { .. }));
    }

    #[test]
    fn test_describe_plan_numbers_steps() {
        let plan = Plan::new(
            Uuid::new_v4(),
            vec![
                PlanStep {
                    index: 0,
                    title: "Read module".to_string(),
                    detail: "entry points".to_string(),
                },
                PlanStep {
                    index: 1,
                    title: "Draft docs".to_string(),
                    detail: String::new(),
                },
            ],
            String::new(),
        );

        let block = describe_plan(Some(&plan));
        assert!(block.contains("1. Read module (entry points)"));
        assert!(block.contains("2. Draft docs\n"));

        assert!(describe_plan(None).is_empty());
    }
}
