//! Agent contracts, artifacts and the per-type registry.
//!
//! Agents implement an optional capability set (plan, execute,
//! execute-with-tools, reflect) and describe which pipeline phases they need
//! through a `Playbook`. The orchestrator consults the playbook, never the
//! agent's internals, to decide which phases run.

pub mod catalog;

use crate::ai::{AiService, DraftPlan, Planner, Reflector};
use crate::checks::CheckReport;
use crate::error::OrchestratorError;
use crate::integrations::{IntegrationConnection, IntegrationKind};
use crate::job::{JobType, Plan};
use crate::resolver::ResolvedAi;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

// Re-export main types for convenience
pub use catalog::{DocAgent, ScaffoldAgent, TestGenAgent};

/// Declares which pipeline phases an agent requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Playbook {
    /// Whether the plan phase must run before execution.
    pub requires_planning: bool,
    /// Whether the reflect phase runs after execution.
    pub requires_reflection: bool,
    /// Integration that must be connected before the pipeline starts.
    pub required_integration: Option<IntegrationKind>,
}

impl Playbook {
    /// Creates a playbook requiring no optional phases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the plan phase.
    pub fn with_planning(mut self) -> Self {
        self.requires_planning = true;
        self
    }

    /// Requires the reflect phase.
    pub fn with_reflection(mut self) -> Self {
        self.requires_reflection = true;
        self
    }

    /// Requires a connected integration.
    pub fn with_integration(mut self, kind: IntegrationKind) -> Self {
        self.required_integration = Some(kind);
        self
    }
}

/// Everything an agent needs to act on one job.
#[derive(Clone)]
pub struct AgentContext {
    /// Job being worked on.
    pub job_id: Uuid,
    /// Owner of the job.
    pub user_id: Uuid,
    /// Kind of work requested.
    pub job_type: JobType,
    /// Opaque request payload.
    pub payload: serde_json::Value,
    /// Resolved provider, model and credential for AI calls.
    pub resolved: ResolvedAi,
    /// The AI service agents generate through.
    pub ai: Arc<dyn AiService>,
    /// Connected integration, when the playbook requires one.
    pub integration: Option<IntegrationConnection>,
}

impl AgentContext {
    /// Creates a context without an integration connection.
    pub fn new(
        job_id: Uuid,
        user_id: Uuid,
        job_type: JobType,
        payload: serde_json::Value,
        resolved: ResolvedAi,
        ai: Arc<dyn AiService>,
    ) -> Self {
        Self {
            job_id,
            user_id,
            job_type,
            payload,
            resolved,
            ai,
            integration: None,
        }
    }

    /// Attaches a resolved integration connection.
    pub fn with_integration(mut self, integration: IntegrationConnection) -> Self {
        self.integration = Some(integration);
        self
    }
}

/// One file produced by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactFile {
    /// Repository-relative path the file belongs at.
    pub path: String,
    /// Complete file content.
    pub content: String,
}

/// Opaque output of the execute phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Kind of work that produced this artifact.
    pub kind: JobType,
    /// Short description of what was produced.
    pub summary: String,
    /// Files making up the artifact.
    #[serde(default)]
    pub files: Vec<ArtifactFile>,
    /// Free-form metadata attached by the agent.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Artifact {
    /// Creates an empty artifact.
    pub fn new(kind: JobType, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            files: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Replaces the file list.
    pub fn with_files(mut self, files: Vec<ArtifactFile>) -> Self {
        self.files = files;
        self
    }

    /// Appends a single file.
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.push(ArtifactFile {
            path: path.into(),
            content: content.into(),
        });
        self
    }

    /// Replaces the metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Serializes the artifact for persistence and prompts.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::Value::Null)
    }
}

/// Structured output of the reflection phase.
#[derive(Debug, Clone, Serialize)]
pub struct Critique {
    /// Overall assessment of the artifact.
    pub summary: String,
    /// Concrete issues the reflector found.
    pub issues: Vec<String>,
    /// Replacement artifact, when the reflector chose to revise.
    pub revised_artifact: Option<Artifact>,
}

/// The capability set agents may implement.
///
/// Every method has an "unsupported" default, so an agent only implements
/// the hooks its playbook actually requires; calling an unimplemented hook
/// is a typed dependency error, not a panic.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable agent name for logs and errors.
    fn name(&self) -> &'static str;

    /// Which phases this agent requires.
    fn playbook(&self) -> Playbook;

    /// Produces a draft plan for the job.
    async fn plan(
        &self,
        planner: &dyn Planner,
        ctx: &AgentContext,
    ) -> Result<DraftPlan, OrchestratorError> {
        let _ = (planner, ctx);
        Err(unsupported_capability(self.name(), "plan"))
    }

    /// Executes the job using a connected integration.
    async fn execute_with_tools(
        &self,
        tools: &IntegrationConnection,
        plan: Option<&Plan>,
        ctx: &AgentContext,
    ) -> Result<Artifact, OrchestratorError> {
        let _ = (tools, plan, ctx);
        Err(unsupported_capability(self.name(), "execute_with_tools"))
    }

    /// Executes the job without external tools.
    async fn execute(&self, ctx: &AgentContext) -> Result<Artifact, OrchestratorError> {
        let _ = ctx;
        Err(unsupported_capability(self.name(), "execute"))
    }

    /// Critiques an execution artifact.
    async fn reflect(
        &self,
        reflector: &dyn Reflector,
        artifact: &Artifact,
        checks: Option<&[CheckReport]>,
        ctx: &AgentContext,
    ) -> Result<Critique, OrchestratorError> {
        let _ = (reflector, artifact, checks, ctx);
        Err(unsupported_capability(self.name(), "reflect"))
    }
}

fn unsupported_capability(agent: &str, capability: &str) -> OrchestratorError {
    OrchestratorError::MissingDependency {
        dependency: format!("'{capability}' capability on {agent}"),
        hint: format!("Register an agent implementing '{capability}' or adjust its playbook"),
    }
}

/// Registry of agents keyed by job type.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<JobType, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in agents registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(JobType::Documentation, Arc::new(DocAgent::new()));
        registry.register(JobType::TestGeneration, Arc::new(TestGenAgent::new()));
        registry.register(JobType::Scaffold, Arc::new(ScaffoldAgent::new()));
        registry
    }

    /// Registers an agent for a job type, replacing any previous one.
    pub fn register(&mut self, job_type: JobType, agent: Arc<dyn Agent>) {
        self.agents.insert(job_type, agent);
    }

    /// Returns the agent for a job type.
    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn Agent>> {
        self.agents.get(&job_type).cloned()
    }

    /// Returns how many agents are registered.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Returns whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
