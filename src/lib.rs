//! taskforge: agent job orchestration engine.
//!
//! Tracks asynchronous agent jobs (documentation, test generation,
//! scaffolding) through a bounded lifecycle, resolves which AI backend and
//! credential each job uses, and drives a plan/execute/reflect/validate
//! pipeline with a layered failure model: setup and planning failures are
//! fatal, reflection/validation/diagnostic failures never are.

// Core modules
pub mod agent;
pub mod ai;
pub mod checks;
pub mod classify;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod integrations;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod resolver;
pub mod storage;
pub mod trace;

// Re-export commonly used types
pub use error::{AiProviderError, ConfigError, OrchestratorError, StorageError, TraceError};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, SubmitOptions};
