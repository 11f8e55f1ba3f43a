//! Job data model and lifecycle state machine.
//!
//! This module defines everything the orchestrator persists about a job:
//!
//! - **Job**: the tracked unit of agent work with lifecycle state
//! - **Plan / AuditEntry**: planning output and per-phase audit snapshots
//! - **StateMachine**: the legal-transition validator over `JobState`

pub mod state;
pub mod types;

// Re-export main types for convenience
pub use state::{JobAction, StateMachine};
pub use types::{AuditEntry, AuditPhase, Job, JobState, JobType, JobUpdate, Plan, PlanStep};
