//! AI provider client and pipeline-facing service surface.
//!
//! - **client**: OpenAI-compatible chat client with typed error mapping
//! - **service**: planner/reflector/generation/validation contracts plus the
//!   live implementation and per-call observability events

pub mod client;
pub mod service;

// Re-export main types for convenience
pub use client::{ChatMessage, ChatRequest, ChatResponse, ProviderClient, TokenUsage};
pub use service::{
    AiCallEvent, AiCallObserver, AiService, CallPurpose, DraftPlan, DraftStep, LiveAiService,
    NoopObserver, Planner, Reflector, ValidationVerdict,
};
