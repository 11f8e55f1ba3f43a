//! Deterministic AI provider, model and credential resolution.
//!
//! Resolution is a pure function over a snapshot of the inputs:
//!
//! - an explicit per-job provider override from the payload
//! - the user's stored active-provider preference
//! - the environment's default provider
//! - per-provider user and environment credentials
//!
//! Provider precedence is explicit override > user preference > environment
//! default. Credentials are then resolved for the selected provider only: a
//! user credential wins over an environment credential, and an environment
//! credential is usable only when the environment's own default provider
//! equals the selected provider. Resolution never substitutes a different
//! provider's credential; a selected provider without a usable credential is
//! a hard `MissingDependency` error.

use crate::credentials::ApiKey;
use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// An AI backend the engine can route jobs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenAi,
    Anthropic,
    OpenRouter,
    Google,
}

impl Provider {
    /// Returns the canonical string form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::OpenRouter => "openrouter",
            Provider::Google => "google",
        }
    }

    /// Returns the recommended default model for this provider.
    pub fn recommended_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o",
            Provider::Anthropic => "claude-sonnet-4-5",
            Provider::OpenRouter => "anthropic/claude-opus-4.5",
            Provider::Google => "gemini-2.5-pro",
        }
    }

    /// Returns the stronger model used for the strict validation pass.
    pub fn strong_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "o3",
            Provider::Anthropic => "claude-opus-4-5",
            Provider::OpenRouter => "anthropic/claude-opus-4.5",
            Provider::Google => "gemini-2.5-pro",
        }
    }

    /// Infers which provider a model identifier belongs to.
    ///
    /// OpenRouter models are namespaced (`vendor/model`), so any identifier
    /// containing a slash maps there.
    pub fn infer_from_model(model: &str) -> Option<Provider> {
        if model.contains('/') {
            return Some(Provider::OpenRouter);
        }
        if model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3") {
            return Some(Provider::OpenAi);
        }
        if model.starts_with("claude-") {
            return Some(Provider::Anthropic);
        }
        if model.starts_with("gemini-") {
            return Some(Provider::Google);
        }
        None
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "openrouter" => Ok(Provider::OpenRouter),
            "google" => Ok(Provider::Google),
            other => Err(format!(
                "unknown provider '{other}': expected openai, anthropic, openrouter or google"
            )),
        }
    }
}

/// Which credential source a resolution ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// A credential owned by the requesting user.
    User,
    /// The environment credential for the environment's default provider.
    Env,
}

impl KeySource {
    /// Returns the canonical string form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySource::User => "user",
            KeySource::Env => "env",
        }
    }
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which precedence branch produced a resolution.
///
/// Persisted onto the job for observability, so operators can tell why a
/// particular provider and credential were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Payload named the provider; the user's own credential was used.
    ExplicitOverrideUserKey,
    /// Payload named the provider; the environment credential was used.
    ExplicitOverrideEnvKey,
    /// User's active preference selected the provider; user credential used.
    UserPreferenceUserKey,
    /// User's active preference selected the provider; environment credential used.
    UserPreferenceEnvKey,
    /// No override or preference; environment default provider with the
    /// user's own credential.
    EnvironmentDefaultUserKey,
    /// No override or preference; environment default provider with the
    /// environment credential.
    EnvironmentDefaultEnvKey,
}

impl FallbackReason {
    /// Returns the canonical string form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::ExplicitOverrideUserKey => "explicit_override_user_key",
            FallbackReason::ExplicitOverrideEnvKey => "explicit_override_env_key",
            FallbackReason::UserPreferenceUserKey => "user_preference_user_key",
            FallbackReason::UserPreferenceEnvKey => "user_preference_env_key",
            FallbackReason::EnvironmentDefaultUserKey => "environment_default_user_key",
            FallbackReason::EnvironmentDefaultEnvKey => "environment_default_env_key",
        }
    }

    fn from_parts(selection: ProviderSelection, key_source: KeySource) -> Self {
        match (selection, key_source) {
            (ProviderSelection::ExplicitOverride, KeySource::User) => {
                FallbackReason::ExplicitOverrideUserKey
            }
            (ProviderSelection::ExplicitOverride, KeySource::Env) => {
                FallbackReason::ExplicitOverrideEnvKey
            }
            (ProviderSelection::UserPreference, KeySource::User) => {
                FallbackReason::UserPreferenceUserKey
            }
            (ProviderSelection::UserPreference, KeySource::Env) => {
                FallbackReason::UserPreferenceEnvKey
            }
            (ProviderSelection::EnvironmentDefault, KeySource::User) => {
                FallbackReason::EnvironmentDefaultUserKey
            }
            (ProviderSelection::EnvironmentDefault, KeySource::Env) => {
                FallbackReason::EnvironmentDefaultEnvKey
            }
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the provider itself was chosen, before credential resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderSelection {
    ExplicitOverride,
    UserPreference,
    EnvironmentDefault,
}

/// Immutable snapshot of every input the resolver consults.
///
/// Built by the orchestrator from the job payload, the credential store and
/// the engine configuration; the resolver itself performs no lookups.
#[derive(Debug, Clone)]
pub struct ResolverSnapshot {
    /// Explicit provider override from the job payload.
    pub provider_override: Option<Provider>,
    /// Explicit model override from the job payload.
    pub model_override: Option<String>,
    /// The user's stored active-provider preference.
    pub user_preference: Option<Provider>,
    /// The environment's default provider.
    pub env_default_provider: Provider,
    /// Credentials owned by the requesting user, per provider.
    pub user_keys: HashMap<Provider, ApiKey>,
    /// Credentials configured in the environment, per provider.
    pub env_keys: HashMap<Provider, ApiKey>,
}

impl ResolverSnapshot {
    /// Creates an empty snapshot with the given environment default.
    pub fn new(env_default_provider: Provider) -> Self {
        Self {
            provider_override: None,
            model_override: None,
            user_preference: None,
            env_default_provider,
            user_keys: HashMap::new(),
            env_keys: HashMap::new(),
        }
    }

    /// Sets the explicit provider override.
    pub fn with_provider_override(mut self, provider: Provider) -> Self {
        self.provider_override = Some(provider);
        self
    }

    /// Sets the explicit model override.
    pub fn with_model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    /// Sets the user's active-provider preference.
    pub fn with_user_preference(mut self, provider: Provider) -> Self {
        self.user_preference = Some(provider);
        self
    }

    /// Adds a user-owned credential for a provider.
    pub fn with_user_key(mut self, provider: Provider, key: ApiKey) -> Self {
        self.user_keys.insert(provider, key);
        self
    }

    /// Adds an environment credential for a provider.
    pub fn with_env_key(mut self, provider: Provider, key: ApiKey) -> Self {
        self.env_keys.insert(provider, key);
        self
    }
}

/// Diagnostic view of a resolution, persisted onto the job.
///
/// Carries no secret material; the credential itself stays inside
/// [`ResolvedAi`] and never reaches storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResolution {
    pub provider: Provider,
    pub model: String,
    pub key_source: KeySource,
    pub fallback_reason: FallbackReason,
}

/// Complete resolution output, including the credential to call with.
#[derive(Debug, Clone)]
pub struct ResolvedAi {
    pub provider: Provider,
    pub model: String,
    pub key_source: KeySource,
    pub fallback_reason: FallbackReason,
    pub api_key: ApiKey,
}

impl ResolvedAi {
    /// Returns the secret-free diagnostic view.
    pub fn resolution(&self) -> AiResolution {
        AiResolution {
            provider: self.provider,
            model: self.model.clone(),
            key_source: self.key_source,
            fallback_reason: self.fallback_reason,
        }
    }
}

/// Resolves provider, model and credential for a job.
///
/// Pure over the snapshot: no lookups, no mutation, diagnostic logging only.
pub fn resolve(snapshot: &ResolverSnapshot) -> Result<ResolvedAi, OrchestratorError> {
    let (provider, selection) = select_provider(snapshot);
    let (api_key, key_source) = select_credential(snapshot, provider)?;
    let model = select_model(snapshot, provider);
    let fallback_reason = FallbackReason::from_parts(selection, key_source);

    debug!(
        provider = %provider,
        model = %model,
        key_source = %key_source,
        fallback_reason = %fallback_reason,
        "Resolved AI backend"
    );

    Ok(ResolvedAi {
        provider,
        model,
        key_source,
        fallback_reason,
        api_key,
    })
}

/// Applies the provider precedence: override > preference > environment.
fn select_provider(snapshot: &ResolverSnapshot) -> (Provider, ProviderSelection) {
    if let Some(provider) = snapshot.provider_override {
        return (provider, ProviderSelection::ExplicitOverride);
    }
    if let Some(provider) = snapshot.user_preference {
        return (provider, ProviderSelection::UserPreference);
    }
    (
        snapshot.env_default_provider,
        ProviderSelection::EnvironmentDefault,
    )
}

/// Resolves a credential for the selected provider, or fails closed.
fn select_credential(
    snapshot: &ResolverSnapshot,
    provider: Provider,
) -> Result<(ApiKey, KeySource), OrchestratorError> {
    if let Some(key) = snapshot.user_keys.get(&provider) {
        return Ok((key.clone(), KeySource::User));
    }

    if let Some(key) = snapshot.env_keys.get(&provider) {
        if snapshot.env_default_provider == provider {
            return Ok((key.clone(), KeySource::Env));
        }
        warn!(
            provider = %provider,
            env_default = %snapshot.env_default_provider,
            "Environment credential exists for selected provider but the \
             environment default differs; refusing substitution"
        );
    }

    Err(OrchestratorError::MissingDependency {
        dependency: format!("{provider} API key"),
        hint: format!(
            "Connect a credential for '{provider}' or make it the environment default with a configured key"
        ),
    })
}

/// Applies the model override rule, falling back to the recommended default.
fn select_model(snapshot: &ResolverSnapshot, provider: Provider) -> String {
    if let Some(ref model) = snapshot.model_override {
        match Provider::infer_from_model(model) {
            Some(inferred) if inferred == provider => return model.clone(),
            inferred => {
                debug!(
                    model = %model,
                    inferred = ?inferred,
                    provider = %provider,
                    "Model override does not match resolved provider, using recommended default"
                );
            }
        }
    }
    provider.recommended_model().to_string()
}
