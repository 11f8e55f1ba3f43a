//! Credential storage and lookup.
//!
//! User-owned credentials and the active-provider preference come from a
//! `CredentialStore` implementation; environment credentials are loaded from
//! per-provider environment variables. Secrets travel as `ApiKey`, which
//! redacts itself in debug output and never serializes.

use crate::resolver::Provider;
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

/// Environment variable holding the OpenAI key.
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
/// Environment variable holding the Anthropic key.
pub const ANTHROPIC_API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
/// Environment variable holding the OpenRouter key.
pub const OPENROUTER_API_KEY_VAR: &str = "OPENROUTER_API_KEY";
/// Environment variable holding the Google key.
pub const GOOGLE_API_KEY_VAR: &str = "GOOGLE_API_KEY";

/// A provider API key.
///
/// Wraps the secret so it cannot leak through `Debug` formatting or serde;
/// callers that genuinely need the value go through [`ApiKey::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value for use in an outgoing request.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey(****)")
    }
}

/// Lookup contract for user-owned credentials and preferences.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the user's credential for a provider, if one is stored.
    async fn credential_for(&self, user_id: Uuid, provider: Provider) -> Option<ApiKey>;

    /// Returns the user's active-provider preference, if one is stored.
    async fn active_provider_for(&self, user_id: Uuid) -> Option<Provider>;
}

/// In-memory credential store.
///
/// Backs tests and the CLI's standalone mode, where no user credential
/// service is attached.
#[derive(Default)]
pub struct StaticCredentials {
    keys: HashMap<(Uuid, Provider), ApiKey>,
    preferences: HashMap<Uuid, Provider>,
}

impl StaticCredentials {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a credential for a user and provider.
    pub fn with_key(mut self, user_id: Uuid, provider: Provider, key: ApiKey) -> Self {
        self.keys.insert((user_id, provider), key);
        self
    }

    /// Sets a user's active-provider preference.
    pub fn with_active_provider(mut self, user_id: Uuid, provider: Provider) -> Self {
        self.preferences.insert(user_id, provider);
        self
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn credential_for(&self, user_id: Uuid, provider: Provider) -> Option<ApiKey> {
        self.keys.get(&(user_id, provider)).cloned()
    }

    async fn active_provider_for(&self, user_id: Uuid) -> Option<Provider> {
        self.preferences.get(&user_id).copied()
    }
}

/// Loads environment credentials from the per-provider variables.
///
/// Unset or empty variables are simply absent from the map.
pub fn load_env_keys() -> HashMap<Provider, ApiKey> {
    let mut keys = HashMap::new();
    for (provider, var) in [
        (Provider::OpenAi, OPENAI_API_KEY_VAR),
        (Provider::Anthropic, ANTHROPIC_API_KEY_VAR),
        (Provider::OpenRouter, OPENROUTER_API_KEY_VAR),
        (Provider::Google, GOOGLE_API_KEY_VAR),
    ] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                keys.insert(provider, ApiKey::new(value));
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-very-secret");
        let debug = format!("{key:?}");

        assert!(!debug.contains("sk-very-secret"));
        assert_eq!(debug, "ApiKey(****)");
        assert_eq!(key.expose(), "sk-very-secret");
    }

    #[tokio::test]
    async fn test_static_credentials_lookup() {
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let store = StaticCredentials::new()
            .with_key(user, Provider::OpenAi, ApiKey::new("sk-user"))
            .with_active_provider(user, Provider::Anthropic);

        assert_eq!(
            store.credential_for(user, Provider::OpenAi).await,
            Some(ApiKey::new("sk-user"))
        );
        assert!(store.credential_for(user, Provider::Google).await.is_none());
        assert!(store.credential_for(other, Provider::OpenAi).await.is_none());

        assert_eq!(
            store.active_provider_for(user).await,
            Some(Provider::Anthropic)
        );
        assert!(store.active_provider_for(other).await.is_none());
    }
}
