use std::sync::Arc;

use crate::artifacts::ArtifactStore;
use crate::auth::TokenProvider;
use crate::error::{Result, SessionError};

use super::client::SessionClient;
use super::registry::{SessionRegistry, DEFAULT_SCOPE};
use super::types::{ExecutionOptions, Language};

/// Shared state for every session behind one pool management endpoint.
pub struct SessionPool {
    http: reqwest::Client,
    endpoint: String,
    credentials: Arc<dyn TokenProvider>,
    artifacts: Arc<ArtifactStore>,
    registry: Arc<SessionRegistry>,
}

impl SessionPool {
    pub fn new(
        endpoint: impl Into<String>,
        credentials: Arc<dyn TokenProvider>,
        artifacts: Arc<ArtifactStore>,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(SessionError::Configuration(
                "AZURE_POOL_MANAGEMENT_ENDPOINT must be defined".to_string(),
            ));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            credentials,
            artifacts,
            registry,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Client for the session assigned to `scope` (or the default scope).
    pub fn client(
        &self,
        scope: Option<&str>,
        language: Language,
        options: ExecutionOptions,
    ) -> SessionClient {
        let scope = scope.filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SCOPE);
        let session_id = self.registry.session_for(scope, None);

        SessionClient::from_parts(
            self.http.clone(),
            self.endpoint.clone(),
            session_id,
            self.credentials.clone(),
            self.artifacts.clone(),
        )
        .with_language(language)
        .with_options(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;

    fn pool(endpoint: &str) -> Result<SessionPool> {
        SessionPool::new(
            endpoint,
            Arc::new(StaticTokenProvider::new("t")),
            Arc::new(ArtifactStore::local("out", "public")),
            Arc::new(SessionRegistry::new()),
        )
    }

    #[test]
    fn empty_endpoint_is_configuration_error() {
        assert!(matches!(pool("  "), Err(SessionError::Configuration(_))));
    }

    #[test]
    fn clients_share_session_per_scope() {
        let pool = pool("https://pool.example").unwrap();
        let a = pool.client(Some("conv-1"), Language::Python, ExecutionOptions::default());
        let b = pool.client(Some("conv-1"), Language::JavaScript, ExecutionOptions::default());
        let c = pool.client(Some("conv-2"), Language::Python, ExecutionOptions::default());
        let d = pool.client(None, Language::Python, ExecutionOptions::default());
        let e = pool.client(Some(""), Language::Python, ExecutionOptions::default());

        assert_eq!(a.session_id(), b.session_id());
        assert_ne!(a.session_id(), c.session_id());
        assert_eq!(d.session_id(), e.session_id());
        assert_eq!(pool.registry().get(DEFAULT_SCOPE).as_deref(), Some(d.session_id()));
    }
}
