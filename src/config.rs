//! Environment configuration.

use std::path::PathBuf;
use std::sync::Arc;

use crate::artifacts::{ArtifactStore, BlobStore};
use crate::auth::TokenProvider;
use crate::error::{Result, SessionError};
use crate::session::{ExecutionOptions, SessionPool, SessionRegistry, DEFAULT_SCOPE};

pub const DEFAULT_OUTPUT_DIR: &str = "public/tools/azure-dynamic-sessions";
pub const DEFAULT_PUBLIC_DIR: &str = "public";
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_CONTAINER: &str = "files";
pub const DEFAULT_TOOLS: &str = "interpreter";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub account: String,
    pub container: String,
    /// Overrides the account's public blob endpoint.
    pub endpoint: Option<String>,
}

impl StorageConfig {
    pub fn base_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| BlobStore::account_url(&self.account))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub pool_management_endpoint: String,
    pub session_id: Option<String>,
    pub storage: Option<StorageConfig>,
    pub output_dir: PathBuf,
    pub public_dir: PathBuf,
    /// Root for session files saved locally by the download tool.
    pub download_dir: PathBuf,
    pub tools: Vec<String>,
    pub options: ExecutionOptions,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let pool_management_endpoint = var("AZURE_POOL_MANAGEMENT_ENDPOINT")
            .or_else(|| var("AZURE_CONTAINER_APP_SESSION_POOL_MANAGEMENT_ENDPOINT"))
            .ok_or_else(|| {
                SessionError::Configuration("AZURE_POOL_MANAGEMENT_ENDPOINT must be defined".to_string())
            })?;

        let storage = var("AZURE_STORAGE_ACCOUNT").map(|account| StorageConfig {
            account,
            container: var("AZURE_STORAGE_CONTAINER").unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
            endpoint: var("AZURE_STORAGE_ENDPOINT"),
        });

        let timeout = match var("DYNAMIC_SESSIONS_TIMEOUT") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                SessionError::Configuration(format!("DYNAMIC_SESSIONS_TIMEOUT must be a number of seconds, got {}", raw))
            })?),
            None => None,
        };

        let enable_egress = match var("DYNAMIC_SESSIONS_ENABLE_EGRESS") {
            Some(raw) => Some(parse_bool(&raw).ok_or_else(|| {
                SessionError::Configuration(format!("DYNAMIC_SESSIONS_ENABLE_EGRESS must be true or false, got {}", raw))
            })?),
            None => None,
        };

        let tools = var("DYNAMIC_SESSIONS_TOOLS")
            .unwrap_or_else(|| DEFAULT_TOOLS.to_string())
            .split(',')
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();

        Ok(Self {
            pool_management_endpoint,
            session_id: var("AZURE_DYNAMIC_SESSION_ID"),
            storage,
            output_dir: var("DYNAMIC_SESSIONS_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            public_dir: var("DYNAMIC_SESSIONS_PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR)),
            download_dir: var("DYNAMIC_SESSIONS_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
            tools,
            options: ExecutionOptions {
                timeout,
                enable_egress,
            },
        })
    }

    pub fn artifact_store(&self, credentials: Arc<dyn TokenProvider>) -> ArtifactStore {
        let store = ArtifactStore::local(&self.output_dir, &self.public_dir);
        match &self.storage {
            Some(storage) => store.with_object_store(Arc::new(BlobStore::new(
                storage.base_url(),
                &storage.container,
                credentials,
            ))),
            None => store,
        }
    }

    pub fn session_pool(&self, credentials: Arc<dyn TokenProvider>) -> Result<SessionPool> {
        let registry = match &self.session_id {
            Some(id) => SessionRegistry::new().with_session(DEFAULT_SCOPE, id.clone()),
            None => SessionRegistry::new(),
        };

        SessionPool::new(
            &self.pool_management_endpoint,
            credentials.clone(),
            Arc::new(self.artifact_store(credentials)),
            Arc::new(registry),
        )
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_endpoint_is_configuration_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, SessionError::Configuration(_)));
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[("AZURE_POOL_MANAGEMENT_ENDPOINT", "https://pool")])).unwrap();
        assert_eq!(config.pool_management_endpoint, "https://pool");
        assert_eq!(config.session_id, None);
        assert_eq!(config.storage, None);
        assert_eq!(config.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(config.public_dir, PathBuf::from(DEFAULT_PUBLIC_DIR));
        assert_eq!(config.download_dir, PathBuf::from(DEFAULT_DOWNLOAD_DIR));
        assert_eq!(config.tools, vec!["interpreter".to_string()]);
        assert_eq!(config.options, ExecutionOptions::default());
    }

    #[test]
    fn legacy_endpoint_variable() {
        let config = Config::from_lookup(lookup(&[(
            "AZURE_CONTAINER_APP_SESSION_POOL_MANAGEMENT_ENDPOINT",
            "https://legacy",
        )]))
        .unwrap();
        assert_eq!(config.pool_management_endpoint, "https://legacy");
    }

    #[test]
    fn storage_and_options() {
        let config = Config::from_lookup(lookup(&[
            ("AZURE_POOL_MANAGEMENT_ENDPOINT", "https://pool"),
            ("AZURE_STORAGE_ACCOUNT", "acct"),
            ("DYNAMIC_SESSIONS_TOOLS", "interpreter, nodejs_interpreter,,"),
            ("DYNAMIC_SESSIONS_TIMEOUT", "30"),
            ("DYNAMIC_SESSIONS_ENABLE_EGRESS", "false"),
            ("DYNAMIC_SESSIONS_DOWNLOAD_DIR", "/srv/session-files"),
        ]))
        .unwrap();
        assert_eq!(config.download_dir, PathBuf::from("/srv/session-files"));

        let storage = config.storage.clone().unwrap();
        assert_eq!(storage.container, DEFAULT_CONTAINER);
        assert_eq!(storage.base_url(), "https://acct.blob.core.windows.net");
        assert_eq!(config.tools, vec!["interpreter", "nodejs_interpreter"]);
        assert_eq!(
            config.options,
            ExecutionOptions {
                timeout: Some(30),
                enable_egress: Some(false)
            }
        );
    }

    #[test]
    fn invalid_timeout() {
        let err = Config::from_lookup(lookup(&[
            ("AZURE_POOL_MANAGEMENT_ENDPOINT", "https://pool"),
            ("DYNAMIC_SESSIONS_TIMEOUT", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DYNAMIC_SESSIONS_TIMEOUT"));
    }

    #[test]
    fn configured_session_seeds_default_scope() {
        let config = Config::from_lookup(lookup(&[
            ("AZURE_POOL_MANAGEMENT_ENDPOINT", "https://pool"),
            ("AZURE_DYNAMIC_SESSION_ID", "fixed"),
        ]))
        .unwrap();
        let pool = config.session_pool(Arc::new(StaticTokenProvider::new("t"))).unwrap();
        assert_eq!(pool.registry().get(DEFAULT_SCOPE).as_deref(), Some("fixed"));
    }
}
