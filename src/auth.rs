//! Bearer token acquisition for the session pool and blob storage.
//!
//! [`TokenProvider`] is the single capability the clients depend on.
//! [`DefaultCredential`] walks a credential chain (client secret, workload
//! identity, managed identity, then the Azure CLI) on each request.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{AuthType, ClientId, ClientSecret, Scope, TokenResponse, TokenUrl};
use serde::Deserialize;

use crate::error::{Result, SessionError};

/// Audience for the dynamic sessions pool management API.
pub const DYNAMIC_SESSIONS_SCOPE: &str = "https://dynamicsessions.io/.default";

/// Audience for blob storage uploads.
pub const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const CLI_TIMEOUT: Duration = Duration::from_secs(10);
const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Acquire a bearer token for `scope`.
    async fn acquire(&self, scope: &str) -> Result<String>;
}

/// Always hands out the same token.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn acquire(&self, _scope: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Inputs for the credential chain, normally read from the environment.
#[derive(Debug, Clone, Default)]
pub struct CredentialSettings {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub authority_host: Option<String>,
    pub identity_endpoint: Option<String>,
    pub identity_header: Option<String>,
    pub imds_endpoint: Option<String>,
    /// Projected service account token used for workload identity.
    pub federated_token_file: Option<PathBuf>,
    /// Azure CLI executable. The CLI source is skipped when unset.
    pub azure_cli: Option<String>,
}

impl CredentialSettings {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            tenant_id: var("AZURE_TENANT_ID"),
            client_id: var("AZURE_CLIENT_ID"),
            client_secret: var("AZURE_CLIENT_SECRET"),
            authority_host: var("AZURE_AUTHORITY_HOST"),
            identity_endpoint: var("IDENTITY_ENDPOINT"),
            identity_header: var("IDENTITY_HEADER"),
            imds_endpoint: var("AZURE_IMDS_ENDPOINT"),
            federated_token_file: var("AZURE_FEDERATED_TOKEN_FILE").map(PathBuf::from),
            azure_cli: Some(var("AZURE_CLI_PATH").unwrap_or_else(|| "az".to_string())),
        }
    }
}

enum CredentialSource {
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
        authority_host: String,
    },
    WorkloadIdentity {
        tenant_id: String,
        client_id: String,
        token_file: PathBuf,
        authority_host: String,
    },
    AppServiceIdentity {
        endpoint: String,
        header: String,
        client_id: Option<String>,
    },
    InstanceMetadata {
        endpoint: String,
        client_id: Option<String>,
    },
    AzureCli {
        program: String,
        tenant_id: Option<String>,
    },
}

impl CredentialSource {
    fn label(&self) -> &'static str {
        match self {
            CredentialSource::ClientSecret { .. } => "client secret",
            CredentialSource::WorkloadIdentity { .. } => "workload identity",
            CredentialSource::AppServiceIdentity { .. } => "managed identity (identity endpoint)",
            CredentialSource::InstanceMetadata { .. } => "managed identity (instance metadata)",
            CredentialSource::AzureCli { .. } => "azure cli",
        }
    }
}

#[derive(Deserialize)]
struct ManagedIdentityToken {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
}

/// Credential chain over service principal, managed identity and developer
/// CLI sources.
pub struct DefaultCredential {
    settings: CredentialSettings,
    http: reqwest::Client,
    sources: OnceLock<Vec<CredentialSource>>,
}

impl DefaultCredential {
    pub fn new() -> Self {
        Self::with_settings(CredentialSettings::from_env())
    }

    pub fn with_settings(settings: CredentialSettings) -> Self {
        // Token endpoints must not be followed through redirects.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            settings,
            http,
            sources: OnceLock::new(),
        }
    }

    fn sources(&self) -> &[CredentialSource] {
        self.sources.get_or_init(|| {
            let s = &self.settings;
            let mut sources = Vec::new();
            let authority_host = s
                .authority_host
                .clone()
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string());

            if let (Some(tenant_id), Some(client_id), Some(client_secret)) =
                (&s.tenant_id, &s.client_id, &s.client_secret)
            {
                sources.push(CredentialSource::ClientSecret {
                    tenant_id: tenant_id.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    authority_host: authority_host.clone(),
                });
            }

            if let (Some(tenant_id), Some(client_id), Some(token_file)) =
                (&s.tenant_id, &s.client_id, &s.federated_token_file)
            {
                sources.push(CredentialSource::WorkloadIdentity {
                    tenant_id: tenant_id.clone(),
                    client_id: client_id.clone(),
                    token_file: token_file.clone(),
                    authority_host,
                });
            }

            match (&s.identity_endpoint, &s.identity_header) {
                (Some(endpoint), Some(header)) => sources.push(CredentialSource::AppServiceIdentity {
                    endpoint: endpoint.clone(),
                    header: header.clone(),
                    client_id: s.client_id.clone(),
                }),
                _ => sources.push(CredentialSource::InstanceMetadata {
                    endpoint: s
                        .imds_endpoint
                        .clone()
                        .unwrap_or_else(|| DEFAULT_IMDS_ENDPOINT.to_string()),
                    client_id: s.client_id.clone(),
                }),
            }

            if let Some(program) = &s.azure_cli {
                sources.push(CredentialSource::AzureCli {
                    program: program.clone(),
                    tenant_id: s.tenant_id.clone(),
                });
            }

            tracing::debug!(
                "Credential chain: {}",
                sources.iter().map(|s| s.label()).collect::<Vec<_>>().join(" -> ")
            );
            sources
        })
    }

    async fn acquire_from(&self, source: &CredentialSource, scope: &str) -> Result<String> {
        match source {
            CredentialSource::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
                authority_host,
            } => {
                self.client_credentials(
                    authority_host,
                    tenant_id,
                    client_id,
                    Some(client_secret),
                    None,
                    scope,
                )
                .await
            }
            CredentialSource::WorkloadIdentity {
                tenant_id,
                client_id,
                token_file,
                authority_host,
            } => {
                // The projected token is rotated on disk, so read it per request.
                let assertion = tokio::fs::read_to_string(token_file).await.map_err(|e| {
                    SessionError::Authentication(format!(
                        "cannot read federated token {}: {}",
                        token_file.display(),
                        e
                    ))
                })?;
                self.client_credentials(
                    authority_host,
                    tenant_id,
                    client_id,
                    None,
                    Some(assertion.trim().to_string()),
                    scope,
                )
                .await
            }
            CredentialSource::AppServiceIdentity {
                endpoint,
                header,
                client_id,
            } => {
                let mut query = vec![
                    ("api-version", "2019-08-01".to_string()),
                    ("resource", resource_for(scope).to_string()),
                ];
                if let Some(id) = client_id {
                    query.push(("client_id", id.clone()));
                }
                let request = self
                    .http
                    .get(endpoint)
                    .query(&query)
                    .header("X-IDENTITY-HEADER", header);
                self.managed_identity_token(request).await
            }
            CredentialSource::InstanceMetadata { endpoint, client_id } => {
                let mut query = vec![
                    ("api-version", "2018-02-01".to_string()),
                    ("resource", resource_for(scope).to_string()),
                ];
                if let Some(id) = client_id {
                    query.push(("client_id", id.clone()));
                }
                let request = self
                    .http
                    .get(endpoint)
                    .query(&query)
                    .header("Metadata", "true")
                    .timeout(IMDS_PROBE_TIMEOUT);
                self.managed_identity_token(request).await
            }
            CredentialSource::AzureCli { program, tenant_id } => {
                azure_cli_token(program, tenant_id.as_deref(), scope).await
            }
        }
    }

    async fn client_credentials(
        &self,
        authority_host: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: Option<&String>,
        client_assertion: Option<String>,
        scope: &str,
    ) -> Result<String> {
        let token_url = TokenUrl::new(format!(
            "{}/{}/oauth2/v2.0/token",
            authority_host.trim_end_matches('/'),
            tenant_id
        ))
        .map_err(|e| SessionError::Authentication(format!("invalid token url: {}", e)))?;

        let mut client = BasicClient::new(ClientId::new(client_id.to_string()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(token_url);
        if let Some(secret) = client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        let mut request = client
            .exchange_client_credentials()
            .add_scope(Scope::new(scope.to_string()));
        if let Some(assertion) = client_assertion {
            request = request
                .add_extra_param("client_assertion_type", CLIENT_ASSERTION_TYPE)
                .add_extra_param("client_assertion", assertion);
        }

        let token = request
            .request_async(&self.http)
            .await
            .map_err(|e| SessionError::Authentication(e.to_string()))?;

        Ok(token.access_token().secret().clone())
    }

    async fn managed_identity_token(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Authentication(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Authentication(format!("{}: {}", status, body)));
        }

        let token: ManagedIdentityToken = response
            .json()
            .await
            .map_err(|e| SessionError::Authentication(format!("invalid token response: {}", e)))?;
        Ok(token.access_token)
    }
}

impl Default for DefaultCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenProvider for DefaultCredential {
    async fn acquire(&self, scope: &str) -> Result<String> {
        let mut failures = Vec::new();

        for source in self.sources() {
            match self.acquire_from(source, scope).await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    tracing::debug!("{} credential unavailable: {}", source.label(), e);
                    failures.push(format!("{}: {}", source.label(), e));
                }
            }
        }

        Err(SessionError::Authentication(format!(
            "no credential in the chain produced a token for {} ({})",
            scope,
            failures.join("; ")
        )))
    }
}

/// Ask a logged in Azure CLI for a token.
async fn azure_cli_token(program: &str, tenant_id: Option<&str>, scope: &str) -> Result<String> {
    let mut command = tokio::process::Command::new(program);
    command
        .args(["account", "get-access-token", "--output", "json", "--scope", scope])
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);
    if let Some(tenant) = tenant_id {
        command.args(["--tenant", tenant]);
    }

    let output = tokio::time::timeout(CLI_TIMEOUT, command.output())
        .await
        .map_err(|_| SessionError::Authentication(format!("{} timed out", program)))?
        .map_err(|e| SessionError::Authentication(format!("cannot run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SessionError::Authentication(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    let token: CliToken = serde_json::from_slice(&output.stdout)
        .map_err(|e| SessionError::Authentication(format!("invalid cli token output: {}", e)))?;
    Ok(token.access_token)
}

/// Managed identity endpoints take a resource, not a `/.default` scope.
fn resource_for(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn scopes_are_distinct() {
        assert_ne!(DYNAMIC_SESSIONS_SCOPE, STORAGE_SCOPE);
        assert_eq!(resource_for(DYNAMIC_SESSIONS_SCOPE), "https://dynamicsessions.io");
        assert_eq!(resource_for("https://example.com"), "https://example.com");
    }

    #[tokio::test]
    async fn static_provider_returns_token() {
        let provider = StaticTokenProvider::new("abc");
        assert_eq!(provider.acquire(DYNAMIC_SESSIONS_SCOPE).await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn client_secret_credential_requests_scope() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("dynamicsessions.io"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "secret-token",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;

        let credential = DefaultCredential::with_settings(CredentialSettings {
            tenant_id: Some("tenant-1".into()),
            client_id: Some("client-1".into()),
            client_secret: Some("shh".into()),
            authority_host: Some(server.uri()),
            imds_endpoint: Some(format!("{}/imds", server.uri())),
            ..Default::default()
        });

        let token = credential.acquire(DYNAMIC_SESSIONS_SCOPE).await.unwrap();
        assert_eq!(token, "secret-token");
    }

    #[tokio::test]
    async fn falls_through_to_app_service_identity() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/msi/token"))
            .and(header("X-IDENTITY-HEADER", "id-header"))
            .and(query_param("resource", "https://dynamicsessions.io"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "mi-token",
                "expires_on": "1700000000"
            })))
            .mount(&server)
            .await;

        let credential = DefaultCredential::with_settings(CredentialSettings {
            identity_endpoint: Some(format!("{}/msi/token", server.uri())),
            identity_header: Some("id-header".into()),
            ..Default::default()
        });

        let token = credential.acquire(DYNAMIC_SESSIONS_SCOPE).await.unwrap();
        assert_eq!(token, "mi-token");
    }

    #[tokio::test]
    async fn exhausted_chain_is_authentication_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/imds"))
            .respond_with(ResponseTemplate::new(400).set_body_string("no identity"))
            .mount(&server)
            .await;

        let credential = DefaultCredential::with_settings(CredentialSettings {
            imds_endpoint: Some(format!("{}/imds", server.uri())),
            ..Default::default()
        });

        let err = credential.acquire(DYNAMIC_SESSIONS_SCOPE).await.unwrap_err();
        assert!(matches!(err, SessionError::Authentication(_)));
        assert!(err.to_string().contains("instance metadata"));
    }

    #[tokio::test]
    async fn workload_identity_sends_federated_assertion() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-1"))
            .and(body_string_contains("client_assertion=projected-jwt"))
            .and(body_string_contains("jwt-bearer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "federated-token",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("azure-identity-token");
        std::fs::write(&token_file, "projected-jwt\n").unwrap();

        let credential = DefaultCredential::with_settings(CredentialSettings {
            tenant_id: Some("tenant-1".into()),
            client_id: Some("client-1".into()),
            authority_host: Some(server.uri()),
            federated_token_file: Some(token_file),
            imds_endpoint: Some(format!("{}/imds", server.uri())),
            ..Default::default()
        });

        let token = credential.acquire(DYNAMIC_SESSIONS_SCOPE).await.unwrap();
        assert_eq!(token, "federated-token");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn azure_cli_is_last_resort() {
        use std::os::unix::fs::PermissionsExt;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/imds"))
            .respond_with(ResponseTemplate::new(400).set_body_string("no identity"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("az");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             case \"$*\" in\n\
             *\"--scope https://dynamicsessions.io/.default\"*) \
             echo '{\"accessToken\":\"cli-token\",\"expiresOn\":\"2030-01-01 00:00:00.000000\"}' ;;\n\
             *) echo \"not logged in\" >&2; exit 1 ;;\n\
             esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let settings = CredentialSettings {
            imds_endpoint: Some(format!("{}/imds", server.uri())),
            azure_cli: Some(script.display().to_string()),
            ..Default::default()
        };
        let credential = DefaultCredential::with_settings(settings.clone());
        assert_eq!(credential.acquire(DYNAMIC_SESSIONS_SCOPE).await.unwrap(), "cli-token");

        let err = credential.acquire(STORAGE_SCOPE).await.unwrap_err();
        assert!(err.to_string().contains("not logged in"));

        let missing = DefaultCredential::with_settings(CredentialSettings {
            azure_cli: Some(dir.path().join("no-such-az").display().to_string()),
            ..settings
        });
        let err = missing.acquire(DYNAMIC_SESSIONS_SCOPE).await.unwrap_err();
        assert!(matches!(err, SessionError::Authentication(_)));
        assert!(err.to_string().contains("azure cli"));
    }
}
