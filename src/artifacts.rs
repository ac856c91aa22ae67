//! Persistence for files produced by code execution.
//!
//! Artifacts go to blob storage when a storage account is configured and to
//! a local output directory otherwise. Failures never abort the execution
//! that produced the artifact; they come back as [`PersistOutcome::PersistenceFailed`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::{TokenProvider, STORAGE_SCOPE};
use crate::error::{Result, SessionError};
use crate::user_agent::user_agent;

const BLOB_API_VERSION: &str = "2021-08-06";

/// Where a persisted artifact can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRef {
    Local(PathBuf),
    Remote(String),
}

impl ArtifactRef {
    /// Link suitable for a chat message. Local paths are made relative to
    /// the public root they are served from.
    pub fn link(&self, public_root: &Path) -> String {
        match self {
            ArtifactRef::Local(path) => path
                .strip_prefix(public_root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/"),
            ArtifactRef::Remote(url) => url.clone(),
        }
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactRef::Local(path) => write!(f, "{}", path.display()),
            ArtifactRef::Remote(url) => write!(f, "{}", url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Persisted(ArtifactRef),
    PersistenceFailed(String),
}

/// Durable object storage addressed by name.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Base URL objects are served under.
    fn base_url(&self) -> &str;

    /// Store `bytes` as `name`, returning the object's URL.
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<String>;

    /// Fetch an object previously returned by [`ObjectStore::upload`].
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Block blob storage in a single container.
pub struct BlobStore {
    http: reqwest::Client,
    base_url: String,
    container: String,
    credentials: Arc<dyn TokenProvider>,
}

impl BlobStore {
    pub fn new(
        base_url: impl Into<String>,
        container: impl Into<String>,
        credentials: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            container: container.into(),
            credentials,
        }
    }

    /// Public endpoint for a storage account.
    pub fn account_url(account: &str) -> String {
        format!("https://{}.blob.core.windows.net", account)
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.container,
            urlencoding::encode(name)
        )
    }
}

#[async_trait]
impl ObjectStore for BlobStore {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        let token = self.credentials.acquire(STORAGE_SCOPE).await?;
        let url = self.object_url(name);

        let response = self
            .http
            .put(&url)
            .bearer_auth(token)
            .header("User-Agent", user_agent())
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", BLOB_API_VERSION)
            .body(bytes)
            .send()
            .await
            .map_err(|e| SessionError::transport("Blob upload failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        Ok(url)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let token = self.credentials.acquire(STORAGE_SCOPE).await?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("User-Agent", user_agent())
            .header("x-ms-version", BLOB_API_VERSION)
            .send()
            .await
            .map_err(|e| SessionError::transport("Blob download failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SessionError::transport("Blob download failed", e))?;
        Ok(bytes.to_vec())
    }
}

pub struct ArtifactStore {
    output_dir: PathBuf,
    public_root: PathBuf,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl ArtifactStore {
    /// Store that writes under `output_dir`.
    pub fn local(output_dir: impl Into<PathBuf>, public_root: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            public_root: public_root.into(),
            object_store: None,
        }
    }

    /// Send artifacts to `store` instead of the local directory.
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn public_root(&self) -> &Path {
        &self.public_root
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Persist `bytes` under a fresh `<uuid>.<extension>` name.
    pub async fn persist(&self, bytes: Vec<u8>, extension: &str) -> PersistOutcome {
        let filename = format!("{}.{}", uuid::Uuid::new_v4(), extension);

        let stored = match &self.object_store {
            Some(store) => store
                .upload(&filename, bytes)
                .await
                .map(ArtifactRef::Remote),
            None => self.write_local(&filename, &bytes).await.map(ArtifactRef::Local),
        };

        match stored {
            Ok(reference) => {
                tracing::info!("Saved artifact to {}", reference);
                PersistOutcome::Persisted(reference)
            }
            Err(e) => {
                tracing::warn!("Failed to persist artifact {}: {}", filename, e);
                PersistOutcome::PersistenceFailed(e.to_string())
            }
        }
    }

    /// Read back the bytes behind a reference.
    pub async fn resolve(&self, reference: &ArtifactRef) -> Result<Vec<u8>> {
        match reference {
            ArtifactRef::Local(path) => Ok(tokio::fs::read(path).await?),
            ArtifactRef::Remote(url) => match &self.object_store {
                Some(store) => store.download(url).await,
                None => Err(SessionError::Configuration(
                    "no object store configured to resolve remote artifacts".to_string(),
                )),
            },
        }
    }

    async fn write_local(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        if tokio::fs::metadata(&self.output_dir).await.is_err() {
            tokio::fs::create_dir_all(&self.output_dir).await?;
            tracing::info!("Created output directory {}", self.output_dir.display());
        }

        let path = self.output_dir.join(filename);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use wiremock::matchers::{header, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn local_persist_creates_directory_and_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let public = tmp.path().join("public");
        let output = public.join("tools").join("sessions");
        let store = ArtifactStore::local(&output, &public);

        let outcome = store.persist(b"\x89PNG data".to_vec(), "png").await;
        let reference = match outcome {
            PersistOutcome::Persisted(r) => r,
            other => panic!("expected persisted, got {other:?}"),
        };

        match &reference {
            ArtifactRef::Local(path) => {
                assert!(path.starts_with(&output));
                assert_eq!(path.extension().unwrap(), "png");
            }
            other => panic!("expected local reference, got {other:?}"),
        }
        assert!(output.is_dir());
        assert_eq!(store.resolve(&reference).await.unwrap(), b"\x89PNG data");
        assert!(reference.link(&public).starts_with("tools/sessions/"));
    }

    #[tokio::test]
    async fn local_persist_reports_failure() {
        let tmp = tempfile::tempdir().unwrap();
        // A file where the output directory should be.
        let blocker = tmp.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();
        let store = ArtifactStore::local(blocker.join("out"), tmp.path());

        let outcome = store.persist(b"data".to_vec(), "png").await;
        assert!(matches!(outcome, PersistOutcome::PersistenceFailed(_)));
    }

    #[tokio::test]
    async fn blob_persist_uploads_and_round_trips() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path_regex(r"^/files/[0-9a-f-]+\.png$"))
            .and(header("x-ms-blob-type", "BlockBlob"))
            .and(header("authorization", "Bearer storage-token"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path_regex(r"^/files/[0-9a-f-]+\.png$"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"blob bytes".to_vec()))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let blob = BlobStore::new(
            server.uri(),
            "files",
            Arc::new(StaticTokenProvider::new("storage-token")),
        );
        let store = ArtifactStore::local(tmp.path().join("out"), tmp.path())
            .with_object_store(Arc::new(blob));

        let reference = match store.persist(b"blob bytes".to_vec(), "png").await {
            PersistOutcome::Persisted(r) => r,
            other => panic!("expected persisted, got {other:?}"),
        };

        let url = match &reference {
            ArtifactRef::Remote(url) => url.clone(),
            other => panic!("expected remote reference, got {other:?}"),
        };
        assert!(url.starts_with(&format!("{}/files/", server.uri())));
        assert_eq!(reference.link(tmp.path()), url);
        assert_eq!(store.resolve(&reference).await.unwrap(), b"blob bytes");
        // The local directory is untouched when blob storage is configured.
        assert!(!tmp.path().join("out").exists());
    }

    #[tokio::test]
    async fn blob_failure_degrades() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("AuthorizationFailure"))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let blob = BlobStore::new(server.uri(), "files", Arc::new(StaticTokenProvider::new("t")));
        let store = ArtifactStore::local(tmp.path(), tmp.path()).with_object_store(Arc::new(blob));

        match store.persist(b"x".to_vec(), "png").await {
            PersistOutcome::PersistenceFailed(reason) => assert!(reason.contains("403")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn account_url() {
        assert_eq!(BlobStore::account_url("acct"), "https://acct.blob.core.windows.net");
    }
}
