//! HTTP client for a single dynamic session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;

use crate::artifacts::{ArtifactStore, PersistOutcome};
use crate::auth::{TokenProvider, DYNAMIC_SESSIONS_SCOPE};
use crate::error::{Result, SessionError};
use crate::user_agent::user_agent;

use super::decode_base64;
use super::types::{
    classify_result, ExecuteEnvelope, ExecuteProperties, ExecuteRequest, ExecutionOptions,
    ExecutionOutput, ExecutionResult, FileListEnvelope, ImageResult, Language, RemoteFileMetadata,
    UploadPayload,
};
use super::url::build_url;

/// Result of [`SessionClient::download_file`].
pub enum Download {
    /// The file body, streamed from the service.
    Stream(BoxStream<'static, Result<Bytes>>),
    /// The file was written to this local path.
    Saved(PathBuf),
}

impl UploadPayload {
    /// Build a payload from optional parts; exactly one must be present.
    pub fn from_parts(bytes: Option<Vec<u8>>, base64: Option<String>) -> Result<Self> {
        match (bytes, base64) {
            (Some(bytes), None) => Ok(UploadPayload::Bytes(bytes)),
            (None, Some(base64)) => Ok(UploadPayload::Base64(base64)),
            (None, None) => Err(SessionError::Validation("no data provided to upload".to_string())),
            (Some(_), Some(_)) => Err(SessionError::Validation(
                "provide either raw bytes or base64 data, not both".to_string(),
            )),
        }
    }

    fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            UploadPayload::Bytes(bytes) => Ok(bytes),
            UploadPayload::Base64(data) => decode_base64(&data)
                .map_err(|e| SessionError::Validation(format!("invalid base64 payload: {}", e))),
        }
    }
}

/// Client bound to one session id.
///
/// Every call acquires a fresh token from the provider.
pub struct SessionClient {
    http: reqwest::Client,
    endpoint: String,
    session_id: String,
    language: Language,
    options: ExecutionOptions,
    credentials: Arc<dyn TokenProvider>,
    artifacts: Arc<ArtifactStore>,
}

impl SessionClient {
    pub fn new(
        endpoint: impl Into<String>,
        session_id: impl Into<String>,
        credentials: Arc<dyn TokenProvider>,
        artifacts: Arc<ArtifactStore>,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(SessionError::Configuration(
                "AZURE_POOL_MANAGEMENT_ENDPOINT must be defined".to_string(),
            ));
        }

        Ok(Self::from_parts(
            reqwest::Client::new(),
            endpoint,
            session_id.into(),
            credentials,
            artifacts,
        ))
    }

    pub(crate) fn from_parts(
        http: reqwest::Client,
        endpoint: String,
        session_id: String,
        credentials: Arc<dyn TokenProvider>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            http,
            endpoint,
            session_id,
            language: Language::Python,
            options: Language::Python.default_options(),
            credentials,
            artifacts,
        }
    }

    /// Switch runtime; resets the execution options to that runtime's defaults.
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self.options = language.default_options();
        self
    }

    /// Override execution options. Unset fields keep their current value.
    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options.or(self.options);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    fn url(&self, relative_path: &str) -> String {
        build_url(&self.endpoint, &self.session_id, relative_path)
    }

    async fn authorized(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.credentials.acquire(DYNAMIC_SESSIONS_SCOPE).await?;
        Ok(request.bearer_auth(token).header(USER_AGENT, user_agent()))
    }

    /// Run `code` in the session.
    ///
    /// Transport failures and error statuses come back as a `Failure`
    /// result, not as `Err`. Authentication and malformed responses are
    /// errors.
    pub async fn execute(&self, code: &str) -> Result<ExecutionResult> {
        let url = self.url("code/execute");
        let code = if code.is_empty() {
            self.language.default_program()
        } else {
            code
        };

        let payload = ExecuteRequest {
            properties: ExecuteProperties {
                identifier: &self.session_id,
                code_input_type: "inline",
                execution_type: "synchronous",
                code,
                timeout: self.options.timeout,
                enable_egress: self.options.enable_egress,
            },
        };

        tracing::info!("Running {} code in session {}", self.language, self.session_id);
        tracing::debug!("POST {}", url);

        let request = self.authorized(self.http.post(&url)).await?.json(&payload);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Execution request failed: {}", e);
                return Ok(ExecutionResult::failure(format!(
                    "Error: Failed to execute the provided code. {}",
                    e
                )));
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to read execution response: {}", e);
                return Ok(ExecutionResult::failure(format!(
                    "Error: Failed to execute the provided code. {}",
                    e
                )));
            }
        };

        if !status.is_success() {
            tracing::warn!("Session pool returned {} for execute", status);
            return Ok(ExecutionResult::failure(format!(
                "Error: Failed to execute the provided code. Session pool returned {}: {}",
                status, body
            )));
        }

        self.normalize(&body).await
    }

    async fn normalize(&self, body: &str) -> Result<ExecutionResult> {
        let envelope: ExecuteEnvelope = serde_json::from_str(body).map_err(|e| {
            SessionError::Protocol(format!("invalid execute response ({}): {}", e, body))
        })?;

        let properties = envelope.properties.ok_or_else(|| {
            SessionError::Protocol(format!("no properties found in response: {}", body))
        })?;

        let result = match classify_result(properties.result) {
            ExecutionOutput::Image(image) => ExecutionOutput::Text(self.offload_image(image).await),
            text => text,
        };

        Ok(ExecutionResult {
            result,
            stdout: properties.stdout,
            stderr: properties.stderr,
            status: properties.status,
        })
    }

    /// Replace an inline image with a markdown link to the persisted file.
    async fn offload_image(&self, image: ImageResult) -> String {
        let link = match decode_base64(&image.base64_data) {
            Ok(bytes) => match self.artifacts.persist(bytes, &image.format).await {
                PersistOutcome::Persisted(reference) => reference.link(self.artifacts.public_root()),
                PersistOutcome::PersistenceFailed(reason) => {
                    tracing::warn!(
                        "Image result from session {} was not saved: {}",
                        self.session_id,
                        reason
                    );
                    String::new()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Image result from session {} is not valid base64: {}",
                    self.session_id,
                    e
                );
                String::new()
            }
        };

        format!("![Download Image]({})", link)
    }

    /// Upload a file into the session's `/mnt/data`.
    pub async fn upload_file(
        &self,
        remote_filename: &str,
        payload: UploadPayload,
    ) -> Result<RemoteFileMetadata> {
        if remote_filename.is_empty() {
            return Err(SessionError::Validation("remote filename is required".to_string()));
        }
        let bytes = payload.into_bytes()?;
        let size = bytes.len();

        let url = self.url("files/upload");
        tracing::debug!("POST {} ({} bytes)", url, size);

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(remote_filename.to_string()),
        );

        let response = self
            .authorized(self.http.post(&url))
            .await?
            .multipart(form)
            .send()
            .await
            .map_err(|e| SessionError::transport(format!("Failed to upload {}", remote_filename), e))?;

        let files = self.file_list(response, remote_filename).await?;
        let metadata = files.into_iter().next().ok_or_else(|| {
            SessionError::Protocol(format!("upload of {} returned no file metadata", remote_filename))
        })?;

        tracing::info!(
            "Uploaded {} ({} bytes) to session {}",
            metadata.filename,
            size,
            self.session_id
        );
        Ok(metadata)
    }

    /// Download a file from the session.
    ///
    /// With `local_filename` the body is written there; otherwise it is
    /// returned as a stream.
    pub async fn download_file(
        &self,
        remote_filename: &str,
        local_filename: Option<&Path>,
    ) -> Result<Download> {
        let encoded: Vec<String> = remote_filename
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let url = self.url(&format!("files/content/{}", encoded.join("/")));
        tracing::debug!("GET {}", url);

        let response = self
            .authorized(self.http.get(&url))
            .await?
            .send()
            .await
            .map_err(|e| SessionError::transport(format!("Failed to download {}", remote_filename), e))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Err(SessionError::Remote {
                status: status.as_u16(),
                body: format!("no content returned for {}", remote_filename),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let context = format!("Failed to download {}", remote_filename);
        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| SessionError::transport(context.clone(), e)))
            .boxed();

        let Some(local) = local_filename else {
            return Ok(Download::Stream(stream));
        };

        save_stream(stream, local).await?;

        tracing::info!("Downloaded {} to {}", remote_filename, local.display());
        Ok(Download::Saved(local.to_path_buf()))
    }

    /// List files in the session, in service order.
    pub async fn list_files(&self) -> Result<Vec<RemoteFileMetadata>> {
        let url = self.url("files");
        tracing::debug!("GET {}", url);

        let response = self
            .authorized(self.http.get(&url))
            .await?
            .send()
            .await
            .map_err(|e| SessionError::transport("Failed to list session files", e))?;

        self.file_list(response, "file list").await
    }

    async fn file_list(
        &self,
        response: reqwest::Response,
        what: &str,
    ) -> Result<Vec<RemoteFileMetadata>> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::transport(format!("Failed to read {} response", what), e))?;

        if !status.is_success() {
            return Err(SessionError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: FileListEnvelope = serde_json::from_str(&body).map_err(|e| {
            SessionError::Protocol(format!("invalid {} response ({}): {}", what, e, body))
        })?;
        Ok(envelope.value.into_iter().map(|entry| entry.properties).collect())
    }
}

/// Write `stream` to `local`. A partially written file is removed on error.
async fn save_stream(mut stream: BoxStream<'static, Result<Bytes>>, local: &Path) -> Result<()> {
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(local).await?;

    let written: Result<()> = async {
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(e) = written {
        drop(file);
        if let Err(remove) = tokio::fs::remove_file(local).await {
            tracing::warn!("Failed to remove partial download {}: {}", local.display(), remove);
        }
        return Err(e);
    }
    Ok(())
}
