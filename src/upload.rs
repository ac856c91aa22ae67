//! Chat file uploads.
//!
//! A file goes to the document index when one is configured, otherwise into
//! the conversation's session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Result, SessionError};
use crate::session::{decode_base64, ExecutionOptions, Language, RemoteFileMetadata, SessionPool, UploadPayload};

/// A vector index that can ingest uploaded documents.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Ingest a document, returning the ids of the stored chunks.
    async fn ingest(&self, filename: &str, bytes: Vec<u8>, mime: Option<&str>) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    /// Plain base64 or a `data:<mime>;base64,` URL.
    pub base64: String,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum UploadOutcome {
    Indexed { document_ids: Vec<String> },
    Sandbox { file: RemoteFileMetadata },
}

pub struct UploadRouter {
    pool: Arc<SessionPool>,
    index: Option<Arc<dyn DocumentIndex>>,
}

impl UploadRouter {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool, index: None }
    }

    pub fn with_index(mut self, index: Arc<dyn DocumentIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub async fn route(&self, request: UploadRequest) -> Result<UploadOutcome> {
        if request.filename.trim().is_empty() {
            return Err(SessionError::Validation("filename is required".to_string()));
        }
        let (mime, payload) = split_data_url(&request.base64);
        if payload.trim().is_empty() {
            return Err(SessionError::Validation("file content is required".to_string()));
        }

        match &self.index {
            Some(index) => {
                let bytes = decode_base64(payload)
                    .map_err(|e| SessionError::Validation(format!("invalid base64 payload: {}", e)))?;
                let document_ids = index.ingest(&request.filename, bytes, mime).await?;
                tracing::info!("Indexed {} into {} documents", request.filename, document_ids.len());
                Ok(UploadOutcome::Indexed { document_ids })
            }
            None => {
                let client = self.pool.client(
                    request.conversation_id.as_deref(),
                    Language::Python,
                    ExecutionOptions::default(),
                );
                let file = client
                    .upload_file(&request.filename, UploadPayload::Base64(payload.to_string()))
                    .await?;
                Ok(UploadOutcome::Sandbox { file })
            }
        }
    }
}

/// Split a `data:` URL into its mime type and base64 payload. Anything else
/// is returned unchanged with no mime type.
pub fn split_data_url(data: &str) -> (Option<&str>, &str) {
    let Some(rest) = data.strip_prefix("data:") else {
        return (None, data);
    };
    match rest.split_once(',') {
        Some((header, payload)) => {
            let mime = header.split(';').next().filter(|m| !m.is_empty());
            (mime, payload)
        }
        None => (None, data),
    }
}
