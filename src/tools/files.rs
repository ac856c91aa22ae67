//! Session file tools
//!
//! Upload, download and list files in a conversation's session.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;

use crate::session::{Download, ExecutionOptions, Language, SessionClient, SessionPool, UploadPayload};

pub struct SessionFileTools {
    pool: Arc<SessionPool>,
    download_dir: PathBuf,
}

impl SessionFileTools {
    /// Local downloads are only ever written under `download_dir`.
    pub fn new(pool: Arc<SessionPool>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            download_dir: download_dir.into(),
        }
    }

    /// Map an agent supplied filename to a path under the download directory.
    fn local_path(&self, local_filename: &str) -> Result<PathBuf, String> {
        let escapes = Path::new(local_filename)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(format!(
                "Invalid local filename {}: must be relative to the download directory",
                local_filename
            ));
        }

        let safe_name = sanitize_filename(local_filename);
        if safe_name.is_empty() {
            return Err(format!("Invalid local filename {}", local_filename));
        }
        Ok(self.download_dir.join(safe_name))
    }

    fn client(&self, conversation_id: Option<&str>) -> SessionClient {
        // File operations do not depend on the runtime.
        self.pool
            .client(conversation_id, Language::Python, ExecutionOptions::default())
    }

    pub async fn upload(
        &self,
        remote_filename: String,
        base64: String,
        conversation_id: Option<String>,
    ) -> Result<String, String> {
        let metadata = self
            .client(conversation_id.as_deref())
            .upload_file(&remote_filename, UploadPayload::Base64(base64))
            .await
            .map_err(|e| format!("Failed to upload {}: {}", remote_filename, e))?;

        serde_json::to_string_pretty(&metadata).map_err(|e| e.to_string())
    }

    pub async fn download(
        &self,
        remote_filename: String,
        local_filename: Option<String>,
        conversation_id: Option<String>,
    ) -> Result<String, String> {
        let local = local_filename.as_deref().map(|name| self.local_path(name)).transpose()?;
        let client = self.client(conversation_id.as_deref());
        let download = client
            .download_file(&remote_filename, local.as_deref())
            .await
            .map_err(|e| format!("Failed to download {}: {}", remote_filename, e))?;

        match download {
            Download::Saved(path) => Ok(format!("Downloaded {} to {}", remote_filename, path.display())),
            Download::Stream(mut stream) => {
                let mut body = Vec::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| format!("Failed to download {}: {}", remote_filename, e))?;
                    body.extend_from_slice(&chunk);
                }

                let content = match String::from_utf8(body) {
                    Ok(text) => json!({ "filename": remote_filename, "encoding": "utf-8", "content": text }),
                    Err(e) => {
                        use base64::Engine;
                        let encoded = base64::engine::general_purpose::STANDARD.encode(e.into_bytes());
                        json!({ "filename": remote_filename, "encoding": "base64", "content": encoded })
                    }
                };
                Ok(content.to_string())
            }
        }
    }

    pub async fn list(&self, conversation_id: Option<String>) -> Result<String, String> {
        let files = self
            .client(conversation_id.as_deref())
            .list_files()
            .await
            .map_err(|e| format!("Failed to list files: {}", e))?;

        if files.is_empty() {
            return Ok("No files in session.".to_string());
        }

        let lines: Vec<String> = files
            .iter()
            .map(|f| match &f.last_modified_time {
                Some(modified) => format!("- {} ({} bytes, modified {})", f.filename, f.size, modified.to_rfc3339()),
                None => format!("- {} ({} bytes)", f.filename, f.size),
            })
            .collect();
        Ok(format!("**Session Files:**\n{}", lines.join("\n")))
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
