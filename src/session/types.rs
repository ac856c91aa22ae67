//! Request, response and metadata types for the session pool API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base64 encoding of the PNG magic bytes. Results starting with it are images.
pub const PNG_BASE64_PREFIX: &str = "iVBOR";

/// Interpreter runtime behind a session pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    #[serde(alias = "nodejs", alias = "js")]
    JavaScript,
}

impl Language {
    /// Program sent when the caller passes empty code.
    pub fn default_program(&self) -> &'static str {
        match self {
            Language::Python => "print('no code provided')",
            Language::JavaScript => "console.log('no code provided')",
        }
    }

    pub fn default_options(&self) -> ExecutionOptions {
        match self {
            Language::Python => ExecutionOptions::default(),
            Language::JavaScript => ExecutionOptions {
                timeout: Some(60),
                enable_egress: Some(true),
            },
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Python => write!(f, "Python"),
            Language::JavaScript => write!(f, "JavaScript"),
        }
    }
}

/// Optional execution fields forwarded to the service as-is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Server-side timeout in seconds.
    pub timeout: Option<u64>,
    pub enable_egress: Option<bool>,
}

impl ExecutionOptions {
    /// Fill unset fields from `fallback`.
    pub fn or(self, fallback: ExecutionOptions) -> ExecutionOptions {
        ExecutionOptions {
            timeout: self.timeout.or(fallback.timeout),
            enable_egress: self.enable_egress.or(fallback.enable_egress),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ExecuteRequest<'a> {
    pub properties: ExecuteProperties<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExecuteProperties<'a> {
    pub identifier: &'a str,
    pub code_input_type: &'static str,
    pub execution_type: &'static str,
    pub code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_egress: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[default]
    #[serde(alias = "Succeeded")]
    Success,
    #[serde(alias = "Failed")]
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageTag {
    Image,
}

/// Inline image returned by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResult {
    pub base64_data: String,
    pub format: String,
    #[serde(rename = "type")]
    pub kind: ImageTag,
}

impl ImageResult {
    pub fn png(base64_data: impl Into<String>) -> Self {
        Self {
            base64_data: base64_data.into(),
            format: "png".to_string(),
            kind: ImageTag::Image,
        }
    }
}

/// The `result` field of an execution, after classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ExecutionOutput {
    Text(String),
    Image(ImageResult),
}

impl ExecutionOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ExecutionOutput::Text(text) => Some(text),
            ExecutionOutput::Image(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub result: ExecutionOutput,
    pub stdout: String,
    pub stderr: String,
    pub status: ExecutionStatus,
}

impl ExecutionResult {
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            result: ExecutionOutput::Text(String::new()),
            stdout: String::new(),
            stderr: stderr.into(),
            status: ExecutionStatus::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExecuteEnvelope {
    pub properties: Option<WireProperties>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireProperties {
    #[serde(default)]
    pub result: Option<WireResult>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub status: ExecutionStatus,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireResult {
    Text(String),
    Image(ImageResult),
    Other(serde_json::Value),
}

/// Decide the shape of a raw result.
///
/// The service has no content-type field for results, so a string is
/// treated as a PNG when it carries the base64 PNG signature.
pub(crate) fn classify_result(result: Option<WireResult>) -> ExecutionOutput {
    match result {
        Some(WireResult::Text(text)) if text.starts_with(PNG_BASE64_PREFIX) => {
            ExecutionOutput::Image(ImageResult::png(text))
        }
        Some(WireResult::Text(text)) => ExecutionOutput::Text(text),
        Some(WireResult::Image(image)) => ExecutionOutput::Image(image),
        Some(WireResult::Other(value)) => ExecutionOutput::Text(value.to_string()),
        None => ExecutionOutput::Text(String::new()),
    }
}

/// File stored in a session under `/mnt/data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileMetadata {
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub last_modified_time: Option<DateTime<Utc>>,
    #[serde(rename = "$id", default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileListEnvelope {
    pub value: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileEntry {
    pub properties: RemoteFileMetadata,
}

/// Upload body: raw bytes or a base64 string.
#[derive(Debug, Clone)]
pub enum UploadPayload {
    Bytes(Vec<u8>),
    Base64(String),
}
