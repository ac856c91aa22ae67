//! Dynamic session pool client.
//!
//! A session is a remote, stateful interpreter sandbox. [`SessionPool`] holds
//! what every session shares (endpoint, credentials, artifact store, scope
//! registry) and hands out [`SessionClient`]s bound to one session id.

pub mod client;
pub mod pool;
pub mod registry;
pub mod types;
pub mod url;

pub use client::{Download, SessionClient};
pub use pool::SessionPool;
pub use registry::{SessionRegistry, DEFAULT_SCOPE};
pub use types::{
    ExecutionOptions, ExecutionOutput, ExecutionResult, ExecutionStatus, ImageResult, Language,
    RemoteFileMetadata, UploadPayload,
};

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

/// Standard alphabet, padding optional. Interpreters are not consistent
/// about trailing `=`.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode base64, ignoring embedded whitespace and missing padding.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    LENIENT_BASE64.decode(compact.as_bytes())
}
