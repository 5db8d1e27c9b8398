use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the service on non-success statuses.
///
/// `detail` is usually a string, but request validation failures report a
/// list of field errors instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ApiError {
    pub fn message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown explanation method: {0}")]
    UnknownMethod(String),
    #[error("explanation response did not include an image")]
    MissingExplanationImage,
    #[error("explanation image is not valid base64: {0}")]
    InvalidImageEncoding(String),
}
