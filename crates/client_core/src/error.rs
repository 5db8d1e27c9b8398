use shared::error::ProtocolError;
use thiserror::Error;

pub const UNSUPPORTED_FILE_MESSAGE: &str = "Please upload an image file (JPG, JPEG, PNG, WEBP)";

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("failed to reach classification service: {0}")]
    Transport(String),
    #[error("classification service returned status {status}")]
    Status { status: u16, detail: Option<String> },
    #[error("unexpected response from classification service: {0}")]
    Decode(String),
    #[error("classification service is unavailable")]
    Unavailable,
}

impl ServiceError {
    /// Detail message reported by the service itself, if it sent one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn user_message(&self, fallback: &str) -> String {
        self.detail()
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

impl From<ProtocolError> for ServiceError {
    fn from(value: ProtocolError) -> Self {
        Self::Decode(value.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreviewError {
    #[error("preview handles are not supported in this runtime")]
    Unsupported,
    #[error("failed to allocate preview handle: {0}")]
    Allocation(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("Please upload an image file (JPG, JPEG, PNG, WEBP)")]
    UnsupportedType { name: String },
    #[error("could not prepare image preview: {0}")]
    Preview(#[from] PreviewError),
}
