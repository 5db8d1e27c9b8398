use std::{collections::BTreeMap, fmt, str::FromStr};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Labels the service is known to report when it cannot be asked.
pub const DEFAULT_CLASSES: [&str; 4] = ["no_tumor", "glioma", "meningioma", "pituitary"];

pub fn default_classes() -> Vec<String> {
    DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationMethod {
    /// Gradient-weighted class activation mapping.
    #[default]
    GradCam,
    /// Additive feature attribution.
    Shap,
    /// Local surrogate model.
    Lime,
}

impl ExplanationMethod {
    pub const ALL: [ExplanationMethod; 3] = [Self::GradCam, Self::Shap, Self::Lime];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GradCam => "gradcam",
            Self::Shap => "shap",
            Self::Lime => "lime",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::GradCam => "Grad-CAM",
            Self::Shap => "SHAP",
            Self::Lime => "LIME",
        }
    }
}

impl fmt::Display for ExplanationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExplanationMethod {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gradcam" | "grad-cam" => Ok(Self::GradCam),
            "shap" => Ok(Self::Shap),
            "lime" => Ok(Self::Lime),
            other => Err(ProtocolError::UnknownMethod(other.to_string())),
        }
    }
}

/// Output of a successful predict call.
///
/// `probabilities` is keyed by label identifier and is not required to sum to
/// exactly 1.0, nor to cover exactly the known label set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: String,
    pub confidence: f64,
    #[serde(default)]
    pub probabilities: BTreeMap<String, f64>,
}

/// Output of a successful explain call, already normalized to one image field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationResult {
    pub method: ExplanationMethod,
    /// Base64-encoded raster image.
    pub image: String,
}

impl ExplanationResult {
    pub fn decode_image(&self) -> Result<Vec<u8>, ProtocolError> {
        STANDARD
            .decode(self.image.trim())
            .map_err(|e| ProtocolError::InvalidImageEncoding(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Predicted(PredictionResult),
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub name: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

impl BatchItem {
    pub fn predicted(name: impl Into<String>, prediction: PredictionResult) -> Self {
        Self {
            name: name.into(),
            outcome: BatchOutcome::Predicted(prediction),
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: BatchOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn prediction(&self) -> Option<&PredictionResult> {
        match &self.outcome {
            BatchOutcome::Predicted(prediction) => Some(prediction),
            BatchOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            BatchOutcome::Predicted(_) => None,
            BatchOutcome::Failed { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchProgress {
    pub done: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchProgress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.done == self.total
    }
}
