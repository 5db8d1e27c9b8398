use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Response of the explain endpoint.
///
/// Older service builds name the image field `explanation_image`; both are
/// accepted here and collapsed by [`ExplainResponse::into_image`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplainResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation_image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_class: Option<String>,
}

impl ExplainResponse {
    pub fn into_image(self) -> Result<String, ProtocolError> {
        self.explanation_image_base64
            .filter(|image| !image.is_empty())
            .or(self.explanation_image.filter(|image| !image.is_empty()))
            .ok_or(ProtocolError::MissingExplanationImage)
    }
}

fn default_shap_available() -> bool {
    true
}

/// Response of the health/capabilities endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default = "default_shap_available")]
    pub shap_available: bool,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: None,
            classes: Vec::new(),
            shap_available: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explain_response_prefers_canonical_field() {
        let response: ExplainResponse = serde_json::from_str(
            r#"{"explanation_image_base64":"new","explanation_image":"old"}"#,
        )
        .expect("parse");
        assert_eq!(response.into_image().expect("image"), "new");
    }

    #[test]
    fn explain_response_accepts_legacy_field() {
        let response: ExplainResponse = serde_json::from_str(
            r#"{"method":"gradcam","explanation_image":"legacy","predicted_class":"glioma"}"#,
        )
        .expect("parse");
        assert_eq!(response.into_image().expect("image"), "legacy");
    }

    #[test]
    fn explain_response_without_image_is_an_error() {
        let response: ExplainResponse =
            serde_json::from_str(r#"{"method":"lime"}"#).expect("parse");
        assert_eq!(
            response.into_image(),
            Err(ProtocolError::MissingExplanationImage)
        );
    }

    #[test]
    fn health_response_defaults_assume_all_methods() {
        let health: HealthResponse =
            serde_json::from_str(r#"{"status":"running"}"#).expect("parse");
        assert!(health.classes.is_empty());
        assert!(health.shap_available);
    }
}
