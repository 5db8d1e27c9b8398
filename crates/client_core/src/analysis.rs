//! Two-phase predict → explain orchestration for the uploaded image.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use shared::{
    domain::{ExplanationMethod, ExplanationResult, PredictionResult},
    protocol::ExplainResponse,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    error::ServiceError,
    service::ClassifierService,
    state::{RunToken, StateContainer},
    WorkflowEvent,
};

pub(crate) const ANALYSIS_FALLBACK_MESSAGE: &str = "Error processing image";
const NO_IMAGE_MESSAGE: &str = "Upload an image before starting analysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Completed,
    /// Predict failed; any earlier prediction is left in place.
    PredictFailed,
    /// Predict succeeded but explain failed; the prediction is kept.
    ExplainFailed,
    /// The image or run changed while a call was in flight.
    Superseded,
    NoImage,
}

/// Rejects predict payloads that parsed but cannot be displayed.
pub(crate) fn validate_prediction(
    prediction: PredictionResult,
) -> Result<PredictionResult, ServiceError> {
    if prediction.predicted_class.trim().is_empty() {
        return Err(ServiceError::Decode(
            "prediction response has an empty predicted_class".into(),
        ));
    }
    if !prediction.confidence.is_finite() {
        return Err(ServiceError::Decode(
            "prediction response has a non-numeric confidence".into(),
        ));
    }
    Ok(prediction)
}

/// Collapses the explain payload into one canonical, verified image field.
pub(crate) fn normalize_explanation(
    method: ExplanationMethod,
    response: ExplainResponse,
) -> Result<ExplanationResult, ServiceError> {
    let image = response.into_image()?;
    STANDARD
        .decode(image.trim())
        .map_err(|e| ServiceError::Decode(format!("explanation image is not valid base64: {e}")))?;
    Ok(ExplanationResult { method, image })
}

pub struct AnalysisOrchestrator {
    state: Arc<StateContainer>,
    service: Arc<dyn ClassifierService>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl AnalysisOrchestrator {
    pub fn new(
        state: Arc<StateContainer>,
        service: Arc<dyn ClassifierService>,
        events: broadcast::Sender<WorkflowEvent>,
    ) -> Self {
        Self {
            state,
            service,
            events,
        }
    }

    pub async fn run(&self) -> AnalysisOutcome {
        let Some((token, file)) = self.state.begin_analysis() else {
            self.state.set_last_error(NO_IMAGE_MESSAGE);
            return AnalysisOutcome::NoImage;
        };
        let method = self.state.snapshot().selected_method;
        info!(file = %file.name, run = token.run, "starting analysis");

        let prediction = match self
            .service
            .predict(&file, method)
            .await
            .and_then(validate_prediction)
        {
            Ok(prediction) => prediction,
            Err(err) => {
                warn!(file = %file.name, error = %err, "predict failed");
                let message = err.user_message(ANALYSIS_FALLBACK_MESSAGE);
                return self.fail(token, message, AnalysisOutcome::PredictFailed);
            }
        };

        let predicted_class = prediction.predicted_class.clone();
        if !self.state.apply_prediction(token, prediction) {
            info!(file = %file.name, run = token.run, "discarding superseded prediction");
            return AnalysisOutcome::Superseded;
        }

        // The method may have changed while predict was in flight.
        let method = self.state.snapshot().selected_method;
        let explanation = self
            .service
            .explain(&file, method, Some(&predicted_class))
            .await
            .and_then(|response| normalize_explanation(method, response));

        match explanation {
            Ok(explanation) => {
                if !self.state.apply_explanation(token, explanation) {
                    info!(
                        file = %file.name,
                        %method,
                        "discarding superseded explanation"
                    );
                    let _ = self.events.send(WorkflowEvent::ExplanationDiscarded { method });
                    self.state.finish_analysis(token, None);
                    return AnalysisOutcome::Superseded;
                }
                if !self.state.finish_analysis(token, None) {
                    return AnalysisOutcome::Superseded;
                }
                info!(
                    file = %file.name,
                    %method,
                    %predicted_class,
                    "analysis finished"
                );
                let _ = self.events.send(WorkflowEvent::AnalysisFinished);
                AnalysisOutcome::Completed
            }
            Err(err) => {
                warn!(file = %file.name, %method, error = %err, "explain failed");
                let message = err.user_message(ANALYSIS_FALLBACK_MESSAGE);
                self.fail(token, message, AnalysisOutcome::ExplainFailed)
            }
        }
    }

    fn fail(
        &self,
        token: RunToken,
        message: String,
        outcome: AnalysisOutcome,
    ) -> AnalysisOutcome {
        if !self.state.finish_analysis(token, Some(message.clone())) {
            return AnalysisOutcome::Superseded;
        }
        let _ = self.events.send(WorkflowEvent::Error(message));
        outcome
    }
}
