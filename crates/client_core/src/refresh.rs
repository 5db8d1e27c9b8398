use std::sync::Arc;

use shared::domain::ExplanationMethod;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    analysis::normalize_explanation,
    service::ClassifierService,
    state::{SelectionToken, StateContainer},
    WorkflowEvent,
};

const EXPLANATION_FALLBACK_MESSAGE: &str = "Error generating explanation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    Failed,
    /// The user moved on before the response arrived; it was dropped.
    Discarded,
    /// No image or no prediction to explain.
    Skipped,
}

/// Re-fetches only the explanation when the selected method changes.
pub struct ExplanationRefresher {
    state: Arc<StateContainer>,
    service: Arc<dyn ClassifierService>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl ExplanationRefresher {
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

    /// Checks that the service can serve `requested`, falling back to
    /// Grad-CAM with a notice when SHAP is unavailable or unreachable.
    /// Returns `None` if the user picked again while the check was running.
    pub async fn resolve_method(
        &self,
        selection: SelectionToken,
        requested: ExplanationMethod,
    ) -> Option<ExplanationMethod> {
        let (method, notice) = if requested == ExplanationMethod::Shap {
            match self.service.capabilities().await {
                Ok(health) if health.shap_available => (requested, None),
                Ok(_) => (
                    ExplanationMethod::GradCam,
                    Some("SHAP is not available on the server; switched to Grad-CAM.".to_string()),
                ),
                Err(err) => {
                    warn!(error = %err, "capability check failed");
                    (
                        ExplanationMethod::GradCam,
                        Some(
                            "Could not confirm SHAP support on the server; switched to Grad-CAM."
                                .to_string(),
                        ),
                    )
                }
            }
        } else {
            (requested, None)
        };

        if let Some(notice) = &notice {
            info!(%notice, "falling back to gradcam");
        }
        if !self.state.resolve_method_selection(selection, method, notice) {
            info!(%requested, "discarding superseded method selection");
            return None;
        }
        Some(method)
    }

    pub async fn refresh(&self, method: ExplanationMethod) -> RefreshOutcome {
        let Some((token, file, predicted_class)) = self.state.begin_refresh() else {
            return RefreshOutcome::Skipped;
        };
        info!(file = %file.name, %method, run = token.run, "refreshing explanation");

        let explanation = self
            .service
            .explain(&file, method, Some(&predicted_class))
            .await
            .and_then(|response| normalize_explanation(method, response));

        match explanation {
            Ok(explanation) => {
                if self.state.apply_explanation(token, explanation) {
                    self.state.finish_analysis(token, None);
                    return RefreshOutcome::Updated;
                }
                info!(
                    file = %file.name,
                    %method,
                    "discarding stale explanation"
                );
                self.state.finish_analysis(token, None);
                let _ = self.events.send(WorkflowEvent::ExplanationDiscarded { method });
                RefreshOutcome::Discarded
            }
            Err(err) => {
                let message = format!(
                    "{} explanation failed: {}",
                    method.display_name(),
                    err.user_message(EXPLANATION_FALLBACK_MESSAGE)
                );
                if !self.state.finish_analysis(token, Some(message.clone())) {
                    info!(
                        file = %file.name,
                        %method,
                        error = %err,
                        "discarding stale explanation failure"
                    );
                    return RefreshOutcome::Discarded;
                }
                warn!(file = %file.name, %method, error = %err, "explanation refresh failed");
                let _ = self.events.send(WorkflowEvent::Error(message));
                RefreshOutcome::Failed
            }
        }
    }
}
