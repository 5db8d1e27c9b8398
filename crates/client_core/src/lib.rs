use std::sync::Arc;

use anyhow::{Context, Result};
use shared::domain::{BatchProgress, ExplanationMethod};
use tokio::sync::broadcast;
use tracing::{info, warn};

pub mod analysis;
pub mod batch;
pub mod config;
pub mod error;
pub mod preview;
pub mod refresh;
pub mod service;
pub mod state;
pub mod upload;

pub use analysis::{AnalysisOrchestrator, AnalysisOutcome};
pub use batch::BatchProcessor;
pub use config::{load_settings, ClientSettings};
pub use error::{PreviewError, ServiceError, UploadError};
pub use preview::{PreviewAllocator, PreviewHandle, PreviewRegistry, UnsupportedPreviews};
pub use refresh::{ExplanationRefresher, RefreshOutcome};
pub use service::{ClassifierService, HttpClassifierService, MissingClassifierService};
pub use state::{SelectionToken, StateContainer, UploadedFile, WorkflowState};
pub use upload::UploadController;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// An upload was accepted; the presentation layer should show the analysis view.
    NavigateToAnalysis,
    AnalysisFinished,
    ExplanationDiscarded { method: ExplanationMethod },
    BatchProgress(BatchProgress),
    BatchFinished(BatchProgress),
    Error(String),
}

/// Wires the state container and the orchestration components together.
pub struct Workflow {
    state: Arc<StateContainer>,
    service: Arc<dyn ClassifierService>,
    upload: UploadController,
    analysis: AnalysisOrchestrator,
    refresher: ExplanationRefresher,
    batch: BatchProcessor,
    events: broadcast::Sender<WorkflowEvent>,
}

impl Workflow {
    /// Builds the HTTP-backed workflow. An empty service URL yields a
    /// workflow whose every call fails as unavailable.
    pub fn from_settings(settings: &ClientSettings) -> Result<Self> {
        let service: Arc<dyn ClassifierService> = if settings.api_base_url.trim().is_empty() {
            warn!("no classification service configured");
            Arc::new(MissingClassifierService)
        } else {
            let base_url = settings.base_url()?;
            let service = HttpClassifierService::new(base_url, settings.request_timeout())
                .context("failed to build classification service client")?;
            Arc::new(service)
        };
        Ok(Self::new_with_dependencies(
            service,
            Arc::new(PreviewRegistry::new()),
            settings.batch_concurrency,
        ))
    }

    pub fn new_with_dependencies(
        service: Arc<dyn ClassifierService>,
        previews: Arc<dyn PreviewAllocator>,
        batch_concurrency: usize,
    ) -> Self {
        let state = Arc::new(StateContainer::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            upload: UploadController::new(state.clone(), previews, events.clone()),
            analysis: AnalysisOrchestrator::new(state.clone(), service.clone(), events.clone()),
            refresher: ExplanationRefresher::new(state.clone(), service.clone(), events.clone()),
            batch: BatchProcessor::new(
                state.clone(),
                service.clone(),
                events.clone(),
                batch_concurrency,
            ),
            state,
            service,
            events,
        }
    }

    pub fn state(&self) -> &Arc<StateContainer> {
        &self.state
    }

    pub fn snapshot(&self) -> WorkflowState {
        self.state.snapshot()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub fn preview_url(&self) -> Option<String> {
        self.upload.preview_url()
    }

    /// Queries service capabilities once at startup. On failure the default
    /// label set stays in place and every method is assumed available.
    pub async fn initialize(&self) -> bool {
        match self.service.capabilities().await {
            Ok(health) => {
                let replaced = self.state.replace_available_classes(health.classes);
                info!(
                    replaced,
                    shap_available = health.shap_available,
                    "loaded service capabilities"
                );
                true
            }
            Err(err) => {
                warn!(error = %err, "capability query failed; using default labels");
                false
            }
        }
    }

    pub fn upload(&self, file: UploadedFile) -> Result<(), UploadError> {
        self.upload.accept(file)
    }

    pub async fn analyze(&self) -> AnalysisOutcome {
        self.analysis.run().await
    }

    /// Changes the explanation method. When an image and a prediction are
    /// present, only the explanation is fetched again. A selection that the
    /// user replaced while its capability check was running has no effect.
    pub async fn select_method(&self, requested: ExplanationMethod) -> Option<RefreshOutcome> {
        let selection = self.state.begin_method_selection(requested)?;
        let method = self.refresher.resolve_method(selection, requested).await?;
        let snapshot = self.state.snapshot();
        if snapshot.uploaded_file.is_none() || snapshot.prediction.is_none() {
            return None;
        }
        // A fallback can land back on the method already on screen.
        if snapshot
            .explanation
            .as_ref()
            .is_some_and(|explanation| explanation.method == method)
        {
            return None;
        }
        Some(self.refresher.refresh(method).await)
    }

    /// Fetches the explanation again for the current method, keeping the
    /// prediction.
    pub async fn retry_explanation(&self) -> RefreshOutcome {
        let method = self.state.snapshot().selected_method;
        self.refresher.refresh(method).await
    }

    pub async fn run_batch(&self, files: Vec<UploadedFile>) -> BatchProgress {
        self.batch.run(files).await
    }

    pub fn remove_image(&self) -> bool {
        self.upload.remove()
    }

    pub fn reset(&self) -> bool {
        self.upload.reset()
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
