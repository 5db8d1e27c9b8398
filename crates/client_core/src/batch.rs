use std::sync::Arc;

use futures::{stream, StreamExt};
use shared::domain::{BatchItem, BatchProgress};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    analysis::validate_prediction,
    service::ClassifierService,
    state::{StateContainer, UploadedFile},
    WorkflowEvent,
};

const BATCH_FALLBACK_MESSAGE: &str = "Failed";

/// Runs predict over a list of files through a bounded, order-preserving
/// queue. With a concurrency of 1, item i+1 is not sent before item i
/// resolves.
pub struct BatchProcessor {
    state: Arc<StateContainer>,
    service: Arc<dyn ClassifierService>,
    events: broadcast::Sender<WorkflowEvent>,
    concurrency: usize,
}

impl BatchProcessor {
    pub fn new(
        state: Arc<StateContainer>,
        service: Arc<dyn ClassifierService>,
        events: broadcast::Sender<WorkflowEvent>,
        concurrency: usize,
    ) -> Self {
        Self {
            state,
            service,
            events,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run(&self, files: Vec<UploadedFile>) -> BatchProgress {
        if files.is_empty() {
            return self.state.snapshot().batch_progress;
        }

        let method = self.state.snapshot().selected_method;
        let (token, mut progress) = self.state.begin_batch(files.len());
        info!(total = progress.total, concurrency = self.concurrency, "starting batch");
        let _ = self.events.send(WorkflowEvent::BatchProgress(progress));

        let mut results = stream::iter(files)
            .map(|file| {
                let service = Arc::clone(&self.service);
                async move {
                    let outcome = service
                        .predict(&file, method)
                        .await
                        .and_then(validate_prediction);
                    (file.name, outcome)
                }
            })
            .buffered(self.concurrency);

        while let Some((name, outcome)) = results.next().await {
            let item = match outcome {
                Ok(prediction) => BatchItem::predicted(name, prediction),
                Err(err) => {
                    warn!(file = %name, error = %err, "batch item failed");
                    BatchItem::failed(name, err.user_message(BATCH_FALLBACK_MESSAGE))
                }
            };
            match self.state.push_batch_item(token, item) {
                Some(updated) => {
                    progress = updated;
                    let _ = self.events.send(WorkflowEvent::BatchProgress(progress));
                }
                None => {
                    info!(done = progress.done, total = progress.total, "batch superseded");
                    return progress;
                }
            }
        }

        if let Some(finished) = self.state.finish_batch(token) {
            progress = finished;
            info!(total = progress.total, "batch finished");
            let _ = self.events.send(WorkflowEvent::BatchFinished(progress));
        }
        progress
    }
}
