//! Workflow state container.
//!
//! All mutations go through [`StateContainer`]; each named operation is applied
//! as one `watch` modification, so readers never observe a partial write.

use std::sync::Arc;

use chrono::Utc;
use shared::domain::{
    default_classes, BatchItem, BatchProgress, ExplanationMethod, ExplanationResult,
    PredictionResult,
};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A user-selected image and its declared metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub media_type: Option<String>,
    pub bytes: Arc<[u8]>,
}

impl UploadedFile {
    pub fn new(
        name: impl Into<String>,
        media_type: Option<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type,
            bytes: bytes.into(),
        }
    }

    /// Lowercased extension of the file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Identifies one analysis or explanation run against one uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToken {
    pub file_generation: u64,
    pub run: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchToken(pub u64);

/// Identifies one explanation-method selection by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionToken(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState {
    pub uploaded_file: Option<UploadedFile>,
    pub preview_url: Option<String>,
    pub prediction: Option<PredictionResult>,
    pub explanation: Option<ExplanationResult>,
    pub selected_method: ExplanationMethod,
    pub batch_items: Vec<BatchItem>,
    pub batch_progress: BatchProgress,
    pub analysis_busy: bool,
    pub batch_busy: bool,
    pub last_error: Option<String>,
    pub notice: Option<String>,
    pub available_classes: Vec<String>,
    classes_loaded: bool,
    file_generation: u64,
    analysis_run: u64,
    batch_run: u64,
    method_selection: u64,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            uploaded_file: None,
            preview_url: None,
            prediction: None,
            explanation: None,
            selected_method: ExplanationMethod::default(),
            batch_items: Vec::new(),
            batch_progress: BatchProgress::default(),
            analysis_busy: false,
            batch_busy: false,
            last_error: None,
            notice: None,
            available_classes: default_classes(),
            classes_loaded: false,
            file_generation: 0,
            analysis_run: 0,
            batch_run: 0,
            method_selection: 0,
        }
    }
}

impl WorkflowState {
    pub fn is_busy(&self) -> bool {
        self.analysis_busy || self.batch_busy
    }

    pub fn classes_loaded(&self) -> bool {
        self.classes_loaded
    }

    pub fn file_generation(&self) -> u64 {
        self.file_generation
    }

    fn run_token(&self) -> RunToken {
        RunToken {
            file_generation: self.file_generation,
            run: self.analysis_run,
        }
    }

    fn has_single_image_work(&self) -> bool {
        self.uploaded_file.is_some()
            || self.prediction.is_some()
            || self.explanation.is_some()
            || self.analysis_busy
    }
}

pub struct StateContainer {
    tx: watch::Sender<WorkflowState>,
}

impl Default for StateContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl StateContainer {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(WorkflowState::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> WorkflowState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.tx.subscribe()
    }

    /// Stream of snapshots, starting with the current one.
    pub fn updates(&self) -> WatchStream<WorkflowState> {
        WatchStream::new(self.tx.subscribe())
    }

    pub fn is_current(&self, token: RunToken) -> bool {
        self.tx.borrow().run_token() == token
    }

    pub fn set_uploaded_file(&self, file: UploadedFile, preview_url: impl Into<String>) {
        let preview_url = preview_url.into();
        self.tx.send_modify(|state| {
            state.file_generation += 1;
            state.uploaded_file = Some(file);
            state.preview_url = Some(preview_url);
            state.prediction = None;
            state.explanation = None;
            state.last_error = None;
            state.analysis_busy = false;
        });
    }

    /// Drops the current image together with everything derived from it.
    pub fn clear_uploaded_file(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if !state.has_single_image_work() {
                return false;
            }
            state.file_generation += 1;
            state.uploaded_file = None;
            state.preview_url = None;
            state.prediction = None;
            state.explanation = None;
            state.analysis_busy = false;
            true
        })
    }

    pub fn set_selected_method(&self, method: ExplanationMethod) -> bool {
        self.tx.send_if_modified(|state| {
            if state.selected_method == method {
                return false;
            }
            state.selected_method = method;
            true
        })
    }

    /// Records the user's method choice before it is confirmed. Returns
    /// `None` when `method` is already selected.
    pub fn begin_method_selection(&self, method: ExplanationMethod) -> Option<SelectionToken> {
        let mut selection = None;
        self.tx.send_if_modified(|state| {
            if state.selected_method == method {
                return false;
            }
            state.method_selection += 1;
            state.selected_method = method;
            selection = Some(SelectionToken(state.method_selection));
            true
        });
        selection
    }

    /// Settles a selection with the method the service can serve. Ignored
    /// once a newer selection or a reset has happened.
    pub fn resolve_method_selection(
        &self,
        selection: SelectionToken,
        method: ExplanationMethod,
        notice: Option<String>,
    ) -> bool {
        let mut current = false;
        self.tx.send_if_modified(|state| {
            if state.method_selection != selection.0 {
                return false;
            }
            current = true;
            if state.selected_method == method && state.notice == notice {
                return false;
            }
            state.selected_method = method;
            state.notice = notice;
            true
        });
        current
    }

    pub fn set_last_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_if_modified(|state| {
            if state.last_error.as_deref() == Some(message.as_str()) {
                return false;
            }
            state.last_error = Some(message);
            true
        });
    }

    pub fn clear_last_error(&self) -> bool {
        self.tx.send_if_modified(|state| state.last_error.take().is_some())
    }

    pub fn set_notice(&self, notice: Option<String>) -> bool {
        self.tx.send_if_modified(|state| {
            if state.notice == notice {
                return false;
            }
            state.notice = notice;
            true
        })
    }

    /// Starts a predict+explain run for the current image.
    pub fn begin_analysis(&self) -> Option<(RunToken, UploadedFile)> {
        let mut started = None;
        self.tx.send_if_modified(|state| {
            let Some(file) = state.uploaded_file.clone() else {
                return false;
            };
            state.analysis_run += 1;
            state.analysis_busy = true;
            state.last_error = None;
            started = Some((state.run_token(), file));
            true
        });
        started
    }

    /// Starts an explanation-only run. Requires an image and a prediction;
    /// the current explanation is cleared immediately.
    pub fn begin_refresh(&self) -> Option<(RunToken, UploadedFile, String)> {
        let mut started = None;
        self.tx.send_if_modified(|state| {
            let (Some(file), Some(prediction)) = (&state.uploaded_file, &state.prediction) else {
                return false;
            };
            let file = file.clone();
            let predicted_class = prediction.predicted_class.clone();
            state.analysis_run += 1;
            state.analysis_busy = true;
            state.last_error = None;
            state.explanation = None;
            started = Some((state.run_token(), file, predicted_class));
            true
        });
        started
    }

    pub fn apply_prediction(&self, token: RunToken, prediction: PredictionResult) -> bool {
        self.tx.send_if_modified(|state| {
            if state.run_token() != token || state.uploaded_file.is_none() {
                return false;
            }
            state.prediction = Some(prediction);
            true
        })
    }

    /// Writes an explanation only if the run is still current and the
    /// explanation was computed for the method the user has selected now.
    pub fn apply_explanation(&self, token: RunToken, explanation: ExplanationResult) -> bool {
        self.tx.send_if_modified(|state| {
            if state.run_token() != token
                || state.uploaded_file.is_none()
                || state.prediction.is_none()
                || state.selected_method != explanation.method
            {
                return false;
            }
            state.explanation = Some(explanation);
            true
        })
    }

    /// Ends a run. A superseded run leaves busy and error state alone; the
    /// run that replaced it owns them.
    pub fn finish_analysis(&self, token: RunToken, error: Option<String>) -> bool {
        self.tx.send_if_modified(|state| {
            if state.run_token() != token {
                return false;
            }
            state.analysis_busy = false;
            if error.is_some() {
                state.last_error = error;
            }
            true
        })
    }

    pub fn begin_batch(&self, total: usize) -> (BatchToken, BatchProgress) {
        let mut started = (BatchToken(0), BatchProgress::default());
        self.tx.send_modify(|state| {
            state.batch_run += 1;
            state.batch_items.clear();
            state.batch_progress = BatchProgress {
                done: 0,
                total,
                started_at: Some(Utc::now()),
                finished_at: None,
            };
            state.batch_busy = true;
            started = (BatchToken(state.batch_run), state.batch_progress);
        });
        started
    }

    pub fn push_batch_item(&self, token: BatchToken, item: BatchItem) -> Option<BatchProgress> {
        let mut progress = None;
        self.tx.send_if_modified(|state| {
            if state.batch_run != token.0 {
                return false;
            }
            state.batch_items.push(item);
            state.batch_progress.done += 1;
            progress = Some(state.batch_progress);
            true
        });
        progress
    }

    pub fn finish_batch(&self, token: BatchToken) -> Option<BatchProgress> {
        let mut progress = None;
        self.tx.send_if_modified(|state| {
            if state.batch_run != token.0 {
                return false;
            }
            state.batch_busy = false;
            state.batch_progress.finished_at = Some(Utc::now());
            progress = Some(state.batch_progress);
            true
        });
        progress
    }

    /// Replaces the label set wholesale. Only the first non-empty
    /// replacement in the container's lifetime is accepted.
    pub fn replace_available_classes(&self, classes: Vec<String>) -> bool {
        self.tx.send_if_modified(|state| {
            if state.classes_loaded || classes.is_empty() {
                return false;
            }
            state.available_classes = classes;
            state.classes_loaded = true;
            true
        })
    }

    /// Restores every field to its default except the label set. In-flight
    /// runs are invalidated so their late results are dropped.
    pub fn reset(&self) -> bool {
        self.tx.send_if_modified(|state| {
            let mut fresh = WorkflowState {
                available_classes: state.available_classes.clone(),
                classes_loaded: state.classes_loaded,
                file_generation: state.file_generation
                    + u64::from(state.has_single_image_work()),
                analysis_run: state.analysis_run,
                batch_run: state.batch_run + u64::from(state.batch_busy),
                method_selection: state.method_selection,
                ..WorkflowState::default()
            };
            if *state == fresh {
                return false;
            }
            fresh.method_selection += 1;
            *state = fresh;
            true
        })
    }
}
