use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    error::{UploadError, UNSUPPORTED_FILE_MESSAGE},
    preview::{PreviewAllocator, PreviewHandle},
    state::{StateContainer, UploadedFile},
    WorkflowEvent,
};

pub const ACCEPTED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Accepts a file when either its media type or its extension says image.
/// Drag-and-drop on some platforms reports no media type at all.
pub fn is_accepted_image(file: &UploadedFile) -> bool {
    let image_media_type = file
        .media_type
        .as_deref()
        .is_some_and(|media_type| media_type.trim().to_ascii_lowercase().starts_with("image/"));
    let image_extension = file
        .extension()
        .is_some_and(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()));
    image_media_type || image_extension
}

/// Validates incoming files and owns the single live preview handle.
pub struct UploadController {
    state: Arc<StateContainer>,
    previews: Arc<dyn PreviewAllocator>,
    current: Mutex<Option<PreviewHandle>>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl UploadController {
    pub fn new(
        state: Arc<StateContainer>,
        previews: Arc<dyn PreviewAllocator>,
        events: broadcast::Sender<WorkflowEvent>,
    ) -> Self {
        Self {
            state,
            previews,
            current: Mutex::new(None),
            events,
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<PreviewHandle>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn preview_url(&self) -> Option<String> {
        self.current().as_ref().map(|handle| handle.url().to_string())
    }

    pub fn accept(&self, file: UploadedFile) -> Result<(), UploadError> {
        if !is_accepted_image(&file) {
            warn!(file = %file.name, media_type = ?file.media_type, "rejected non-image upload");
            self.state.set_last_error(UNSUPPORTED_FILE_MESSAGE);
            return Err(UploadError::UnsupportedType { name: file.name });
        }

        let handle = match self.previews.create(&file) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(file = %file.name, error = %err, "preview allocation failed");
                let err = UploadError::from(err);
                self.state.set_last_error(err.to_string());
                return Err(err);
            }
        };

        let previous = self.current().replace(handle.clone());
        if let Some(previous) = previous {
            self.previews.revoke(&previous);
        }

        info!(file = %file.name, bytes = file.len(), "accepted upload");
        self.state.set_uploaded_file(file, handle.url());
        let _ = self.events.send(WorkflowEvent::NavigateToAnalysis);
        Ok(())
    }

    /// Releases the preview handle and clears the image and its results.
    pub fn remove(&self) -> bool {
        self.release();
        self.state.clear_uploaded_file()
    }

    /// Releases the preview handle and resets the whole workflow.
    pub fn reset(&self) -> bool {
        self.release();
        self.state.reset()
    }

    fn release(&self) {
        let handle = self.current().take();
        if let Some(handle) = handle {
            self.previews.revoke(&handle);
        }
    }
}
