use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::debug;
use uuid::Uuid;

use crate::{error::PreviewError, state::UploadedFile};

const PREVIEW_URL_PREFIX: &str = "blob:neuroscan/";

/// A transient local reference to an uploaded file, used for previews.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewHandle {
    url: String,
}

impl PreviewHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub trait PreviewAllocator: Send + Sync {
    fn create(&self, file: &UploadedFile) -> Result<PreviewHandle, PreviewError>;
    fn revoke(&self, handle: &PreviewHandle);
}

/// Allocator for runtimes that cannot create preview handles.
pub struct UnsupportedPreviews;

impl PreviewAllocator for UnsupportedPreviews {
    fn create(&self, _file: &UploadedFile) -> Result<PreviewHandle, PreviewError> {
        Err(PreviewError::Unsupported)
    }

    fn revoke(&self, _handle: &PreviewHandle) {}
}

/// In-process registry mapping `blob:` style URLs to file contents.
#[derive(Default)]
pub struct PreviewRegistry {
    live: Mutex<HashMap<String, Arc<[u8]>>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self) -> MutexGuard<'_, HashMap<String, Arc<[u8]>>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        self.live().get(url).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.live().len()
    }
}

impl PreviewAllocator for PreviewRegistry {
    fn create(&self, file: &UploadedFile) -> Result<PreviewHandle, PreviewError> {
        let url = format!("{PREVIEW_URL_PREFIX}{}", Uuid::new_v4());
        self.live().insert(url.clone(), file.bytes.clone());
        debug!(url = %url, file = %file.name, "allocated preview handle");
        Ok(PreviewHandle { url })
    }

    fn revoke(&self, handle: &PreviewHandle) {
        if self.live().remove(&handle.url).is_some() {
            debug!(url = %handle.url, "revoked preview handle");
        }
    }
}
