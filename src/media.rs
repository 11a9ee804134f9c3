use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LLMError;

/// External collaborator that prepares media for provider limits.
///
/// The core only defines the seam; real resize/reformat logic lives with the
/// embedding application. The default adapter passes bytes through untouched.
#[async_trait]
pub trait MediaAdapter: Send + Sync {
    /// Resizes or re-encodes an image when it exceeds provider limits.
    ///
    /// Returns the (possibly unchanged) bytes and MIME type.
    ///
    /// # Errors
    ///
    /// Implementations may fail with [`LLMError::InvalidRequest`] when the
    /// payload cannot be made acceptable.
    async fn resize_image_if_needed(
        &self,
        bytes: Vec<u8>,
        mime_type: String,
    ) -> Result<(Vec<u8>, String), LLMError>;
}

/// Pass-through adapter used when no resizing collaborator is injected.
pub struct NoopMediaAdapter;

#[async_trait]
impl MediaAdapter for NoopMediaAdapter {
    async fn resize_image_if_needed(
        &self,
        bytes: Vec<u8>,
        mime_type: String,
    ) -> Result<(Vec<u8>, String), LLMError> {
        Ok((bytes, mime_type))
    }
}

/// Thread-safe handle to a media adapter.
pub type DynMediaAdapter = Arc<dyn MediaAdapter>;

/// Returns the default pass-through adapter.
pub fn noop_media_adapter() -> DynMediaAdapter {
    Arc::new(NoopMediaAdapter)
}
