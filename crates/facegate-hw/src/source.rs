//! The frame-source seam between capture logic and camera hardware.

use thiserror::Error;

/// An encoded image produced by one grab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub data: Vec<u8>,
    /// MIME type of `data`.
    pub content_type: &'static str,
}

impl CapturedImage {
    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            data,
            content_type: "image/jpeg",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// This grab failed; later grabs may succeed.
    #[error("frame grab failed: {0}")]
    Transient(String),
    /// The source is gone; no later grab can succeed.
    #[error("frame source disconnected: {0}")]
    Disconnected(String),
}

/// Something that yields camera frames one at a time.
///
/// Grabs are never issued concurrently. `Ok(None)` means no usable frame was
/// available on this call (dark frame, empty buffer, end of a replay).
pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<Option<CapturedImage>, SourceError>;

    fn describe(&self) -> String {
        "frame source".to_string()
    }
}

impl<F> FrameSource for F
where
    F: FnMut() -> Option<CapturedImage> + Send,
{
    fn grab(&mut self) -> Result<Option<CapturedImage>, SourceError> {
        Ok(self())
    }

    fn describe(&self) -> String {
        "frame grabber function".to_string()
    }
}
