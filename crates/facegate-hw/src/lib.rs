//! facegate-hw — Frame sources for liveness capture.
//!
//! Provides the [`FrameSource`] seam, a V4L2 camera source producing JPEG
//! frames, and a directory replay source for kiosks and diagnostics.

pub mod camera;
pub mod frame;
pub mod replay;
pub mod source;

pub use camera::{Camera, CameraError, CameraOptions, DeviceInfo, PixelFormat};
pub use replay::DirectorySource;
pub use source::{CapturedImage, FrameSource, SourceError};
