//! facegate-capture — Runs guided liveness captures against a camera.
//!
//! [`CaptureController`] paces the burst, issues pose and challenge prompts,
//! collects frames from a [`CameraHandle`] and submits the result once through
//! a [`Verifier`]. Location is gathered beside capture by [`GeoTracker`].

pub mod camera;
pub mod controller;
pub mod geo;
pub mod sinks;
pub mod verifier;

pub use camera::CameraHandle;
pub use controller::{CaptureController, CaptureSessionHandle, OverlapPolicy};
pub use geo::{GeoProvider, GeoTracker, StaticGeo};
pub use sinks::{LogStatus, LogVoice, SilentVoice, StatusSink, VoicePrompt};
pub use verifier::{HttpVerifier, Verifier};
