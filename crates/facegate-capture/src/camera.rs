use facegate_core::CaptureError;
use facegate_hw::{CapturedImage, FrameSource, SourceError};
use tokio::sync::{mpsc, oneshot};

type GrabResult = Result<Option<CapturedImage>, SourceError>;

/// Messages sent from the capture loop to the camera thread.
enum CameraRequest {
    Grab { reply: oneshot::Sender<GrabResult> },
}

/// Async handle to a frame source running on its own OS thread.
///
/// The thread serves one request at a time, so grabs never overlap even when
/// a caller gives up waiting on one and issues the next.
pub struct CameraHandle {
    tx: mpsc::Sender<CameraRequest>,
    description: String,
}

impl CameraHandle {
    /// Move `source` onto a dedicated thread and return a handle to it.
    pub fn spawn<S>(source: S) -> Result<Self, CaptureError>
    where
        S: FrameSource + 'static,
    {
        let description = source.describe();
        let (tx, mut rx) = mpsc::channel::<CameraRequest>(1);
        let mut source = source;

        std::thread::Builder::new()
            .name("facegate-camera".into())
            .spawn(move || {
                tracing::info!(source = %source.describe(), "camera thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        // Skip grabs whose tick already gave up waiting.
                        CameraRequest::Grab { reply } if reply.is_closed() => {
                            tracing::trace!("dropping stale grab request");
                        }
                        CameraRequest::Grab { reply } => {
                            // The requester may time out mid-grab; a dropped reply is fine.
                            let _ = reply.send(source.grab());
                        }
                    }
                }
                tracing::info!("camera thread exiting");
            })
            .map_err(|e| CaptureError::CameraUnavailable(format!("failed to spawn camera thread: {e}")))?;

        Ok(Self { tx, description })
    }

    /// Request one frame from the source.
    pub async fn grab(&self) -> GrabResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CameraRequest::Grab { reply: reply_tx })
            .await
            .map_err(|_| SourceError::Disconnected("camera thread exited".into()))?;
        reply_rx
            .await
            .map_err(|_| SourceError::Disconnected("camera thread exited".into()))?
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}
