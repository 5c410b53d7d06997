//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Layout};
use crate::source::{CapturedImage, FrameSource, SourceError};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    NotFound(String),
    #[error("camera {0} is in use by another process")]
    Busy(String),
    #[error("{0} is not a video capture device")]
    NotCapture(String),
    #[error("{path}: camera offers {fourcc}, need MJPG, YUYV or GREY")]
    UnsupportedFormat { path: String, fourcc: String },
    #[error("{path}: failed to {action}: {source}")]
    Io {
        path: String,
        action: &'static str,
        source: std::io::Error,
    },
}

fn io_error(path: &str, action: &'static str) -> impl FnOnce(std::io::Error) -> CameraError + '_ {
    move |source| CameraError::Io {
        path: path.to_string(),
        action,
        source,
    }
}

/// ENODEV means the device node vanished (USB camera unplugged); anything
/// else is worth retrying on the next tick.
fn dequeue_error(path: &str, e: std::io::Error) -> SourceError {
    if e.raw_os_error() == Some(libc::ENODEV) {
        SourceError::Disconnected(format!("{path}: {e}"))
    } else {
        SourceError::Transient(format!("failed to dequeue buffer: {e}"))
    }
}

/// A `/dev/video*` node that can capture.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    /// Card name reported by the driver.
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion-JPEG; each buffer is already a JPEG and is forwarded as-is.
    Mjpeg,
    /// YUYV 4:2:2 packed, converted to RGB before encoding.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"MJPG" => Some(Self::Mjpeg),
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Requested capture geometry and encoding.
#[derive(Debug, Clone)]
pub struct CameraOptions {
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    /// Report mostly-black frames as "no frame" instead of submitting them.
    pub skip_dark: bool,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            jpeg_quality: 80,
            skip_dark: true,
        }
    }
}

/// V4L2 camera device handle with a running mmap stream.
pub struct Camera {
    // Declared before `device` so the stream is torn down first.
    stream: MmapStream<'static>,
    _device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    options: CameraOptions,
}

impl Camera {
    /// Open `device_path` (e.g. `/dev/video0`) and start streaming.
    ///
    /// MJPG is requested so frames pass through without re-encoding; drivers
    /// that refuse it may answer with YUYV or GREY instead.
    pub fn open(device_path: &str, options: CameraOptions) -> Result<Self, CameraError> {
        let device = Device::with_path(device_path).map_err(|e| match e.raw_os_error() {
            Some(libc::ENOENT) => CameraError::NotFound(device_path.to_string()),
            Some(libc::EBUSY) => CameraError::Busy(device_path.to_string()),
            _ => io_error(device_path, "open device")(e),
        })?;

        let caps = device
            .query_caps()
            .map_err(io_error(device_path, "query capabilities"))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCapture(device_path.to_string()));
        }

        let mut requested = device.format().map_err(io_error(device_path, "read format"))?;
        requested.fourcc = FourCC::new(b"MJPG");
        requested.width = options.width;
        requested.height = options.height;
        let format = device
            .set_format(&requested)
            .map_err(io_error(device_path, "set format"))?;

        let pixel_format =
            PixelFormat::from_fourcc(format.fourcc).ok_or_else(|| CameraError::UnsupportedFormat {
                path: device_path.to_string(),
                fourcc: format!("{:?}", format.fourcc),
            })?;

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, 4)
            .map_err(io_error(device_path, "start mmap stream"))?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            driver = %caps.driver,
            width = format.width,
            height = format.height,
            ?pixel_format,
            "camera streaming"
        );

        Ok(Self {
            stream,
            _device: device,
            width: format.width,
            height: format.height,
            device_path: device_path.to_string(),
            pixel_format,
            options,
        })
    }

    /// Capture-capable devices among `/dev/video0` through `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).and_then(|dev| dev.query_caps()).ok()?;
                caps.capabilities
                    .contains(Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

impl FrameSource for Camera {
    fn grab(&mut self) -> Result<Option<CapturedImage>, SourceError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| dequeue_error(&self.device_path, e))?;

        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            tracing::debug!(seq = meta.sequence, "empty buffer");
            return Ok(None);
        }

        encode_buffer(
            &buf[..used],
            self.pixel_format,
            self.width,
            self.height,
            &self.options,
            meta.sequence,
        )
    }

    fn describe(&self) -> String {
        format!("{} ({}x{} {:?})", self.device_path, self.width, self.height, self.pixel_format)
    }
}

/// Turn one dequeued buffer into an uploadable JPEG, or `None` for a dark frame.
fn encode_buffer(
    buf: &[u8],
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
    options: &CameraOptions,
    sequence: u32,
) -> Result<Option<CapturedImage>, SourceError> {
    let transient = |e: frame::FrameError| SourceError::Transient(e.to_string());

    let jpeg = match pixel_format {
        PixelFormat::Mjpeg => {
            if frame::sniff_content_type(buf) != Some("image/jpeg") {
                return Err(SourceError::Transient("corrupt MJPG buffer".into()));
            }
            buf.to_vec()
        }
        PixelFormat::Yuyv => {
            if options.skip_dark {
                let luma = frame::yuyv_luma(buf, width, height).map_err(transient)?;
                if frame::is_dark_frame(&luma, 0.95) {
                    tracing::debug!(seq = sequence, "skipping dark frame");
                    return Ok(None);
                }
            }
            let rgb = frame::yuyv_to_rgb(buf, width, height).map_err(transient)?;
            frame::encode_jpeg(&rgb, width, height, Layout::Rgb, options.jpeg_quality)
                .map_err(transient)?
        }
        PixelFormat::Grey => {
            if options.skip_dark && frame::is_dark_frame(buf, 0.95) {
                tracing::debug!(seq = sequence, "skipping dark frame");
                return Ok(None);
            }
            frame::encode_jpeg(buf, width, height, Layout::Gray, options.jpeg_quality)
                .map_err(transient)?
        }
    };

    Ok(Some(CapturedImage::jpeg(jpeg)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_dark_yuyv_skipped() {
        let buf = vec![0u8; 8 * 4 * 2];
        let out = encode_buffer(&buf, PixelFormat::Yuyv, 8, 4, &CameraOptions::default(), 0).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_encode_dark_kept_when_disabled() {
        let options = CameraOptions {
            skip_dark: false,
            ..Default::default()
        };
        let buf = vec![0u8; 8 * 4];
        let out = encode_buffer(&buf, PixelFormat::Grey, 8, 4, &options, 0).unwrap();
        assert_eq!(out.unwrap().content_type, "image/jpeg");
    }

    #[test]
    fn test_encode_yuyv_to_jpeg() {
        let buf: Vec<u8> = (0..16 * 8 * 2).map(|i| 60 + (i % 120) as u8).collect();
        let out = encode_buffer(&buf, PixelFormat::Yuyv, 16, 8, &CameraOptions::default(), 3)
            .unwrap()
            .unwrap();
        assert_eq!(frame::sniff_content_type(&out.data), Some("image/jpeg"));
    }

    #[test]
    fn test_mjpeg_passthrough_and_corruption() {
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];
        let out = encode_buffer(&jpeg, PixelFormat::Mjpeg, 0, 0, &CameraOptions::default(), 0)
            .unwrap()
            .unwrap();
        assert_eq!(out.data, jpeg);

        let err = encode_buffer(&[1, 2, 3], PixelFormat::Mjpeg, 0, 0, &CameraOptions::default(), 0);
        assert!(matches!(err, Err(SourceError::Transient(_))));
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/does-not-exist-video", CameraOptions::default());
        assert!(matches!(err, Err(CameraError::NotFound(_))));
    }

    #[test]
    fn test_unplugged_camera_is_disconnect() {
        let gone = dequeue_error("/dev/video0", std::io::Error::from_raw_os_error(libc::ENODEV));
        assert!(matches!(gone, SourceError::Disconnected(msg) if msg.starts_with("/dev/video0")));

        let again = dequeue_error("/dev/video0", std::io::Error::from_raw_os_error(libc::EAGAIN));
        assert!(matches!(again, SourceError::Transient(_)));
    }
}
