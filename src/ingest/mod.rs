//! Frame sources.
//!
//! This module provides the sources that push camera frames into the
//! classifier:
//! - V4L2 cameras through a GStreamer pipeline (feature: camera-gstreamer)
//! - Still images replayed as a live feed (feature: ingest-image)
//! - Synthetic pattern source (`stub://`, testing)
//!
//! Every source delivers frames of the configured `FrameGeometry` to a
//! `FrameSink` on its own delivery thread, one frame at a time. Sources own
//! backpressure: when the sink is slower than the camera, frames are dropped
//! before they reach it.

#[cfg(feature = "camera-gstreamer")]
mod gstreamer;
#[cfg(feature = "ingest-image")]
mod still;
mod synthetic;

use std::sync::Arc;

use anyhow::Result;

use crate::preprocess::FrameGeometry;

#[cfg(feature = "camera-gstreamer")]
use self::gstreamer::GstreamerCamera;
#[cfg(feature = "ingest-image")]
use self::still::StillImageSource;
pub use self::synthetic::SyntheticCamera;
use self::synthetic::SyntheticSource;

/// Receives frames from a source's delivery thread.
pub trait FrameSink: Send + Sync {
    fn on_new_frame(&self, frame: &[u8]);
}

/// Configuration for a camera source.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraConfig {
    /// Device path (`/dev/video0`), `image://<path>`, or `stub://<name>`.
    pub device: String,
    /// Geometry of frames handed to the sink.
    pub frame: FrameGeometry,
    /// Delivery rate for synthetic and still sources.
    pub target_fps: u32,
    pub display: DisplaySettings,
}

/// Live video branch shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplaySettings {
    pub width: u32,
    pub height: u32,
    /// GStreamer sink element, or `None` to run headless.
    pub sink: Option<String>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            frame: FrameGeometry::default(),
            target_fps: 30,
            display: DisplaySettings::default(),
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            sink: Some("autovideosink".to_string()),
        }
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_delivered: u64,
    pub device: String,
}

/// Camera source.
///
/// Dispatches on the device string: `stub://` is synthetic, `image://` replays
/// a still image, anything else is opened as a V4L2 device through GStreamer.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-image")]
    Still(StillImageSource),
    #[cfg(feature = "camera-gstreamer")]
    Gstreamer(GstreamerCamera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.frame.is_empty() {
            anyhow::bail!("camera frame geometry {:?} has a zero dimension", config.frame);
        }
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticSource::new(config)),
            });
        }
        if let Some(path) = config.device.strip_prefix("image://") {
            #[cfg(feature = "ingest-image")]
            {
                let source = StillImageSource::new(path, config.clone())?;
                return Ok(Self {
                    backend: CameraBackend::Still(source),
                });
            }
            #[cfg(not(feature = "ingest-image"))]
            {
                anyhow::bail!("{}: still-image input requires the ingest-image feature", path)
            }
        }
        #[cfg(feature = "camera-gstreamer")]
        {
            Ok(Self {
                backend: CameraBackend::Gstreamer(GstreamerCamera::new(config)?),
            })
        }
        #[cfg(not(feature = "camera-gstreamer"))]
        {
            anyhow::bail!(
                "camera {} requires the camera-gstreamer feature",
                config.device
            )
        }
    }

    /// Start delivering frames to `sink`.
    pub fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.start(sink),
            #[cfg(feature = "ingest-image")]
            CameraBackend::Still(source) => source.start(sink),
            #[cfg(feature = "camera-gstreamer")]
            CameraBackend::Gstreamer(source) => source.start(sink),
        }
    }

    /// Stop delivery and release the device.
    pub fn stop(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.stop(),
            #[cfg(feature = "ingest-image")]
            CameraBackend::Still(source) => source.stop(),
            #[cfg(feature = "camera-gstreamer")]
            CameraBackend::Gstreamer(source) => source.stop(),
        }
    }

    /// Show `text` on the live video. Sources without a display ignore it.
    pub fn set_label_text(&self, text: &str) {
        // An empty label would hide the overlay box entirely.
        let text = if text.is_empty() { " - " } else { text };
        match &self.backend {
            CameraBackend::Synthetic(_) => log::trace!("label: {}", text),
            #[cfg(feature = "ingest-image")]
            CameraBackend::Still(_) => log::trace!("label: {}", text),
            #[cfg(feature = "camera-gstreamer")]
            CameraBackend::Gstreamer(source) => source.set_label_text(text),
        }
    }

    /// Check if the source is healthy.
    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "ingest-image")]
            CameraBackend::Still(source) => source.is_healthy(),
            #[cfg(feature = "camera-gstreamer")]
            CameraBackend::Gstreamer(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-image")]
            CameraBackend::Still(source) => source.stats(),
            #[cfg(feature = "camera-gstreamer")]
            CameraBackend::Gstreamer(source) => source.stats(),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}
