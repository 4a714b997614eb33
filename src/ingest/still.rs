//! Still-image source.
//!
//! Decodes a JPEG/PNG once, resizes it to the frame geometry, and replays it
//! as a live feed. Useful for checking a model against a known picture
//! without a camera attached.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;

use super::synthetic::FramePump;
use super::{CameraConfig, CameraStats, FrameSink};
use crate::preprocess::FrameGeometry;

pub(super) struct StillImageSource {
    config: CameraConfig,
    frame: Arc<Vec<u8>>,
    pump: FramePump,
}

impl StillImageSource {
    pub(super) fn new(path: &str, config: CameraConfig) -> Result<Self> {
        let frame = load_frame(Path::new(path), config.frame)?;
        Ok(Self {
            config,
            frame: Arc::new(frame),
            pump: FramePump::new(),
        })
    }

    pub(super) fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<()> {
        let frame = Arc::clone(&self.frame);
        self.pump
            .start("still-image", self.config.target_fps, sink, move || {
                frame.as_ref().clone()
            })?;
        log::info!(
            "camera: replaying {} at {} fps",
            self.config.device,
            self.config.target_fps
        );
        Ok(())
    }

    pub(super) fn stop(&mut self) {
        self.pump.stop();
    }

    pub(super) fn is_healthy(&self) -> bool {
        self.pump.is_running()
    }

    pub(super) fn stats(&self) -> CameraStats {
        CameraStats {
            frames_delivered: self.pump.delivered(),
            device: self.config.device.clone(),
        }
    }
}

/// Decode `path` into an interleaved frame of `geometry`.
///
/// Three-channel geometries get RGB; four-channel get RGBA with the alpha
/// byte standing in for the padding byte of RGBx.
pub(super) fn load_frame(path: &Path, geometry: FrameGeometry) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let image = image::load_from_memory(&bytes)
        .with_context(|| format!("decode {}", path.display()))?;
    let width = u32::try_from(geometry.width).context("frame width overflow")?;
    let height = u32::try_from(geometry.height).context("frame height overflow")?;
    let resized = image.resize_exact(width, height, FilterType::Triangle);
    let pixels = match geometry.channels {
        3 => resized.to_rgb8().into_raw(),
        4 => resized.to_rgba8().into_raw(),
        1 => resized.to_luma8().into_raw(),
        other => bail!("still images cannot produce {}-channel frames", other),
    };
    Ok(pixels)
}
