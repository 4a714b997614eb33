use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use super::{CameraConfig, CameraStats, FrameSink};
use crate::preprocess::FrameGeometry;

/// Deterministic pattern generator standing in for a camera.
///
/// Most frames are a slowly scrolling gradient; every 50 frames the scene
/// shifts, simulating an object entering view.
pub struct SyntheticCamera {
    geometry: FrameGeometry,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticCamera {
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn next_frame(&mut self) -> Vec<u8> {
        self.frame_count += 1;
        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(37);
        }
        let len = self.geometry.byte_len().unwrap_or(0);
        let mut pixels = vec![0u8; len];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }
}

/// Background thread delivering produced frames to a sink at a fixed rate.
pub(super) struct FramePump {
    stop: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl FramePump {
    pub(super) fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    pub(super) fn start<F>(&mut self, name: &str, fps: u32, sink: Arc<dyn FrameSink>, mut produce: F) -> Result<()>
    where
        F: FnMut() -> Vec<u8> + Send + 'static,
    {
        if self.handle.is_some() {
            return Err(anyhow!("{} is already running", name));
        }
        if fps == 0 {
            return Err(anyhow!("{}: target fps must be at least 1", name));
        }
        let interval = Duration::from_secs(1) / fps;
        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);
        let delivered = Arc::clone(&self.delivered);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let started = Instant::now();
                    let frame = produce();
                    sink.on_new_frame(&frame);
                    delivered.fetch_add(1, Ordering::Relaxed);
                    if let Some(rest) = interval.checked_sub(started.elapsed()) {
                        std::thread::sleep(rest);
                    }
                }
            })
            .with_context(|| format!("spawn {} thread", name))?;
        self.handle = Some(handle);
        Ok(())
    }

    pub(super) fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("frame delivery thread panicked");
            }
        }
    }

    pub(super) fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub(super) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// `stub://` camera source.
pub(super) struct SyntheticSource {
    config: CameraConfig,
    pump: FramePump,
}

impl SyntheticSource {
    pub(super) fn new(config: CameraConfig) -> Self {
        Self {
            config,
            pump: FramePump::new(),
        }
    }

    pub(super) fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<()> {
        let mut camera = SyntheticCamera::new(self.config.frame);
        self.pump
            .start("synthetic-camera", self.config.target_fps, sink, move || {
                camera.next_frame()
            })?;
        log::info!(
            "camera: {} (synthetic) delivering {}x{}x{} at {} fps",
            self.config.device,
            self.config.frame.width,
            self.config.frame.height,
            self.config.frame.channels,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::CameraSource;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<usize>>,
    }

    impl FrameSink for RecordingSink {
        fn on_new_frame(&self, frame: &[u8]) {
            self.frames.lock().unwrap().push(frame.len());
        }
    }

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            frame: FrameGeometry {
                width: 8,
                height: 8,
                channels: 4,
            },
            target_fps: 200,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn synthetic_frames_match_geometry_and_change() {
        let mut camera = SyntheticCamera::new(FrameGeometry::RGBX_224);
        let first = camera.next_frame();
        let second = camera.next_frame();
        assert_eq!(first.len(), 224 * 224 * 4);
        assert_ne!(first, second);
        assert_eq!(camera.frames_generated(), 2);
    }

    #[test]
    fn stub_source_delivers_frames_until_stopped() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let mut source = CameraSource::new(stub_config())?;
        source.start(sink.clone())?;
        assert!(source.is_healthy());

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.frames.lock().unwrap().len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        source.stop();
        assert!(!source.is_healthy());

        let frames = sink.frames.lock().unwrap();
        assert!(frames.len() >= 3);
        assert!(frames.iter().all(|&len| len == 8 * 8 * 4));
        assert_eq!(source.stats().frames_delivered, frames.len() as u64);
        Ok(())
    }

    #[test]
    fn zero_fps_is_rejected() -> Result<()> {
        let mut config = stub_config();
        config.target_fps = 0;
        let mut source = CameraSource::new(config)?;
        assert!(source.start(Arc::new(RecordingSink::default())).is_err());
        Ok(())
    }

    #[test]
    fn empty_geometry_is_rejected() {
        let mut config = stub_config();
        config.frame.width = 0;
        assert!(CameraSource::new(config).is_err());
    }
}
