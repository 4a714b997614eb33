//! V4L2 camera through GStreamer.
//!
//! The pipeline tees the camera into two branches:
//! - display: `textoverlay name=label_overlay` into the display sink
//! - inference: a leaky two-buffer queue, rescale to the frame geometry, and an
//!   `appsink` whose `new-sample` callback hands each frame to the sink
//!
//! The leaky queue and the single-buffer dropping appsink keep at most one frame
//! in flight; late frames are dropped here, never queued for the classifier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use gstreamer::prelude::*;

use super::{CameraConfig, CameraStats, FrameSink};
use crate::preprocess::FrameGeometry;

const LABEL_OVERLAY: &str = "label_overlay";
const FRAME_SINK: &str = "frame_sink";
const STARTUP_GRACE: Duration = Duration::from_secs(5);
const FRAME_GRACE: Duration = Duration::from_secs(2);

pub(super) struct GstreamerCamera {
    config: CameraConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    label_overlay: Option<gstreamer::Element>,
    delivered: Arc<AtomicU64>,
    last_frame_at: Arc<Mutex<Option<Instant>>>,
    started_at: Option<Instant>,
    last_error: Mutex<Option<String>>,
}

impl GstreamerCamera {
    pub(super) fn new(config: CameraConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = pipeline_description(&config)?;
        log::info!("camera: creating pipeline: {}", description);
        let pipeline = gstreamer::parse::launch(&description)
            .context("build camera pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("camera pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name(FRAME_SINK)
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        let label_overlay = pipeline.by_name(LABEL_OVERLAY);
        if label_overlay.is_none() {
            log::warn!("camera: no {} element; labels will not be drawn", LABEL_OVERLAY);
        }

        Ok(Self {
            config,
            pipeline,
            appsink,
            label_overlay,
            delivered: Arc::new(AtomicU64::new(0)),
            last_frame_at: Arc::new(Mutex::new(None)),
            started_at: None,
            last_error: Mutex::new(None),
        })
    }

    pub(super) fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<()> {
        let geometry = self.config.frame;
        let delivered = Arc::clone(&self.delivered);
        let last_frame_at = Arc::clone(&self.last_frame_at);
        self.appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    match sample_to_frame(&sample, geometry) {
                        Ok(frame) => {
                            sink.on_new_frame(&frame);
                            delivered.fetch_add(1, Ordering::Relaxed);
                            if let Ok(mut at) = last_frame_at.lock() {
                                *at = Some(Instant::now());
                            }
                        }
                        Err(e) => log::warn!("camera: dropping sample: {:#}", e),
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set camera pipeline to Playing")?;
        self.started_at = Some(Instant::now());
        log::info!("camera: streaming from {}", self.config.device);
        Ok(())
    }

    pub(super) fn stop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("camera: failed to stop pipeline: {}", e);
        }
        self.started_at = None;
    }

    pub(super) fn set_label_text(&self, text: &str) {
        if let Some(overlay) = &self.label_overlay {
            overlay.set_property("text", text);
        }
    }

    pub(super) fn is_healthy(&self) -> bool {
        self.poll_bus();
        if let Ok(error) = self.last_error.lock() {
            if let Some(error) = error.as_ref() {
                log::debug!("camera unhealthy: {}", error);
                return false;
            }
        }
        let Some(started_at) = self.started_at else {
            return false;
        };
        let last_frame_at = self.last_frame_at.lock().ok().and_then(|at| *at);
        match last_frame_at {
            Some(at) => at.elapsed() <= FRAME_GRACE,
            None => started_at.elapsed() <= STARTUP_GRACE,
        }
    }

    pub(super) fn stats(&self) -> CameraStats {
        CameraStats {
            frames_delivered: self.delivered.load(Ordering::Relaxed),
            device: self.config.device.clone(),
        }
    }

    fn poll_bus(&self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            let error = match message.view() {
                MessageView::Error(err) => Some(format!(
                    "gstreamer error from {:?}: {} ({:?})",
                    err.src().map(|s| s.path_string()),
                    err.error(),
                    err.debug()
                )),
                MessageView::Eos(..) => Some("gstreamer reached EOS".to_string()),
                _ => None,
            };
            if let Some(error) = error {
                log::error!("camera: {}", error);
                if let Ok(mut slot) = self.last_error.lock() {
                    *slot = Some(error);
                }
            }
        }
    }
}

impl Drop for GstreamerCamera {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

fn raw_format(channels: usize) -> Result<&'static str> {
    match channels {
        4 => Ok("RGBx"),
        3 => Ok("RGB"),
        1 => Ok("GRAY8"),
        other => bail!("no raw video format carries {} channels", other),
    }
}

fn pipeline_description(config: &CameraConfig) -> Result<String> {
    let format = raw_format(config.frame.channels)?;
    let display_sink = config
        .display
        .sink
        .as_deref()
        .unwrap_or("fakesink sync=false");
    Ok(format!(
        "v4l2src name=cam_src device={device} ! videoconvert ! videoscale ! \
         video/x-raw,width={dw},height={dh},format=RGB ! tee name=t_raw \
         t_raw. ! queue ! textoverlay name={overlay} font-desc=\"Sans, 24\" ! \
         videoconvert ! {display_sink} \
         t_raw. ! queue leaky=2 max-size-buffers=2 ! videoscale ! videoconvert ! \
         video/x-raw,width={fw},height={fh},format={format} ! \
         appsink name={sink} sync=false max-buffers=1 drop=true",
        device = config.device,
        dw = config.display.width,
        dh = config.display.height,
        overlay = LABEL_OVERLAY,
        display_sink = display_sink,
        fw = config.frame.width,
        fh = config.frame.height,
        format = format,
        sink = FRAME_SINK,
    ))
}

/// Copy a sample into a tightly packed frame, dropping row padding.
fn sample_to_frame(sample: &gstreamer::Sample, geometry: FrameGeometry) -> Result<Vec<u8>> {
    let buffer = sample.buffer().context("camera sample missing buffer")?;
    let caps = sample.caps().context("camera sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse camera caps as video info")?;

    let width = info.width() as usize;
    let height = info.height() as usize;
    if width != geometry.width || height != geometry.height {
        bail!(
            "camera delivered {}x{}, expected {}x{}",
            width,
            height,
            geometry.width,
            geometry.height
        );
    }
    let row_bytes = width * geometry.channels;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map camera buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return data
            .get(..row_bytes * height)
            .map(<[u8]>::to_vec)
            .context("camera buffer shorter than one frame");
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("camera buffer row is out of bounds")?,
        );
    }
    Ok(pixels)
}
