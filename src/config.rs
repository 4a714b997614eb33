use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{InputLayout, TensorSelector};
use crate::extract::Ranking;
use crate::ingest::{CameraConfig, DisplaySettings};
use crate::model::{ModelConfig, DEFAULT_INPUT_CHANNELS, DEFAULT_INPUT_SIDE};
use crate::preprocess::{FrameGeometry, Normalization};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_MODEL_PATH: &str = "mobilenet/mobilenet_v2_1.0_224.onnx";
const DEFAULT_LABEL_PATH: &str = "mobilenet/labels.txt";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_DISPLAY_WIDTH: u32 = 640;
const DEFAULT_DISPLAY_HEIGHT: u32 = 480;
const DEFAULT_DISPLAY_SINK: &str = "autovideosink";
const DEFAULT_LABEL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    display: Option<DisplayConfigFile>,
    label_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<usize>,
    height: Option<usize>,
    channels: Option<usize>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    labels: Option<PathBuf>,
    overlay_tensor: Option<TensorSelector>,
    overlay_channel: Option<usize>,
    input_side: Option<usize>,
    input_channels: Option<usize>,
    input_layout: Option<InputLayout>,
    mean: Option<f32>,
    std: Option<f32>,
    top_n: Option<usize>,
    threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    sink: Option<String>,
    headless: Option<bool>,
}

/// Runtime configuration for `rtclassd`.
///
/// Layered as defaults, then the file named by `RTCLASS_CONFIG`, then
/// `RTCLASS_*` environment overrides. Command-line flags are applied on top
/// by the binary.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub camera: CameraConfig,
    pub model: ModelConfig,
    /// How often the display label is refreshed from the latest result.
    pub label_interval: Duration,
}

impl ClassifierConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RTCLASS_CONFIG").ok();
        let path = config_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .map(Path::new);
        Self::load_from(path)
    }

    /// Like [`ClassifierConfig::load`], with an explicit file instead of
    /// `RTCLASS_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClassifierConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let model_file = file.model.unwrap_or_default();
        let display_file = file.display.unwrap_or_default();

        let frame = FrameGeometry {
            width: camera_file.width.unwrap_or(FrameGeometry::RGBX_224.width),
            height: camera_file.height.unwrap_or(FrameGeometry::RGBX_224.height),
            channels: camera_file
                .channels
                .unwrap_or(FrameGeometry::RGBX_224.channels),
        };

        let display_sink = if display_file.headless.unwrap_or(false) {
            None
        } else {
            Some(
                display_file
                    .sink
                    .unwrap_or_else(|| DEFAULT_DISPLAY_SINK.to_string()),
            )
        };
        let camera = CameraConfig {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            frame,
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            display: DisplaySettings {
                width: display_file.width.unwrap_or(DEFAULT_DISPLAY_WIDTH),
                height: display_file.height.unwrap_or(DEFAULT_DISPLAY_HEIGHT),
                sink: display_sink,
            },
        };

        let defaults = Normalization::default();
        let ranking_defaults = Ranking::default();
        let mut model = ModelConfig::new(
            model_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            model_file
                .labels
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LABEL_PATH)),
        );
        model.overlay = model_file.overlay_tensor;
        model.overlay_channel = model_file.overlay_channel.unwrap_or(0);
        model.frame = frame;
        model.normalization = Normalization {
            mean: model_file.mean.unwrap_or(defaults.mean),
            std: model_file.std.unwrap_or(defaults.std),
        };
        model.ranking = Ranking {
            top_n: model_file.top_n.unwrap_or(ranking_defaults.top_n),
            threshold: model_file.threshold.unwrap_or(ranking_defaults.threshold),
        };
        model.input_side = model_file.input_side.unwrap_or(DEFAULT_INPUT_SIDE);
        model.input_channels = model_file.input_channels.unwrap_or(DEFAULT_INPUT_CHANNELS);
        model.input_layout = model_file.input_layout.unwrap_or_default();

        let label_interval = Duration::from_millis(
            file.label_interval_ms
                .unwrap_or(DEFAULT_LABEL_INTERVAL_MS),
        );
        Ok(Self {
            camera,
            model,
            label_interval,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("RTCLASS_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(path) = std::env::var("RTCLASS_MODEL") {
            if !path.trim().is_empty() {
                self.model.model_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("RTCLASS_LABELS") {
            if !path.trim().is_empty() {
                self.model.label_path = PathBuf::from(path);
            }
        }
        // Set but empty disables the overlay.
        if let Ok(selector) = std::env::var("RTCLASS_OVERLAY_TENSOR") {
            self.model.overlay = TensorSelector::parse(&selector);
        }
        if let Ok(channel) = std::env::var("RTCLASS_OVERLAY_CHANNEL") {
            self.model.overlay_channel = channel
                .trim()
                .parse()
                .map_err(|_| anyhow!("RTCLASS_OVERLAY_CHANNEL must be a non-negative integer"))?;
        }
        if let Ok(interval) = std::env::var("RTCLASS_LABEL_INTERVAL_MS") {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("RTCLASS_LABEL_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.label_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    /// Check the assembled configuration. The binary calls this again after
    /// applying command-line flags.
    pub fn validate(&self) -> Result<()> {
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.frame.is_empty() {
            return Err(anyhow!(
                "frame geometry {}x{}x{} has a zero dimension",
                self.camera.frame.width,
                self.camera.frame.height,
                self.camera.frame.channels
            ));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if self.camera.display.width == 0 || self.camera.display.height == 0 {
            return Err(anyhow!("display size must be greater than zero"));
        }
        if self.model.input_side == 0 || self.model.input_channels == 0 {
            return Err(anyhow!("model input geometry must be greater than zero"));
        }
        let normalization = self.model.normalization;
        if !normalization.mean.is_finite() || !normalization.std.is_finite() {
            return Err(anyhow!("normalization mean and std must be finite"));
        }
        if normalization.std == 0.0 {
            return Err(anyhow!("normalization std must not be zero"));
        }
        if self.model.ranking.top_n == 0 {
            return Err(anyhow!("top_n must be at least 1"));
        }
        if !self.model.ranking.threshold.is_finite() {
            return Err(anyhow!("score threshold must be finite"));
        }
        if self.label_interval.is_zero() {
            return Err(anyhow!("label interval must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ClassifierConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
