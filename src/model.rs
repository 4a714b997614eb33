//! Classifier facade.
//!
//! `Model` is loaded once, then fed frames by the camera thread through
//! `on_new_frame` while a render thread polls `current_label` and
//! `current_overlay`. Each frame runs preprocess -> invoke -> extract ->
//! publish synchronously on the calling thread.
//!
//! Per-frame failures never escape: they are logged, counted, and leave the
//! previously published result in place.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};

use crate::engine::{
    self, resolve_classification_output, resolve_input, resolve_overlay, EngineInput,
    InferenceEngine, InputLayout, TensorId, TensorInfo, TensorSelector,
};
use crate::extract::{self, Classification, Ranking};
use crate::ingest::FrameSink;
use crate::labels::LabelSet;
use crate::overlay::OverlayImage;
use crate::preprocess::{self, FrameGeometry, Normalization};
use crate::shared::{InferenceResult, LatestResult, ResultSnapshot};

/// Square input side the model graph is built for.
pub const DEFAULT_INPUT_SIDE: usize = 224;
/// Channels the model graph expects.
pub const DEFAULT_INPUT_CHANNELS: usize = 3;

/// Everything needed to build a `Model`. Fixed once the model is loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub label_path: PathBuf,
    /// Overlay tensor; `None` disables the overlay.
    pub overlay: Option<TensorSelector>,
    pub overlay_channel: usize,
    pub frame: FrameGeometry,
    pub normalization: Normalization,
    pub ranking: Ranking,
    pub input_side: usize,
    pub input_channels: usize,
    pub input_layout: InputLayout,
}

impl ModelConfig {
    pub fn new(model_path: impl Into<PathBuf>, label_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            label_path: label_path.into(),
            overlay: None,
            overlay_channel: 0,
            frame: FrameGeometry::default(),
            normalization: Normalization::default(),
            ranking: Ranking::default(),
            input_side: DEFAULT_INPUT_SIDE,
            input_channels: DEFAULT_INPUT_CHANNELS,
            input_layout: InputLayout::default(),
        }
    }

    fn engine_input(&self) -> EngineInput {
        EngineInput {
            height: self.input_side,
            width: self.input_side,
            channels: self.input_channels,
            layout: self.input_layout,
        }
    }
}

/// What happened to one pushed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Empty input; nothing ran.
    Ignored,
    /// Preprocessing, inference or extraction failed; previous result kept.
    Discarded,
    /// A new result was published with this sequence number.
    Published(u64),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModelStats {
    pub frames_published: u64,
    pub frames_discarded: u64,
    pub frames_ignored: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    discarded: AtomicU64,
    ignored: AtomicU64,
}

struct ResolvedTensor {
    id: TensorId,
    info: TensorInfo,
}

pub struct Model {
    config: ModelConfig,
    labels: LabelSet,
    engine: Mutex<Box<dyn InferenceEngine>>,
    input: ResolvedTensor,
    classification: ResolvedTensor,
    overlay: Option<ResolvedTensor>,
    results: LatestResult,
    counters: Counters,
}

impl Model {
    /// Load labels and the model graph with the compiled-in backend.
    pub fn load(config: ModelConfig) -> Result<Self> {
        let labels = LabelSet::load(&config.label_path)?;
        let engine = engine::open(&config.model_path, config.engine_input())
            .with_context(|| format!("failed to load model {}", config.model_path.display()))?;
        Self::assemble(config, labels, engine)
    }

    /// Load labels and wrap an already-built engine.
    pub fn with_engine(config: ModelConfig, engine: Box<dyn InferenceEngine>) -> Result<Self> {
        let labels = LabelSet::load(&config.label_path)?;
        Self::assemble(config, labels, engine)
    }

    fn assemble(
        config: ModelConfig,
        labels: LabelSet,
        mut engine: Box<dyn InferenceEngine>,
    ) -> Result<Self> {
        engine
            .allocate()
            .with_context(|| format!("{} engine failed to allocate tensors", engine.name()))?;

        let input = resolved(engine.as_ref(), resolve_input(engine.as_ref())?)?;
        preprocess::check_compatible(config.frame, &input.info)
            .context("camera frames cannot feed the model input")?;

        let classification =
            resolved(engine.as_ref(), resolve_classification_output(engine.as_ref())?)?;
        if classification.info.element_count() > labels.len() {
            log::warn!(
                "classification tensor '{}' has {} scores but only {} labels",
                classification.info.name,
                classification.info.element_count(),
                labels.len()
            );
        }

        let overlay = match config.overlay.as_ref() {
            Some(selector) => match resolve_overlay(engine.as_ref(), selector) {
                Some(id) => Some(resolved(engine.as_ref(), id)?),
                None => None,
            },
            None => None,
        };

        log::info!(
            "model ready: engine={} input='{}' {:?} classification='{}' {:?} overlay={}",
            engine.name(),
            input.info.name,
            input.info.shape,
            classification.info.name,
            classification.info.shape,
            overlay
                .as_ref()
                .map_or_else(|| "disabled".to_string(), |o| format!("'{}'", o.info.name))
        );

        Ok(Self {
            config,
            labels,
            engine: Mutex::new(engine),
            input,
            classification,
            overlay,
            results: LatestResult::new(),
            counters: Counters::default(),
        })
    }

    /// Run one frame through the model and publish the result.
    pub fn on_new_frame(&self, frame: &[u8]) -> FrameOutcome {
        if frame.is_empty() {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            return FrameOutcome::Ignored;
        }
        match self.infer(frame) {
            Ok(result) => {
                if let Some(best) = result.classification {
                    log::debug!(
                        "class {} ({}) score {:.3}",
                        best.index,
                        self.labels.get(best.index).unwrap_or("?"),
                        best.confidence
                    );
                }
                let sequence = self.results.publish(result);
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Published(sequence)
            }
            Err(e) => {
                log::warn!("frame discarded: {:#}", e);
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Discarded
            }
        }
    }

    fn infer(&self, frame: &[u8]) -> Result<InferenceResult> {
        let mut engine = self
            .engine
            .lock()
            .map_err(|_| anyhow!("engine lock poisoned"))?;

        let buffer = engine.input_mut(self.input.id)?;
        preprocess::prepare(
            frame,
            self.config.frame,
            &self.input.info,
            buffer,
            self.config.normalization,
        )?;

        engine.invoke().context("inference failed")?;

        let classification = extract::extract_classification(
            &self.classification.info,
            engine.read(self.classification.id)?,
            self.config.ranking,
        )?;
        // A failed overlay read drops only the overlay.
        let overlay = self.overlay.as_ref().and_then(|tensor| {
            let data = engine
                .read(tensor.id)
                .map_err(|e| log::warn!("overlay read failed: {:#}", e))
                .ok()?;
            extract::extract_overlay(&tensor.info, data, self.config.overlay_channel)
        });
        Ok(InferenceResult {
            classification,
            overlay,
        })
    }

    /// `"<label> - <confidence>"` with two decimals, or empty when there is
    /// no classification or its index has no label.
    pub fn current_label(&self) -> String {
        self.results
            .snapshot()
            .classification
            .map(|best| self.format_label(best))
            .unwrap_or_default()
    }

    pub fn current_overlay(&self) -> Option<OverlayImage> {
        self.results.snapshot().overlay
    }

    pub fn snapshot(&self) -> ResultSnapshot {
        self.results.snapshot()
    }

    pub fn format_label(&self, classification: Classification) -> String {
        match self.labels.get(classification.index) {
            Some(label) => format!("{} - {:.2}", label, classification.confidence),
            None => String::new(),
        }
    }

    pub fn overlay_enabled(&self) -> bool {
        self.overlay.is_some()
    }

    pub fn stats(&self) -> ModelStats {
        ModelStats {
            frames_published: self.counters.published.load(Ordering::Relaxed),
            frames_discarded: self.counters.discarded.load(Ordering::Relaxed),
            frames_ignored: self.counters.ignored.load(Ordering::Relaxed),
        }
    }
}

impl FrameSink for Model {
    fn on_new_frame(&self, frame: &[u8]) {
        Model::on_new_frame(self, frame);
    }
}

fn resolved(engine: &dyn InferenceEngine, id: TensorId) -> Result<ResolvedTensor> {
    let info = engine
        .tensor(id)
        .cloned()
        .ok_or_else(|| anyhow!("{} engine has no tensor {}", engine.name(), id.0))?;
    Ok(ResolvedTensor { id, info })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ElementType, Quantization, StubEngine, TensorBuffer};
    use std::io::Write;
    use std::sync::{mpsc, Arc};
    use std::time::{Duration, Instant};
    use tempfile::NamedTempFile;

    const Q: Quantization = Quantization {
        zero_point: 0,
        scale: 1.0 / 256.0,
    };

    fn label_file(labels: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for label in labels {
            writeln!(file, "{}", label).unwrap();
        }
        file
    }

    fn config(labels: &NamedTempFile) -> ModelConfig {
        let mut config = ModelConfig::new("model.onnx", labels.path());
        config.frame = FrameGeometry {
            width: 4,
            height: 4,
            channels: 4,
        };
        config
    }

    /// Scores are the first input byte at each class position: class k
    /// scores `input[0] + k`.
    fn engine() -> StubEngine {
        StubEngine::builder()
            .input("input", ElementType::Quantized(Q), &[1, 2, 2, 3])
            .output("heat", ElementType::Quantized(Q), &[1, 2, 2, 2])
            .output("scores", ElementType::Quantized(Q), &[1, 4])
            .on_invoke(|tensors| {
                let seed = match &tensors[0].buffer {
                    TensorBuffer::U8(data) => data[0],
                    TensorBuffer::F32(_) => 0,
                };
                tensors[1].buffer = TensorBuffer::U8(vec![seed, 1, seed, 2, seed, 3, seed, 4]);
                tensors[2].buffer =
                    TensorBuffer::U8((0..4).map(|k| seed.saturating_add(k)).collect());
                Ok(())
            })
            .build()
    }

    fn frame(seed: u8) -> Vec<u8> {
        vec![seed; 4 * 4 * 4]
    }

    #[test]
    fn label_is_empty_before_first_frame() -> Result<()> {
        let labels = label_file(&["a", "b", "c", "d"]);
        let model = Model::with_engine(config(&labels), Box::new(engine()))?;
        assert_eq!(model.current_label(), "");
        assert!(model.current_overlay().is_none());
        Ok(())
    }

    #[test]
    fn frame_publishes_label_and_overlay() -> Result<()> {
        let labels = label_file(&["a", "b", "c", "d"]);
        let mut cfg = config(&labels);
        cfg.overlay = TensorSelector::parse("heat");
        cfg.overlay_channel = 1;
        let model = Model::with_engine(cfg, Box::new(engine()))?;
        assert!(model.overlay_enabled());

        assert_eq!(model.on_new_frame(&frame(128)), FrameOutcome::Published(1));
        // Best score is 131/256 at class 3.
        assert_eq!(model.current_label(), "d - 0.51");
        let overlay = model.current_overlay().unwrap();
        assert_eq!(overlay.width(), 2);
        assert_eq!(overlay.as_bytes(), &[1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn empty_frame_is_ignored() -> Result<()> {
        let labels = label_file(&["a"]);
        let model = Model::with_engine(config(&labels), Box::new(engine()))?;
        assert_eq!(model.on_new_frame(&[]), FrameOutcome::Ignored);
        assert_eq!(model.snapshot().sequence, 0);
        assert_eq!(model.stats().frames_ignored, 1);
        Ok(())
    }

    #[test]
    fn failed_frame_keeps_previous_result() -> Result<()> {
        let labels = label_file(&["a", "b", "c", "d"]);
        let model = Model::with_engine(config(&labels), Box::new(engine()))?;
        model.on_new_frame(&frame(100));
        let before = model.current_label();

        // Too short for the 4x4x4 geometry.
        assert_eq!(model.on_new_frame(&[1, 2, 3]), FrameOutcome::Discarded);
        assert_eq!(model.current_label(), before);
        assert_eq!(model.stats().frames_discarded, 1);
        assert_eq!(model.stats().frames_published, 1);
        Ok(())
    }

    #[test]
    fn invoke_failure_is_discarded() -> Result<()> {
        let labels = label_file(&["a"]);
        let failing = StubEngine::builder()
            .input("input", ElementType::Quantized(Q), &[1, 2, 2, 3])
            .output("scores", ElementType::Quantized(Q), &[1, 4])
            .on_invoke(|_| Err(anyhow!("delegate error")))
            .build();
        let model = Model::with_engine(config(&labels), Box::new(failing))?;
        assert_eq!(model.on_new_frame(&frame(1)), FrameOutcome::Discarded);
        assert_eq!(model.snapshot().sequence, 0);
        Ok(())
    }

    #[test]
    fn index_without_label_formats_empty() -> Result<()> {
        let labels = label_file(&["a"]);
        let model = Model::with_engine(config(&labels), Box::new(engine()))?;
        let label = model.format_label(Classification {
            index: 40,
            confidence: 0.9,
        });
        assert_eq!(label, "");
        let padded = model.format_label(Classification {
            index: 3,
            confidence: 0.126,
        });
        assert_eq!(padded, " - 0.13");
        Ok(())
    }

    #[test]
    fn missing_overlay_tensor_disables_overlay() -> Result<()> {
        let labels = label_file(&["a", "b", "c", "d"]);
        let mut cfg = config(&labels);
        cfg.overlay = TensorSelector::parse("5");
        let model = Model::with_engine(cfg, Box::new(engine()))?;
        assert!(!model.overlay_enabled());
        model.on_new_frame(&frame(50));
        assert!(model.current_overlay().is_none());
        assert_ne!(model.current_label(), "");
        Ok(())
    }

    #[test]
    fn readers_are_not_blocked_by_inference() -> Result<()> {
        let labels = label_file(&["a", "b", "c", "d"]);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut hold = false;
        let engine = StubEngine::builder()
            .input("input", ElementType::Quantized(Q), &[1, 2, 2, 3])
            .output("scores", ElementType::Quantized(Q), &[1, 4])
            .on_invoke(move |tensors| {
                let seed = match &tensors[0].buffer {
                    TensorBuffer::U8(data) => data[0],
                    TensorBuffer::F32(_) => 0,
                };
                if hold {
                    let _ = entered_tx.send(());
                    let _ = release_rx.recv();
                }
                hold = true;
                tensors[1].buffer =
                    TensorBuffer::U8((0..4).map(|k| seed.saturating_add(k)).collect());
                Ok(())
            })
            .build();
        let model = Arc::new(Model::with_engine(config(&labels), Box::new(engine))?);
        assert_eq!(model.on_new_frame(&frame(100)), FrameOutcome::Published(1));
        let before = model.current_label();
        assert_eq!(before, "d - 0.40");

        let worker = {
            let model = Arc::clone(&model);
            std::thread::spawn(move || model.on_new_frame(&frame(200)))
        };
        entered_rx.recv_timeout(Duration::from_secs(5))?;

        // The second frame is parked inside invoke.
        let started = Instant::now();
        assert_eq!(model.current_label(), before);
        assert_eq!(model.snapshot().sequence, 1);
        assert!(model.current_overlay().is_none());
        assert!(started.elapsed() < Duration::from_secs(1));

        release_tx.send(())?;
        assert_eq!(worker.join().unwrap(), FrameOutcome::Published(2));
        assert_eq!(model.current_label(), "d - 0.79");
        Ok(())
    }

    #[test]
    fn failed_overlay_read_keeps_classification() -> Result<()> {
        let labels = label_file(&["a", "b", "c", "d"]);
        let engine = StubEngine::builder()
            .input("input", ElementType::Quantized(Q), &[1, 2, 2, 3])
            .output("heat", ElementType::Quantized(Q), &[1, 2, 2, 1])
            .output("scores", ElementType::Quantized(Q), &[1, 4])
            .data("scores", TensorBuffer::U8(vec![10, 200, 30, 40]))
            .unreadable("heat")
            .build();
        let mut cfg = config(&labels);
        cfg.overlay = TensorSelector::parse("heat");
        let model = Model::with_engine(cfg, Box::new(engine))?;
        assert!(model.overlay_enabled());

        assert_eq!(model.on_new_frame(&frame(1)), FrameOutcome::Published(1));
        assert_eq!(model.current_label(), "b - 0.78");
        assert!(model.current_overlay().is_none());
        Ok(())
    }

    #[test]
    fn load_fails_without_labels() {
        let cfg = ModelConfig::new("model.onnx", "/nonexistent/labels.txt");
        assert!(Model::with_engine(cfg, Box::new(engine())).is_err());
    }

    #[test]
    fn load_fails_when_frames_lack_channels() {
        let labels = label_file(&["a"]);
        let mut cfg = config(&labels);
        cfg.frame.channels = 1;
        assert!(Model::with_engine(cfg, Box::new(engine())).is_err());
    }

    #[test]
    fn load_fails_without_outputs() {
        let labels = label_file(&["a"]);
        let engine = StubEngine::builder()
            .input("input", ElementType::Quantized(Q), &[1, 2, 2, 3])
            .build();
        assert!(Model::with_engine(config(&labels), Box::new(engine)).is_err());
    }
}
