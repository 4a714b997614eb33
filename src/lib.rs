//! Real-time camera image classification.
//!
//! A camera thread pushes raw frames into a loaded [`Model`]; each frame is
//! resampled into the model's input tensor, run through the inference engine,
//! and reduced to the best-scoring class plus an optional overlay plane. The
//! newest result is published atomically so a render thread can poll
//! [`Model::current_label`] and [`Model::current_overlay`] at any time.
//!
//! # Module Structure
//!
//! - `labels`: class label table
//! - `engine`: inference engine seam, tensor metadata, tensor resolution
//! - `preprocess`: frame to input tensor
//! - `extract`: output tensors to classification and overlay
//! - `shared`: latest-result slot shared between threads
//! - `model`: the facade tying the above together
//! - `ingest`: camera sources that feed frames to a `FrameSink`
//! - `config`: file + environment configuration for `rtclassd`

pub mod config;
pub mod engine;
pub mod extract;
pub mod ingest;
pub mod labels;
pub mod model;
pub mod overlay;
pub mod preprocess;
pub mod shared;

pub use config::ClassifierConfig;
pub use engine::{InferenceEngine, InputLayout, StubEngine, TensorSelector};
pub use extract::{Classification, Ranking};
pub use ingest::{CameraConfig, CameraSource, CameraStats, DisplaySettings, FrameSink};
pub use labels::LabelSet;
pub use model::{FrameOutcome, Model, ModelConfig, ModelStats};
pub use overlay::OverlayImage;
pub use preprocess::{FrameGeometry, Normalization};
pub use shared::ResultSnapshot;
