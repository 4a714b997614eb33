//! Inference engine seam.
//!
//! The classifier talks to its inference runtime only through
//! `InferenceEngine`. Backends:
//! - `StubEngine`: scripted in-memory tensors (tests, demos)
//! - `TractEngine`: ONNX graphs via tract (feature: backend-tract)

mod backend;
mod backends;
mod resolve;
mod tensor;

use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

pub use backend::InferenceEngine;
pub use backends::{StubEngine, StubEngineBuilder, StubTensor};
#[cfg(feature = "backend-tract")]
pub use backends::TractEngine;
pub use resolve::{resolve_classification_output, resolve_input, resolve_overlay, TensorSelector};
pub use tensor::{
    ElementType, Quantization, TensorBuffer, TensorData, TensorDataMut, TensorId, TensorInfo,
};

/// Memory layout a model graph expects for its image input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    #[default]
    Nhwc,
    Nchw,
}

/// Input geometry handed to a backend when it builds its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineInput {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub layout: InputLayout,
}

/// Open the compiled-in inference backend for a model file.
pub fn open(model_path: &Path, input: EngineInput) -> Result<Box<dyn InferenceEngine>> {
    #[cfg(feature = "backend-tract")]
    {
        let engine = TractEngine::load(
            model_path,
            input.height,
            input.width,
            input.channels,
            input.layout,
        )?;
        Ok(Box::new(engine))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        let _ = input;
        anyhow::bail!(
            "cannot load {}: no inference backend compiled in (enable backend-tract)",
            model_path.display()
        )
    }
}
