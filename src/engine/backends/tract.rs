#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tract_onnx::prelude::*;

use crate::engine::backend::InferenceEngine;
use crate::engine::tensor::{
    ElementType, Quantization, TensorBuffer, TensorData, TensorDataMut, TensorId, TensorInfo,
};
use crate::engine::InputLayout;

/// Tract-based engine for ONNX classification graphs.
///
/// The input tensor is always presented to the classifier as NHWC; NCHW
/// graphs get their input transposed at invoke time. 8-bit graphs keep their
/// raw bytes and quantization parameters, everything else is exposed as
/// float32.
pub struct TractEngine {
    plan: TypedRunnableModel<TypedModel>,
    layout: InputLayout,
    input_dt: DatumType,
    height: usize,
    width: usize,
    channels: usize,
    tensors: Vec<TensorInfo>,
    buffers: Vec<TensorBuffer>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
}

impl TractEngine {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        height: usize,
        width: usize,
        channels: usize,
        layout: InputLayout,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let input_shape = match layout {
            InputLayout::Nhwc => tvec!(1, height, width, channels),
            InputLayout::Nchw => tvec!(1, channels, height, width),
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?;
        let input_dt = model
            .input_fact(0)?
            .datum_type
            .concretize()
            .filter(|dt| is_eight_bit_unsigned(*dt))
            .unwrap_or(DatumType::F32);
        let plan = model
            .with_input_fact(0, InferenceFact::dt_shape(input_dt, input_shape))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let mut tensors = Vec::new();
        {
            let model = plan.model();
            let input = *model
                .input_outlets()?
                .first()
                .ok_or_else(|| anyhow!("ONNX model declares no inputs"))?;
            tensors.push(TensorInfo::new(
                model.node(input.node).name.clone(),
                element_type(input_dt),
                &[1, height, width, channels],
            ));
            for outlet in model.output_outlets()? {
                let fact = model.outlet_fact(*outlet)?;
                let shape = fact.shape.as_concrete().ok_or_else(|| {
                    anyhow!("output {:?} has a symbolic shape", outlet)
                })?;
                let name = model
                    .outlet_label(*outlet)
                    .map(str::to_string)
                    .unwrap_or_else(|| model.node(outlet.node).name.clone());
                tensors.push(TensorInfo::new(name, element_type(fact.datum_type), shape));
            }
        }

        let outputs = (1..tensors.len()).map(TensorId).collect();
        log::info!(
            "tract: loaded {} ({} outputs, input {}x{}x{} {:?} {:?})",
            model_path.display(),
            tensors.len() - 1,
            height,
            width,
            channels,
            layout,
            input_dt
        );

        Ok(Self {
            plan,
            layout,
            input_dt,
            height,
            width,
            channels,
            buffers: Vec::new(),
            tensors,
            inputs: vec![TensorId(0)],
            outputs,
        })
    }

    fn build_input(&self) -> Result<Tensor> {
        match self.buffers.first() {
            Some(TensorBuffer::F32(pixels)) => self.layout_input(pixels),
            Some(TensorBuffer::U8(pixels)) => {
                let tensor = self.layout_input(pixels)?;
                if self.input_dt == DatumType::U8 {
                    return Ok(tensor);
                }
                Ok(tensor.cast_to_dt(self.input_dt)?.into_owned())
            }
            None => bail!("tract input buffer is not allocated"),
        }
    }

    fn layout_input<T: Datum + Copy>(&self, pixels: &[T]) -> Result<Tensor> {
        let (h, w, c) = (self.height, self.width, self.channels);
        let tensor = match self.layout {
            InputLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_vec((1, h, w, c), pixels.to_vec())
                    .context("input buffer does not match NHWC shape")?
                    .into_tensor()
            }
            InputLayout::Nchw => {
                if pixels.len() < h * w * c {
                    bail!("input buffer does not match NCHW shape");
                }
                tract_ndarray::Array4::from_shape_fn((1, c, h, w), |(_, channel, y, x)| {
                    pixels[(y * w + x) * c + channel]
                })
                .into_tensor()
            }
        };
        Ok(tensor)
    }
}

fn is_eight_bit_unsigned(dt: DatumType) -> bool {
    matches!(dt, DatumType::U8 | DatumType::QU8(_))
}

/// How a tract datum type is exposed to the classifier. Unsigned 8-bit
/// tensors stay raw; plain `U8` gets the identity quantization.
fn element_type(dt: DatumType) -> ElementType {
    if is_eight_bit_unsigned(dt) {
        let (zero_point, scale) = dt.zp_scale();
        ElementType::Quantized(Quantization { zero_point, scale })
    } else {
        ElementType::Float32
    }
}

/// Copy a run result into the buffer form `element` promises.
fn output_buffer(tensor: &Tensor, element: ElementType) -> Result<TensorBuffer> {
    let dt = tensor.datum_type();
    match element {
        ElementType::Quantized(_) => {
            if !is_eight_bit_unsigned(dt) {
                bail!("model output changed type to {:?}", dt);
            }
            Ok(TensorBuffer::U8(tensor.as_bytes().to_vec()))
        }
        ElementType::Float32 => {
            if let DatumType::QI8(_) = dt {
                let (zero_point, scale) = dt.zp_scale();
                let floats = tensor
                    .as_bytes()
                    .iter()
                    .map(|&raw| (raw as i8 as i32 - zero_point) as f32 * scale)
                    .collect();
                return Ok(TensorBuffer::F32(floats));
            }
            let floats = tensor
                .cast_to::<f32>()
                .context("model output could not be cast to f32")?;
            Ok(TensorBuffer::F32(floats.as_slice::<f32>()?.to_vec()))
        }
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    fn tensor(&self, id: TensorId) -> Option<&TensorInfo> {
        self.tensors.get(id.0)
    }

    fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    fn allocate(&mut self) -> Result<()> {
        self.buffers = self.tensors.iter().map(TensorBuffer::zeroed).collect();
        Ok(())
    }

    fn input_mut(&mut self, id: TensorId) -> Result<TensorDataMut<'_>> {
        if !self.inputs.contains(&id) {
            bail!("tensor {} is not an input", id.0);
        }
        self.buffers
            .get_mut(id.0)
            .map(TensorBuffer::view_mut)
            .ok_or_else(|| anyhow!("tract tensors are not allocated"))
    }

    fn invoke(&mut self) -> Result<()> {
        let input = self.build_input()?;
        let results = self
            .plan
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        for (id, value) in self.outputs.iter().zip(results) {
            let element = self
                .tensors
                .get(id.0)
                .map(|info| info.element)
                .ok_or_else(|| anyhow!("tract output {} has no metadata", id.0))?;
            let buffer = output_buffer(&value.into_tensor(), element)?;
            let slot = self
                .buffers
                .get_mut(id.0)
                .ok_or_else(|| anyhow!("tract tensors are not allocated"))?;
            *slot = buffer;
        }
        Ok(())
    }

    fn read(&self, id: TensorId) -> Result<TensorData<'_>> {
        self.buffers
            .get(id.0)
            .map(TensorBuffer::view)
            .ok_or_else(|| anyhow!("tensor {} is not allocated", id.0))
    }
}
