use anyhow::{anyhow, Result};

/// Index into an engine's tensor table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub usize);

/// Affine quantization parameters: `real = (raw - zero_point) * scale`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quantization {
    pub zero_point: i32,
    pub scale: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ElementType {
    /// 8-bit unsigned values with affine quantization.
    Quantized(Quantization),
    Float32,
}

impl ElementType {
    pub fn is_quantized(&self) -> bool {
        matches!(self, ElementType::Quantized(_))
    }
}

/// Metadata for one engine-owned tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub element: ElementType,
    /// Rank 1-4, ordered batch, height, width, channels.
    pub shape: Vec<usize>,
}

impl TensorInfo {
    pub fn new(name: impl Into<String>, element: ElementType, shape: &[usize]) -> Self {
        Self {
            name: name.into(),
            element,
            shape: shape.to_vec(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Innermost dimension (channels for NHWC tensors).
    pub fn channels(&self) -> Option<usize> {
        self.shape.last().copied()
    }

    /// `(height, width, channels)` from the last three dimensions.
    pub fn spatial(&self) -> Result<(usize, usize, usize)> {
        match self.shape.as_slice() {
            [.., h, w, c] => Ok((*h, *w, *c)),
            other => Err(anyhow!(
                "tensor '{}' has shape {:?}; expected at least height, width, channels",
                self.name,
                other
            )),
        }
    }
}

/// Owned tensor storage, used by engines that keep their buffers in Rust memory.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorBuffer {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl TensorBuffer {
    /// Zeroed storage matching `info`.
    pub fn zeroed(info: &TensorInfo) -> Self {
        let len = info.element_count();
        match info.element {
            ElementType::Quantized(_) => TensorBuffer::U8(vec![0; len]),
            ElementType::Float32 => TensorBuffer::F32(vec![0.0; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorBuffer::U8(data) => data.len(),
            TensorBuffer::F32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn view(&self) -> TensorData<'_> {
        match self {
            TensorBuffer::U8(data) => TensorData::U8(data),
            TensorBuffer::F32(data) => TensorData::F32(data),
        }
    }

    pub fn view_mut(&mut self) -> TensorDataMut<'_> {
        match self {
            TensorBuffer::U8(data) => TensorDataMut::U8(data),
            TensorBuffer::F32(data) => TensorDataMut::F32(data),
        }
    }
}

/// Borrowed, read-only view of an engine buffer.
#[derive(Clone, Copy, Debug)]
pub enum TensorData<'a> {
    U8(&'a [u8]),
    F32(&'a [f32]),
}

impl TensorData<'_> {
    pub fn len(&self) -> usize {
        match self {
            TensorData::U8(data) => data.len(),
            TensorData::F32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Borrowed, writable view of an engine input buffer.
#[derive(Debug)]
pub enum TensorDataMut<'a> {
    U8(&'a mut [u8]),
    F32(&'a mut [f32]),
}

impl TensorDataMut<'_> {
    pub fn len(&self) -> usize {
        match self {
            TensorDataMut::U8(data) => data.len(),
            TensorDataMut::F32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
