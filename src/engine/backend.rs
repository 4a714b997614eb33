use anyhow::Result;

use super::tensor::{TensorData, TensorDataMut, TensorId, TensorInfo};

/// Inference engine capability.
///
/// The classifier core never owns tensor memory. It looks tensors up by
/// `TensorId`, writes the input through `input_mut`, runs `invoke`, and reads
/// outputs back through `read`. Implementations wrap a real runtime or, in
/// tests, scripted buffers.
pub trait InferenceEngine: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Total number of tensors the engine exposes, inputs and outputs included.
    fn tensor_count(&self) -> usize;

    /// Metadata for a tensor, or `None` when the id is out of range.
    fn tensor(&self, id: TensorId) -> Option<&TensorInfo>;

    /// Declared inputs, in graph order.
    fn inputs(&self) -> &[TensorId];

    /// Declared outputs, in graph order.
    fn outputs(&self) -> &[TensorId];

    /// Allocate tensor buffers. Called once at load, never per frame.
    fn allocate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Writable view of an input tensor's backing buffer.
    fn input_mut(&mut self, id: TensorId) -> Result<TensorDataMut<'_>>;

    /// Run one synchronous forward pass over the current input buffers.
    fn invoke(&mut self) -> Result<()>;

    /// Read-only view of a tensor's backing buffer.
    fn read(&self, id: TensorId) -> Result<TensorData<'_>>;
}
