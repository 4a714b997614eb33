use anyhow::{anyhow, bail, Result};

use crate::engine::backend::InferenceEngine;
use crate::engine::tensor::{
    ElementType, TensorBuffer, TensorData, TensorDataMut, TensorId, TensorInfo,
};

/// One tensor held by the stub engine.
#[derive(Clone, Debug)]
pub struct StubTensor {
    pub info: TensorInfo,
    pub buffer: TensorBuffer,
}

type InvokeHook = Box<dyn FnMut(&mut [StubTensor]) -> Result<()> + Send>;

/// In-memory engine for testing. Outputs are whatever the invoke hook writes,
/// or the data seeded at build time when no hook is installed.
pub struct StubEngine {
    tensors: Vec<StubTensor>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    on_invoke: Option<InvokeHook>,
    unreadable: Vec<TensorId>,
    allocated: bool,
    invocations: u64,
}

impl StubEngine {
    pub fn builder() -> StubEngineBuilder {
        StubEngineBuilder::default()
    }

    /// Number of completed `invoke` calls.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    fn slot(&self, id: TensorId) -> Result<&StubTensor> {
        self.tensors
            .get(id.0)
            .ok_or_else(|| anyhow!("stub tensor {} out of range", id.0))
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    fn tensor(&self, id: TensorId) -> Option<&TensorInfo> {
        self.tensors.get(id.0).map(|tensor| &tensor.info)
    }

    fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    fn allocate(&mut self) -> Result<()> {
        self.allocated = true;
        Ok(())
    }

    fn input_mut(&mut self, id: TensorId) -> Result<TensorDataMut<'_>> {
        if !self.allocated {
            bail!("stub tensors are not allocated");
        }
        if !self.inputs.contains(&id) {
            bail!("stub tensor {} is not an input", id.0);
        }
        let tensor = self
            .tensors
            .get_mut(id.0)
            .ok_or_else(|| anyhow!("stub tensor {} out of range", id.0))?;
        Ok(tensor.buffer.view_mut())
    }

    fn invoke(&mut self) -> Result<()> {
        if !self.allocated {
            bail!("stub tensors are not allocated");
        }
        if let Some(hook) = self.on_invoke.as_mut() {
            hook(&mut self.tensors)?;
        }
        self.invocations += 1;
        Ok(())
    }

    fn read(&self, id: TensorId) -> Result<TensorData<'_>> {
        if self.unreadable.contains(&id) {
            bail!("stub tensor {} is unreadable", id.0);
        }
        Ok(self.slot(id)?.buffer.view())
    }
}

#[derive(Default)]
pub struct StubEngineBuilder {
    tensors: Vec<StubTensor>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    on_invoke: Option<InvokeHook>,
    unreadable: Vec<String>,
}

impl StubEngineBuilder {
    pub fn input(mut self, name: &str, element: ElementType, shape: &[usize]) -> Self {
        let id = self.push(name, element, shape);
        self.inputs.push(id);
        self
    }

    pub fn output(mut self, name: &str, element: ElementType, shape: &[usize]) -> Self {
        let id = self.push(name, element, shape);
        self.outputs.push(id);
        self
    }

    /// A tensor that is neither input nor output, reachable by name only.
    pub fn intermediate(mut self, name: &str, element: ElementType, shape: &[usize]) -> Self {
        self.push(name, element, shape);
        self
    }

    /// Seed the named tensor's contents. The buffer kind must match its element type.
    pub fn data(mut self, name: &str, buffer: TensorBuffer) -> Self {
        if let Some(tensor) = self.tensors.iter_mut().find(|t| t.info.name == name) {
            tensor.buffer = buffer;
        }
        self
    }

    /// Make every `read` of the named tensor fail.
    pub fn unreadable(mut self, name: &str) -> Self {
        self.unreadable.push(name.to_string());
        self
    }

    pub fn on_invoke<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut [StubTensor]) -> Result<()> + Send + 'static,
    {
        self.on_invoke = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> StubEngine {
        let unreadable = self
            .tensors
            .iter()
            .enumerate()
            .filter(|(_, tensor)| self.unreadable.contains(&tensor.info.name))
            .map(|(index, _)| TensorId(index))
            .collect();
        StubEngine {
            tensors: self.tensors,
            inputs: self.inputs,
            outputs: self.outputs,
            on_invoke: self.on_invoke,
            unreadable,
            allocated: false,
            invocations: 0,
        }
    }

    fn push(&mut self, name: &str, element: ElementType, shape: &[usize]) -> TensorId {
        let info = TensorInfo::new(name, element, shape);
        let buffer = TensorBuffer::zeroed(&info);
        self.tensors.push(StubTensor { info, buffer });
        TensorId(self.tensors.len() - 1)
    }
}
