pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{StubEngine, StubEngineBuilder, StubTensor};

#[cfg(feature = "backend-tract")]
pub use tract::TractEngine;
