use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer};

use super::backend::InferenceEngine;
use super::tensor::TensorId;

/// How the optional overlay tensor is located.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TensorSelector {
    /// Position in the engine's declared output list.
    ByIndex(i64),
    /// Exact tensor name, searched across every tensor in the engine.
    ByName(String),
}

impl TensorSelector {
    /// Parse a configuration string.
    ///
    /// The whole string must be a base-10 integer to select by index; anything
    /// else is a name, kept verbatim. An empty or whitespace-only string
    /// selects nothing.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }
        match raw.parse::<i64>() {
            Ok(index) => Some(TensorSelector::ByIndex(index)),
            Err(_) => Some(TensorSelector::ByName(raw.to_string())),
        }
    }
}

impl std::fmt::Display for TensorSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TensorSelector::ByIndex(index) => write!(f, "output #{}", index),
            TensorSelector::ByName(name) => write!(f, "tensor '{}'", name),
        }
    }
}

impl<'de> Deserialize<'de> for TensorSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(i64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Index(index) => Ok(TensorSelector::ByIndex(index)),
            Raw::Text(text) => TensorSelector::parse(&text)
                .ok_or_else(|| serde::de::Error::custom("overlay tensor selector is empty")),
        }
    }
}

/// The engine's first declared input.
pub fn resolve_input(engine: &dyn InferenceEngine) -> Result<TensorId> {
    engine
        .inputs()
        .first()
        .copied()
        .ok_or_else(|| anyhow!("{} engine declares no input tensors", engine.name()))
}

/// The engine's last declared output.
///
/// Some graphs expose auxiliary outputs ahead of the classification head, so
/// the last output is the one that carries scores.
pub fn resolve_classification_output(engine: &dyn InferenceEngine) -> Result<TensorId> {
    engine
        .outputs()
        .last()
        .copied()
        .ok_or_else(|| anyhow!("{} engine declares no output tensors", engine.name()))
}

/// Locate the overlay tensor. Absence disables the overlay and is not an error.
pub fn resolve_overlay(
    engine: &dyn InferenceEngine,
    selector: &TensorSelector,
) -> Option<TensorId> {
    let found = match selector {
        TensorSelector::ByIndex(index) => usize::try_from(*index)
            .ok()
            .and_then(|index| engine.outputs().get(index).copied()),
        TensorSelector::ByName(name) => (0..engine.tensor_count())
            .map(TensorId)
            .find(|id| engine.tensor(*id).is_some_and(|info| info.name == *name)),
    };
    match found {
        Some(id) => log::info!("overlay {} resolved to tensor {}", selector, id.0),
        None => log::info!("overlay {} not found; overlay disabled", selector),
    }
    found
}
