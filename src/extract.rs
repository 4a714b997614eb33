//! Result extraction.
//!
//! Reduces engine output buffers to owned results: the best classification
//! from the score tensor, and a single-channel overlay plane from the overlay
//! tensor. Nothing here writes to engine memory.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use anyhow::{bail, Result};

use crate::engine::{ElementType, Quantization, TensorData, TensorInfo};
use crate::overlay::OverlayImage;

pub const DEFAULT_TOP_N: usize = 5;
pub const DEFAULT_THRESHOLD: f32 = 0.1;

/// Top-N selection parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ranking {
    pub top_n: usize,
    /// Scores below this are never ranked.
    pub threshold: f32,
}

impl Default for Ranking {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// One scored class.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Classification {
    pub index: usize,
    pub confidence: f32,
}

/// `(raw - zero_point) * scale`.
pub fn dequantize(raw: u8, quantization: Quantization) -> f32 {
    (raw as i32 - quantization.zero_point) as f32 * quantization.scale
}

/// Flattened, dequantized score stream of a classification tensor.
///
/// Rank-4 outputs are per-region maps; only the first channel of each spatial
/// position is kept (stride = channel count).
pub fn scores(info: &TensorInfo, data: TensorData<'_>) -> Result<Vec<f32>> {
    let stride = match info.shape.as_slice() {
        [_, _, _, channels] => (*channels).max(1),
        _ => 1,
    };
    match (info.element, data) {
        (ElementType::Quantized(q), TensorData::U8(raw)) => Ok(raw
            .iter()
            .step_by(stride)
            .map(|&value| dequantize(value, q))
            .collect()),
        (ElementType::Float32, TensorData::F32(values)) => {
            Ok(values.iter().step_by(stride).copied().collect())
        }
        (element, _) => bail!(
            "buffer for '{}' does not match element type {:?}",
            info.name,
            element
        ),
    }
}

/// Heap entry ordered so that "greater" means "ranks higher": larger score,
/// then lower index.
#[derive(Clone, Copy, Debug)]
struct Candidate(Classification);

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .confidence
            .total_cmp(&other.0.confidence)
            .then_with(|| other.0.index.cmp(&self.0.index))
    }
}

/// The `n` highest scores at or above `threshold`, best first.
///
/// Uses a min-heap bounded at `n`. Equal scores keep the lower index.
pub fn rank_top_n(scores: &[f32], n: usize, threshold: f32) -> Vec<Classification> {
    if n == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(n + 1);
    for (index, &confidence) in scores.iter().enumerate() {
        if confidence.is_nan() || confidence < threshold {
            continue;
        }
        let candidate = Candidate(Classification { index, confidence });
        if heap.len() < n {
            heap.push(Reverse(candidate));
        } else if heap.peek().is_some_and(|Reverse(worst)| candidate > *worst) {
            heap.pop();
            heap.push(Reverse(candidate));
        }
    }
    // Ascending order of Reverse is descending order of Candidate.
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse(Candidate(entry))| entry)
        .collect()
}

/// Best-ranked class of the classification tensor, if any clears the threshold.
pub fn extract_classification(
    info: &TensorInfo,
    data: TensorData<'_>,
    ranking: Ranking,
) -> Result<Option<Classification>> {
    let scores = scores(info, data)?;
    let ranked = rank_top_n(&scores, ranking.top_n, ranking.threshold);
    if log::log_enabled!(log::Level::Trace) {
        for (rank, entry) in ranked.iter().enumerate() {
            log::trace!("rank {}: class {} score {:.4}", rank, entry.index, entry.confidence);
        }
    }
    Ok(ranked.first().copied())
}

/// One channel plane of a rank-4 NHWC overlay tensor.
///
/// Returns `None` when the tensor is not rank 4, `channel` is out of range,
/// the spatial dims are not square, or the buffer is too short.
pub fn extract_overlay(
    info: &TensorInfo,
    data: TensorData<'_>,
    channel: usize,
) -> Option<OverlayImage> {
    let [_, height, width, channels] = info.shape[..] else {
        log::debug!("overlay '{}' has rank {}, expected 4", info.name, info.rank());
        return None;
    };
    if channel >= channels {
        log::debug!(
            "overlay channel {} out of range for '{}' ({} channels)",
            channel,
            info.name,
            channels
        );
        return None;
    }
    if height != width {
        log::debug!("overlay '{}' is {}x{}, not square", info.name, height, width);
        return None;
    }
    let count = width * width;
    let samples: Vec<u8> = match data {
        TensorData::U8(raw) => raw
            .iter()
            .skip(channel)
            .step_by(channels)
            .take(count)
            .copied()
            .collect(),
        TensorData::F32(values) => values
            .iter()
            .skip(channel)
            .step_by(channels)
            .take(count)
            .map(|&value| (value.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect(),
    };
    if samples.len() != count {
        log::debug!(
            "overlay '{}' buffer holds {} of {} samples",
            info.name,
            samples.len(),
            count
        );
        return None;
    }
    OverlayImage::new(width, samples)
}
