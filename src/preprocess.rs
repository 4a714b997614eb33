//! Frame preprocessing.
//!
//! Resamples a raw interleaved frame (RGB, RGBx, ...) into the model's input
//! tensor in place. Resampling is nearest-neighbor; extra raw channels (the
//! `x` of RGBx) are dropped. Quantized inputs receive the sampled bytes
//! verbatim; float inputs receive `(value - mean) / std`.

use anyhow::{anyhow, bail, Result};

use crate::engine::{ElementType, TensorDataMut, TensorInfo};

/// Geometry of the frames the camera pipeline delivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl FrameGeometry {
    /// 224x224 RGBx, the layout negotiated with the camera pipeline by default.
    pub const RGBX_224: FrameGeometry = FrameGeometry {
        width: 224,
        height: 224,
        channels: 4,
    };

    /// Bytes in one frame, or `None` on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        self.width
            .checked_mul(self.height)
            .and_then(|v| v.checked_mul(self.channels))
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.channels == 0
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self::RGBX_224
    }
}

/// Training-time normalization for float inputs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normalization {
    pub mean: f32,
    pub std: f32,
}

impl Normalization {
    fn apply(&self, value: u8) -> f32 {
        (value as f32 - self.mean) / self.std
    }
}

impl Default for Normalization {
    /// Maps 0..=255 onto -1.0..=1.0.
    fn default() -> Self {
        Self {
            mean: 127.5,
            std: 127.5,
        }
    }
}

/// Write `frame` into the input tensor's buffer.
///
/// The input tensor's last three dimensions are read as height, width and
/// channels. The buffer must already be allocated to the tensor's size.
pub fn prepare(
    frame: &[u8],
    geometry: FrameGeometry,
    input: &TensorInfo,
    buffer: TensorDataMut<'_>,
    normalization: Normalization,
) -> Result<()> {
    let (dst_h, dst_w, dst_c) = input.spatial()?;
    check_compatible(geometry, input)?;

    let expected = geometry
        .byte_len()
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    if frame.len() < expected {
        bail!(
            "frame too short: expected {} bytes for {}x{}x{}, got {}",
            expected,
            geometry.width,
            geometry.height,
            geometry.channels,
            frame.len()
        );
    }
    let needed = dst_h * dst_w * dst_c;
    if buffer.len() < needed {
        bail!(
            "input buffer holds {} elements, tensor '{}' needs {}",
            buffer.len(),
            input.name,
            needed
        );
    }

    let target = Target {
        height: dst_h,
        width: dst_w,
        channels: dst_c,
    };
    match (input.element, buffer) {
        (ElementType::Quantized(_), TensorDataMut::U8(out)) => {
            resample(frame, geometry, target, out, |value| value)
        }
        (ElementType::Float32, TensorDataMut::F32(out)) => {
            resample(frame, geometry, target, out, |value| normalization.apply(value))
        }
        (element, _) => bail!(
            "input buffer for '{}' does not match element type {:?}",
            input.name,
            element
        ),
    }
    Ok(())
}

/// Check that frames of `geometry` can feed `input` at all.
pub fn check_compatible(geometry: FrameGeometry, input: &TensorInfo) -> Result<()> {
    let (dst_h, dst_w, dst_c) = input.spatial()?;
    if geometry.is_empty() {
        bail!("frame geometry {:?} has a zero dimension", geometry);
    }
    if dst_h == 0 || dst_w == 0 || dst_c == 0 {
        bail!("input tensor '{}' has shape {:?}", input.name, input.shape);
    }
    if dst_c > geometry.channels {
        bail!(
            "input tensor '{}' expects {} channels but frames carry {}",
            input.name,
            dst_c,
            geometry.channels
        );
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct Target {
    height: usize,
    width: usize,
    channels: usize,
}

fn resample<T>(
    frame: &[u8],
    geometry: FrameGeometry,
    target: Target,
    out: &mut [T],
    convert: impl Fn(u8) -> T,
) {
    for y in 0..target.height {
        let src_y = y * geometry.height / target.height;
        for x in 0..target.width {
            let src_x = x * geometry.width / target.width;
            let src = (src_y * geometry.width + src_x) * geometry.channels;
            let dst = (y * target.width + x) * target.channels;
            for c in 0..target.channels {
                out[dst + c] = convert(frame[src + c]);
            }
        }
    }
}
