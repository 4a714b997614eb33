//! Single-channel activation overlay.

/// A square 8-bit image taken from one channel of an overlay tensor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayImage {
    width: usize,
    data: Vec<u8>,
}

impl OverlayImage {
    /// Returns `None` unless `data` holds exactly `width * width` samples.
    pub fn new(width: usize, data: Vec<u8>) -> Option<Self> {
        if width.checked_mul(width)? != data.len() {
            return None;
        }
        Some(Self { width, data })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Sample at column `x`, row `y`.
    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.width {
            return None;
        }
        self.data.get(y * self.width + x).copied()
    }

    /// Expand into RGBA: every pixel takes `tint` as its color and the sample
    /// as its alpha, ready to be blended over the video by a paint layer.
    pub fn tinted_rgba(&self, tint: [u8; 3]) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(self.data.len() * 4);
        for &sample in &self.data {
            rgba.extend_from_slice(&[tint[0], tint[1], tint[2], sample]);
        }
        rgba
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_square_data() {
        assert!(OverlayImage::new(2, vec![0; 3]).is_none());
        assert!(OverlayImage::new(2, vec![0; 4]).is_some());
        assert!(OverlayImage::new(0, vec![]).is_some());
    }

    #[test]
    fn tinted_rgba_uses_samples_as_alpha() {
        let image = OverlayImage::new(1, vec![42]).unwrap();
        assert_eq!(image.tinted_rgba([255, 0, 0]), vec![255, 0, 0, 42]);
    }

    #[test]
    fn get_is_row_major() {
        let image = OverlayImage::new(2, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(image.get(1, 0), Some(2));
        assert_eq!(image.get(0, 1), Some(3));
        assert_eq!(image.get(2, 0), None);
    }
}
