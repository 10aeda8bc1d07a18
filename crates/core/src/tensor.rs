//! Internal image representation handed to the downstream host.
//!
//! A dense height x width x channel buffer of `f32` in `[0, 1]`, RGB
//! channel order. Failure paths return [`ImageTensor::placeholder`],
//! which always has the same fixed shape so consumers can rely on a
//! stable output contract no matter why a job failed.

use image::RgbImage;

/// Channels are always RGB.
pub const CHANNELS: u32 = 3;

/// Side length of the square placeholder returned on failure.
pub const PLACEHOLDER_SIZE: u32 = 512;

/// A normalized HWC image buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    height: u32,
    width: u32,
}

impl ImageTensor {
    /// Convert an 8-bit RGB image, scaling each channel to `[0, 1]`.
    pub fn from_rgb8(image: &RgbImage) -> Self {
        let data = image
            .as_raw()
            .iter()
            .map(|&byte| f32::from(byte) / 255.0)
            .collect();
        Self {
            data,
            height: image.height(),
            width: image.width(),
        }
    }

    /// The fixed-shape black fallback image.
    ///
    /// Every failure path produces exactly this shape
    /// ([`PLACEHOLDER_SIZE`] x [`PLACEHOLDER_SIZE`] x [`CHANNELS`]).
    pub fn placeholder() -> Self {
        let side = PLACEHOLDER_SIZE as usize;
        Self {
            data: vec![0.0; side * side * CHANNELS as usize],
            height: PLACEHOLDER_SIZE,
            width: PLACEHOLDER_SIZE,
        }
    }

    /// `(height, width, channels)` of the buffer.
    pub fn shape(&self) -> (u32, u32, u32) {
        (self.height, self.width, CHANNELS)
    }

    /// The raw normalized values in row-major HWC order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// One pixel as `[r, g, b]`. Panics on out-of-bounds coordinates,
    /// mirroring slice indexing.
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 3] {
        let idx = ((y * self.width + x) * CHANNELS) as usize;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }
}
