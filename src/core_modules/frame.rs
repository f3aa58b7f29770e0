// THEORY:
// The `frame` module holds the "dumb" data containers that flow through the engine.
// A `Frame` is one immutable luminance raster from the camera; a `FeatureSet` is the
// ordered list of (keypoint, descriptor) pairs extracted from exactly one frame.
//
// Key architectural principles:
// 1.  **Immutability**: A frame never changes once produced. The raster sits behind an
//     `Arc`, so handing a frame from the camera path to the analysis path is a pointer
//     copy, never a pixel copy.
// 2.  **Single plane**: Everything downstream works on luminance. RGBA buffers (the
//     format most capture stacks deliver) are converted once, at construction.
// 3.  **No behavior**: Like `Pixel` and `Chunk`, these types only know how to describe
//     themselves. Comparing frames is the job of the motion estimator.

use crate::error::{Result, VisionError};
use bitarray::BitArray;
use image::{DynamicImage, GrayImage, RgbaImage};
use std::sync::Arc;
use std::time::Instant;

/// 256-bit binary descriptor, compared by Hamming distance.
pub type Descriptor = BitArray<32>;

/// A single immutable luminance frame.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<GrayImage>,
    /// Monotonic index assigned by the producer.
    pub sequence: u64,
    /// Capture time of the frame, forwarded with capture signals.
    pub timestamp: Instant,
}

impl Frame {
    pub fn from_image(image: GrayImage) -> Self {
        Self {
            image: Arc::new(image),
            sequence: 0,
            timestamp: Instant::now(),
        }
    }

    /// Wraps a row-major, single-channel buffer.
    pub fn from_luma(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize;
        let actual = data.len();
        let image = GrayImage::from_raw(width, height, data)
            .ok_or(VisionError::BufferSize { expected, actual })?;
        Ok(Self::from_image(image))
    }

    /// Converts a row-major RGBA buffer to luminance.
    pub fn from_rgba(width: u32, height: u32, data: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        let rgba = RgbaImage::from_raw(width, height, data.to_vec()).ok_or(
            VisionError::BufferSize {
                expected,
                actual: data.len(),
            },
        )?;
        Ok(Self::from_image(DynamicImage::ImageRgba8(rgba).to_luma8()))
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// A distinctive, repeatably detectable image location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Dominant orientation of the surrounding patch, in degrees.
    pub angle_degrees: f32,
    /// Detector response; larger is stronger.
    pub response: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            angle_degrees: 0.0,
            response: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub keypoint: Keypoint,
    pub descriptor: Descriptor,
}

/// The ordered features extracted from one frame. May be empty.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    features: Vec<Feature>,
}

impl FeatureSet {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn keypoint(&self, index: usize) -> Option<&Keypoint> {
        self.features.get(index).map(|f| &f.keypoint)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> + Clone + '_ {
        self.features.iter().map(|f| &f.descriptor)
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_buffer_must_match_dimensions() {
        assert!(Frame::from_luma(4, 4, vec![0; 16]).is_ok());
        let err = Frame::from_luma(4, 4, vec![0; 15]).unwrap_err();
        assert_eq!(
            err,
            VisionError::BufferSize {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn rgba_is_converted_to_single_plane() {
        let width = 3;
        let height = 2;
        let rgba = vec![255u8; (width * height * 4) as usize];
        let frame = Frame::from_rgba(width, height, &rgba).expect("valid buffer");
        assert_eq!(frame.dimensions(), (3, 2));
        assert!(frame.image().pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn cloned_frames_share_the_raster() {
        let frame = Frame::from_luma(2, 2, vec![1, 2, 3, 4]).unwrap().with_sequence(7);
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.image(), copy.image()));
        assert_eq!(copy.sequence, 7);
    }
}
