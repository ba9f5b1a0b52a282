//! Image buffers returned by backends and stored as references.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::AcquisitionError;

/// Pixel storage
///
/// `ScaledU16` is the compacted form of a float gain reference: the real value
/// of pixel `i` is `data[i] as f32 * scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    F32(Vec<f32>),
    ScaledU16 { data: Vec<u16>, scale: f32 },
}

impl PixelData {
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len(),
            PixelData::I16(v) => v.len(),
            PixelData::F32(v) => v.len(),
            PixelData::ScaledU16 { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pixel `i` as a float
    pub fn value(&self, i: usize) -> f32 {
        match self {
            PixelData::U8(v) => v[i] as f32,
            PixelData::U16(v) => v[i] as f32,
            PixelData::I16(v) => v[i] as f32,
            PixelData::F32(v) => v[i],
            PixelData::ScaledU16 { data, scale } => data[i] as f32 * scale,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelData::U8(_) => 1,
            PixelData::U16(_) | PixelData::I16(_) | PixelData::ScaledU16 { .. } => 2,
            PixelData::F32(_) => 4,
        }
    }

    /// Raw little-endian view of the pixel storage
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PixelData::U8(v) => v.as_slice(),
            PixelData::U16(v) => bytemuck::cast_slice(v.as_slice()),
            PixelData::I16(v) => bytemuck::cast_slice(v.as_slice()),
            PixelData::F32(v) => bytemuck::cast_slice(v.as_slice()),
            PixelData::ScaledU16 { data, .. } => bytemuck::cast_slice(data.as_slice()),
        }
    }

    /// All pixels converted to float
    pub fn to_f32(&self) -> Vec<f32> {
        (0..self.len()).map(|i| self.value(i)).collect()
    }
}

/// Mean and standard deviation of a pixel sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    pub mean: f64,
    pub sd: f64,
    pub samples: usize,
}

/// Image with its dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub data: PixelData,
}

impl ImageBuffer {
    /// Build an image, checking that the pixel count matches the dimensions
    pub fn new(width: u32, height: u32, data: PixelData) -> Result<Self, AcquisitionError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(AcquisitionError::fatal(format!(
                "pixel buffer holds {} values, {}x{} needs {}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Image filled with a single 16-bit value
    pub fn filled_u16(width: u32, height: u32, value: u16) -> Self {
        Self {
            width,
            height,
            data: PixelData::U16(vec![value; width as usize * height as usize]),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn byte_depth(&self) -> usize {
        self.data.bytes_per_pixel()
    }

    /// Resident size of the pixel storage
    pub fn byte_len(&self) -> usize {
        self.data.len() * self.data.bytes_per_pixel()
    }

    /// Mean and SD over every `stride`-th pixel
    pub fn sample_stats(&self, stride: usize) -> SampleStats {
        let stride = stride.max(1);
        let mut count = 0usize;
        let mut mean = 0.0f64;
        let mut m2 = 0.0f64;
        let mut i = 0;
        while i < self.data.len() {
            let x = self.data.value(i) as f64;
            count += 1;
            let delta = x - mean;
            mean += delta / count as f64;
            m2 += delta * (x - mean);
            i += stride;
        }
        let sd = if count > 1 {
            (m2 / (count - 1) as f64).sqrt()
        } else {
            0.0
        };
        SampleStats {
            mean,
            sd,
            samples: count,
        }
    }

    /// Hash of dimensions and pixel bytes, used to detect repeated frames
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.width.hash(&mut hasher);
        self.height.hash(&mut hasher);
        self.data.as_bytes().hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_pixel_count() {
        assert!(ImageBuffer::new(4, 4, PixelData::U16(vec![0; 16])).is_ok());
        assert!(ImageBuffer::new(4, 4, PixelData::U16(vec![0; 15])).is_err());
    }

    #[test]
    fn test_byte_len_by_depth() {
        let img = ImageBuffer::new(2, 2, PixelData::F32(vec![1.0; 4])).unwrap();
        assert_eq!(img.byte_len(), 16);
        assert_eq!(img.data.as_bytes().len(), 16);

        let scaled = PixelData::ScaledU16 {
            data: vec![100; 4],
            scale: 0.5,
        };
        assert_eq!(scaled.value(0), 50.0);
        assert_eq!(scaled.bytes_per_pixel(), 2);
    }

    #[test]
    fn test_sample_stats() {
        let img = ImageBuffer::new(2, 2, PixelData::U16(vec![2, 4, 4, 6])).unwrap();
        let stats = img.sample_stats(1);
        assert_eq!(stats.samples, 4);
        assert!((stats.mean - 4.0).abs() < 1e-9);
        assert!((stats.sd - (8.0f64 / 3.0).sqrt()).abs() < 1e-9);

        let strided = img.sample_stats(2);
        assert_eq!(strided.samples, 2);
        assert!((strided.mean - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_content_hash_detects_change() {
        let a = ImageBuffer::filled_u16(8, 8, 10);
        let b = ImageBuffer::filled_u16(8, 8, 10);
        let c = ImageBuffer::filled_u16(8, 8, 11);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }
}
