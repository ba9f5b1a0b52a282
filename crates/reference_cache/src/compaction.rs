//! Lossy float → scaled 16-bit compaction of gain references.

use contracts::{ImageBuffer, PixelData};

/// Compact a float image into scaled 16-bit storage
///
/// Returns `None` when the image is not float or holds negative or
/// non-finite values that the unsigned scaled form cannot represent.
pub fn compact_f32(image: &ImageBuffer) -> Option<ImageBuffer> {
    let PixelData::F32(values) = &image.data else {
        return None;
    };
    let mut max = 0.0f32;
    for &v in values {
        if !v.is_finite() || v < 0.0 {
            return None;
        }
        max = max.max(v);
    }
    let scale = if max > 0.0 { max / u16::MAX as f32 } else { 1.0 };
    let data = values
        .iter()
        .map(|&v| (v / scale).round().min(u16::MAX as f32) as u16)
        .collect();
    Some(ImageBuffer {
        width: image.width,
        height: image.height,
        data: PixelData::ScaledU16 { data, scale },
    })
}
