//! Dark reference synthesis from two bracketing references.

use contracts::{ImageBuffer, PixelData};

use crate::{CacheError, Result};

/// Bracketing grid points for an exposure
///
/// Returns `None` when the exposure lies on the grid (within `tolerance_s`)
/// or the lower grid point falls below `min_exposure_s`, in which case an
/// exact reference is used instead.
pub fn bracket_exposures(
    exposure_s: f64,
    interval_s: f64,
    min_exposure_s: f64,
    tolerance_s: f64,
) -> Option<(f64, f64)> {
    if interval_s <= 0.0 {
        return None;
    }
    let lower = (exposure_s / interval_s).floor() * interval_s;
    let upper = lower + interval_s;
    if (exposure_s - lower).abs() <= tolerance_s || (upper - exposure_s).abs() <= tolerance_s {
        return None;
    }
    if lower < min_exposure_s {
        return None;
    }
    Some((lower, upper))
}

/// Linear interpolation between two dark references
///
/// `lower_ratio_correction` scales the lower reference before blending; 1.0
/// disables the correction.
pub fn interpolate_dark(
    lower: &ImageBuffer,
    lower_exposure_s: f64,
    upper: &ImageBuffer,
    upper_exposure_s: f64,
    exposure_s: f64,
    lower_ratio_correction: f64,
) -> Result<ImageBuffer> {
    if lower.size() != upper.size() {
        return Err(CacheError::SizeMismatch {
            lower: lower.size(),
            upper: upper.size(),
        });
    }
    let span = upper_exposure_s - lower_exposure_s;
    if !(span > 0.0) {
        return Err(CacheError::InvalidBracket {
            lower_s: lower_exposure_s,
            upper_s: upper_exposure_s,
        });
    }
    let frac = ((exposure_s - lower_exposure_s) / span).clamp(0.0, 1.0) as f32;
    let correction = lower_ratio_correction as f32;

    let data = (0..lower.data.len())
        .map(|i| {
            let lo = lower.data.value(i) * correction;
            let hi = upper.data.value(i);
            lo + (hi - lo) * frac
        })
        .collect();

    Ok(ImageBuffer {
        width: lower.width,
        height: lower.height,
        data: PixelData::F32(data),
    })
}
