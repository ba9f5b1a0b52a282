//! ROI and binning resolution.

use contracts::{
    AcquisitionError, Binning, CameraDescriptor, ResolvedGeometry, Roi, SizeRestriction,
    SubareaSize,
};
use tracing::debug;

use crate::transform::{native_dims, to_display, to_native};

/// Largest supported binning not above the request, else the smallest supported
pub fn clamp_binning(requested: Binning, table: &[Binning]) -> Result<Binning, AcquisitionError> {
    let smallest = table
        .iter()
        .copied()
        .min()
        .ok_or_else(|| AcquisitionError::configuration("camera has an empty binning table"))?;
    Ok(table
        .iter()
        .copied()
        .filter(|b| *b <= requested)
        .max()
        .unwrap_or(smallest))
}

/// Resolve a requested ROI and binning to legal values for a camera
///
/// `requested` is in display-space unbinned pixels, `None` meaning the full
/// sensor. The result lies inside the sensor and satisfies the descriptor's
/// alignment rule, or the call fails with a configuration error.
pub fn resolve_geometry(
    requested: Option<Roi>,
    binning: Binning,
    descriptor: &CameraDescriptor,
) -> Result<ResolvedGeometry, AcquisitionError> {
    let binning = clamp_binning(binning, &descriptor.binnings)?;
    let (width, height) = (descriptor.sensor_width, descriptor.sensor_height);

    let requested = requested.unwrap_or_else(|| descriptor.full_roi());
    let clamped = Roi::new(
        requested.left.min(width),
        requested.top.min(height),
        requested.right.min(width),
        requested.bottom.min(height),
    );
    if clamped.is_empty() {
        return Err(AcquisitionError::configuration(format!(
            "requested ROI {requested:?} does not overlap the {width}x{height} sensor"
        )));
    }

    let transform = &descriptor.transform;
    let (nw, nh) = native_dims(transform, width, height);
    let native = to_native(clamped, transform, width, height);

    let aligned = match &descriptor.restriction {
        SizeRestriction::None => align_plain(native, binning, nw, nh)?,
        SizeRestriction::Modulo {
            size_x,
            size_y,
            offset_x,
            offset_y,
        } => {
            let (left, right) = align_modulo_axis(
                native.left,
                native.right,
                nw,
                binning,
                *size_x,
                *offset_x,
            )?;
            let (top, bottom) = align_modulo_axis(
                native.top,
                native.bottom,
                nh,
                binning,
                *size_y,
                *offset_y,
            )?;
            Roi::new(left, top, right, bottom)
        }
        SizeRestriction::Block { block } => {
            let unit = lcm(*block, binning);
            let (left, right) = align_block_axis(native.left, native.right, nw, unit)?;
            let (top, bottom) = align_block_axis(native.top, native.bottom, nh, unit)?;
            Roi::new(left, top, right, bottom)
        }
        SizeRestriction::Subareas { sizes } => select_subarea(native, binning, sizes, nw, nh)?,
    };

    let roi = to_display(aligned, transform, nw, nh);
    if roi.is_empty() || !roi.fits_within(width, height) {
        return Err(AcquisitionError::configuration(format!(
            "aligned ROI {roi:?} is outside the {width}x{height} sensor"
        )));
    }

    debug!(
        camera = descriptor.id,
        ?requested,
        ?roi,
        binning,
        "resolved geometry"
    );
    Ok(ResolvedGeometry { roi, binning })
}

/// Whether a resolved geometry satisfies the descriptor's alignment rule
pub fn satisfies_restriction(geometry: &ResolvedGeometry, descriptor: &CameraDescriptor) -> bool {
    let (width, height) = (descriptor.sensor_width, descriptor.sensor_height);
    let roi = geometry.roi;
    let b = geometry.binning;
    if roi.is_empty() || !roi.fits_within(width, height) || !descriptor.binnings.contains(&b) {
        return false;
    }
    let native = to_native(roi, &descriptor.transform, width, height);
    let multiple_of_binning = native.width() % b == 0 && native.height() % b == 0;

    match &descriptor.restriction {
        SizeRestriction::None => multiple_of_binning,
        SizeRestriction::Modulo {
            size_x,
            size_y,
            offset_x,
            offset_y,
        } => {
            multiple_of_binning
                && native.left % b == 0
                && native.top % b == 0
                && (native.width() / b) % size_x == 0
                && (native.height() / b) % size_y == 0
                && (native.left / b) % offset_x == 0
                && (native.top / b) % offset_y == 0
        }
        SizeRestriction::Block { block } => {
            multiple_of_binning
                && native.left % block == 0
                && native.top % block == 0
                && native.right % block == 0
                && native.bottom % block == 0
        }
        SizeRestriction::Subareas { sizes } => {
            multiple_of_binning
                && sizes.iter().any(|s| {
                    native.width() == s.width / b * b && native.height() == s.height / b * b
                })
        }
    }
}

fn align_plain(native: Roi, binning: Binning, nw: u32, nh: u32) -> Result<Roi, AcquisitionError> {
    let (left, right) = align_plain_axis(native.left, native.right, nw, binning)?;
    let (top, bottom) = align_plain_axis(native.top, native.bottom, nh, binning)?;
    Ok(Roi::new(left, top, right, bottom))
}

/// Trim the extent to a multiple of the binning, shifting back inside the sensor
fn align_plain_axis(
    start: u32,
    end: u32,
    sensor: u32,
    binning: Binning,
) -> Result<(u32, u32), AcquisitionError> {
    let len = ((end - start) / binning * binning).max(binning);
    if len > sensor {
        return Err(AcquisitionError::configuration(format!(
            "binning {binning} exceeds sensor extent {sensor}"
        )));
    }
    let start = start.min(sensor - len);
    Ok((start, start + len))
}

/// Modulo alignment in binned coordinates
///
/// The size is rounded up to `size_mod` and grown toward the sensor center;
/// it is only reduced when the rounded size no longer fits the sensor. The
/// offset is then moved toward the center onto a multiple of `offset_mod`.
fn align_modulo_axis(
    start: u32,
    end: u32,
    sensor: u32,
    binning: Binning,
    size_mod: u32,
    offset_mod: u32,
) -> Result<(u32, u32), AcquisitionError> {
    let sensor_b = sensor / binning;
    let start_b = start / binning;
    let len_b = end.div_ceil(binning).saturating_sub(start_b).max(1);

    let mut len = len_b.div_ceil(size_mod) * size_mod;
    if len > sensor_b {
        len = sensor_b / size_mod * size_mod;
    }
    if len == 0 {
        return Err(AcquisitionError::configuration(format!(
            "binned extent {sensor_b} cannot hold a multiple of {size_mod}"
        )));
    }

    let toward_high = start_b + len_b / 2 < sensor_b / 2;
    let growth = len.saturating_sub(len_b);
    let mut pos = if toward_high {
        start_b
    } else {
        start_b.saturating_sub(growth)
    };
    pos = pos.min(sensor_b - len);

    pos = if toward_high {
        pos.div_ceil(offset_mod) * offset_mod
    } else {
        pos / offset_mod * offset_mod
    };
    if pos + len > sensor_b {
        pos = (sensor_b - len) / offset_mod * offset_mod;
    }
    if pos + len > sensor_b {
        return Err(AcquisitionError::configuration(format!(
            "no offset aligned to {offset_mod} fits size {len} in extent {sensor_b}"
        )));
    }

    Ok((pos * binning, (pos + len) * binning))
}

/// Block alignment in unbinned coordinates: start rounds down, end rounds up
fn align_block_axis(
    start: u32,
    end: u32,
    sensor: u32,
    unit: u32,
) -> Result<(u32, u32), AcquisitionError> {
    let limit = sensor / unit * unit;
    if limit == 0 {
        return Err(AcquisitionError::configuration(format!(
            "sensor extent {sensor} is smaller than alignment block {unit}"
        )));
    }
    let mut lo = start / unit * unit;
    let hi = (end.div_ceil(unit) * unit).min(limit);
    if lo >= hi {
        lo = hi - unit;
    }
    Ok((lo, hi))
}

/// Smallest tier covering the request, else the largest, centered on the sensor
fn select_subarea(
    native: Roi,
    binning: Binning,
    sizes: &[SubareaSize],
    nw: u32,
    nh: u32,
) -> Result<Roi, AcquisitionError> {
    let area = |s: &SubareaSize| s.width as u64 * s.height as u64;
    let fitting = sizes.iter().filter(|s| s.width <= nw && s.height <= nh);
    let tier = fitting
        .clone()
        .filter(|s| s.width >= native.width() && s.height >= native.height())
        .min_by_key(|s| area(s))
        .or_else(|| fitting.max_by_key(|s| area(s)))
        .ok_or_else(|| AcquisitionError::configuration("no supported subarea fits the sensor"))?;

    let w = tier.width / binning * binning;
    let h = tier.height / binning * binning;
    if w == 0 || h == 0 {
        return Err(AcquisitionError::configuration(format!(
            "subarea {}x{} is smaller than binning {binning}",
            tier.width, tier.height
        )));
    }
    let left = (nw - w) / 2;
    let top = (nh - h) / 2;
    Ok(Roi::new(left, top, left + w, top + h))
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u32, b: u32) -> u32 {
    a / gcd(a, b) * b
}
