//! Display ↔ sensor-native coordinate mapping.
//!
//! A descriptor's [`SensorTransform`] describes how native readout maps to
//! display space: `display = rotate(flip_x(native))`. Alignment rules are
//! defined on native rows and columns, so ROIs are converted to native space,
//! aligned, and converted back.

use contracts::{Roi, Rotation, SensorTransform};

/// Rotate a rectangle inside a `width` × `height` image clockwise
///
/// Returns the rotated rectangle and the rotated image dimensions.
pub fn rotate_rect(roi: Roi, rotation: Rotation, width: u32, height: u32) -> (Roi, u32, u32) {
    match rotation {
        Rotation::None => (roi, width, height),
        Rotation::Cw90 => (
            Roi::new(height - roi.bottom, roi.left, height - roi.top, roi.right),
            height,
            width,
        ),
        Rotation::Cw180 => (
            Roi::new(
                width - roi.right,
                height - roi.bottom,
                width - roi.left,
                height - roi.top,
            ),
            width,
            height,
        ),
        Rotation::Cw270 => (
            Roi::new(roi.top, width - roi.right, roi.bottom, width - roi.left),
            height,
            width,
        ),
    }
}

/// Mirror a rectangle around the vertical axis of a `width`-wide image
pub fn flip_rect_x(roi: Roi, width: u32) -> Roi {
    Roi::new(width - roi.right, roi.top, width - roi.left, roi.bottom)
}

/// Native sensor dimensions for display dimensions
pub fn native_dims(transform: &SensorTransform, width: u32, height: u32) -> (u32, u32) {
    if transform.rotation.swaps_axes() {
        (height, width)
    } else {
        (width, height)
    }
}

/// Convert a display-space ROI to native space
///
/// `roi` must lie within `width` × `height`.
pub fn to_native(roi: Roi, transform: &SensorTransform, width: u32, height: u32) -> Roi {
    let (rotated, nw, _) = rotate_rect(roi, transform.rotation.inverse(), width, height);
    if transform.flip_x {
        flip_rect_x(rotated, nw)
    } else {
        rotated
    }
}

/// Convert a native-space ROI back to display space
pub fn to_display(
    roi: Roi,
    transform: &SensorTransform,
    native_width: u32,
    native_height: u32,
) -> Roi {
    let flipped = if transform.flip_x {
        flip_rect_x(roi, native_width)
    } else {
        roi
    };
    rotate_rect(flipped, transform.rotation, native_width, native_height).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cw90_moves_top_left_to_top_right() {
        // 400 wide, 200 high; top-left 10x20 block
        let roi = Roi::new(0, 0, 10, 20);
        let (rotated, w, h) = rotate_rect(roi, Rotation::Cw90, 400, 200);
        assert_eq!((w, h), (200, 400));
        assert_eq!(rotated, Roi::new(180, 0, 200, 10));
    }

    #[test]
    fn test_round_trip_all_transforms() {
        let roi = Roi::new(13, 40, 300, 77);
        for rotation in [Rotation::None, Rotation::Cw90, Rotation::Cw180, Rotation::Cw270] {
            for flip_x in [false, true] {
                let t = SensorTransform { rotation, flip_x };
                let (nw, nh) = native_dims(&t, 400, 200);
                let native = to_native(roi, &t, 400, 200);
                assert!(native.fits_within(nw, nh), "{t:?} -> {native:?}");
                assert_eq!(to_display(native, &t, nw, nh), roi, "{t:?}");
            }
        }
    }
}
