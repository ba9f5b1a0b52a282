//! Sensor geometry: ROI rectangles, binning, and the fixed sensor wiring transform.

use serde::{Deserialize, Serialize};

/// Binning factor (1 = unbinned)
pub type Binning = u32;

/// Region of interest in unbinned sensor pixels
///
/// `right` and `bottom` are exclusive, so a full 4096² sensor is
/// `Roi::new(0, 0, 4096, 4096)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Roi {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// ROI covering a whole sensor
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Whether the ROI lies inside a `width` × `height` sensor
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.left <= self.right
            && self.top <= self.bottom
            && self.right <= width
            && self.bottom <= height
    }

    /// Image size after binning
    pub fn binned_size(&self, binning: Binning) -> (u32, u32) {
        let b = binning.max(1);
        (self.width() / b, self.height() / b)
    }

    /// Center point, rounded down
    pub fn center(&self) -> (u32, u32) {
        (
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }
}

/// Fixed clockwise rotation between display space and sensor-native space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Rotation that undoes this one
    pub fn inverse(self) -> Self {
        match self {
            Rotation::None => Rotation::None,
            Rotation::Cw90 => Rotation::Cw270,
            Rotation::Cw180 => Rotation::Cw180,
            Rotation::Cw270 => Rotation::Cw90,
        }
    }

    /// Whether width and height trade places
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// Physical sensor wiring: display = rotate(flip(native)) is undone before alignment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorTransform {
    #[serde(default)]
    pub rotation: Rotation,
    /// Mirror around the vertical axis, applied before rotation
    #[serde(default)]
    pub flip_x: bool,
}

impl SensorTransform {
    pub fn is_identity(&self) -> bool {
        self.rotation == Rotation::None && !self.flip_x
    }
}

/// Legal ROI and binning a backend will actually be driven with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedGeometry {
    pub roi: Roi,
    pub binning: Binning,
}

impl ResolvedGeometry {
    /// Expected image width and height
    pub fn image_size(&self) -> (u32, u32) {
        self.roi.binned_size(self.binning)
    }

    /// Expected pixel count
    pub fn pixel_count(&self) -> usize {
        let (w, h) = self.image_size();
        w as usize * h as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_dimensions() {
        let roi = Roi::new(64, 128, 1088, 640);
        assert_eq!(roi.width(), 1024);
        assert_eq!(roi.height(), 512);
        assert_eq!(roi.binned_size(2), (512, 256));
        assert_eq!(roi.center(), (576, 384));
        assert!(roi.fits_within(2048, 2048));
        assert!(!roi.fits_within(1024, 2048));
    }

    #[test]
    fn test_rotation_inverse() {
        for r in [Rotation::None, Rotation::Cw90, Rotation::Cw180, Rotation::Cw270] {
            assert_eq!(r.inverse().inverse(), r);
        }
        assert!(Rotation::Cw90.swaps_axes());
        assert!(!Rotation::Cw180.swaps_axes());
    }
}
