//! STEM flyback calibration table.

use contracts::{Binning, FlybackEntry, FlybackLookup, FlybackTable};
use serde::{Deserialize, Serialize};

/// One measured calibration point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlybackPoint {
    pub binning: Binning,
    /// Binned scan size along the fast axis
    pub size: u32,
    pub mag_index: u32,
    pub exposure_s: f64,
    pub flyback_us: f64,
    pub startup_us: f64,
}

/// Calibration points looked up by binning, size and magnification,
/// then interpolated along exposure time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationTable {
    points: Vec<FlybackPoint>,
}

impl CalibrationTable {
    pub fn new(points: Vec<FlybackPoint>) -> Self {
        Self { points }
    }

    pub fn push(&mut self, point: FlybackPoint) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn entry(kind: FlybackLookup, flyback_us: f64, startup_us: f64) -> FlybackEntry {
    FlybackEntry {
        kind,
        flyback_us,
        startup_us,
    }
}

fn lerp(a: &FlybackPoint, b: &FlybackPoint, exposure_s: f64) -> (f64, f64) {
    let span = b.exposure_s - a.exposure_s;
    if span.abs() < f64::EPSILON {
        return (a.flyback_us, a.startup_us);
    }
    let t = (exposure_s - a.exposure_s) / span;
    (
        a.flyback_us + t * (b.flyback_us - a.flyback_us),
        a.startup_us + t * (b.startup_us - a.startup_us),
    )
}

impl FlybackTable for CalibrationTable {
    fn lookup(&self, binning: Binning, size: u32, mag_index: u32, exposure_s: f64) -> FlybackEntry {
        if !exposure_s.is_finite() || exposure_s < 0.0 {
            return entry(FlybackLookup::Error, 0.0, 0.0);
        }

        let mut matching: Vec<&FlybackPoint> = self
            .points
            .iter()
            .filter(|p| p.binning == binning && p.size == size && p.mag_index == mag_index)
            .collect();
        matching.sort_by(|a, b| a.exposure_s.total_cmp(&b.exposure_s));

        match matching.as_slice() {
            [] => entry(FlybackLookup::None, 0.0, 0.0),
            [only] => {
                let kind = if (only.exposure_s - exposure_s).abs() < 1e-9 {
                    FlybackLookup::Exact
                } else {
                    FlybackLookup::Single
                };
                entry(kind, only.flyback_us, only.startup_us)
            }
            points => {
                if let Some(hit) = points
                    .iter()
                    .find(|p| (p.exposure_s - exposure_s).abs() < 1e-9)
                {
                    return entry(FlybackLookup::Exact, hit.flyback_us, hit.startup_us);
                }
                let last = points.len() - 1;
                if exposure_s < points[0].exposure_s {
                    let (f, s) = lerp(points[0], points[1], exposure_s);
                    return entry(FlybackLookup::Extrapolated, f.max(0.0), s.max(0.0));
                }
                if exposure_s > points[last].exposure_s {
                    let (f, s) = lerp(points[last - 1], points[last], exposure_s);
                    return entry(FlybackLookup::Extrapolated, f.max(0.0), s.max(0.0));
                }
                let upper = points
                    .iter()
                    .position(|p| p.exposure_s > exposure_s)
                    .unwrap_or(last);
                let (f, s) = lerp(points[upper - 1], points[upper], exposure_s);
                entry(FlybackLookup::Interpolated, f, s)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(exposure_s: f64, flyback_us: f64) -> FlybackPoint {
        FlybackPoint {
            binning: 1,
            size: 1024,
            mag_index: 10,
            exposure_s,
            flyback_us,
            startup_us: flyback_us / 2.0,
        }
    }

    #[test]
    fn test_lookup_kinds() {
        let table = CalibrationTable::new(vec![point(1.0, 100.0), point(2.0, 200.0)]);

        assert_eq!(table.lookup(1, 1024, 10, 1.0).kind, FlybackLookup::Exact);

        let mid = table.lookup(1, 1024, 10, 1.5);
        assert_eq!(mid.kind, FlybackLookup::Interpolated);
        assert!((mid.flyback_us - 150.0).abs() < 1e-9);

        let high = table.lookup(1, 1024, 10, 3.0);
        assert_eq!(high.kind, FlybackLookup::Extrapolated);
        assert!((high.flyback_us - 300.0).abs() < 1e-9);

        assert_eq!(table.lookup(2, 1024, 10, 1.0).kind, FlybackLookup::None);
        assert_eq!(table.lookup(1, 1024, 10, f64::NAN).kind, FlybackLookup::Error);
    }

    #[test]
    fn test_single_point() {
        let table = CalibrationTable::new(vec![point(1.0, 120.0)]);
        let found = table.lookup(1, 1024, 10, 4.0);
        assert_eq!(found.kind, FlybackLookup::Single);
        assert_eq!(found.flyback_us, 120.0);
    }
}
