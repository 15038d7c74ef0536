//! Wolter-I optical prescription

use serde::{Deserialize, Serialize};

/// Wolter-I telescope prescription
///
/// Default properties:
///  * r0 : 220mm, radius at the intersection of the primary and secondary mirrors
///  * z0 : 8400mm, focal distance from the intersection plane
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WolterPrescription {
    pub r0: f64,
    pub z0: f64,
}
impl Default for WolterPrescription {
    fn default() -> Self {
        Self { r0: 220., z0: 8400. }
    }
}

/// Wolter-I conic parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WolterParameters {
    /// Grazing angle on the primary mirror [rd]
    pub alpha: f64,
    /// Paraboloid parameter
    pub p: f64,
    /// Hyperboloid parameter
    pub d: f64,
    /// Hyperboloid eccentricity
    pub e: f64,
}

impl WolterPrescription {
    pub fn new(r0: f64, z0: f64) -> Self {
        Self { r0, z0 }
    }
    /// Returns the Wolter-I conic parameters
    pub fn parameters(&self) -> WolterParameters {
        let alpha = 0.25 * (self.r0 / self.z0).atan();
        let thetah = 3. * alpha;
        let thetap = alpha;
        let t4 = (4. * alpha).tan();
        WolterParameters {
            alpha,
            p: self.z0 * t4 * thetap.tan(),
            d: self.z0 * t4 * (4. * alpha - thetah).tan(),
            e: (4. * alpha).cos() * (1. + t4 * thetah.tan()),
        }
    }
    /// Grazing incidence angle on the primary mirror [rd]
    pub fn graze(&self) -> f64 {
        self.parameters().alpha
    }
    /// Focal length of the primary mirror
    pub fn primary_focal_length(&self) -> f64 {
        self.z0 + 0.5 * self.parameters().p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prescription() {
        let wolter = WolterPrescription::default();
        let graze = wolter.graze();
        assert!((graze - (220f64 / 8400.).atan() / 4.).abs() < 1e-15);
        assert!((graze.to_degrees() - 0.375).abs() < 1e-2);
        let f = wolter.primary_focal_length();
        assert!(f > 8400. && f < 8401., "{f}");
    }

    #[test]
    fn hyperboloid() {
        let WolterParameters { p, d, e, .. } = WolterPrescription::default().parameters();
        assert!((p - d).abs() < 1e-12);
        assert!(e > 1.);
    }
}
