use serde::{Deserialize, Serialize};

use crate::{
    merit::MeritError, scattering::ScatteringError, Builder, ScatteringModel, TomlConfig,
    WolterPrescription,
};

use super::MeritEvaluator;

/// Detector axis: 1000 samples from -2 to 2
pub(super) const DEFAULT_AXIS: (f64, f64, usize) = (-2., 2., 1000);

/// [MeritEvaluator] builder
///
/// Default properties:
///  * axis         : 1000 samples from -2 to 2
///  * prescription : [WolterPrescription::default]
///  * wavelength   : 1.24e-6 (1keV)
///  * graze        : from the prescription
///  * renorm       : true
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeritBuilder {
    axis: (f64, f64, usize),
    wavelength: f64,
    graze: Option<f64>,
    renorm: bool,
    prescription: WolterPrescription,
}

impl Default for MeritBuilder {
    fn default() -> Self {
        let ScatteringModel {
            prescription,
            wavelength,
            graze,
        } = ScatteringModel::default();
        Self {
            axis: DEFAULT_AXIS,
            prescription,
            wavelength,
            graze,
            renorm: true,
        }
    }
}

impl TomlConfig for MeritBuilder {
    const HEADER: &'static str = "::axro::MeritBuilder";
}

impl MeritBuilder {
    /// Sets the detector axis with `n_sample` samples from `start` to `end`
    pub fn axis(mut self, start: f64, end: f64, n_sample: usize) -> Self {
        self.axis = (start, end, n_sample);
        self
    }
    /// Sets the Wolter-I prescription
    pub fn prescription(mut self, prescription: WolterPrescription) -> Self {
        self.prescription = prescription;
        self
    }
    /// Sets the wavelength in the length unit of the prescription
    pub fn wavelength(mut self, wavelength: f64) -> Self {
        self.wavelength = wavelength;
        self
    }
    /// Sets the grazing angle in radians, overriding the prescription
    pub fn graze(mut self, graze: f64) -> Self {
        self.graze = Some(graze);
        self
    }
    /// Normalizes (or not) the PSF to a unit integral
    pub fn renorm(mut self, renorm: bool) -> Self {
        self.renorm = renorm;
        self
    }
}

impl Builder for MeritBuilder {
    type Component = MeritEvaluator;
    fn build(self) -> crate::Result<Self::Component> {
        let (start, end, n) = self.axis;
        if n < 2 || !(end > start) {
            return Err(MeritError::Axis(n).into());
        }
        if !(self.wavelength > 0f64) {
            return Err(ScatteringError::Wavelength(self.wavelength).into());
        }
        Ok(MeritEvaluator {
            model: ScatteringModel {
                prescription: self.prescription,
                wavelength: self.wavelength,
                graze: self.graze,
            },
            axis: self.axis,
            renorm: self.renorm,
        })
    }
}
