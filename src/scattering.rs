//! Point spread function of a grazing incidence primary mirror
//!
//! The PSF is the incoherent average of the Fraunhofer diffraction patterns of the
//! axial profiles (the columns) of the mirror surface.
//! Each axial profile is a 1D aperture of width `L sin(graze)` with the phase
//! `2 k h sin(graze)` imprinted by the surface height `h`.
//! The intensity is normalized such as the PSF of a fully sampled profile integrates to 1.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::WolterPrescription;

#[derive(Debug, thiserror::Error)]
pub enum ScatteringError {
    #[error("cannot compute the PSF of an empty surface")]
    EmptySurface,
    #[error("the surface has no valid sample")]
    NoValidSamples,
    #[error("the surface sampling must be strictly positive, found {0}")]
    Spacing(f64),
    #[error("the detector axis must have at least 2 samples, found {0}")]
    Axis(usize),
    #[error("the wavelength must be strictly positive, found {0}")]
    Wavelength(f64),
}
type Result<T> = std::result::Result<T, ScatteringError>;

/// Scalar diffraction model of the primary mirror
///
/// Default properties:
///  * prescription : [WolterPrescription::default]
///  * wavelength   : 1.24e-6mm (1keV)
///  * graze        : from the prescription
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScatteringModel {
    pub prescription: WolterPrescription,
    /// Wavelength in the length unit of the prescription
    pub wavelength: f64,
    /// Grazing angle overriding the prescription [rd]
    pub graze: Option<f64>,
}
impl Default for ScatteringModel {
    fn default() -> Self {
        Self {
            prescription: Default::default(),
            wavelength: 1.24e-6,
            graze: None,
        }
    }
}

impl ScatteringModel {
    /// Grazing angle [rd]
    pub fn graze(&self) -> f64 {
        self.graze.unwrap_or_else(|| self.prescription.graze())
    }
    /// Focal length of the primary mirror
    pub fn focal_length(&self) -> f64 {
        self.prescription.primary_focal_length()
    }
    /// Returns the PSF intensity of the primary mirror along the detector axis `x0`
    ///
    /// The `surface` heights are in microns, the surface rows are sampled along the mirror axis
    /// with the spacing `dx`; `dx` and `x0` are in the length unit of the prescription.
    pub fn primary_psf(
        &self,
        surface: &DMatrix<f64>,
        dx: f64,
        x0: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        if surface.is_empty() {
            return Err(ScatteringError::EmptySurface);
        }
        if !(dx > 0f64) {
            return Err(ScatteringError::Spacing(dx));
        }
        if x0.len() < 2 {
            return Err(ScatteringError::Axis(x0.len()));
        }
        if !(self.wavelength > 0f64) {
            return Err(ScatteringError::Wavelength(self.wavelength));
        }
        let sin_graze = self.graze().sin();
        let focal_length = self.focal_length();
        let wavenumber = 2. * PI / self.wavelength;
        let dr = dx * sin_graze;

        let column_intensities: Vec<Vec<f64>> = (0..surface.ncols())
            .into_par_iter()
            .filter_map(|j| {
                // (aperture coordinate, optical path difference) of the valid samples
                let profile: Vec<(f64, f64)> = surface
                    .column(j)
                    .iter()
                    .enumerate()
                    .filter(|(_, h)| h.is_finite())
                    .map(|(i, h)| (i as f64 * dr, 2e-3 * h * sin_graze))
                    .collect();
                if profile.is_empty() {
                    return None;
                }
                let norm = dr / (profile.len() as f64 * self.wavelength * focal_length);
                Some(
                    x0.iter()
                        .map(|x| {
                            let u = x / focal_length;
                            let (re, im) =
                                profile.iter().fold((0f64, 0f64), |(re, im), (r, opd)| {
                                    let (s, c) = (-wavenumber * (u * r + opd)).sin_cos();
                                    (re + c, im + s)
                                });
                            norm * (re * re + im * im)
                        })
                        .collect(),
                )
            })
            .collect();
        let n_column = column_intensities.len();
        if n_column == 0 {
            return Err(ScatteringError::NoValidSamples);
        }
        let intensity = column_intensities.into_iter().fold(
            DVector::zeros(x0.len()),
            |intensity, column| intensity + DVector::from_vec(column),
        );
        log::debug!("PSF averaged over {n_column} axial profiles");
        Ok(intensity / n_column as f64)
    }
}

/// Returns the PSF intensity of the primary mirror along the detector axis `x0`
/// with the default scattering model
pub fn primary_psf(surface: &DMatrix<f64>, dx: f64, x0: &DVector<f64>) -> Result<DVector<f64>> {
    ScatteringModel::default().primary_psf(surface, dx, x0)
}
