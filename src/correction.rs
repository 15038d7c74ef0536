//! Mirror figure correction
//!
//! A [Corrector] rebins the distortion map onto the influence function grid,
//! solves for the actuator voltages and returns the correction surface.
//! The correction surface is meant to be added to the distortion map to yield the corrected figure,
//! see [Correction::apply].

mod builder;
use std::fmt::Display;

pub use builder::CorrectionBuilder;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::{
    grid::{nan_mask, resample, ResampleMethod},
    solver::{DistortionSolver, Voltages},
    AxroError, FromBuilder, InfluenceFunctions, Result,
};

/// Masking and resampling of the correction surface
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResamplePolicy {
    /// The correction is resampled onto the distortion grid twice, without and with
    /// the shaded samples set to NaN, and the NaNs of the latter are overlaid on the former
    #[default]
    DefensiveDoubleResample,
    /// The shaded samples are set to NaN before resampling onto the distortion grid
    MaskBeforeResample,
    /// The masked correction is left on the influence function grid
    NoFinalResample,
}

/// Distortion corrector
pub struct Corrector {
    pub(crate) solver: DistortionSolver,
    pub(crate) policy: ResamplePolicy,
    pub(crate) method: ResampleMethod,
}

impl FromBuilder for Corrector {
    type ComponentBuilder = CorrectionBuilder;
}

/// Correction surface and actuator voltages
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    /// Correction surface, NaN where the mirror is shaded
    pub surface: DMatrix<f64>,
    /// Actuator voltages
    pub voltages: Voltages,
    /// Policy the surface was resampled with
    pub policy: ResamplePolicy,
}

impl Display for Correction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (n, m) = self.surface.shape();
        writeln!(
            f,
            "Correction ({:?}) with {} actuators in [{:.3},{:.3}]",
            self.policy,
            self.voltages.len(),
            self.voltages.min(),
            self.voltages.max()
        )?;
        write!(
            f,
            " surface: {}x{}, {} shaded samples",
            n,
            m,
            self.surface.iter().filter(|x| x.is_nan()).count()
        )
    }
}

impl Correction {
    /// Returns the corrected figure: the sum of the correction surface and the `distortion` map
    pub fn apply(&self, distortion: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if distortion.shape() != self.surface.shape() {
            let (n, m) = self.surface.shape();
            let (p, q) = distortion.shape();
            return Err(AxroError::Apply(n, m, p, q));
        }
        Ok(distortion + &self.surface)
    }
}

impl Corrector {
    pub fn solver(&self) -> &DistortionSolver {
        &self.solver
    }
    pub fn policy(&self) -> ResamplePolicy {
        self.policy
    }
    /// Computes the correction of the `distortion` map with the influence functions `ifs`
    ///
    /// The `shade` mask is on the influence function grid and defaults to no shading.
    pub fn correct(
        &self,
        distortion: &DMatrix<f64>,
        ifs: &InfluenceFunctions,
        shade: Option<&DMatrix<f64>>,
    ) -> Result<Correction> {
        let shape = ifs.shape();
        let d2 = resample(distortion, shape, self.method)?;
        let default_shade;
        let shade = match shade {
            Some(shade) => shade,
            None => {
                default_shade = DMatrix::from_element(shape.0, shape.1, 1f64);
                &default_shade
            }
        };

        let voltages = self.solver.solve(&d2, ifs, shade)?;
        let mut cor2 = ifs.combine(&voltages)?;

        let surface = match self.policy {
            ResamplePolicy::DefensiveDoubleResample => {
                let mut cor3 = resample(&cor2, distortion.shape(), ResampleMethod::Linear)?;
                nan_mask(&mut cor2, shade)?;
                let cornan = resample(&cor2, distortion.shape(), ResampleMethod::Linear)?;
                cor3.iter_mut()
                    .zip(cornan.iter())
                    .filter(|(_, c)| c.is_nan())
                    .for_each(|(x, _)| *x = f64::NAN);
                cor3
            }
            ResamplePolicy::MaskBeforeResample => {
                nan_mask(&mut cor2, shade)?;
                resample(&cor2, distortion.shape(), ResampleMethod::Linear)?
            }
            ResamplePolicy::NoFinalResample => {
                nan_mask(&mut cor2, shade)?;
                cor2
            }
        };
        let correction = Correction {
            surface,
            voltages,
            policy: self.policy,
        };
        log::info!("{correction}");
        Ok(correction)
    }
}

fn correct_with(
    policy: ResamplePolicy,
    distortion: &DMatrix<f64>,
    ifs: &InfluenceFunctions,
    shade: Option<&DMatrix<f64>>,
    solver: &DistortionSolver,
) -> Result<Correction> {
    Corrector {
        solver: solver.clone(),
        policy,
        method: ResampleMethod::Linear,
    }
    .correct(distortion, ifs, shade)
}

/// Correction on the distortion grid with NaNs overlaid from a second resampling of the masked correction
pub fn correct_xray_test_mirror(
    distortion: &DMatrix<f64>,
    ifs: &InfluenceFunctions,
    shade: Option<&DMatrix<f64>>,
    solver: &DistortionSolver,
) -> Result<Correction> {
    correct_with(
        ResamplePolicy::DefensiveDoubleResample,
        distortion,
        ifs,
        shade,
        solver,
    )
}

/// Correction masked on the influence function grid and resampled onto the distortion grid
pub fn correct_hfdfc3(
    distortion: &DMatrix<f64>,
    ifs: &InfluenceFunctions,
    shade: Option<&DMatrix<f64>>,
    solver: &DistortionSolver,
) -> Result<Correction> {
    correct_with(
        ResamplePolicy::MaskBeforeResample,
        distortion,
        ifs,
        shade,
        solver,
    )
}

/// Correction masked and left on the influence function grid
pub fn correct_for_ctf(
    distortion: &DMatrix<f64>,
    ifs: &InfluenceFunctions,
    shade: Option<&DMatrix<f64>>,
    solver: &DistortionSolver,
) -> Result<Correction> {
    correct_with(
        ResamplePolicy::NoFinalResample,
        distortion,
        ifs,
        shade,
        solver,
    )
}
