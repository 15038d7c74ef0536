//! Image quality merit functions
//!
//! The merit functions are derived from the cumulative distribution of the PSF
//! of the primary mirror:
//!  * the RMS equivalent width is the distance between the 16th and 84th percentiles,
//!    i.e. twice the standard deviation of a Gaussian profile,
//!  * the half power diameter is the distance between the 25th and 75th percentiles.
//!
//! Both widths are converted into angles in arcsec with the primary mirror focal length,
//! the RMS equivalent width being doubled.

mod builder;
use std::fmt::Display;

pub use builder::MeritBuilder;
use nalgebra::{DMatrix, DVector};
use skyangle::Conversion;

use crate::{grid::strip_nans, FromBuilder, Result, ScatteringModel};

/// Fraction of the PSF flux expected on the detector below which the sampling is suspicious
pub const FLUX_THRESHOLD: f64 = 0.95;

#[derive(Debug, thiserror::Error)]
pub enum MeritError {
    #[error("the PSF axis must have at least 2 samples, found {0}")]
    Axis(usize),
    #[error("the PSF axis ({0}) and intensity ({1}) must have the same length")]
    Length(usize, usize),
    #[error("cannot normalize a PSF with a flux of {0}")]
    ZeroFlux(f64),
    #[error("missing surface sampling")]
    Spacing,
}

/// Point spread function along the detector axis
#[derive(Debug, Clone, PartialEq)]
pub struct Psf {
    x: DVector<f64>,
    intensity: DVector<f64>,
}

impl Psf {
    /// Creates a new PSF from the detector `x` axis and the `intensity`
    pub fn new(x: DVector<f64>, intensity: DVector<f64>) -> std::result::Result<Self, MeritError> {
        let psf = Self { x, intensity };
        psf.check()?;
        Ok(psf)
    }
    fn check(&self) -> std::result::Result<(), MeritError> {
        if self.x.len() < 2 {
            return Err(MeritError::Axis(self.x.len()));
        }
        if self.x.len() != self.intensity.len() {
            return Err(MeritError::Length(self.x.len(), self.intensity.len()));
        }
        Ok(())
    }
    /// Detector axis
    pub fn x(&self) -> &DVector<f64> {
        &self.x
    }
    /// Intensity density
    pub fn intensity(&self) -> &DVector<f64> {
        &self.intensity
    }
    /// Axis sampling
    pub fn spacing(&self) -> f64 {
        self.x[1] - self.x[0]
    }
    /// PSF integral over the axis
    pub fn integral(&self) -> f64 {
        self.intensity.sum() * self.spacing()
    }
    /// Returns the PSF normalized to a unit integral
    pub fn normalized(&self) -> std::result::Result<Self, MeritError> {
        let flux = self.integral();
        if flux == 0f64 || !flux.is_finite() {
            return Err(MeritError::ZeroFlux(flux));
        }
        Ok(Self {
            x: self.x.clone(),
            intensity: &self.intensity / flux,
        })
    }
    /// Cumulative distribution function
    pub fn cdf(&self) -> DVector<f64> {
        let dx = self.spacing();
        let mut sum = 0f64;
        self.intensity.map(|x| {
            sum += x;
            sum * dx
        })
    }
    /// Axis position where the cumulative distribution is the closest to `p`
    ///
    /// The first of several equally close positions is returned.
    pub fn percentile(&self, p: f64) -> f64 {
        let cdf = self.cdf();
        self.x[nearest_index(&cdf, p)]
    }
}

// Index of the first element of `data` the closest to `value`
fn nearest_index(data: &DVector<f64>, value: f64) -> usize {
    data.iter()
        .map(|x| (x - value).abs())
        .enumerate()
        .fold((0, f64::INFINITY), |(k, min), (i, e)| {
            if e < min {
                (i, e)
            } else {
                (k, min)
            }
        })
        .0
}

// PSF integral, a warning is logged if it is below the flux threshold
fn detector_flux(psf: &Psf) -> f64 {
    let flux = psf.integral();
    if flux < FLUX_THRESHOLD {
        log::warn!(
            "possible sampling problem: only {:.3} of the PSF flux on the detector",
            flux
        );
    }
    flux
}

/// PSF widths in the unit of the PSF axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsfWidths {
    /// Distance between the 16th and 84th percentiles
    pub rms: f64,
    /// Distance between the 25th and 75th percentiles
    pub hpd: f64,
    /// Standard deviation of the PSF
    pub second_moment_rms: f64,
    /// PSF integral before normalization
    pub flux: f64,
}

impl PsfWidths {
    /// Computes the widths of the `psf`, the PSF is normalized to a unit integral first if `renorm` is true
    ///
    /// A warning is logged if less than 95% of the flux falls on the PSF axis
    pub fn from_psf(psf: &Psf, renorm: bool) -> std::result::Result<Self, MeritError> {
        psf.check()?;
        let flux = detector_flux(psf);
        if renorm {
            Ok(Self::measure(&psf.normalized()?, flux))
        } else {
            Ok(Self::measure(psf, flux))
        }
    }
    // Widths of a PSF whose integral before normalization was `flux`
    fn measure(psf: &Psf, flux: f64) -> Self {
        let cdf = psf.cdf();
        let at = |p: f64| psf.x[nearest_index(&cdf, p)];
        let dx = psf.spacing();
        let mean = psf.intensity.dot(&psf.x) * dx;
        let variance = psf.intensity.dot(&psf.x.map(|x| x * x)) * dx - mean * mean;
        Self {
            rms: at(0.84) - at(0.16),
            hpd: at(0.75) - at(0.25),
            second_moment_rms: variance.max(0f64).sqrt(),
            flux,
        }
    }
    /// Returns true if less than 95% of the flux falls on the PSF axis
    pub fn is_undersampled(&self) -> bool {
        self.flux < FLUX_THRESHOLD
    }
}

/// Image quality merit functions
#[derive(Debug, Clone, PartialEq)]
pub struct MeritFunctions {
    /// RMS equivalent diameter [arcsec]
    pub rms: f64,
    /// Half power diameter [arcsec]
    pub hpd: f64,
    /// Point spread function, normalized if requested
    pub psf: Psf,
    /// PSF integral before normalization
    pub flux: f64,
}

impl Display for MeritFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Merit functions: RMS={:.3}arcsec, HPD={:.3}arcsec (flux: {:.3})",
            self.rms, self.hpd, self.flux
        )
    }
}

/// Merit functions evaluator
pub struct MeritEvaluator {
    pub(crate) model: ScatteringModel,
    pub(crate) axis: (f64, f64, usize),
    pub(crate) renorm: bool,
}

impl FromBuilder for MeritEvaluator {
    type ComponentBuilder = MeritBuilder;
}

impl MeritEvaluator {
    pub fn model(&self) -> &ScatteringModel {
        &self.model
    }
    /// Returns a new detector axis
    pub fn axis(&self) -> DVector<f64> {
        let (start, end, n) = self.axis;
        crate::grid::linspace(start, end, n)
    }
    /// Computes the merit functions of the `surface` with the sampling `dx`
    ///
    /// The surface heights are in microns, only the first element of `dx`,
    /// the sampling along the mirror axis, is used.
    pub fn evaluate(&self, surface: &DMatrix<f64>, dx: &[f64]) -> Result<MeritFunctions> {
        self.evaluate_on(surface, dx, self.axis())
    }
    /// Computes the merit functions of the `surface` with the sampling `dx` along the detector axis `x0`
    pub fn evaluate_on(
        &self,
        surface: &DMatrix<f64>,
        dx: &[f64],
        x0: DVector<f64>,
    ) -> Result<MeritFunctions> {
        let &dx = dx.first().ok_or(MeritError::Spacing)?;
        if x0.len() < 2 {
            return Err(MeritError::Axis(x0.len()).into());
        }
        let surface = strip_nans(surface);
        let focal_length = self.model.focal_length();
        let intensity = self.model.primary_psf(&surface, dx, &x0)?;
        let psf = Psf::new(x0, intensity)?;

        let flux = detector_flux(&psf);
        let psf = if self.renorm { psf.normalized()? } else { psf };
        let widths = PsfWidths::measure(&psf, flux);
        let merit = MeritFunctions {
            rms: 2. * (widths.rms / focal_length).to_arcsec(),
            hpd: (widths.hpd / focal_length).to_arcsec(),
            psf,
            flux: widths.flux,
        };
        log::info!("{merit}");
        Ok(merit)
    }
}

/// Computes the merit functions of the `surface` with the sampling `dx`
///
/// The detector axis `x0` defaults to 1000 samples from -2 to 2 and the grazing angle `graze`
/// to the one of the default Wolter-I prescription.
pub fn compute_merit_functions(
    surface: &DMatrix<f64>,
    dx: &[f64],
    x0: Option<DVector<f64>>,
    graze: Option<f64>,
    renorm: bool,
) -> Result<MeritFunctions> {
    let evaluator = MeritEvaluator {
        model: ScatteringModel {
            graze,
            ..Default::default()
        },
        axis: builder::DEFAULT_AXIS,
        renorm,
    };
    match x0 {
        Some(x0) => evaluator.evaluate_on(surface, dx, x0),
        None => evaluator.evaluate(surface, dx),
    }
}
