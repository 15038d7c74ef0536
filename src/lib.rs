//!
//! # Adjustable X-ray optics
//!
//! Correction of the figure of deformable grazing incidence X-ray mirrors and
//! evaluation of the image quality of the corrected surface.
//!
//! A correction goes from a measured surface distortion map and the influence functions
//! of the mirror actuators to the voltages that best cancel the distortion and
//! the surface deformation they produce:
//! ```no_run
//! use axro::{Builder, Corrector, FromBuilder, InfluenceFunctions, ResamplePolicy};
//! use nalgebra::DMatrix;
//!
//! # fn main() -> axro::Result<()> {
//! let distortion = DMatrix::<f64>::zeros(200, 200);
//! let ifs = InfluenceFunctions::load("ifs.pkl")?;
//! let corrector = Corrector::builder()
//!     .policy(ResamplePolicy::DefensiveDoubleResample)
//!     .smax(5.)
//!     .build()?;
//! let correction = corrector.correct(&distortion, &ifs, None)?;
//! let figure = correction.apply(&distortion)?;
//! # Ok(())
//! # }
//! ```
//! The image quality of a surface is given by the [merit functions](merit::MeritFunctions):
//! ```no_run
//! use axro::{Builder, FromBuilder, MeritEvaluator};
//! use nalgebra::DMatrix;
//!
//! # fn main() -> axro::Result<()> {
//! let figure = DMatrix::<f64>::zeros(200, 200);
//! let merit = MeritEvaluator::builder().build()?.evaluate(&figure, &[0.5, 0.5])?;
//! println!("HPD: {:.2}arcsec", merit.hpd);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod correction;
pub mod error;
pub mod grid;
pub mod influence;
pub mod merit;
pub mod prescription;
pub mod scattering;
pub mod solver;

#[doc(inline)]
pub use self::config::{ConfigError, TomlConfig};
#[doc(inline)]
pub use self::correction::{
    correct_for_ctf, correct_hfdfc3, correct_xray_test_mirror, Correction, CorrectionBuilder,
    Corrector, ResamplePolicy,
};
#[doc(inline)]
pub use self::error::AxroError;
#[doc(inline)]
pub use self::grid::{resample, strip_nans, ResampleMethod};
#[doc(inline)]
pub use self::influence::InfluenceFunctions;
#[doc(inline)]
pub use self::merit::{
    compute_merit_functions, MeritBuilder, MeritEvaluator, MeritFunctions, Psf, PsfWidths,
};
#[doc(inline)]
pub use self::prescription::WolterPrescription;
#[doc(inline)]
pub use self::scattering::ScatteringModel;
#[doc(inline)]
pub use self::solver::{Bounds, DistortionSolver, Voltages};

pub type Result<T> = std::result::Result<T, AxroError>;

/// Builder type trait
pub trait Builder: Default {
    type Component;
    fn new() -> Self {
        Default::default()
    }
    fn build(self) -> Result<Self::Component>;
}

/// Access to a component builder from the component type
pub trait FromBuilder: Sized {
    type ComponentBuilder: Builder<Component = Self>;
    /// Returns the default builder of the component
    fn builder() -> Self::ComponentBuilder {
        Default::default()
    }
}
