use serde::{Deserialize, Serialize};

use crate::{
    grid::ResampleMethod,
    solver::{Bounds, DistortionSolver, SolverError},
    Builder, TomlConfig,
};

use super::{Corrector, ResamplePolicy};

/// [Corrector] builder
///
/// Default properties:
///  * policy : defensive double resampling
///  * method : linear rebinning of the distortion onto the influence function grid
///  * solver : [DistortionSolver::default]
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionBuilder {
    #[serde(default)]
    policy: ResamplePolicy,
    #[serde(default)]
    method: ResampleMethod,
    #[serde(default)]
    solver: DistortionSolver,
}

impl TomlConfig for CorrectionBuilder {
    const HEADER: &'static str = "::axro::CorrectionBuilder";
}

impl CorrectionBuilder {
    /// Sets the masking and resampling policy of the correction surface
    pub fn policy(mut self, policy: ResamplePolicy) -> Self {
        self.policy = policy;
        self
    }
    /// Sets the method used to rebin the distortion onto the influence function grid
    pub fn method(mut self, method: ResampleMethod) -> Self {
        self.method = method;
        self
    }
    /// Sets the spacing of the influence function grid, the voltages are then fitted on slopes
    pub fn dx(mut self, dx: f64) -> Self {
        self.solver.dx = Some(dx);
        self
    }
    /// Sets the weight of the azimuthal slopes
    pub fn azweight(mut self, azweight: f64) -> Self {
        self.solver.azweight = azweight;
        self
    }
    /// Sets the upper voltage bound
    pub fn smax(mut self, smax: f64) -> Self {
        self.solver.smax = smax;
        self
    }
    /// Sets the voltage bounds of each actuator, overriding `smax`
    pub fn bounds<B: Into<Bounds>>(mut self, bounds: Vec<B>) -> Self {
        self.solver.bounds = Some(bounds.into_iter().map(|b| b.into()).collect());
        self
    }
    /// Sets the solver convergence threshold and maximum number of iterations
    pub fn convergence(mut self, tolerance: f64, max_iteration: usize) -> Self {
        self.solver.tolerance = tolerance;
        self.solver.max_iteration = max_iteration;
        self
    }
    /// Sets the solver
    pub fn solver(mut self, solver: DistortionSolver) -> Self {
        self.solver = solver;
        self
    }
}

impl Builder for CorrectionBuilder {
    type Component = Corrector;
    fn build(self) -> crate::Result<Self::Component> {
        match self.solver.dx {
            Some(dx) if !(dx > 0f64) => return Err(SolverError::Spacing(dx).into()),
            _ => (),
        }
        if let Some(bounds) = &self.solver.bounds {
            bounds
                .iter()
                .enumerate()
                .find(|(_, b)| !(b.lower <= b.upper))
                .map_or(Ok(()), |(i, b)| {
                    Err(SolverError::InvalidBounds(i, b.lower, b.upper))
                })?;
        }
        log::debug!("{:?}", self);
        Ok(Corrector {
            solver: self.solver,
            policy: self.policy,
            method: self.method,
        })
    }
}
