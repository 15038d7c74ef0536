//! Actuator voltages solver
//!
//! The voltages `v` minimize the norm of the corrected distortion `d + A v`
//! where the columns of `A` are the actuator influence functions sampled on the
//! valid part of the mirror, either on heights or on slopes.
//! The bound constrained least squares problem is solved on the normal equations with
//! an active set method: the actuators are released from their bounds one at a time,
//! the least squares problem restricted to the free actuators being solved exactly
//! at each step (Lawson-Hanson for box constraints).

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::InfluenceFunctions;

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("distortion ({0}x{1}), shade ({2}x{3}) and influence functions ({4}x{5}) must have the same shape")]
    ShapeMismatch(usize, usize, usize, usize, usize, usize),
    #[error("expected {0} voltage bounds, found {1}")]
    BoundsLength(usize, usize),
    #[error("invalid bounds for actuator #{0}: [{1},{2}]")]
    InvalidBounds(usize, f64, f64),
    #[error("no valid sample left to fit the influence functions to")]
    NoValidSamples,
    #[error("the spacing must be strictly positive, found {0}")]
    Spacing(f64),
    #[error("failed to solve the free actuators least squares problem: {0}")]
    FreeSet(String),
    #[error("voltages solver did not converge after {0} iterations (optimality gap: {1:e})")]
    NotConverged(usize, f64),
}
type Result<T> = std::result::Result<T, SolverError>;

/// Actuator voltages, one per influence function
pub type Voltages = DVector<f64>;

/// Voltage range of an actuator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}
impl Bounds {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }
    #[inline]
    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.lower).min(self.upper)
    }
}
impl From<(f64, f64)> for Bounds {
    fn from((lower, upper): (f64, f64)) -> Self {
        Self { lower, upper }
    }
}

/// Distortion correction solver
///
/// Default properties:
///  * dx            : none, the fit is done on heights
///  * azweight      : 0.015
///  * smax          : 5
///  * bounds        : none, all actuators in [0,smax]
///  * tolerance     : 1e-10
///  * max iteration : 1000
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionSolver {
    /// Grid spacing of the influence functions, the fit is done on slopes if set
    pub dx: Option<f64>,
    /// Weight of the azimuthal slopes
    pub azweight: f64,
    /// Upper voltage bound
    pub smax: f64,
    /// Optimality threshold on the gradient of the bounded actuators,
    /// relative to the largest gradient at the starting point
    pub tolerance: f64,
    /// Maximum number of actuators released from their bounds
    pub max_iteration: usize,
    /// Per actuator bounds, overriding `[0,smax]`
    pub bounds: Option<Vec<Bounds>>,
}
impl Default for DistortionSolver {
    fn default() -> Self {
        Self {
            dx: None,
            azweight: 0.015,
            smax: 5.,
            bounds: None,
            tolerance: 1e-10,
            max_iteration: 1000,
        }
    }
}

// Least squares system `b + A v` restricted to the valid samples
struct LinearSystem {
    a: DMatrix<f64>,
    b: DVector<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Constraint {
    Free,
    Lower,
    Upper,
}

// Minimizer of `v^T H v / 2 + g^T v` over the `free` actuators, the others being held
fn free_set_minimum(
    h: &DMatrix<f64>,
    g: &DVector<f64>,
    v: &DVector<f64>,
    free: &[usize],
) -> Result<DVector<f64>> {
    let mut v_held = v.clone();
    free.iter().for_each(|&i| v_held[i] = 0f64);
    let rhs = -(g + h * v_held).select_rows(free);
    let h_ff = h.select_rows(free).select_columns(free);
    match h_ff.clone().cholesky() {
        Some(chol) => Ok(chol.solve(&rhs)),
        None => {
            let eps = f64::EPSILON * h_ff.amax() * free.len() as f64;
            h_ff.svd(true, true)
                .solve(&rhs, eps)
                .map_err(|msg| SolverError::FreeSet(msg.to_string()))
        }
    }
}

// Moves the free actuators toward the minimum of the free set within the bounds,
// actuators hitting a bound are held there and the free set minimum is updated
fn descend_free_set(
    h: &DMatrix<f64>,
    g: &DVector<f64>,
    bounds: &[Bounds],
    v: &mut DVector<f64>,
    active: &mut [Constraint],
) -> Result<()> {
    loop {
        let free: Vec<usize> = (0..v.len())
            .filter(|&i| active[i] == Constraint::Free)
            .collect();
        if free.is_empty() {
            return Ok(());
        }
        let z = free_set_minimum(h, g, v, &free)?;
        let mut alpha = 1f64;
        let mut blocking = None;
        for (&i, &zi) in free.iter().zip(z.iter()) {
            let Bounds { lower, upper } = bounds[i];
            let (t, constraint) = if zi < lower {
                ((lower - v[i]) / (zi - v[i]), Constraint::Lower)
            } else if zi > upper {
                ((upper - v[i]) / (zi - v[i]), Constraint::Upper)
            } else {
                continue;
            };
            if t < alpha {
                alpha = t;
                blocking = Some((i, constraint));
            }
        }
        for (&i, &zi) in free.iter().zip(z.iter()) {
            v[i] = bounds[i].clamp(v[i] + alpha * (zi - v[i]));
        }
        match blocking {
            None => return Ok(()),
            Some((i, constraint)) => {
                v[i] = match constraint {
                    Constraint::Upper => bounds[i].upper,
                    _ => bounds[i].lower,
                };
                active[i] = constraint;
            }
        }
    }
}

impl DistortionSolver {
    /// Voltage bounds of each of the `n` actuators
    pub fn actuator_bounds(&self, n: usize) -> Result<Vec<Bounds>> {
        let bounds = match &self.bounds {
            Some(bounds) if bounds.len() != n => {
                return Err(SolverError::BoundsLength(n, bounds.len()))
            }
            Some(bounds) => bounds.clone(),
            None => vec![Bounds::new(0f64, self.smax); n],
        };
        if let Some((i, b)) = bounds
            .iter()
            .enumerate()
            .find(|(_, b)| !(b.lower <= b.upper))
        {
            return Err(SolverError::InvalidBounds(i, b.lower, b.upper));
        }
        Ok(bounds)
    }
    // Samples of the distortion and of the influence functions the voltages are fitted to
    fn linear_system(
        &self,
        distortion: &DMatrix<f64>,
        ifs: &InfluenceFunctions,
        shade: &DMatrix<f64>,
    ) -> Result<LinearSystem> {
        let (n_row, n_col) = ifs.shape();
        let valid = DMatrix::from_fn(n_row, n_col, |i, j| {
            shade[(i, j)] != 0f64
                && distortion[(i, j)].is_finite()
                && ifs.iter().all(|x| x[(i, j)].is_finite())
        });
        // (first sample, second sample, weight): a height when there is no second sample,
        // otherwise the weighted difference of the second and first samples
        let mut samples: Vec<((usize, usize), Option<(usize, usize)>, f64)> = vec![];
        match self.dx {
            None => {
                for j in 0..n_col {
                    for i in 0..n_row {
                        if valid[(i, j)] {
                            samples.push(((i, j), None, 1f64));
                        }
                    }
                }
            }
            Some(dx) if dx > 0f64 => {
                for j in 0..n_col {
                    for i in 1..n_row {
                        if valid[(i - 1, j)] && valid[(i, j)] {
                            samples.push(((i - 1, j), Some((i, j)), dx.recip()));
                        }
                    }
                }
                for j in 1..n_col {
                    for i in 0..n_row {
                        if valid[(i, j - 1)] && valid[(i, j)] {
                            samples.push(((i, j - 1), Some((i, j)), self.azweight / dx));
                        }
                    }
                }
            }
            Some(dx) => return Err(SolverError::Spacing(dx)),
        }
        if samples.is_empty() {
            return Err(SolverError::NoValidSamples);
        }
        let sample = |map: &DMatrix<f64>, k: usize| {
            let (p, q, w) = samples[k];
            match q {
                None => w * map[p],
                Some(q) => w * (map[q] - map[p]),
            }
        };
        let maps = ifs.as_slice();
        Ok(LinearSystem {
            a: DMatrix::from_fn(samples.len(), maps.len(), |k, l| sample(&maps[l], k)),
            b: DVector::from_fn(samples.len(), |k, _| sample(distortion, k)),
        })
    }
    /// Returns the actuator voltages that minimize the corrected distortion
    ///
    /// The `distortion`, the `shade` mask and the influence functions must be on the same grid.
    /// Samples where the shade is 0 or where either the distortion or any of the
    /// influence functions is not finite are left out of the fit.
    pub fn solve(
        &self,
        distortion: &DMatrix<f64>,
        ifs: &InfluenceFunctions,
        shade: &DMatrix<f64>,
    ) -> Result<Voltages> {
        let shape = ifs.shape();
        if distortion.shape() != shape || shade.shape() != shape {
            let (n, m) = distortion.shape();
            let (p, q) = shade.shape();
            return Err(SolverError::ShapeMismatch(n, m, p, q, shape.0, shape.1));
        }
        let bounds = self.actuator_bounds(ifs.len())?;
        let LinearSystem { a, b } = self.linear_system(distortion, ifs, shade)?;
        log::info!(
            "Fitting {} actuators to {} {} samples",
            a.ncols(),
            a.nrows(),
            if self.dx.is_some() { "slope" } else { "height" }
        );

        let h = a.tr_mul(&a);
        let g = a.tr_mul(&b);
        let mut v = Voltages::from_iterator(bounds.len(), bounds.iter().map(|b| b.clamp(0f64)));
        let mut active: Vec<Constraint> = bounds
            .iter()
            .zip(v.iter())
            .map(|(b, &v)| {
                if v == b.lower {
                    Constraint::Lower
                } else if v == b.upper {
                    Constraint::Upper
                } else {
                    Constraint::Free
                }
            })
            .collect();
        // gradient (up to a factor 2) of the merit function
        let threshold = self.tolerance * (&h * &v + &g).amax();
        // actuator released at the previous iteration that went straight back to its bound
        let mut stalled: Option<usize> = None;
        let mut n_iteration = 0;
        descend_free_set(&h, &g, &bounds, &mut v, &mut active)?;
        loop {
            let grad = &h * &v + &g;
            // the bounded actuator with the steepest descent direction toward the inside of its bounds
            let candidate = active
                .iter()
                .enumerate()
                .filter(|&(i, _)| Some(i) != stalled && bounds[i].lower < bounds[i].upper)
                .filter_map(|(i, constraint)| match constraint {
                    Constraint::Lower => Some((i, -grad[i])),
                    Constraint::Upper => Some((i, grad[i])),
                    Constraint::Free => None,
                })
                .filter(|&(_, gap)| gap > threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1));
            let Some((i, gap)) = candidate else {
                break;
            };
            if n_iteration >= self.max_iteration {
                return Err(SolverError::NotConverged(n_iteration, gap));
            }
            n_iteration += 1;
            log::debug!("iteration #{n_iteration}: releasing actuator #{i} (gap: {gap:.3e})");
            let vi = v[i];
            active[i] = Constraint::Free;
            descend_free_set(&h, &g, &bounds, &mut v, &mut active)?;
            stalled = (active[i] != Constraint::Free && v[i] == vi).then_some(i);
        }
        let residual = &b + &a * &v;
        log::info!(
            "Distortion rms: {:.4e} -> {:.4e} in {} iterations",
            b.norm() / (b.len() as f64).sqrt(),
            residual.norm() / (residual.len() as f64).sqrt(),
            n_iteration
        );
        Ok(v)
    }
}

/// Returns the actuator voltages that minimize the corrected distortion
///
/// See [DistortionSolver::solve]
pub fn correct_distortion(
    distortion: &DMatrix<f64>,
    ifs: &InfluenceFunctions,
    shade: &DMatrix<f64>,
    dx: Option<f64>,
    azweight: f64,
    smax: f64,
    bounds: Option<Vec<Bounds>>,
) -> Result<Voltages> {
    DistortionSolver {
        dx,
        azweight,
        smax,
        bounds,
        ..Default::default()
    }
    .solve(distortion, ifs, shade)
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 24;

    fn bump(i0: f64, j0: f64) -> DMatrix<f64> {
        DMatrix::from_fn(N, N, |i, j| {
            let r2 = (i as f64 - i0).powi(2) + (j as f64 - j0).powi(2);
            (-0.5 * r2 / 1.5f64.powi(2)).exp()
        })
    }

    fn stack() -> InfluenceFunctions {
        InfluenceFunctions::new(vec![bump(12., 5.), bump(12., 12.), bump(12., 19.)]).unwrap()
    }

    fn distortion(ifs: &InfluenceFunctions, v: &[f64]) -> DMatrix<f64> {
        -ifs.combine(&DVector::from_column_slice(v)).unwrap()
    }

    #[test]
    fn recovery() {
        let ifs = stack();
        let d = distortion(&ifs, &[1., 2.5, 0.7]);
        let shade = DMatrix::from_element(N, N, 1f64);
        let v = DistortionSolver::default().solve(&d, &ifs, &shade).unwrap();
        assert_eq!(v.len(), ifs.len());
        v.iter()
            .zip([1., 2.5, 0.7])
            .for_each(|(v, e)| assert!((v - e).abs() < 1e-6, "{v} vs {e}"));
    }

    #[test]
    fn slopes_recovery() {
        let ifs = stack();
        let d = distortion(&ifs, &[1., 2.5, 0.7]);
        let shade = DMatrix::from_element(N, N, 1f64);
        let v = correct_distortion(&d, &ifs, &shade, Some(0.5), 1., 5., None).unwrap();
        v.iter()
            .zip([1., 2.5, 0.7])
            .for_each(|(v, e)| assert!((v - e).abs() < 1e-6, "{v} vs {e}"));
    }

    #[test]
    fn clamping() {
        let ifs = stack();
        let d = distortion(&ifs, &[-1., 7., 2.]);
        let shade = DMatrix::from_element(N, N, 1f64);
        let v = DistortionSolver::default().solve(&d, &ifs, &shade).unwrap();
        v.iter()
            .zip([0., 5., 2.])
            .for_each(|(v, e)| assert!((v - e).abs() < 5e-2, "{v} vs {e}"));
        assert!(v.iter().all(|v| (0f64..=5f64).contains(v)));
    }

    #[test]
    fn explicit_bounds() {
        let ifs = stack();
        let d = distortion(&ifs, &[-1., 7., 2.]);
        let shade = DMatrix::from_element(N, N, 1f64);
        let solver = DistortionSolver {
            bounds: Some(vec![(-2., 2.).into(); 3]),
            ..Default::default()
        };
        let v = solver.solve(&d, &ifs, &shade).unwrap();
        v.iter()
            .zip([-1., 2., 2.])
            .for_each(|(v, e)| assert!((v - e).abs() < 5e-2, "{v} vs {e}"));
    }

    #[test]
    fn shaded() {
        let ifs = stack();
        let mut d = distortion(&ifs, &[1., 2.5, 0.7]);
        let mut shade = DMatrix::from_element(N, N, 1f64);
        for i in 0..N {
            d[(i, 0)] = f64::NAN;
            d[(i, 1)] = 1e3;
            shade[(i, 1)] = 0.;
        }
        let v = DistortionSolver::default().solve(&d, &ifs, &shade).unwrap();
        v.iter()
            .zip([1., 2.5, 0.7])
            .for_each(|(v, e)| assert!((v - e).abs() < 1e-6, "{v} vs {e}"));
    }

    // 7x7 actuators with overlapping influence functions (gaussian width equal to the pitch)
    fn actuator_grid() -> (InfluenceFunctions, Vec<f64>) {
        let (n, pitch) = (40, 5.);
        let maps = (0..49)
            .map(|k| {
                let (i0, j0) = (pitch * (1 + k % 7) as f64, pitch * (1 + k / 7) as f64);
                DMatrix::from_fn(n, n, |i, j| {
                    let r2 = (i as f64 - i0).powi(2) + (j as f64 - j0).powi(2);
                    (-0.5 * r2 / pitch.powi(2)).exp()
                })
            })
            .collect();
        let v = (0..49).map(|k| 1. + 3. * ((k * 37) % 49) as f64 / 48.).collect();
        (InfluenceFunctions::new(maps).unwrap(), v)
    }

    fn check_actuator_grid(dx: Option<f64>) {
        let (ifs, v_true) = actuator_grid();
        let d = distortion(&ifs, &v_true);
        let shade = DMatrix::from_element(40, 40, 1f64);
        let solver = DistortionSolver {
            dx,
            ..Default::default()
        };
        let v = solver.solve(&d, &ifs, &shade).unwrap();
        let v_err = v
            .iter()
            .zip(&v_true)
            .map(|(v, e)| (v - e).abs())
            .fold(0f64, f64::max);
        let residual = &d + ifs.combine(&v).unwrap();
        let rms = residual.norm() / (residual.len() as f64).sqrt();
        assert!(v_err < 1e-3, "{dx:?}: max voltage error {v_err:e}");
        assert!(rms < 1e-6, "{dx:?}: residual rms {rms:e}");
    }

    #[test]
    fn overlapping_heights() {
        check_actuator_grid(None);
    }

    #[test]
    fn overlapping_slopes() {
        check_actuator_grid(Some(0.5));
    }

    #[test]
    fn not_converged() {
        let (ifs, v_true) = actuator_grid();
        let d = distortion(&ifs, &v_true);
        let shade = DMatrix::from_element(40, 40, 1f64);
        let solver = DistortionSolver {
            max_iteration: 2,
            ..Default::default()
        };
        assert!(matches!(
            solver.solve(&d, &ifs, &shade),
            Err(SolverError::NotConverged(2, _))
        ));
    }

    #[test]
    fn errors() {
        let ifs = stack();
        let shade = DMatrix::from_element(N, N, 1f64);
        let solver = DistortionSolver::default();
        assert!(matches!(
            solver.solve(&DMatrix::zeros(N, N - 1), &ifs, &shade),
            Err(SolverError::ShapeMismatch(..))
        ));
        assert!(matches!(
            solver.solve(&DMatrix::zeros(N, N), &ifs, &DMatrix::zeros(N, N)),
            Err(SolverError::NoValidSamples)
        ));
        let solver = DistortionSolver {
            bounds: Some(vec![(0., 1.).into(); 2]),
            ..Default::default()
        };
        assert!(matches!(
            solver.solve(&DMatrix::zeros(N, N), &ifs, &shade),
            Err(SolverError::BoundsLength(3, 2))
        ));
        let solver = DistortionSolver {
            smax: -1.,
            ..Default::default()
        };
        assert!(matches!(
            solver.solve(&DMatrix::zeros(N, N), &ifs, &shade),
            Err(SolverError::InvalidBounds(0, ..))
        ));
    }
}
