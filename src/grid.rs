//! Resampling of 2D maps between rectangular grids
//!
//! Both the source and the target grids span the normalized coordinates `[-1,1]`
//! along each axis, the sample `i` of an axis of length `n` sitting at `-1+2i/(n-1)`.
//! An axis with a single sample sits at the origin.
//! NaN values are preserved: any NaN contributing to a target sample makes it NaN.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("cannot resample an empty map")]
    EmptySource,
    #[error("invalid target grid shape ({0}x{1})")]
    EmptyTarget(usize, usize),
    #[error("shape mismatch: expected ({0}x{1}), found ({2}x{3})")]
    ShapeMismatch(usize, usize, usize, usize),
}
type Result<T> = std::result::Result<T, GridError>;

/// Interpolation method
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMethod {
    /// Bilinear interpolation within the source cell
    #[default]
    Linear,
    /// Nearest source sample
    Nearest,
}

// Fractional source index of the target sample `i`
#[inline]
fn source_coordinate(i: usize, n_target: usize, n_source: usize) -> f64 {
    if n_target == 1 {
        0.5 * (n_source - 1) as f64
    } else {
        (i * (n_source - 1)) as f64 / (n_target - 1) as f64
    }
}

// Source indices and weights of the linear interpolation along one axis
fn linear_stencil(i: usize, n_target: usize, n_source: usize) -> [(usize, f64); 2] {
    if n_source == 1 {
        return [(0, 1f64), (0, 0f64)];
    }
    let s = source_coordinate(i, n_target, n_source);
    let i0 = (s.floor() as usize).min(n_source - 2);
    let t = s - i0 as f64;
    [(i0, 1f64 - t), (i0 + 1, t)]
}

/// Resamples `array` onto a grid of `shape` (rows, columns)
pub fn resample(
    array: &DMatrix<f64>,
    shape: (usize, usize),
    method: ResampleMethod,
) -> Result<DMatrix<f64>> {
    let (n_row, n_col) = array.shape();
    if n_row == 0 || n_col == 0 {
        return Err(GridError::EmptySource);
    }
    let (m_row, m_col) = shape;
    if m_row == 0 || m_col == 0 {
        return Err(GridError::EmptyTarget(m_row, m_col));
    }
    if shape == array.shape() {
        return Ok(array.clone());
    }
    let resampled = match method {
        ResampleMethod::Linear => {
            let rows: Vec<_> = (0..m_row)
                .map(|i| linear_stencil(i, m_row, n_row))
                .collect();
            let cols: Vec<_> = (0..m_col)
                .map(|j| linear_stencil(j, m_col, n_col))
                .collect();
            DMatrix::from_fn(m_row, m_col, |i, j| {
                let mut value = 0f64;
                for &(ii, wi) in &rows[i] {
                    for &(jj, wj) in &cols[j] {
                        let w = wi * wj;
                        if w == 0f64 {
                            continue;
                        }
                        let v = array[(ii, jj)];
                        if v.is_nan() {
                            return f64::NAN;
                        }
                        value += w * v;
                    }
                }
                value
            })
        }
        ResampleMethod::Nearest => DMatrix::from_fn(m_row, m_col, |i, j| {
            let ii = source_coordinate(i, m_row, n_row).round() as usize;
            let jj = source_coordinate(j, m_col, n_col).round() as usize;
            array[(ii.min(n_row - 1), jj.min(n_col - 1))]
        }),
    };
    Ok(resampled)
}

/// Removes the leading and trailing rows and columns that are entirely made of NaN
///
/// A map without any valid sample is stripped down to an empty map.
pub fn strip_nans(array: &DMatrix<f64>) -> DMatrix<f64> {
    let valid_row = |i: usize| array.row(i).iter().any(|x| !x.is_nan());
    let valid_col = |j: usize| array.column(j).iter().any(|x| !x.is_nan());
    let (n_row, n_col) = array.shape();
    let (Some(r0), Some(c0)) = (
        (0..n_row).find(|&i| valid_row(i)),
        (0..n_col).find(|&j| valid_col(j)),
    ) else {
        return DMatrix::zeros(0, 0);
    };
    let r1 = (0..n_row).rev().find(|&i| valid_row(i)).unwrap_or(r0);
    let c1 = (0..n_col).rev().find(|&j| valid_col(j)).unwrap_or(c0);
    array
        .view((r0, c0), (r1 - r0 + 1, c1 - c0 + 1))
        .into_owned()
}

/// Sets `array` to NaN where the `shade` mask is 0
pub fn nan_mask(array: &mut DMatrix<f64>, shade: &DMatrix<f64>) -> Result<()> {
    if array.shape() != shade.shape() {
        let (n, m) = array.shape();
        let (p, q) = shade.shape();
        return Err(GridError::ShapeMismatch(n, m, p, q));
    }
    array
        .iter_mut()
        .zip(shade.iter())
        .filter(|(_, s)| **s == 0f64)
        .for_each(|(x, _)| *x = f64::NAN);
    Ok(())
}

/// Returns `n` samples evenly spaced between `start` and `end` inclusive
pub fn linspace(start: f64, end: f64, n: usize) -> DVector<f64> {
    match n {
        0 => DVector::zeros(0),
        1 => DVector::from_element(1, start),
        _ => {
            let step = (end - start) / (n - 1) as f64;
            DVector::from_fn(n, |i, _| start + i as f64 * step)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n_row: usize, n_col: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n_row, n_col, |i, j| 2. * i as f64 + 3. * j as f64)
    }

    #[test]
    fn identity() {
        let mut a = ramp(5, 4);
        a[(2, 1)] = f64::NAN;
        let b = resample(&a, (5, 4), ResampleMethod::Linear).unwrap();
        assert_eq!(b.iter().filter(|x| x.is_nan()).count(), 1);
        assert!(b[(2, 1)].is_nan());
        assert_eq!(b[(4, 3)], a[(4, 3)]);
    }

    #[test]
    fn linear_ramp() {
        let a = ramp(5, 4);
        let b = resample(&a, (9, 7), ResampleMethod::Linear).unwrap();
        for i in 0..9 {
            for j in 0..7 {
                let expected = i as f64 + 1.5 * j as f64;
                assert!((b[(i, j)] - expected).abs() < 1e-12, "({i},{j})");
            }
        }
        let c = resample(&b, (5, 4), ResampleMethod::Linear).unwrap();
        assert!((c - a).abs().max() < 1e-12);
    }

    #[test]
    fn nan_propagation() {
        let mut a = DMatrix::from_element(5, 5, 1f64);
        a[(2, 2)] = f64::NAN;
        let b = resample(&a, (9, 9), ResampleMethod::Linear).unwrap();
        // the NaN sample lands on (4,4) and taints the adjacent cells only
        assert!(b[(4, 4)].is_nan());
        assert!(b[(3, 3)].is_nan());
        assert!(b[(5, 5)].is_nan());
        assert_eq!(b[(2, 2)], 1f64);
        assert_eq!(b[(6, 6)], 1f64);
        assert_eq!(b.iter().filter(|x| x.is_nan()).count(), 9);
    }

    #[test]
    fn nearest() {
        let a = ramp(3, 3);
        let b = resample(&a, (5, 5), ResampleMethod::Nearest).unwrap();
        assert_eq!(b[(0, 0)], a[(0, 0)]);
        assert_eq!(b[(4, 4)], a[(2, 2)]);
        assert_eq!(b[(2, 2)], a[(1, 1)]);
    }

    #[test]
    fn degenerate_axis() {
        let a = DMatrix::from_row_slice(1, 3, &[0., 1., 2.]);
        let b = resample(&a, (3, 5), ResampleMethod::Linear).unwrap();
        for i in 0..3 {
            assert_eq!(b.row(i).iter().cloned().collect::<Vec<_>>(), vec![0., 0.5, 1., 1.5, 2.]);
        }
    }

    #[test]
    fn empty() {
        let a = DMatrix::<f64>::zeros(0, 3);
        assert!(matches!(
            resample(&a, (3, 3), ResampleMethod::Linear),
            Err(GridError::EmptySource)
        ));
        let a = DMatrix::<f64>::zeros(2, 3);
        assert!(matches!(
            resample(&a, (0, 3), ResampleMethod::Linear),
            Err(GridError::EmptyTarget(0, 3))
        ));
    }

    #[test]
    fn strip() {
        let mut a = DMatrix::from_element(5, 6, f64::NAN);
        a[(1, 2)] = 1.;
        a[(3, 4)] = 2.;
        let b = strip_nans(&a);
        assert_eq!(b.shape(), (3, 3));
        assert_eq!(b[(0, 0)], 1.);
        assert_eq!(b[(2, 2)], 2.);
        assert!(b[(1, 1)].is_nan());
        assert_eq!(strip_nans(&DMatrix::from_element(2, 2, f64::NAN)).len(), 0);
    }

    #[test]
    fn mask() {
        let mut a = DMatrix::from_element(3, 3, 1f64);
        let mut shade = DMatrix::from_element(3, 3, 1f64);
        shade[(0, 1)] = 0.;
        nan_mask(&mut a, &shade).unwrap();
        assert!(a[(0, 1)].is_nan());
        assert_eq!(a.iter().filter(|x| x.is_nan()).count(), 1);
        let shade = DMatrix::from_element(3, 2, 1f64);
        assert!(nan_mask(&mut a, &shade).is_err());
    }

    #[test]
    fn axis() {
        let x = linspace(-2., 2., 1000);
        assert_eq!(x.len(), 1000);
        assert_eq!(x[0], -2.);
        assert!((x[999] - 2.).abs() < 1e-12);
    }
}
