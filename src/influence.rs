//! Actuator influence functions

use std::{fs::File, path::Path};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum InfluenceError {
    #[error("the influence function stack is empty")]
    Empty,
    #[error("influence function #{0} is ({1}x{2}), expected ({3}x{4})")]
    Shape(usize, usize, usize, usize, usize),
    #[error("expected {0} voltages, found {1}")]
    Voltages(usize, usize),
    #[error("influence function data of {0} samples does not match a ({1}x{2}) grid")]
    Data(usize, usize, usize),
    #[error("cannot access influence functions pickle file")]
    IO(#[from] std::io::Error),
    #[error("cannot (de)serialize influence functions")]
    Pickle(#[from] serde_pickle::Error),
}
type Result<T> = std::result::Result<T, InfluenceError>;

/// Stack of influence functions, one map per actuator, all on the same grid
#[derive(Debug, Clone, PartialEq)]
pub struct InfluenceFunctions {
    maps: Vec<DMatrix<f64>>,
}

/// Serialized form of [InfluenceFunctions]: the row-major samples of each map
#[derive(Debug, Serialize, Deserialize)]
struct InfluenceData {
    shape: (usize, usize),
    maps: Vec<Vec<f64>>,
}

impl InfluenceFunctions {
    /// Creates a new stack, all the maps must have the same shape
    pub fn new(maps: Vec<DMatrix<f64>>) -> Result<Self> {
        let Some(first) = maps.first() else {
            return Err(InfluenceError::Empty);
        };
        let (n, m) = first.shape();
        if let Some((i, map)) = maps.iter().enumerate().find(|(_, x)| x.shape() != (n, m)) {
            let (p, q) = map.shape();
            return Err(InfluenceError::Shape(i, p, q, n, m));
        }
        Ok(Self { maps })
    }
    /// Number of actuators
    pub fn len(&self) -> usize {
        self.maps.len()
    }
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
    /// Shape (rows, columns) of the influence function grid
    pub fn shape(&self) -> (usize, usize) {
        self.maps[0].shape()
    }
    pub fn iter(&self) -> impl Iterator<Item = &DMatrix<f64>> {
        self.maps.iter()
    }
    pub fn as_slice(&self) -> &[DMatrix<f64>] {
        &self.maps
    }
    /// Linear combination of the influence functions weighted by the actuator `voltages`
    pub fn combine(&self, voltages: &DVector<f64>) -> Result<DMatrix<f64>> {
        if voltages.len() != self.len() {
            return Err(InfluenceError::Voltages(self.len(), voltages.len()));
        }
        let (n, m) = self.shape();
        Ok(self
            .maps
            .iter()
            .zip(voltages.iter())
            .fold(DMatrix::zeros(n, m), |surface, (map, v)| surface + map * *v))
    }
    /// Loads the stack from a pickle file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let InfluenceData { shape, maps } = serde_pickle::from_reader(file, Default::default())?;
        let (n, m) = shape;
        let maps = maps
            .into_iter()
            .map(|data| {
                if data.len() == n * m {
                    Ok(DMatrix::from_row_slice(n, m, &data))
                } else {
                    Err(InfluenceError::Data(data.len(), n, m))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(maps)
    }
    /// Writes the stack to a pickle file
    pub fn dump<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = InfluenceData {
            shape: self.shape(),
            maps: self
                .maps
                .iter()
                .map(|map| map.transpose().as_slice().to_vec())
                .collect(),
        };
        let mut file = File::create(&path)?;
        serde_pickle::to_writer(&mut file, &data, Default::default())?;
        log::info!(
            "{} influence functions written to {}",
            self.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}

impl TryFrom<Vec<DMatrix<f64>>> for InfluenceFunctions {
    type Error = InfluenceError;
    fn try_from(maps: Vec<DMatrix<f64>>) -> Result<Self> {
        Self::new(maps)
    }
}
