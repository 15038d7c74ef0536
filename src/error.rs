#[derive(Debug, thiserror::Error)]
pub enum AxroError {
    #[error("grid resampling failed")]
    Grid(#[from] crate::grid::GridError),
    #[error("invalid influence functions")]
    Influence(#[from] crate::influence::InfluenceError),
    #[error("distortion correction failed")]
    Solver(#[from] crate::solver::SolverError),
    #[error("PSF computation failed")]
    Scattering(#[from] crate::scattering::ScatteringError),
    #[error("merit functions computation failed")]
    Merit(#[from] crate::merit::MeritError),
    #[error("configuration failed")]
    Config(#[from] crate::config::ConfigError),
    #[error("correction surface ({0}x{1}) and figure ({2}x{3}) are not on the same grid")]
    Apply(usize, usize, usize, usize),
}
