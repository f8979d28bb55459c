//! Error and diagnostic types for the bowl-volume pipeline.

/// Fatal errors that abort the pipeline before a [`crate::VolumeResult`] can
/// be produced.
#[derive(thiserror::Error, Debug)]
pub enum BowlVolumeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient data: only {n_valid} valid depth points (need at least {min_required})")]
    InsufficientData { n_valid: usize, min_required: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error("SVD did not converge during rigid alignment")]
    SvdFailed,
}

pub type Result<T> = std::result::Result<T, BowlVolumeError>;

/// Non-fatal conditions that do not abort the pipeline but are surfaced to
/// the caller alongside the computed [`crate::VolumeResult`].
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// ICP reached `icp_max_iterations` with fitness below 0.3.
    FitDidNotConverge { fitness: f64, rmse_mm: f64 },
    /// The fitted bowl mesh has a zero hit rate over the food mask.
    RayCastDegenerate,
    /// Fitness or RMSE crossed the soft acceptance thresholds (fitness <
    /// 0.5 or RMSE > 10mm) but ICP otherwise ran to a normal stop.
    LowQualityFit { fitness: f64, rmse_mm: f64 },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::FitDidNotConverge { fitness, rmse_mm } => write!(
                f,
                "bowl fit did not converge (fitness={fitness:.3}, rmse={rmse_mm:.3}mm)"
            ),
            Warning::RayCastDegenerate => {
                write!(f, "ray cast against fitted bowl mesh had zero hit rate")
            }
            Warning::LowQualityFit { fitness, rmse_mm } => write!(
                f,
                "bowl fit quality is low (fitness={fitness:.3}, rmse={rmse_mm:.3}mm)"
            ),
        }
    }
}
