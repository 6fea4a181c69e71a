//! Error types for the registration stages.
//!
//! Every error is scoped to one unit of work (a sub-volume, a tile/round, a
//! tile/channel or a tile/round/channel). Callers collect them per unit and
//! keep processing the remaining units.

/// Why an input was rejected as degenerate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DegenerateKind {
    /// A base or target point cloud had no points.
    EmptyPointCloud,
    /// Nothing was left to score after excluding already searched shifts.
    EmptyCandidateGrid,
    /// The linear part of a transform collapses (or nearly collapses) a dimension.
    NonInvertibleTransform { determinant: f64 },
}

impl std::fmt::Display for DegenerateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegenerateKind::EmptyPointCloud => write!(f, "empty point cloud"),
            DegenerateKind::EmptyCandidateGrid => write!(f, "empty candidate shift grid"),
            DegenerateKind::NonInvertibleTransform { determinant } => {
                write!(f, "non-invertible transform (det = {determinant:.3e})")
            }
        }
    }
}

/// Why ICP stopped refining a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceReason {
    /// No transformed base point had a target neighbour within the match distance.
    NoMatches,
    /// Too few (or coplanar) matches to fit a 3-D affine transform.
    DegenerateMatches,
    /// The re-estimated transform is not invertible.
    NonInvertible,
}

impl std::fmt::Display for DivergenceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DivergenceReason::NoMatches => write!(f, "no matches"),
            DivergenceReason::DegenerateMatches => write!(f, "degenerate matches"),
            DivergenceReason::NonInvertible => write!(f, "non-invertible transform"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegisterError {
    #[error("degenerate input: {0}")]
    DegenerateInput(DegenerateKind),

    #[error("insufficient data: found {found} {what}, need at least {required}")]
    InsufficientData {
        what: &'static str,
        found: usize,
        required: usize,
    },

    #[error("ICP diverged after {iterations} iterations: {reason}")]
    ConvergenceFailure {
        reason: DivergenceReason,
        iterations: usize,
        match_counts: Vec<usize>,
        mse: Vec<f64>,
    },
}

pub type RegisterResult<T> = Result<T, RegisterError>;
