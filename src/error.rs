use thiserror::Error;

/// Failure modes of the estimator core (spec §7).
///
/// Nothing here is retried by the core itself: a candidate that produces one
/// of these is rejected by the caller (dropped, or mapped to the null path),
/// except [`TrackingError::NumericalError`] and [`TrackingError::WrongEdge`],
/// which indicate a violated internal invariant or a contract violation and
/// are meant to fail fast. A belief's dimensionality (2D road vs. 4D ground)
/// never needs its own error variant: §4.1's ground<->road projection is an
/// automatic conversion, not a fallible dimension check, and the only inbound
/// observation shape is the fixed 2D ground fix in [`crate::observation`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackingError {
    /// The orthogonal foot of a ground point on a path's polyline falls
    /// beyond the path's endpoint by more than `edge_length_error_tolerance`.
    #[error("ground state is not representable on this path within tolerance")]
    UnrepresentableProjection,

    /// A covariance matrix produced an eigenvalue below `-1e-7` where the PSD
    /// floor (`<= 1e-7` clamped to zero) could not absorb it. This signals a
    /// numerical bug upstream, not a recoverable condition.
    #[error("covariance is not positive semi-definite beyond the numerical floor")]
    NonPositiveDefinite,

    /// A matrix inversion/decomposition failed after the PSD floor was
    /// already applied; this should be unreachable in correct operation.
    #[error("numerical operation failed unexpectedly: {0}")]
    NumericalError(&'static str),

    /// The edge passed to a road observation was not the edge carrying the
    /// belief's posterior mean (contract violation, §4.3).
    #[error("road observation must be measured against the edge carrying the belief's mean")]
    WrongEdge,

    /// A `VehicleStateInitialParameters` builder was given a value outside
    /// its documented floor (e.g. a degrees-of-freedom below `dim + 1`).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

pub type Result<T> = std::result::Result<T, TrackingError>;
