//! Small numeric helpers shared by the motion filters and the covariance
//! learner: eigenvalue-floored PSD square roots and pseudoinverses.
//!
//! Every operation here that can hit an ill-conditioned covariance uses the
//! same `1e-7` eigenvalue floor (spec §4.2): magnitudes at or below the floor
//! are clamped to zero, anything more negative than that is treated as an
//! internal invariant violation rather than silently tolerated.

use crate::error::{Result, TrackingError};
use nalgebra::{SMatrix, SVector};

/// Eigenvalues with magnitude at or below this are floored to zero rather
/// than rejected.
pub const EIGENVALUE_FLOOR: f64 = 1e-7;

fn symmetrize<const D: usize>(m: &SMatrix<f64, D, D>) -> SMatrix<f64, D, D> {
    (m + m.transpose()) * 0.5
}

/// Positive-semi-definite square root of a symmetric matrix, via eigenvalue
/// decomposition. Eigenvalues in `(-EIGENVALUE_FLOOR, 0)` are clamped to
/// zero; anything more negative is [`TrackingError::NonPositiveDefinite`] —
/// spec §7 treats that as a numerical bug, not a recoverable condition.
pub fn psd_sqrt<const D: usize>(m: &SMatrix<f64, D, D>) -> Result<SMatrix<f64, D, D>> {
    let eigen = symmetrize(m).symmetric_eigen();
    let mut values = eigen.eigenvalues;
    for v in values.iter_mut() {
        if *v < -EIGENVALUE_FLOOR {
            return Err(TrackingError::NonPositiveDefinite);
        }
        if *v < 0.0 {
            *v = 0.0;
        }
    }
    let sqrt_diag = SMatrix::<f64, D, D>::from_diagonal(&values.map(f64::sqrt));
    Ok(&eigen.eigenvectors * sqrt_diag * eigen.eigenvectors.transpose())
}

/// Truncated-SVD-style pseudoinverse *square root* of a symmetric PSD matrix
/// (Design Notes: `rootOfSemiDefinite(..., true, -1)`, the "-1 signed
/// root"). Used to build `F⁺`, the pseudoinverse square root of `F Fᵀ`, for
/// the covariance-learning residual in spec §4.8 step 3. Singular
/// directions (eigenvalue magnitude `<= EIGENVALUE_FLOOR`) map to zero
/// rather than failing: a pseudoinverse is expected to be singular on part
/// of its domain.
pub fn pseudo_inverse_sqrt<const D: usize>(m: &SMatrix<f64, D, D>) -> SMatrix<f64, D, D> {
    let eigen = symmetrize(m).symmetric_eigen();
    let values = eigen.eigenvalues.map(|v| {
        if v.abs() <= EIGENVALUE_FLOOR {
            0.0
        } else {
            1.0 / v.sqrt()
        }
    });
    let inv_sqrt_diag = SMatrix::<f64, D, D>::from_diagonal(&values);
    &eigen.eigenvectors * inv_sqrt_diag * eigen.eigenvectors.transpose()
}

/// Ordinary matrix inverse, mapped to [`TrackingError::NumericalError`] on
/// failure instead of panicking. Used for innovation-covariance inversion in
/// the Kalman update, which should always be well-conditioned once `Σ_obs`
/// has gone through [`psd_sqrt`] upstream.
pub fn invert<const D: usize>(m: &SMatrix<f64, D, D>) -> Result<SMatrix<f64, D, D>> {
    m.clone()
        .try_inverse()
        .ok_or(TrackingError::NumericalError("innovation covariance is singular"))
}

/// Log-density of `N(mean, cov)` at `x`, via a Cholesky factorization of
/// `cov`. Used by the updater's `computeLogLikelihood` (spec §4.5) to weight
/// particles against an observation without mutating any belief.
pub fn log_gaussian_density<const D: usize>(
    x: &SVector<f64, D>,
    mean: &SVector<f64, D>,
    cov: &SMatrix<f64, D, D>,
) -> Result<f64> {
    let chol = symmetrize(cov)
        .cholesky()
        .ok_or(TrackingError::NonPositiveDefinite)?;
    let diff = x - mean;
    let quad = diff.dot(&chol.solve(&diff));
    let log_det: f64 = chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>() * 2.0;
    let dim = D as f64;
    Ok(-0.5 * (dim * (2.0 * std::f64::consts::PI).ln() + log_det + quad))
}
