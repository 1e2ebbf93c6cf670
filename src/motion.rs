//! The coupled road/ground Kalman filter pair (spec §4.2): linear-Gaussian
//! constant-velocity dynamics, shared predict/measure machinery, and the
//! two concrete models (`RoadModel` 1D-on-road, `GroundModel` 2D-off-road).

use crate::error::Result;
use crate::linalg;
use nalgebra::{SMatrix, SVector};

/// A Gaussian belief over a `D`-dimensional kinematic state.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianState<const D: usize> {
    pub estimate: SVector<f64, D>,
    pub error: SMatrix<f64, D, D>,
}

impl<const D: usize> GaussianState<D> {
    pub fn new(estimate: SVector<f64, D>, error: SMatrix<f64, D, D>) -> Self {
        GaussianState { estimate, error }
    }
}

/// Kalman predict: `x' = G x`, `P' = G P Gᵀ + Q`.
pub fn predict<const D: usize>(
    prior: &GaussianState<D>,
    transition: &SMatrix<f64, D, D>,
    process_covariance: &SMatrix<f64, D, D>,
) -> GaussianState<D> {
    let estimate = transition * prior.estimate;
    let error = transition * prior.error * transition.transpose() + process_covariance;
    GaussianState::new(estimate, error)
}

/// Kalman measurement update against observation `obs` with observation
/// matrix `h` and observation covariance `r`. Fails only if the innovation
/// covariance is singular, which should not happen once `r` has already
/// gone through [`linalg::psd_sqrt`] upstream.
pub fn measure<const D: usize, const M: usize>(
    prior: &GaussianState<D>,
    h: &SMatrix<f64, M, D>,
    obs: &SVector<f64, M>,
    r: &SMatrix<f64, M, M>,
) -> Result<GaussianState<D>> {
    let innovation = obs - h * prior.estimate;
    let innovation_cov = h * prior.error * h.transpose() + r;
    let innovation_cov_inv = linalg::invert(&innovation_cov)?;
    let gain = prior.error * h.transpose() * innovation_cov_inv;
    let estimate = prior.estimate + gain * innovation;
    let identity = SMatrix::<f64, D, D>::identity();
    let error = (identity - gain * h) * prior.error;
    Ok(GaussianState::new(estimate, error))
}

/// The on-road model: state `[s, ṡ]` (signed arc length, signed speed).
///
/// `Q_r` enters the transition covariance as `F Q_r Fᵀ`. Per `DESIGN.md`
/// ("covariance factor F dimensionality"), `F` is the square,
/// state-dimension-matching `diag(Δt²/2, Δt)` rather than the column vector
/// the glossary names, so that it is consistent with `onRoadStateCov` being
/// a 2-vector prior with `dof >= 3`.
pub struct RoadModel;

impl RoadModel {
    pub fn transition(dt: f64) -> SMatrix<f64, 2, 2> {
        SMatrix::<f64, 2, 2>::new(1.0, dt, 0.0, 1.0)
    }

    pub fn covariance_factor(dt: f64) -> SMatrix<f64, 2, 2> {
        SMatrix::<f64, 2, 2>::new(dt * dt / 2.0, 0.0, 0.0, dt)
    }

    pub fn observation() -> SMatrix<f64, 1, 2> {
        SMatrix::<f64, 1, 2>::new(1.0, 0.0)
    }

    pub fn process_covariance(dt: f64, q_r: &SMatrix<f64, 2, 2>) -> SMatrix<f64, 2, 2> {
        let f = Self::covariance_factor(dt);
        f * q_r * f.transpose()
    }
}

/// The off-road model: state `[x, ẋ, y, ẏ]`, block-diagonal constant
/// velocity in `x` and `y`.
pub struct GroundModel;

impl GroundModel {
    pub fn transition(dt: f64) -> SMatrix<f64, 4, 4> {
        let g = RoadModel::transition(dt);
        let mut m = SMatrix::<f64, 4, 4>::zeros();
        m.fixed_view_mut::<2, 2>(0, 0).copy_from(&g);
        m.fixed_view_mut::<2, 2>(2, 2).copy_from(&g);
        m
    }

    pub fn covariance_factor(dt: f64) -> SMatrix<f64, 4, 4> {
        let f = RoadModel::covariance_factor(dt);
        let mut m = SMatrix::<f64, 4, 4>::zeros();
        m.fixed_view_mut::<2, 2>(0, 0).copy_from(&f);
        m.fixed_view_mut::<2, 2>(2, 2).copy_from(&f);
        m
    }

    pub fn observation() -> SMatrix<f64, 2, 4> {
        #[rustfmt::skip]
        let o = SMatrix::<f64, 2, 4>::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
        );
        o
    }

    pub fn process_covariance(dt: f64, q_g: &SMatrix<f64, 4, 4>) -> SMatrix<f64, 4, 4> {
        let f = Self::covariance_factor(dt);
        f * q_g * f.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn predict_advances_constant_velocity_state() {
        let prior = GaussianState::<2>::new(
            SVector::<f64, 2>::new(0.0, 1.0),
            SMatrix::<f64, 2, 2>::identity() * 1e-6,
        );
        let g = RoadModel::transition(1.0);
        let q = RoadModel::process_covariance(1.0, &SMatrix::<f64, 2, 2>::identity());
        let predicted = predict(&prior, &g, &q);
        assert_relative_eq!(predicted.estimate[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(predicted.estimate[1], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn measure_pulls_estimate_toward_observation() {
        let prior = GaussianState::<2>::new(
            SVector::<f64, 2>::new(0.0, 1.0),
            SMatrix::<f64, 2, 2>::identity(),
        );
        let h = RoadModel::observation();
        let obs = SVector::<f64, 1>::new(5.0);
        let r = SMatrix::<f64, 1, 1>::new(1e-3);
        let posterior = measure(&prior, &h, &obs, &r).unwrap();
        assert!(posterior.estimate[0] > 4.0);
    }

    #[test]
    fn ground_model_blocks_are_independent_in_x_and_y() {
        let g = GroundModel::transition(2.0);
        assert_relative_eq!(g[(0, 1)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(g[(2, 3)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(g[(0, 3)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(g[(2, 1)], 0.0, epsilon = 1e-12);
    }
}
