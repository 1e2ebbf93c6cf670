//! Inbound GPS observations and the ground-truth diagnostic channel (spec
//! §6). Ingestion/parsing is out of scope; these are plain serde-friendly
//! structs the embedding application is expected to populate.

use crate::filter::RoadTrackingFilter;
use crate::geometry::Point2;
use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};

/// A noisy 2D position fix in the same planar projection as the road graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsObservation {
    pub timestamp_millis: i64,
    pub x: f64,
    pub y: f64,
    /// `None` for the first observation in a sequence; `dt_seconds` then
    /// falls back to `initialObsFreq` (spec §6).
    pub previous_timestamp_millis: Option<i64>,
    pub true_observation: Option<TrueObservation>,
}

impl GpsObservation {
    pub fn projected_point(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }

    /// Elapsed time since the previous observation, or `default_dt` seconds
    /// when there is none.
    pub fn dt_seconds(&self, default_dt: f64) -> f64 {
        match self.previous_timestamp_millis {
            Some(prev) => ((self.timestamp_millis - prev).max(0) as f64) / 1000.0,
            None => default_dt,
        }
    }
}

/// Ground-truth covariances accompanying a simulated/labeled observation,
/// used only for the diagnostic check in [`check_covariance_diagnostics`] —
/// never consulted by the estimator itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrueObservation {
    pub true_obs_cov: [[f64; 2]; 2],
    pub true_on_road_cov: [[f64; 2]; 2],
    pub true_off_road_cov: [[f64; 4]; 4],
}

fn matrix2_from_rows(rows: [[f64; 2]; 2]) -> SMatrix<f64, 2, 2> {
    SMatrix::<f64, 2, 2>::new(rows[0][0], rows[0][1], rows[1][0], rows[1][1])
}

fn matrix4_from_rows(rows: [[f64; 4]; 4]) -> SMatrix<f64, 4, 4> {
    #[rustfmt::skip]
    let m = SMatrix::<f64, 4, 4>::new(
        rows[0][0], rows[0][1], rows[0][2], rows[0][3],
        rows[1][0], rows[1][1], rows[1][2], rows[1][3],
        rows[2][0], rows[2][1], rows[2][2], rows[2][3],
        rows[3][0], rows[3][1], rows[3][2], rows[3][3],
    );
    m
}

fn warn_if_far<const D: usize>(estimate: &SMatrix<f64, D, D>, truth: &SMatrix<f64, D, D>, label: &str) {
    let truth_norm = truth.norm();
    if truth_norm <= 0.0 {
        return;
    }
    let relative = (estimate - truth).norm() / truth_norm;
    if relative > 0.40 {
        log::warn!(
            "{label} inverse-Wishart mean deviates from ground truth by {:.1}% (Frobenius norm)",
            relative * 100.0
        );
    }
}

/// Compares each inverse-Wishart posterior mean against `truth`, emitting a
/// `log::warn!` when the deviation exceeds 40% of the truth's Frobenius
/// norm (spec §6, §7 "Diagnostic"). Does not alter control flow.
pub fn check_covariance_diagnostics(filter: &RoadTrackingFilter, truth: &TrueObservation) {
    warn_if_far(&filter.obs_prior.mean(), &matrix2_from_rows(truth.true_obs_cov), "observation covariance");
    warn_if_far(
        &filter.q_r_prior.mean(),
        &matrix2_from_rows(truth.true_on_road_cov),
        "on-road process covariance",
    );
    warn_if_far(
        &filter.q_g_prior.mean(),
        &matrix4_from_rows(truth.true_off_road_cov),
        "off-road process covariance",
    );
}
