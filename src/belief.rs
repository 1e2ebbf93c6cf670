//! `PathStateBelief`: a (Path, Gaussian) pair whose Gaussian dimensionality
//! follows the path's on/off-road character, with the dispatch logic that
//! routes predict/measure through the right model (spec §4.4).

use crate::error::{Result, TrackingError};
use crate::geometry::Point2;
use crate::graph::InferredEdge;
use crate::motion::{self, GaussianState, GroundModel, RoadModel};
use crate::path::{self, Path, PathEdge};
use nalgebra::{SMatrix, SVector};

/// The raw predicted motion state before it has been placed on a path —
/// the output of the native-coordinate predict step in spec §4.5 step 1,
/// before the edge walk has chosen the new path.
#[derive(Debug, Clone)]
pub enum RawMotionState {
    Road(GaussianState<2>),
    Ground(GaussianState<4>),
}

/// A belief over the vehicle's kinematic state, tied to a path whose
/// on/off-road character fixes the Gaussian's dimensionality.
#[derive(Debug, Clone, PartialEq)]
pub enum PathStateBelief {
    OnRoad { path: Path, state: GaussianState<2> },
    OffRoad { state: GaussianState<4> },
}

impl PathStateBelief {
    pub fn on_road(path: Path, state: GaussianState<2>) -> Self {
        debug_assert!(path.is_on_road(), "on_road belief requires a non-null path");
        PathStateBelief::OnRoad { path, state }
    }

    pub fn off_road(state: GaussianState<4>) -> Self {
        PathStateBelief::OffRoad { state }
    }

    pub fn is_on_road(&self) -> bool {
        matches!(self, PathStateBelief::OnRoad { .. })
    }

    pub fn path(&self) -> Path {
        match self {
            PathStateBelief::OnRoad { path, .. } => path.clone(),
            PathStateBelief::OffRoad { .. } => Path::null(),
        }
    }

    /// The raw Gaussian mean/covariance in the belief's native coordinates
    /// (`getGlobalState` in spec §3).
    pub fn native_state(&self) -> RawMotionState {
        match self {
            PathStateBelief::OnRoad { state, .. } => RawMotionState::Road(state.clone()),
            PathStateBelief::OffRoad { state } => RawMotionState::Ground(state.clone()),
        }
    }

    fn current_path_edge(&self) -> Option<PathEdge> {
        match self {
            PathStateBelief::OnRoad { path, state } => {
                path.edge_for_distance(state.estimate[0]).cloned()
            }
            PathStateBelief::OffRoad { .. } => None,
        }
    }

    /// The last path edge containing the mean's position, or the null edge
    /// off-road (spec §3: `getEdge()`).
    pub fn edge(&self) -> InferredEdge {
        self.current_path_edge().map_or_else(InferredEdge::null, |e| e.edge)
    }

    /// Always-4D ground projection (spec §3: `getGroundState()`); identity
    /// when already off-road.
    pub fn ground_state(&self) -> Result<GaussianState<4>> {
        match self {
            PathStateBelief::OffRoad { state } => Ok(state.clone()),
            PathStateBelief::OnRoad { state, .. } => {
                let edge = self
                    .current_path_edge()
                    .ok_or(TrackingError::UnrepresentableProjection)?;
                path::road_to_ground(state, &edge)
            }
        }
    }

    /// Rewraps this belief onto `new_path`, converting coordinates (and
    /// sign, via the target path's direction) as needed. Fails if the
    /// ground projection is not representable on `new_path` within
    /// tolerance (spec §4.4: `getStateBeliefOnPath`).
    pub fn on_new_path(&self, new_path: &Path) -> Result<PathStateBelief> {
        if new_path.is_null() {
            return Ok(PathStateBelief::off_road(self.ground_state()?));
        }
        let ground = self.ground_state()?;
        for edge in new_path.edges() {
            if let Ok(mut road) = path::ground_to_road(&ground, edge, true) {
                road.estimate[0] = new_path.clamp_to_path(road.estimate[0]);
                return Ok(PathStateBelief::on_road(new_path.clone(), road));
            }
        }
        Err(TrackingError::UnrepresentableProjection)
    }
}

/// Runs the Kalman predict step on `belief` in its native coordinate system
/// (spec §4.5 step 1), before any path has been chosen for the new step.
pub fn predict(
    belief: &PathStateBelief,
    dt: f64,
    q_r: &SMatrix<f64, 2, 2>,
    q_g: &SMatrix<f64, 4, 4>,
) -> RawMotionState {
    match belief {
        PathStateBelief::OnRoad { state, .. } => {
            let g = RoadModel::transition(dt);
            let q = RoadModel::process_covariance(dt, q_r);
            RawMotionState::Road(motion::predict(state, &g, &q))
        }
        PathStateBelief::OffRoad { state } => {
            let g = GroundModel::transition(dt);
            let q = GroundModel::process_covariance(dt, q_g);
            RawMotionState::Ground(motion::predict(state, &g, &q))
        }
    }
}

/// Places a raw predicted/sampled motion state onto `new_path`, converting
/// between road and ground coordinates if the path's on/off-road character
/// differs from the raw state's (spec §4.5 step 3: "place mean").
pub fn place_on_path(raw: &RawMotionState, new_path: &Path) -> Result<PathStateBelief> {
    match (raw, new_path.is_on_road()) {
        (RawMotionState::Road(state), true) => {
            let mut state = state.clone();
            state.estimate[0] = new_path.clamp_to_path(state.estimate[0]);
            Ok(PathStateBelief::on_road(new_path.clone(), state))
        }
        (RawMotionState::Road(_), false) => {
            // Unreachable per the edge-walk rule (spec §4.5 step 2): once a
            // particle starts a step on-road, the null option is removed
            // from the walk's domain for that step, so an on-road raw state
            // can never land on the null path.
            debug_assert!(false, "on-road raw state paired with the null path");
            Err(TrackingError::NumericalError(
                "on-road raw state cannot be placed on the null path",
            ))
        }
        (RawMotionState::Ground(state), true) => {
            for edge in new_path.edges() {
                if let Ok(mut road) = path::ground_to_road(state, edge, true) {
                    road.estimate[0] = new_path.clamp_to_path(road.estimate[0]);
                    return Ok(PathStateBelief::on_road(new_path.clone(), road));
                }
            }
            Err(TrackingError::UnrepresentableProjection)
        }
        (RawMotionState::Ground(state), false) => Ok(PathStateBelief::off_road(state.clone())),
    }
}

/// Measures `prior` against a 2D ground observation, routing through the
/// road pseudo-observation of spec §4.3 when on-road.
pub fn measure(
    prior: &PathStateBelief,
    obs: Point2,
    obs_cov: &SMatrix<f64, 2, 2>,
) -> Result<PathStateBelief> {
    match prior {
        PathStateBelief::OnRoad { path, state } => {
            let edge = path
                .edge_for_distance(state.estimate[0])
                .ok_or(TrackingError::UnrepresentableProjection)?;
            let (y_s, sigma_s) = path::project_observation_to_road(obs, obs_cov, edge, state.estimate[0])?;
            let h = RoadModel::observation();
            let r = SMatrix::<f64, 1, 1>::new(sigma_s);
            let mut posterior = motion::measure(state, &h, &SVector::<f64, 1>::new(y_s), &r)?;
            posterior.estimate[0] = path.clamp_to_path(posterior.estimate[0]);
            Ok(PathStateBelief::on_road(path.clone(), posterior))
        }
        PathStateBelief::OffRoad { state } => {
            let h = GroundModel::observation();
            let y = SVector::<f64, 2>::new(obs.x, obs.y);
            let posterior = motion::measure(state, &h, &y, obs_cov)?;
            Ok(PathStateBelief::off_road(posterior))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeId;
    use crate::path::PathEdge;

    fn unit_edge_path() -> Path {
        let edge = InferredEdge::new(
            EdgeId(1),
            vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)],
            false,
        );
        Path::from_edges(vec![PathEdge::new(edge, 0.0, false)])
    }

    #[test]
    fn edge_matches_mean_position() {
        let path = unit_edge_path();
        let belief = PathStateBelief::on_road(
            path,
            GaussianState::<2>::new(
                SVector::<f64, 2>::new(0.5, 1.0),
                SMatrix::<f64, 2, 2>::identity() * 1e-4,
            ),
        );
        assert_eq!(belief.edge().id(), Some(EdgeId(1)));
    }

    #[test]
    fn off_road_ground_state_is_identity() {
        let state = GaussianState::<4>::new(
            SVector::<f64, 4>::new(1.0, 2.0, 3.0, 4.0),
            SMatrix::<f64, 4, 4>::identity(),
        );
        let belief = PathStateBelief::off_road(state.clone());
        assert_eq!(belief.ground_state().unwrap(), state);
    }

    #[test]
    fn measure_on_road_keeps_position_within_path_range() {
        let path = unit_edge_path();
        let belief = PathStateBelief::on_road(
            path,
            GaussianState::<2>::new(
                SVector::<f64, 2>::new(0.5, 1.0),
                SMatrix::<f64, 2, 2>::identity() * 0.01,
            ),
        );
        let obs_cov = SMatrix::<f64, 2, 2>::identity() * 0.01;
        let posterior = measure(&belief, Point2::new(2.0, 0.0), &obs_cov).unwrap();
        if let PathStateBelief::OnRoad { state, .. } = posterior {
            assert!(state.estimate[0] <= 1.0 + 1e-6);
        } else {
            panic!("expected on-road posterior");
        }
    }
}
