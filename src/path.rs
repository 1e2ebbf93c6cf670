//! Path and PathEdge geometry: oriented edge placements, path-level
//! clamping and lookup, edge segmentation, and ground<->road coordinate
//! projection (spec §4.1, §4.7).

use crate::error::{Result, TrackingError};
use crate::geometry::Point2;
use crate::graph::InferredEdge;
use crate::motion::GaussianState;
use nalgebra::{SMatrix, SVector, Vector2};

/// Points whose orthogonal foot falls beyond a path endpoint by at most this
/// much are snapped to the endpoint instead of rejected (spec §4.1,
/// "opposite-direction adjustment"). Owned here because both the ground-road
/// projection and the path-containment invariant check against it.
pub const EDGE_LENGTH_ERROR_TOLERANCE: f64 = 1e-2;

/// An oriented placement of one [`InferredEdge`] on a [`Path`].
#[derive(Debug, Clone, PartialEq)]
pub struct PathEdge {
    pub edge: InferredEdge,
    pub dist_to_start_of_edge: f64,
    pub is_backward: bool,
}

impl PathEdge {
    pub fn new(edge: InferredEdge, dist_to_start_of_edge: f64, is_backward: bool) -> Self {
        PathEdge {
            edge,
            dist_to_start_of_edge,
            is_backward,
        }
    }

    pub fn length(&self) -> f64 {
        self.edge.length()
    }

    fn direction(&self) -> f64 {
        if self.is_backward {
            -1.0
        } else {
            1.0
        }
    }

    /// The signed distance from the path origin to this edge's far end.
    pub fn far_end(&self) -> f64 {
        self.dist_to_start_of_edge + self.direction() * self.length()
    }

    /// Whether signed path distance `s` falls within this edge's signed
    /// range (spec §4.1, edge-on-path lookup).
    pub fn contains_signed(&self, s: f64) -> bool {
        let (lo, hi) = if self.dist_to_start_of_edge <= self.far_end() {
            (self.dist_to_start_of_edge, self.far_end())
        } else {
            (self.far_end(), self.dist_to_start_of_edge)
        };
        s >= lo - EDGE_LENGTH_ERROR_TOLERANCE && s <= hi + EDGE_LENGTH_ERROR_TOLERANCE
    }

    /// Splits this edge into sub-edges each at most `target_distance` long,
    /// preserving cumulative distance-to-start and concatenated geometry
    /// (spec §4.7).
    ///
    /// Every sub-edge keeps the *originating* edge's real id rather than
    /// minting a synthetic one: segmentation is a purely geometric split for
    /// bounding a single `PathEdge`'s length, not a new logical edge, and
    /// `InferenceGraph::outgoing_edges` is keyed by the real graph id. A
    /// synthetic id would make the next edge walk's adjacency lookup on a
    /// sub-edge (spec §4.5 step 2, "starting from the particle's current
    /// edge") silently return no successors.
    pub fn segment(&self, target_distance: f64) -> Vec<PathEdge> {
        assert!(target_distance > 0.0);
        let len = self.length();
        if self.edge.is_null() || len <= target_distance {
            return vec![self.clone()];
        }
        let geometry = self.edge.geometry().expect("non-null edge has geometry");
        let id = self.edge.id().expect("non-null edge has an id");
        let n = (len / target_distance).ceil() as usize;
        let chunk = len / n as f64;
        let dir = self.direction();
        let mut cursor = self.dist_to_start_of_edge;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let from = i as f64 * chunk;
            let to = ((i + 1) as f64 * chunk).min(len);
            let points = geometry.sub_points(from, to);
            let sub_edge = InferredEdge::new(id, points, self.edge.reverse_exists());
            out.push(PathEdge::new(sub_edge, cursor, self.is_backward));
            cursor += dir * chunk;
        }
        out
    }
}

/// An ordered sequence of oriented edges forming a continuous polyline, or
/// the null (off-road) path when empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    edges: Vec<PathEdge>,
}

impl Path {
    pub fn null() -> Self {
        Path { edges: Vec::new() }
    }

    pub fn from_edges(edges: Vec<PathEdge>) -> Self {
        Path { edges }
    }

    pub fn is_null(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn is_on_road(&self) -> bool {
        !self.is_null()
    }

    pub fn edges(&self) -> &[PathEdge] {
        &self.edges
    }

    pub fn is_backward(&self) -> bool {
        self.edges.first().map_or(false, |e| e.is_backward)
    }

    /// Total signed path distance: `0` for the null path, otherwise the
    /// signed distance to the last edge's far end.
    pub fn total_signed_distance(&self) -> f64 {
        self.edges.last().map_or(0.0, |e| e.far_end())
    }

    /// Clamps `s` to `[0, total_signed_distance]`, ordered by sign (spec
    /// §4.1). Idempotent by construction.
    pub fn clamp_to_path(&self, s: f64) -> f64 {
        if self.is_null() {
            return 0.0;
        }
        let total = self.total_signed_distance();
        let (lo, hi) = if total >= 0.0 { (0.0, total) } else { (total, 0.0) };
        s.clamp(lo, hi)
    }

    /// The last edge whose signed range contains `s`; ties at a boundary
    /// resolve to the later edge (spec §4.1).
    pub fn edge_for_distance(&self, s: f64) -> Option<&PathEdge> {
        self.edges.iter().rev().find(|e| e.contains_signed(s))
    }

    /// Analytic replacement for the original's catch-and-retry path merge
    /// (spec §9 Open Question 3): joins `self` and `other` when they share
    /// an endpoint, reporting whether `other` had to be reversed. Returns
    /// `None` (the no-merge sentinel) when no shared endpoint exists.
    pub fn merge(&self, other: &Path) -> Option<(Path, bool)> {
        if self.is_null() || other.is_null() {
            return None;
        }
        let self_end = self.edges.last().unwrap().edge.end()?;
        let other_start = other.edges.first().unwrap().edge.start()?;
        let other_end = other.edges.last().unwrap().edge.end()?;

        const EPS: f64 = 1e-6;
        if (self_end - other_start).norm() < EPS {
            let mut edges = self.edges.clone();
            let offset = self.total_signed_distance();
            let dir = self.is_backward();
            for e in &other.edges {
                edges.push(PathEdge::new(
                    e.edge.clone(),
                    offset + (if dir { -1.0 } else { 1.0 }) * e.dist_to_start_of_edge,
                    dir,
                ));
            }
            return Some((Path::from_edges(edges), false));
        }
        if (self_end - other_end).norm() < EPS {
            let mut reversed: Vec<PathEdge> = other.edges.iter().rev().cloned().collect();
            let total_other = other.total_signed_distance();
            let dir = self.is_backward();
            let mut edges = self.edges.clone();
            let offset = self.total_signed_distance();
            for e in reversed.drain(..) {
                let dist_from_other_end = total_other - e.far_end();
                edges.push(PathEdge::new(
                    e.edge,
                    offset + (if dir { -1.0 } else { 1.0 }) * dist_from_other_end,
                    dir,
                ));
            }
            return Some((Path::from_edges(edges), true));
        }
        None
    }
}

/// Affine Jacobian `P` mapping a ground-state perturbation to a road-state
/// perturbation along `path_edge`'s direction (spec §4.1 step 2).
fn ground_to_road_jacobian(tangent: Vector2<f64>, dir: f64) -> SMatrix<f64, 2, 4> {
    #[rustfmt::skip]
    let p = SMatrix::<f64, 2, 4>::new(
        dir * tangent.x, 0.0,             dir * tangent.y, 0.0,
        0.0,             dir * tangent.x, 0.0,             dir * tangent.y,
    );
    p
}

/// Ground -> road projection of a 4D belief onto a single `PathEdge` (spec
/// §4.1). `use_abs_velocity` replaces the signed speed with
/// `sign(ṡ)·‖(ẋ,ẏ)‖`, preserving velocity magnitude through the projection.
pub fn ground_to_road(
    ground: &GaussianState<4>,
    path_edge: &PathEdge,
    use_abs_velocity: bool,
) -> Result<GaussianState<2>> {
    let geometry = path_edge
        .edge
        .geometry()
        .ok_or(TrackingError::UnrepresentableProjection)?;
    let point = Point2::new(ground.estimate[0], ground.estimate[2]);
    let velocity = Vector2::new(ground.estimate[1], ground.estimate[3]);

    let projection = geometry.project(point);
    let edge_local_s = projection.arc_length;
    let length = geometry.total_length();

    if edge_local_s < -EDGE_LENGTH_ERROR_TOLERANCE || edge_local_s > length + EDGE_LENGTH_ERROR_TOLERANCE {
        return Err(TrackingError::UnrepresentableProjection);
    }
    let clamped_local_s = edge_local_s.clamp(0.0, length);
    let tangent = geometry.segment_tangent(geometry.segment_for_arc_length(clamped_local_s));

    let dir = path_edge.direction();
    let path_s = path_edge.dist_to_start_of_edge + dir * clamped_local_s;
    let mut path_sdot = dir * tangent.dot(&velocity);
    if use_abs_velocity {
        path_sdot = path_sdot.signum() * velocity.norm();
    }

    let jacobian = ground_to_road_jacobian(tangent, dir);
    let error = jacobian * ground.error * jacobian.transpose();
    Ok(GaussianState::new(SVector::<f64, 2>::new(path_s, path_sdot), error))
}

/// Road -> ground projection, the inverse of [`ground_to_road`] on the
/// segment selected by `|s|` (spec §4.1).
pub fn road_to_ground(road: &GaussianState<2>, path_edge: &PathEdge) -> Result<GaussianState<4>> {
    let geometry = path_edge
        .edge
        .geometry()
        .ok_or(TrackingError::UnrepresentableProjection)?;
    let dir = path_edge.direction();
    let length = geometry.total_length();
    let edge_local_s = dir * (road.estimate[0] - path_edge.dist_to_start_of_edge);
    if edge_local_s < -EDGE_LENGTH_ERROR_TOLERANCE || edge_local_s > length + EDGE_LENGTH_ERROR_TOLERANCE {
        return Err(TrackingError::UnrepresentableProjection);
    }
    let clamped_local_s = edge_local_s.clamp(0.0, length);
    let (point, tangent) = geometry.point_at(clamped_local_s);
    // Inverse of `ground_to_road`'s `path_sdot = dir * tangent.dot(velocity)`:
    // since `dir` is +/-1, `tangent . velocity = path_sdot * dir`.
    let velocity = tangent * (road.estimate[1] * dir);

    let estimate = SVector::<f64, 4>::new(point.x, velocity.x, point.y, velocity.y);
    let jacobian = ground_to_road_jacobian(tangent, dir);
    let error = jacobian.transpose() * road.error * jacobian;
    Ok(GaussianState::new(estimate, error))
}

/// Pseudo-observation construction for road measurement (spec §4.3): lifts a
/// 2D ground observation to the road's 1D coordinate on `path_edge`.
///
/// `mean_s` is the signed position of the belief's posterior mean that
/// `path_edge` is supposed to carry. Spec §4.3: "the edge passed must be the
/// one carrying the posterior mean; using a different edge is a contract
/// violation" — enforced here rather than trusted, since every caller
/// otherwise re-derives `path_edge` from a path lookup that could silently
/// drift from the mean it was looked up against.
pub fn project_observation_to_road(
    obs: Point2,
    obs_cov: &SMatrix<f64, 2, 2>,
    path_edge: &PathEdge,
    mean_s: f64,
) -> Result<(f64, f64)> {
    if !path_edge.contains_signed(mean_s) {
        return Err(TrackingError::WrongEdge);
    }
    let lifted = GaussianState::<4>::new(
        SVector::<f64, 4>::new(obs.x, 0.0, obs.y, 0.0),
        lift_2d_cov_to_4d(obs_cov),
    );
    let road = ground_to_road(&lifted, path_edge, true)?;
    Ok((road.estimate[0], road.error[(0, 0)]))
}

fn lift_2d_cov_to_4d(cov: &SMatrix<f64, 2, 2>) -> SMatrix<f64, 4, 4> {
    let mut out = SMatrix::<f64, 4, 4>::zeros();
    out[(0, 0)] = cov[(0, 0)];
    out[(0, 2)] = cov[(0, 1)];
    out[(2, 0)] = cov[(1, 0)];
    out[(2, 2)] = cov[(1, 1)];
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeId;
    use approx::assert_relative_eq;

    fn unit_edge(id: u64, x0: f64) -> InferredEdge {
        InferredEdge::new(
            EdgeId(id),
            vec![Point2::new(x0, 0.0), Point2::new(x0 + 1.0, 0.0)],
            false,
        )
    }

    fn two_edge_path() -> Path {
        Path::from_edges(vec![
            PathEdge::new(unit_edge(1, 0.0), 0.0, false),
            PathEdge::new(unit_edge(2, 1.0), 1.0, false),
        ])
    }

    #[test]
    fn clamp_is_idempotent() {
        let path = two_edge_path();
        for s in [-5.0, 0.0, 0.7, 2.0, 10.0] {
            let once = path.clamp_to_path(s);
            let twice = path.clamp_to_path(once);
            assert_relative_eq!(once, twice, epsilon = 1e-12);
        }
    }

    #[test]
    fn edge_lookup_boundary_prefers_later_edge() {
        let path = two_edge_path();
        let edge = path.edge_for_distance(1.0).unwrap();
        assert_eq!(edge.edge.id(), Some(EdgeId(2)));
    }

    #[test]
    fn ground_to_road_round_trips_in_interior() {
        let edge = PathEdge::new(unit_edge(1, 0.0), 0.0, false);
        let ground = GaussianState::<4>::new(
            SVector::<f64, 4>::new(0.5, 1.0, 0.0, 0.0),
            SMatrix::<f64, 4, 4>::identity() * 1e-4,
        );
        let road = ground_to_road(&ground, &edge, false).unwrap();
        assert_relative_eq!(road.estimate[0], 0.5, epsilon = 1e-9);
        assert_relative_eq!(road.estimate[1], 1.0, epsilon = 1e-9);

        let back = road_to_ground(&road, &edge).unwrap();
        assert_relative_eq!(back.estimate[0], ground.estimate[0], epsilon = 1e-9);
        assert_relative_eq!(back.estimate[1], ground.estimate[1], epsilon = 1e-9);
    }

    #[test]
    fn backward_edge_flips_distance_sign() {
        let edge = PathEdge::new(unit_edge(1, 0.0), 0.0, true);
        let ground = GaussianState::<4>::new(
            SVector::<f64, 4>::new(0.5, -1.0, 0.0, 0.0),
            SMatrix::<f64, 4, 4>::identity() * 1e-4,
        );
        let road = ground_to_road(&ground, &edge, false).unwrap();
        assert!(road.estimate[0] <= 0.0);
    }

    #[test]
    fn backward_edge_round_trips_velocity() {
        let edge = PathEdge::new(unit_edge(1, 0.0), 0.0, true);
        let ground = GaussianState::<4>::new(
            SVector::<f64, 4>::new(0.5, -1.0, 0.0, 0.0),
            SMatrix::<f64, 4, 4>::identity() * 1e-4,
        );
        let road = ground_to_road(&ground, &edge, false).unwrap();
        let back = road_to_ground(&road, &edge).unwrap();
        assert_relative_eq!(back.estimate[1], ground.estimate[1], epsilon = 1e-9);
    }

    #[test]
    fn segment_preserves_total_length() {
        let edge = PathEdge::new(unit_edge(1, 0.0), 0.0, false);
        let parts = edge.segment(0.3);
        let total: f64 = parts.iter().map(|p| p.length()).sum();
        assert_relative_eq!(total, edge.length(), epsilon = 1e-9);
    }

    #[test]
    fn segment_preserves_the_originating_edge_id() {
        let edge = PathEdge::new(unit_edge(7, 0.0), 0.0, false);
        let parts = edge.segment(0.3);
        assert!(parts.len() > 1, "expected more than one sub-edge");
        for part in &parts {
            assert_eq!(part.edge.id(), Some(EdgeId(7)));
        }
    }

    #[test]
    fn project_observation_to_road_rejects_an_edge_not_carrying_the_mean() {
        let edge = PathEdge::new(unit_edge(1, 0.0), 0.0, false);
        let obs_cov = SMatrix::<f64, 2, 2>::identity() * 1e-3;
        // mean_s = 5.0 is nowhere near this unit-length edge's [0, 1] range.
        let result = project_observation_to_road(Point2::new(0.5, 0.0), &obs_cov, &edge, 5.0);
        assert_eq!(result, Err(TrackingError::WrongEdge));
    }

    #[test]
    fn merge_joins_paths_sharing_an_endpoint() {
        let a = Path::from_edges(vec![PathEdge::new(unit_edge(1, 0.0), 0.0, false)]);
        let b = Path::from_edges(vec![PathEdge::new(unit_edge(2, 1.0), 0.0, false)]);
        let (merged, reversed) = a.merge(&b).unwrap();
        assert!(!reversed);
        assert_eq!(merged.edges().len(), 2);
    }

    #[test]
    fn merge_returns_none_when_disjoint() {
        let a = Path::from_edges(vec![PathEdge::new(unit_edge(1, 0.0), 0.0, false)]);
        let b = Path::from_edges(vec![PathEdge::new(unit_edge(9, 50.0), 0.0, false)]);
        assert!(a.merge(&b).is_none());
    }
}
