//! Road-graph abstraction: the `InferredEdge` domain type and the
//! `InferenceGraph` trait contract (spec §6). The actual road-graph data
//! source and its nearest-edge index are out of scope for this crate; only
//! the trait and a `StaticGraph` test double live here.

use crate::geometry::{LengthIndexedLine, Point2};
use crate::motion::GaussianState;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u64);

/// An immutable directed polyline on the road graph, or the distinguished
/// null edge representing off-road (spec §3: `length == 0`, no geometry).
#[derive(Debug, Clone)]
pub struct InferredEdge {
    id: Option<EdgeId>,
    geometry: Option<Arc<LengthIndexedLine>>,
    reverse_exists: bool,
}

impl InferredEdge {
    pub fn new(id: EdgeId, points: Vec<Point2>, reverse_exists: bool) -> Self {
        InferredEdge {
            id: Some(id),
            geometry: Some(Arc::new(LengthIndexedLine::new(points))),
            reverse_exists,
        }
    }

    /// The off-road sentinel. Always compares equal to itself and unequal
    /// to every real edge.
    pub fn null() -> Self {
        InferredEdge {
            id: None,
            geometry: None,
            reverse_exists: false,
        }
    }

    pub fn is_null(&self) -> bool {
        self.id.is_none()
    }

    pub fn id(&self) -> Option<EdgeId> {
        self.id
    }

    pub fn geometry(&self) -> Option<&LengthIndexedLine> {
        self.geometry.as_deref()
    }

    /// Strictly positive for a real edge, `0.0` for the null edge (spec §3
    /// invariant: length equals the sum of segment lengths).
    pub fn length(&self) -> f64 {
        self.geometry.as_ref().map_or(0.0, |g| g.total_length())
    }

    pub fn reverse_exists(&self) -> bool {
        self.reverse_exists
    }

    pub fn start(&self) -> Option<Point2> {
        self.geometry.as_ref().map(|g| g.point_at(0.0).0)
    }

    pub fn end(&self) -> Option<Point2> {
        self.geometry.as_ref().map(|g| g.point_at(g.total_length()).0)
    }
}

impl PartialEq for InferredEdge {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for InferredEdge {}

/// A nearby edge reported by [`InferenceGraph::nearby_edges`], paired with
/// its outgoing adjacency so the updater doesn't need a second round trip
/// during the edge walk.
#[derive(Debug, Clone)]
pub struct InferenceGraphSegment {
    pub edge: InferredEdge,
    pub outgoing: Vec<InferredEdge>,
}

/// Road-graph read-only query contract (spec §6). Implementations must be
/// safe under concurrent readers (spec §5: "the InferenceGraph is read-only
/// after construction").
pub trait InferenceGraph {
    /// Edges within a covariance-scaled radius of `mean`'s ground position.
    fn nearby_edges(&self, mean: &GaussianState<4>) -> Vec<InferenceGraphSegment>;

    /// Edges reachable by continuing forward from `edge`. Empty for the
    /// null edge and for any edge with no successors.
    fn outgoing_edges(&self, edge: &InferredEdge) -> Vec<InferredEdge>;
}

/// A trivial in-memory [`InferenceGraph`] backed by a `Vec` of edges and an
/// explicit adjacency map. Sufficient to drive this crate's own tests; not
/// intended as a production road-network backend (spec §6 notes the real
/// data source is an external collaborator).
#[derive(Debug, Clone, Default)]
pub struct StaticGraph {
    edges: Vec<InferredEdge>,
    adjacency: HashMap<EdgeId, Vec<EdgeId>>,
}

impl StaticGraph {
    pub fn new(edges: Vec<InferredEdge>, adjacency: HashMap<EdgeId, Vec<EdgeId>>) -> Self {
        StaticGraph { edges, adjacency }
    }

    fn find(&self, id: EdgeId) -> Option<&InferredEdge> {
        self.edges.iter().find(|e| e.id() == Some(id))
    }
}

impl InferenceGraph for StaticGraph {
    fn nearby_edges(&self, mean: &GaussianState<4>) -> Vec<InferenceGraphSegment> {
        let pos = Point2::new(mean.estimate[0], mean.estimate[2]);
        let position_variance = mean.error[(0, 0)] + mean.error[(2, 2)];
        let radius = (position_variance.max(0.0).sqrt() * 3.0).max(1.0);

        self.edges
            .iter()
            .filter(|e| !e.is_null())
            .filter_map(|e| {
                let geometry = e.geometry().expect("non-null edge has geometry");
                let projection = geometry.project(pos);
                let clamped = projection.arc_length.clamp(0.0, geometry.total_length());
                let (foot, _tangent) = geometry.point_at(clamped);
                if (foot - pos).norm() <= radius {
                    Some(InferenceGraphSegment {
                        edge: e.clone(),
                        outgoing: self.outgoing_edges(e),
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    fn outgoing_edges(&self, edge: &InferredEdge) -> Vec<InferredEdge> {
        match edge.id() {
            None => Vec::new(),
            Some(id) => self
                .adjacency
                .get(&id)
                .into_iter()
                .flatten()
                .filter_map(|successor| self.find(*successor).cloned())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_edge(id: u64, x0: f64) -> InferredEdge {
        InferredEdge::new(
            EdgeId(id),
            vec![Point2::new(x0, 0.0), Point2::new(x0 + 1.0, 0.0)],
            false,
        )
    }

    #[test]
    fn null_edge_has_zero_length_and_no_geometry() {
        let e = InferredEdge::null();
        assert!(e.is_null());
        assert_eq!(e.length(), 0.0);
        assert!(e.geometry().is_none());
    }

    #[test]
    fn static_graph_reports_outgoing_adjacency() {
        let e1 = unit_edge(1, 0.0);
        let e2 = unit_edge(2, 1.0);
        let mut adjacency = HashMap::new();
        adjacency.insert(EdgeId(1), vec![EdgeId(2)]);
        let graph = StaticGraph::new(vec![e1.clone(), e2.clone()], adjacency);
        assert_eq!(graph.outgoing_edges(&e1), vec![e2]);
        assert!(graph.outgoing_edges(&InferredEdge::null()).is_empty());
    }

    #[test]
    fn nearby_edges_finds_edge_under_tight_covariance() {
        let e1 = unit_edge(1, 0.0);
        let graph = StaticGraph::new(vec![e1.clone()], HashMap::new());
        let mean = GaussianState::<4>::new(
            nalgebra::SVector::<f64, 4>::new(0.5, 0.0, 0.01, 0.0),
            nalgebra::SMatrix::<f64, 4, 4>::identity() * 1e-4,
        );
        let found = graph.nearby_edges(&mean);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].edge, e1);
    }
}
