//! Polyline geometry: a length-indexed multi-segment line supporting
//! orthogonal projection and its inverse (spec §4.1).

use nalgebra::Vector2;

pub type Point2 = Vector2<f64>;

/// The result of snapping a point onto a [`LengthIndexedLine`]: an arc length
/// measured from the line's start, **not yet clamped** to `[0, total_length]`
/// — the caller decides whether to clamp or reject based on how far the
/// value falls outside that range (spec §4.1 step 3, "opposite-direction
/// adjustment").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Arc length from the line's start to the orthogonal foot. May be
    /// negative or exceed `total_length` when the foot falls beyond an
    /// endpoint.
    pub arc_length: f64,
    /// Index of the segment the foot was computed against.
    pub segment: usize,
}

/// An ordered, connected polyline with precomputed cumulative segment
/// lengths, supporting orthogonal projection (ground -> arc length) and its
/// inverse (arc length -> point + tangent).
#[derive(Debug, Clone, PartialEq)]
pub struct LengthIndexedLine {
    points: Vec<Point2>,
    cumulative: Vec<f64>,
}

impl LengthIndexedLine {
    /// Builds the cumulative-length index. Panics if fewer than two points
    /// are given or any consecutive pair is coincident — both indicate a
    /// malformed `InferredEdge` geometry upstream.
    pub fn new(points: Vec<Point2>) -> Self {
        assert!(points.len() >= 2, "a polyline needs at least two points");
        let mut cumulative = Vec::with_capacity(points.len());
        cumulative.push(0.0);
        for w in points.windows(2) {
            let seg_len = (w[1] - w[0]).norm();
            assert!(seg_len > 0.0, "polyline has a zero-length segment");
            cumulative.push(cumulative.last().unwrap() + seg_len);
        }
        Self { points, cumulative }
    }

    pub fn total_length(&self) -> f64 {
        *self.cumulative.last().unwrap()
    }

    pub fn segment_count(&self) -> usize {
        self.points.len() - 1
    }

    fn segment(&self, i: usize) -> (Point2, Point2) {
        (self.points[i], self.points[i + 1])
    }

    fn unit_tangent(&self, i: usize) -> Vector2<f64> {
        let (p0, p1) = self.segment(i);
        (p1 - p0).normalize()
    }

    pub fn segment_tangent(&self, i: usize) -> Vector2<f64> {
        self.unit_tangent(i)
    }

    /// The vertex chain between two arc lengths (both already clamped to
    /// `[0, total_length]`), including the interpolated endpoints. Used by
    /// edge segmentation (spec §4.7) to build a sub-edge's geometry.
    pub fn sub_points(&self, from: f64, to: f64) -> Vec<Point2> {
        assert!(from <= to);
        let mut points = vec![self.point_at(from).0];
        for i in 0..self.points.len() {
            let d = self.cumulative[i];
            if d > from && d < to {
                points.push(self.points[i]);
            }
        }
        points.push(self.point_at(to).0);
        points
    }

    /// Orthogonally projects `p` onto the polyline. Picks the segment whose
    /// *locally clamped* foot is nearest to `p`, then reports the arc length
    /// using that segment's **unclamped** affine parametrization — so a
    /// point beyond the first or last endpoint yields an out-of-range
    /// `arc_length` rather than one silently clamped to the endpoint.
    pub fn project(&self, p: Point2) -> Projection {
        let mut best_dist = f64::INFINITY;
        let mut best_seg = 0usize;
        let mut best_clamped_local = 0.0;
        for i in 0..self.segment_count() {
            let (p0, _p1) = self.segment(i);
            let t = self.unit_tangent(i);
            let seg_len = self.cumulative[i + 1] - self.cumulative[i];
            let raw = t.dot(&(p - p0));
            let clamped = raw.clamp(0.0, seg_len);
            let foot = p0 + t * clamped;
            let dist = (p - foot).norm();
            if dist < best_dist {
                best_dist = dist;
                best_seg = i;
                best_clamped_local = raw;
            }
        }
        Projection {
            arc_length: self.cumulative[best_seg] + best_clamped_local,
            segment: best_seg,
        }
    }

    /// Tangent and per-segment affine origin for the segment containing arc
    /// length `s`, after `s` has already been clamped to `[0, total_length]`
    /// by the caller. Ties at a segment boundary resolve to the later
    /// segment, matching the edge-on-path lookup rule in spec §4.1.
    pub fn segment_for_arc_length(&self, s: f64) -> usize {
        let mut seg = 0;
        for i in 0..self.segment_count() {
            if self.cumulative[i] <= s {
                seg = i;
            } else {
                break;
            }
        }
        seg.min(self.segment_count() - 1)
    }

    /// Inverse of [`LengthIndexedLine::project`]: given an arc length
    /// already clamped to `[0, total_length]`, returns the point and unit
    /// tangent at that position.
    pub fn point_at(&self, s: f64) -> (Point2, Vector2<f64>) {
        let seg = self.segment_for_arc_length(s);
        let (p0, _) = self.segment(seg);
        let t = self.unit_tangent(seg);
        let d0 = self.cumulative[seg];
        (p0 + t * (s - d0), t)
    }
}
