//! The on/off-edge transition distribution (spec §4.6): a categorical
//! distribution over `{null edge} ∪ {outgoing edges of the current edge}`,
//! with the off-road/on-road split governed by Bernoulli sufficient
//! statistics and a uniform-by-default distribution over on-road outgoing
//! edges.

use crate::graph::InferredEdge;
use rand::Rng;

/// Bernoulli sufficient statistics for one binary event, stored as
/// pseudo-counts so an update is a single increment (mirrors the
/// inverse-Wishart sufficient-statistics style used in `wishart.rs`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BernoulliStatistics {
    on_road_count: f64,
    off_road_count: f64,
}

impl BernoulliStatistics {
    pub fn new(on_road_prior: f64, off_road_prior: f64) -> Self {
        BernoulliStatistics {
            on_road_count: on_road_prior,
            off_road_count: off_road_prior,
        }
    }

    pub fn on_road_probability(&self) -> f64 {
        self.on_road_count / (self.on_road_count + self.off_road_count)
    }

    pub fn observe(&mut self, went_on_road: bool) {
        if went_on_road {
            self.on_road_count += 1.0;
        } else {
            self.off_road_count += 1.0;
        }
    }
}

impl Default for BernoulliStatistics {
    fn default() -> Self {
        BernoulliStatistics::new(1.0, 1.0)
    }
}

/// A categorical distribution over the null edge and a current edge's
/// outgoing edges. `candidates` is mutable: the updater's edge walk removes
/// entries as it proceeds (spec §4.6, "mutations are local to the sampling
/// step and do not leak back to the particle" — callers clone before
/// mutating if they need to preserve the original).
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeTransitionDistribution {
    stats: BernoulliStatistics,
    candidates: Vec<InferredEdge>,
    force_on_road: bool,
}

impl EdgeTransitionDistribution {
    pub fn new(stats: BernoulliStatistics, outgoing: Vec<InferredEdge>) -> Self {
        EdgeTransitionDistribution {
            stats,
            candidates: outgoing,
            force_on_road: false,
        }
    }

    pub fn stats(&self) -> BernoulliStatistics {
        self.stats
    }

    /// Removes the null edge from the domain (spec §4.5 step 2: once a
    /// particle is on-road partway through the walk, it stays on-road).
    pub fn remove_null_option(&mut self) {
        self.force_on_road = true;
    }

    /// Draws one edge: the null edge with probability `1 -
    /// on_road_probability()` (unless forced on-road), otherwise uniformly
    /// among the remaining on-road candidates.
    pub fn sample(&self, rng: &mut impl Rng) -> InferredEdge {
        if !self.force_on_road && rng.gen::<f64>() >= self.stats.on_road_probability() {
            return InferredEdge::null();
        }
        if self.candidates.is_empty() {
            return InferredEdge::null();
        }
        let idx = rng.gen_range(0..self.candidates.len());
        self.candidates[idx].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeId;
    use crate::geometry::Point2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn edge(id: u64) -> InferredEdge {
        InferredEdge::new(EdgeId(id), vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)], false)
    }

    #[test]
    fn forced_on_road_never_samples_null() {
        let mut dist = EdgeTransitionDistribution::new(
            BernoulliStatistics::new(0.01, 100.0),
            vec![edge(1)],
        );
        dist.remove_null_option();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            assert!(!dist.sample(&mut rng).is_null());
        }
    }

    #[test]
    fn empty_candidates_falls_back_to_null() {
        let mut dist = EdgeTransitionDistribution::new(BernoulliStatistics::new(1.0, 1.0), vec![]);
        dist.remove_null_option();
        let mut rng = StdRng::seed_from_u64(2);
        assert!(dist.sample(&mut rng).is_null());
    }
}
