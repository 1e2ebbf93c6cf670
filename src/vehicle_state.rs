//! `VehicleState`: one particle's bundle of observation, path-state belief,
//! movement filter, on/off-edge transition distribution, and a one-deep
//! parent link (spec §3).

use crate::belief::PathStateBelief;
use crate::filter::RoadTrackingFilter;
use crate::observation::GpsObservation;
use crate::transition::EdgeTransitionDistribution;

/// A stable identifier for a particle, assigned by the updater (Design
/// Notes: "an explicit `parent: Option<ParticleId>`... particles live in an
/// arena indexed by id"). Two different generations of the same logical
/// particle get different ids; `parent` is how a child finds its immediate
/// predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleId(pub u64);

/// One particle in the population: the observation it was last updated
/// against, its path-state belief, its own Kalman/covariance-learning
/// filter, its on/off-edge transition statistics, and a pointer to the
/// parent it was cloned-and-updated from.
///
/// `parent` only ever points one generation back — there is no field here
/// that could hold a grandparent, so "parent-state pointer chains retained
/// only one deep" (spec §3) holds by construction rather than by a runtime
/// check.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub id: ParticleId,
    pub observation: GpsObservation,
    pub belief: PathStateBelief,
    pub filter: RoadTrackingFilter,
    pub transition: EdgeTransitionDistribution,
    pub parent: Option<ParticleId>,
}

impl VehicleState {
    pub fn new(
        id: ParticleId,
        observation: GpsObservation,
        belief: PathStateBelief,
        filter: RoadTrackingFilter,
        transition: EdgeTransitionDistribution,
        parent: Option<ParticleId>,
    ) -> Self {
        VehicleState {
            id,
            observation,
            belief,
            filter,
            transition,
            parent,
        }
    }
}
