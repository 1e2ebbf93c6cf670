//! `BootstrapFilterUpdater`: the per-observation particle step (spec §4.5)
//! -- predict-and-perturb, edge walk, place-mean, parent link -- plus
//! initialization from a first observation (spec §4.5, "Initialization")
//! and the log-likelihood weighting used by resampling.

use crate::belief::{self, PathStateBelief, RawMotionState};
use crate::config::VehicleStateInitialParameters;
use crate::error::{Result, TrackingError};
use crate::filter::{self, RoadTrackingFilter};
use crate::geometry::Point2;
use crate::graph::{InferenceGraph, InferredEdge};
use crate::linalg;
use crate::motion::{GaussianState, GroundModel, RoadModel};
use crate::observation::{self, GpsObservation};
use crate::path::{Path, PathEdge};
use crate::transition::{BernoulliStatistics, EdgeTransitionDistribution};
use crate::vehicle_state::{ParticleId, VehicleState};
use nalgebra::{SMatrix, SVector};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Upper bound on the arc length carried by a single `PathEdge` sampled
/// during the edge walk (spec §4.7). Owned by the updater, the same way
/// `EDGE_LENGTH_ERROR_TOLERANCE` is owned by the motion estimator in
/// `path.rs` -- neither is part of `VehicleStateInitialParameters` (spec
/// §6's enumerated options don't list it).
pub const MAX_PATH_EDGE_SEGMENT_DISTANCE: f64 = 50.0;

/// Variance assigned to the unknown-velocity component of a freshly
/// initialized candidate, before any observation has constrained it.
const INITIAL_VELOCITY_VARIANCE: f64 = 100.0;

fn lift_ground_covariance(obs_cov: &SMatrix<f64, 2, 2>, velocity_variance: f64) -> SMatrix<f64, 4, 4> {
    let mut m = SMatrix::<f64, 4, 4>::zeros();
    m[(0, 0)] = obs_cov[(0, 0)];
    m[(0, 2)] = obs_cov[(0, 1)];
    m[(2, 0)] = obs_cov[(1, 0)];
    m[(2, 2)] = obs_cov[(1, 1)];
    m[(1, 1)] = velocity_variance;
    m[(3, 3)] = velocity_variance;
    m
}

/// Evaluates the log-density of a belief's ground-projected Gaussian at a 2D
/// ground observation -- the quantity both `computeLogLikelihood` (spec
/// §4.5) and the initialization mixture weights (spec §4.5,
/// "Initialization") need.
fn candidate_log_likelihood(
    belief: &PathStateBelief,
    obs_cov: &SMatrix<f64, 2, 2>,
    obs_point: Point2,
) -> Result<f64> {
    let ground = belief.ground_state()?;
    let h = GroundModel::observation();
    let mean = h * ground.estimate;
    let cov = h * ground.error * h.transpose() + obs_cov;
    linalg::log_gaussian_density(&SVector::<f64, 2>::new(obs_point.x, obs_point.y), &mean, &cov)
}

/// Spec §4.5: `computeLogLikelihood(particle, obs)`.
pub fn compute_log_likelihood(particle: &VehicleState, obs: &GpsObservation) -> Result<f64> {
    candidate_log_likelihood(&particle.belief, &particle.filter.obs_cov, obs.projected_point())
}

/// Spec §4.5 step 1: predicts in native coordinates, then perturbs the
/// predicted mean with a zero-mean draw from the matching process
/// covariance (not a draw from the full predictive Gaussian -- the
/// predictive covariance stays attached to the raw state for later
/// likelihood evaluation).
fn predict_and_perturb(
    belief: &PathStateBelief,
    dt: f64,
    filter: &RoadTrackingFilter,
    rng: &mut impl Rng,
) -> Result<RawMotionState> {
    let predictive = belief::predict(belief, dt, &filter.q_r, &filter.q_g);
    match predictive {
        RawMotionState::Road(mut state) => {
            let q = RoadModel::process_covariance(dt, &filter.q_r);
            let noise = filter::sample_gaussian(&SVector::<f64, 2>::zeros(), &q, rng)?;
            state.estimate += noise;
            Ok(RawMotionState::Road(state))
        }
        RawMotionState::Ground(mut state) => {
            let q = GroundModel::process_covariance(dt, &filter.q_g);
            let noise = filter::sample_gaussian(&SVector::<f64, 4>::zeros(), &q, rng)?;
            state.estimate += noise;
            Ok(RawMotionState::Ground(state))
        }
    }
}

/// The on-road domain for the transition distribution's next draw: outgoing
/// edges of `current` when on-road, or a nearby-edge query seeded from the
/// raw predicted ground position when off-road (the null edge has no
/// adjacency of its own -- spec §6, "Empty for the null edge").
fn candidate_edges_from<G: InferenceGraph>(
    graph: &G,
    current: &InferredEdge,
    raw: &RawMotionState,
) -> Vec<InferredEdge> {
    if current.is_null() {
        match raw {
            RawMotionState::Ground(state) => {
                graph.nearby_edges(state).into_iter().map(|s| s.edge).collect()
            }
            // An on-road raw state can only arise from an on-road prior
            // (belief::place_on_path's invariant), so `current` cannot be
            // null here in practice; treated as "no candidates" rather than
            // reached.
            RawMotionState::Road(_) => Vec::new(),
        }
    } else {
        graph.outgoing_edges(current)
    }
}

/// Spec §4.5 step 2: walks forward from `start_edge`, sampling one edge at a
/// time from the on/off-edge transition distribution until the walk hits
/// the null edge (only possible on the first draw) or repeats an edge.
fn edge_walk<G: InferenceGraph>(
    graph: &G,
    stats: BernoulliStatistics,
    start_edge: &InferredEdge,
    raw: &RawMotionState,
    rng: &mut impl Rng,
) -> Vec<InferredEdge> {
    let started_on_road = !start_edge.is_null();
    let mut walked = Vec::new();
    let mut current = start_edge.clone();
    let mut first_draw = true;

    loop {
        let candidates = candidate_edges_from(graph, &current, raw);
        let mut distribution = EdgeTransitionDistribution::new(stats, candidates);
        if !first_draw || started_on_road {
            distribution.remove_null_option();
        }
        let sampled = distribution.sample(rng);
        if sampled.is_null() {
            break;
        }
        if !first_draw && walked.last() == Some(&sampled) {
            break;
        }
        walked.push(sampled.clone());
        current = sampled;
        first_draw = false;
    }
    walked
}

/// Builds a forward (`is_backward = false`) `Path` from the edges sampled by
/// [`edge_walk`], segmenting each to [`MAX_PATH_EDGE_SEGMENT_DISTANCE`] (spec
/// §4.7). An empty edge list produces the null path.
fn build_path(edges: Vec<InferredEdge>) -> Path {
    let mut cursor = 0.0;
    let mut path_edges = Vec::new();
    for edge in edges {
        let placed = PathEdge::new(edge, cursor, false);
        cursor += placed.length();
        path_edges.extend(placed.segment(MAX_PATH_EDGE_SEGMENT_DISTANCE));
    }
    Path::from_edges(path_edges)
}

/// The domain of on-road outgoing edges (or a nearby-edge seed off-road) a
/// particle carries forward for its *next* update's edge walk.
fn outgoing_for<G: InferenceGraph>(graph: &G, belief: &PathStateBelief) -> Result<Vec<InferredEdge>> {
    let edge = belief.edge();
    if edge.is_null() {
        Ok(graph
            .nearby_edges(&belief.ground_state()?)
            .into_iter()
            .map(|s| s.edge)
            .collect())
    } else {
        Ok(graph.outgoing_edges(&edge))
    }
}

/// Runs one particle's update against `observation` (spec §4.5 steps 1-4),
/// returning the new state and its (unnormalized) log-likelihood weight.
/// `TrackingError::UnrepresentableProjection` is the only error a caller is
/// expected to treat as "drop this particle" (spec §7); everything else is
/// a contract violation.
pub fn update_particle<G: InferenceGraph>(
    parent: &VehicleState,
    id: ParticleId,
    observation: GpsObservation,
    graph: &G,
    config: &VehicleStateInitialParameters,
    rng: &mut impl Rng,
) -> Result<(VehicleState, f64)> {
    let dt = observation.dt_seconds(config.initial_obs_freq);
    let mut filter = parent.filter.clone();

    filter.learn(&parent.belief, dt, observation.projected_point(), rng)?;

    let raw = predict_and_perturb(&parent.belief, dt, &filter, rng)?;
    let start_edge = parent.belief.edge();
    let sampled_edges = edge_walk(graph, parent.transition.stats(), &start_edge, &raw, rng);
    let new_path = build_path(sampled_edges);
    let belief = belief::place_on_path(&raw, &new_path)?;

    let log_likelihood = candidate_log_likelihood(&belief, &filter.obs_cov, observation.projected_point())?;
    let transition = EdgeTransitionDistribution::new(parent.transition.stats(), outgoing_for(graph, &belief)?);

    let state = VehicleState::new(id, observation, belief, filter, transition, Some(parent.id));
    Ok((state, log_likelihood))
}

/// Spec §4.5, "Initialization": builds one off-road candidate and one
/// candidate per nearby edge, weights each by `log p(edge | transition
/// prior) + log p(obs | candidate)`, and draws `config.num_particles`
/// particles from that mixture with replacement.
pub fn initialize<G: InferenceGraph>(
    graph: &G,
    observation: &GpsObservation,
    config: &VehicleStateInitialParameters,
    next_id: &mut u64,
    rng: &mut impl Rng,
) -> Result<Vec<VehicleState>> {
    let obs_point = observation.projected_point();
    let obs_cov_seed = SMatrix::<f64, 2, 2>::from_diagonal(&config.obs_cov);
    let stats = BernoulliStatistics::default();

    struct Candidate {
        log_weight: f64,
        belief: PathStateBelief,
    }
    let mut candidates = Vec::new();

    let ground_mean = SVector::<f64, 4>::new(obs_point.x, 0.0, obs_point.y, 0.0);
    let ground_cov = lift_ground_covariance(&obs_cov_seed, INITIAL_VELOCITY_VARIANCE);
    let null_state = GaussianState::<4>::new(ground_mean, ground_cov);
    let null_belief = PathStateBelief::off_road(null_state.clone());
    let null_loglik = candidate_log_likelihood(&null_belief, &obs_cov_seed, obs_point)?;
    candidates.push(Candidate {
        log_weight: (1.0 - stats.on_road_probability()).ln() + null_loglik,
        belief: null_belief,
    });

    let segments = graph.nearby_edges(&null_state);
    let segment_count = (segments.len() as f64).max(1.0);
    for segment in &segments {
        let placed = PathEdge::new(segment.edge.clone(), 0.0, false);
        let path = Path::from_edges(vec![placed.clone()]);
        let projected = match crate::path::ground_to_road(&null_state, &placed, true) {
            Ok(mut road) => {
                road.estimate[1] = 0.0;
                road.error[(1, 1)] = INITIAL_VELOCITY_VARIANCE;
                road.estimate[0] = path.clamp_to_path(road.estimate[0]);
                road
            }
            Err(_) => continue,
        };
        let belief = PathStateBelief::on_road(path, projected);
        let loglik = candidate_log_likelihood(&belief, &obs_cov_seed, obs_point)?;
        candidates.push(Candidate {
            log_weight: stats.on_road_probability().ln() - segment_count.ln() + loglik,
            belief,
        });
    }

    let max_log_weight = candidates
        .iter()
        .map(|c| c.log_weight)
        .fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = candidates
        .iter()
        .map(|c| (c.log_weight - max_log_weight).exp())
        .collect();
    let distribution = WeightedIndex::new(weights.iter().copied())
        .map_err(|_| TrackingError::NumericalError("degenerate initialization mixture"))?;

    let mut states = Vec::with_capacity(config.num_particles);
    for _ in 0..config.num_particles {
        let idx = distribution.sample(rng);
        let belief = candidates[idx].belief.clone();
        let filter = RoadTrackingFilter::initialize(config, rng)?;
        let transition = EdgeTransitionDistribution::new(stats, outgoing_for(graph, &belief)?);
        let id = ParticleId(*next_id);
        *next_id += 1;
        states.push(VehicleState::new(
            id,
            observation.clone(),
            belief,
            filter,
            transition,
            None,
        ));
    }
    Ok(states)
}

/// Drives the full particle population across one observation: per-particle
/// update, diagnostic logging against an optional `TrueObservation`, and
/// resampling `config.num_particles` draws from the likelihood-weighted
/// population (spec §4.5, §6, §7).
///
/// `step` takes a single `&mut impl Rng` and updates particles sequentially;
/// nothing here spawns threads. A caller that parallelizes the per-particle
/// loop in [`update_particle`] across its own thread pool MUST give each
/// particle its own RNG (e.g. via `SeedableRng::from_rng` seeded off one
/// shared source before fanning out) rather than sharing one across threads —
/// sharing a generator across concurrent particle updates without
/// synchronization is a contract violation (spec §5).
pub struct BootstrapFilterUpdater {
    config: VehicleStateInitialParameters,
    next_id: u64,
}

impl BootstrapFilterUpdater {
    pub fn new(config: VehicleStateInitialParameters) -> Self {
        BootstrapFilterUpdater { config, next_id: 0 }
    }

    pub fn initialize<G: InferenceGraph>(
        &mut self,
        graph: &G,
        observation: &GpsObservation,
        rng: &mut impl Rng,
    ) -> Result<Vec<VehicleState>> {
        initialize(graph, observation, &self.config, &mut self.next_id, rng)
    }

    /// One observation step across the whole population. A particle whose
    /// predicted path cannot represent the observation within tolerance is
    /// dropped (spec §7); any other error fails the whole step fast.
    pub fn step<G: InferenceGraph>(
        &mut self,
        particles: &[VehicleState],
        observation: GpsObservation,
        graph: &G,
        rng: &mut impl Rng,
    ) -> Result<Vec<VehicleState>> {
        let mut weighted = Vec::with_capacity(particles.len());
        for parent in particles {
            let id = ParticleId(self.next_id);
            self.next_id += 1;
            match update_particle(parent, id, observation.clone(), graph, &self.config, rng) {
                Ok(pair) => weighted.push(pair),
                Err(TrackingError::UnrepresentableProjection) => {
                    log::debug!(
                        "particle {:?} discarded: observation unrepresentable on its sampled path",
                        parent.id
                    );
                }
                Err(err) => return Err(err),
            }
        }

        if weighted.is_empty() {
            return Err(TrackingError::NumericalError(
                "no particle survived prediction for this observation",
            ));
        }

        if let Some(truth) = observation.true_observation.as_ref() {
            if let Some((best, _)) = weighted
                .iter()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            {
                observation::check_covariance_diagnostics(&best.filter, truth);
            }
        }

        let max_log_weight = weighted
            .iter()
            .map(|(_, w)| *w)
            .fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = weighted
            .iter()
            .map(|(_, w)| (w - max_log_weight).exp())
            .collect();
        let distribution = WeightedIndex::new(weights.iter().copied())
            .map_err(|_| TrackingError::NumericalError("degenerate particle weights"))?;

        Ok((0..self.config.num_particles)
            .map(|_| weighted[distribution.sample(rng)].0.clone())
            .collect())
    }
}
