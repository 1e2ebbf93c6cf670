//! End-to-end scenarios exercising the public API across multiple steps,
//! rather than one function in isolation. Mirrors the style of the teacher's
//! `sensor_fusion` integration suite: build a small scene, step it forward,
//! assert on where the estimate ends up.

use nalgebra::{SMatrix, SVector};
use pathtrack_core::belief::{self, PathStateBelief};
use pathtrack_core::config::VehicleStateInitialParameters;
use pathtrack_core::filter::RoadTrackingFilter;
use pathtrack_core::geometry::Point2;
use pathtrack_core::graph::{EdgeId, InferredEdge, StaticGraph};
use pathtrack_core::motion::{GaussianState, RoadModel};
use pathtrack_core::observation::GpsObservation;
use pathtrack_core::path::{Path, PathEdge};
use pathtrack_core::updater;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use std::collections::HashMap;

fn two_edge_forward_path() -> Path {
    let e1 = InferredEdge::new(EdgeId(1), vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)], false);
    let e2 = InferredEdge::new(EdgeId(2), vec![Point2::new(1.0, 0.0), Point2::new(2.0, 0.0)], false);
    Path::from_edges(vec![
        PathEdge::new(e1, 0.0, false),
        PathEdge::new(e2, 1.0, false),
    ])
}

fn two_edge_reverse_path() -> Path {
    let e1 = InferredEdge::new(EdgeId(1), vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)], false);
    let e2 = InferredEdge::new(EdgeId(2), vec![Point2::new(1.0, 0.0), Point2::new(2.0, 0.0)], false);
    Path::from_edges(vec![
        PathEdge::new(e1, 0.0, true),
        PathEdge::new(e2, -1.0, true),
    ])
}

fn sample_zero_mean_noise(cov: &SMatrix<f64, 2, 2>, rng: &mut impl Rng) -> SVector<f64, 2> {
    let l = cov.cholesky().expect("covariance is positive definite").l();
    let z = SVector::<f64, 2>::from_fn(|_, _| StandardNormal.sample(rng));
    l * z
}

/// Spec §8 scenario 1: a constant-velocity vehicle crossing two forward
/// edges should track the observations closely and end up on the second
/// edge, using nothing but the plain predict/place/measure machinery (no
/// particle sampling, no edge walk -- the path is known in advance).
#[test]
fn constant_velocity_tracks_across_a_two_edge_forward_path() {
    let path = two_edge_forward_path();
    let q_r = SMatrix::<f64, 2, 2>::identity() * 1e-4;
    let q_g = SMatrix::<f64, 4, 4>::identity() * 1e-4;
    let obs_cov = SMatrix::<f64, 2, 2>::identity() * 1e-3;

    let mut belief = PathStateBelief::on_road(
        path.clone(),
        GaussianState::<2>::new(
            SVector::<f64, 2>::new(0.1, 1.0),
            SMatrix::<f64, 2, 2>::identity() * 1e-4,
        ),
    );

    let mut x = 0.2;
    while x <= 1.5 + 1e-9 {
        let raw = belief::predict(&belief, 0.1, &q_r, &q_g);
        belief = belief::place_on_path(&raw, &path).unwrap();
        belief = belief::measure(&belief, Point2::new(x, 0.0), &obs_cov).unwrap();
        x += 0.1;
    }

    let ground = belief.ground_state().unwrap();
    assert!((ground.estimate[0] - 1.5).abs() < 0.05);
    assert_eq!(belief.edge().id(), Some(EdgeId(2)));
}

/// Spec §8 scenario 2: the same crossing, but on a path whose edges both
/// run backward (`is_backward = true`), so physical forward motion is
/// signed-distance-decreasing. Exercises the `road_to_ground` velocity
/// inversion directly, since `ground_state()` round-trips through it on
/// every call.
#[test]
fn constant_velocity_tracks_across_a_two_edge_reverse_path() {
    let path = two_edge_reverse_path();
    assert!(path.is_backward());
    for edge in path.edges() {
        assert!(edge.dist_to_start_of_edge <= 0.0);
    }

    let q_r = SMatrix::<f64, 2, 2>::identity() * 1e-4;
    let q_g = SMatrix::<f64, 4, 4>::identity() * 1e-4;
    let obs_cov = SMatrix::<f64, 2, 2>::identity() * 1e-3;

    let mut belief = PathStateBelief::on_road(
        path.clone(),
        GaussianState::<2>::new(
            SVector::<f64, 2>::new(-0.1, -1.0),
            SMatrix::<f64, 2, 2>::identity() * 1e-4,
        ),
    );

    let mut x = 0.2;
    while x <= 1.5 + 1e-9 {
        let raw = belief::predict(&belief, 0.1, &q_r, &q_g);
        belief = belief::place_on_path(&raw, &path).unwrap();
        belief = belief::measure(&belief, Point2::new(x, 0.0), &obs_cov).unwrap();
        x += 0.1;
    }

    let ground = belief.ground_state().unwrap();
    assert!((ground.estimate[0] - 1.5).abs() < 0.05);
    assert!(ground.estimate[1] > 0.0, "vehicle is still moving in +x physically");
    assert_eq!(belief.edge().id(), Some(EdgeId(2)));
}

/// Spec §8 scenario 3: initializing near a road edge should favor on-road
/// candidates over the off-road one once the observation sits close enough
/// to the edge that the tighter on-road covariance outweighs the small
/// residual it costs.
#[test]
fn initialization_favors_on_road_candidates_near_an_edge() {
    let edge = InferredEdge::new(EdgeId(1), vec![Point2::new(0.0, 0.0), Point2::new(10.0, 0.0)], false);
    let graph = StaticGraph::new(vec![edge], HashMap::new());

    let config = VehicleStateInitialParameters::builder()
        .obs_cov(SVector::<f64, 2>::new(0.01, 0.01), 5.0)
        .on_road_state_cov(SVector::<f64, 2>::new(0.01, 0.01), 5.0)
        .off_road_state_cov(SVector::<f64, 4>::new(0.01, 0.01, 0.01, 0.01), 7.0)
        .num_particles(300)
        .initial_obs_freq(1.0)
        .deterministic_init(true)
        .build()
        .unwrap();

    let observation = GpsObservation {
        timestamp_millis: 0,
        x: 5.0,
        y: 0.02,
        previous_timestamp_millis: None,
        true_observation: None,
    };

    let mut rng = StdRng::seed_from_u64(17);
    let mut next_id = 0;
    let particles = updater::initialize(&graph, &observation, &config, &mut next_id, &mut rng).unwrap();

    let on_road_count = particles.iter().filter(|p| p.belief.is_on_road()).count();
    assert!(
        on_road_count * 5 > particles.len() * 2,
        "expected a clear shift toward on-road from the uniform prior, got {on_road_count}/{}",
        particles.len()
    );
}

/// Spec §8 scenario 4: feeding 200 observations generated under a known
/// process covariance should pull the on-road inverse-Wishart posterior's
/// mean toward that true value, starting from a deliberately wrong prior.
#[test]
fn process_covariance_learning_converges_toward_the_true_value() {
    let path = Path::from_edges(vec![PathEdge::new(
        InferredEdge::new(EdgeId(1), vec![Point2::new(0.0, 0.0), Point2::new(1000.0, 0.0)], false),
        0.0,
        false,
    )]);
    let dt = 0.1;
    let true_q_r = SMatrix::<f64, 2, 2>::new(0.01, 0.0, 0.0, 0.04);
    let true_obs_cov = SMatrix::<f64, 2, 2>::identity() * 1e-4;

    let config = VehicleStateInitialParameters::builder()
        .obs_cov(SVector::<f64, 2>::new(1e-4, 1e-4), 10.0)
        .on_road_state_cov(SVector::<f64, 2>::new(1.0, 1.0), 20.0)
        .off_road_state_cov(SVector::<f64, 4>::new(1.0, 1.0, 1.0, 1.0), 8.0)
        .deterministic_init(true)
        .num_particles(1)
        .initial_obs_freq(dt)
        .build()
        .unwrap();

    let mut rng = StdRng::seed_from_u64(123);
    let mut filter = RoadTrackingFilter::initialize(&config, &mut rng).unwrap();

    let mut true_road_state = SVector::<f64, 2>::new(1.0, 2.0);
    let mut belief = PathStateBelief::on_road(
        path.clone(),
        GaussianState::<2>::new(true_road_state, SMatrix::<f64, 2, 2>::identity() * 0.1),
    );

    for _ in 0..200 {
        let g = RoadModel::transition(dt);
        let process_noise = sample_zero_mean_noise(&RoadModel::process_covariance(dt, &true_q_r), &mut rng);
        true_road_state = g * true_road_state + process_noise;

        let obs_noise = sample_zero_mean_noise(&true_obs_cov, &mut rng);
        let obs_point = Point2::new(true_road_state[0] + obs_noise[0], obs_noise[1]);

        filter.learn(&belief, dt, obs_point, &mut rng).unwrap();

        let raw = belief::predict(&belief, dt, &filter.q_r, &filter.q_g);
        belief = belief::place_on_path(&raw, &path).unwrap();
        belief = belief::measure(&belief, obs_point, &filter.obs_cov).unwrap();
    }

    let learned = filter.q_r_prior.mean();
    let relative_error = (learned - true_q_r).norm() / true_q_r.norm();
    assert!(
        relative_error < 0.6,
        "expected the learned process covariance to approach the true value, got {learned:?} (relative error {relative_error:.2})"
    );
}

/// Spec §8 scenario 6: under deterministic on-road dynamics (zero process
/// noise, near-zero observation noise) the retrospective smoothed sample
/// should reproduce the prior mean exactly, since there is nothing left to
/// smooth away.
#[test]
fn smoothed_previous_state_matches_prior_mean_under_deterministic_dynamics() {
    let path = Path::from_edges(vec![PathEdge::new(
        InferredEdge::new(EdgeId(1), vec![Point2::new(0.0, 0.0), Point2::new(20.0, 0.0)], false),
        0.0,
        false,
    )]);
    let config = VehicleStateInitialParameters::builder()
        .obs_cov(SVector::<f64, 2>::new(1.0, 1.0), 10.0)
        .on_road_state_cov(SVector::<f64, 2>::new(1.0, 1.0), 10.0)
        .off_road_state_cov(SVector::<f64, 4>::new(1.0, 1.0, 1.0, 1.0), 20.0)
        .deterministic_init(true)
        .build()
        .unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    let mut filter = RoadTrackingFilter::initialize(&config, &mut rng).unwrap();
    filter.q_r = SMatrix::<f64, 2, 2>::zeros();
    filter.obs_cov = SMatrix::<f64, 2, 2>::identity() * 1e-12;

    let prior = PathStateBelief::on_road(
        path,
        GaussianState::<2>::new(
            SVector::<f64, 2>::new(5.0, 2.0),
            SMatrix::<f64, 2, 2>::identity() * 1e-9,
        ),
    );
    let smoothed = filter
        .sample_smoothed_previous(&prior, 1.0, Point2::new(7.0, 0.0), &mut rng)
        .unwrap();
    if let PathStateBelief::OnRoad { state, .. } = smoothed {
        assert!((state.estimate[0] - 5.0).abs() < 1e-3);
        assert!((state.estimate[1] - 2.0).abs() < 1e-3);
    } else {
        panic!("expected an on-road smoothed sample");
    }
}
