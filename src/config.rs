//! `VehicleStateInitialParameters`: the configuration surface for a fresh
//! particle population (spec §6), built with a fallible constructor and a
//! fluent builder in the style of the pack's `PathConfig`/`PathConfigBuilder`.

use crate::error::{Result, TrackingError};
use nalgebra::SVector;
use serde::{Deserialize, Serialize};

/// Inverse-Wishart priors for the three covariance matrices, plus the
/// particle population's default timestep and random seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleStateInitialParameters {
    pub obs_cov: SVector<f64, 2>,
    pub obs_cov_dof: f64,
    pub on_road_state_cov: SVector<f64, 2>,
    pub on_road_cov_dof: f64,
    pub off_road_state_cov: SVector<f64, 4>,
    pub off_road_cov_dof: f64,
    /// Default `Δt` (seconds) used before a second observation is seen.
    pub initial_obs_freq: f64,
    pub num_particles: usize,
    pub seed: u64,
    /// `true`: initial covariances are each prior's mean. `false`: each is
    /// drawn from its prior (spec §4.8, "prior construction").
    pub deterministic_init: bool,
}

impl VehicleStateInitialParameters {
    pub fn builder() -> VehicleStateInitialParametersBuilder {
        VehicleStateInitialParametersBuilder::default()
    }
}

impl Default for VehicleStateInitialParameters {
    /// ```
    /// use pathtrack_core::config::VehicleStateInitialParameters;
    /// let config = VehicleStateInitialParameters::default();
    /// assert_eq!(config.num_particles, 100);
    /// ```
    fn default() -> Self {
        VehicleStateInitialParameters::builder()
            .obs_cov(SVector::<f64, 2>::new(10.0, 10.0), 3.0)
            .on_road_state_cov(SVector::<f64, 2>::new(1.0, 1.0), 3.0)
            .off_road_state_cov(SVector::<f64, 4>::new(1.0, 1.0, 1.0, 1.0), 5.0)
            .initial_obs_freq(1.0)
            .num_particles(100)
            .seed(0)
            .build()
            .expect("default configuration satisfies its own dof floors")
    }
}

#[derive(Debug, Clone, Default)]
pub struct VehicleStateInitialParametersBuilder {
    obs_cov: Option<(SVector<f64, 2>, f64)>,
    on_road_state_cov: Option<(SVector<f64, 2>, f64)>,
    off_road_state_cov: Option<(SVector<f64, 4>, f64)>,
    initial_obs_freq: f64,
    num_particles: usize,
    seed: u64,
    deterministic_init: bool,
}

impl VehicleStateInitialParametersBuilder {
    pub fn obs_cov(mut self, scale: SVector<f64, 2>, dof: f64) -> Self {
        self.obs_cov = Some((scale, dof));
        self
    }

    pub fn on_road_state_cov(mut self, scale: SVector<f64, 2>, dof: f64) -> Self {
        self.on_road_state_cov = Some((scale, dof));
        self
    }

    pub fn off_road_state_cov(mut self, scale: SVector<f64, 4>, dof: f64) -> Self {
        self.off_road_state_cov = Some((scale, dof));
        self
    }

    pub fn initial_obs_freq(mut self, seconds: f64) -> Self {
        self.initial_obs_freq = seconds;
        self
    }

    pub fn num_particles(mut self, n: usize) -> Self {
        self.num_particles = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn deterministic_init(mut self, deterministic: bool) -> Self {
        self.deterministic_init = deterministic;
        self
    }

    /// Validates the degrees-of-freedom floors from spec §6
    /// (`obsCovDof >= 3`, `onRoadCovDof >= 3`, `offRoadCovDof >= 5`) and the
    /// other required fields.
    pub fn build(self) -> Result<VehicleStateInitialParameters> {
        let (obs_cov, obs_cov_dof) = self
            .obs_cov
            .ok_or(TrackingError::InvalidConfiguration("obs_cov is required"))?;
        let (on_road_state_cov, on_road_cov_dof) = self
            .on_road_state_cov
            .ok_or(TrackingError::InvalidConfiguration("on_road_state_cov is required"))?;
        let (off_road_state_cov, off_road_cov_dof) = self
            .off_road_state_cov
            .ok_or(TrackingError::InvalidConfiguration("off_road_state_cov is required"))?;

        if obs_cov_dof < 3.0 {
            return Err(TrackingError::InvalidConfiguration("obs_cov_dof must be >= 3"));
        }
        if on_road_cov_dof < 3.0 {
            return Err(TrackingError::InvalidConfiguration(
                "on_road_cov_dof must be >= 3",
            ));
        }
        if off_road_cov_dof < 5.0 {
            return Err(TrackingError::InvalidConfiguration(
                "off_road_cov_dof must be >= 5",
            ));
        }
        if self.num_particles == 0 {
            return Err(TrackingError::InvalidConfiguration(
                "num_particles must be positive",
            ));
        }
        if self.initial_obs_freq <= 0.0 {
            return Err(TrackingError::InvalidConfiguration(
                "initial_obs_freq must be positive",
            ));
        }

        Ok(VehicleStateInitialParameters {
            obs_cov,
            obs_cov_dof,
            on_road_state_cov,
            on_road_cov_dof,
            off_road_state_cov,
            off_road_cov_dof,
            initial_obs_freq: self.initial_obs_freq,
            num_particles: self.num_particles,
            seed: self.seed,
            deterministic_init: self.deterministic_init,
        })
    }
}
