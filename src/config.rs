//! The recognized-option configuration surface. Replaces the original's
//! stringly-keyed option dictionary with a single typed struct; unknown
//! keys in a deserialized document are ignored rather than rejected.

use crate::ekf::EkfParams;
use crate::landmark_extraction::RansacConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub collision_map_scale: u32,
    pub collision_map_max_dist: u32,

    pub spike_threshold: f64,

    pub ransac_max_tries: u32,
    pub ransac_samples: usize,
    pub ransac_range: f64,
    pub ransac_error: f64,
    pub ransac_consensus: usize,

    pub ekf_initial_uncertainty: f64,
    pub ekf_odometry_noise: f64,
    pub ekf_range_noise: f64,
    pub ekf_bearing_noise: f64,
    pub ekf_innovation_lambda: f64,
    pub ekf_landmark_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collision_map_scale: 5,
            collision_map_max_dist: 100,

            spike_threshold: 0.5,

            ransac_max_tries: 500,
            ransac_samples: 5,
            ransac_range: 10f64.to_radians(),
            ransac_error: 0.5,
            ransac_consensus: 15,

            ekf_initial_uncertainty: 0.95,
            ekf_odometry_noise: 0.05,
            ekf_range_noise: 0.01,
            ekf_bearing_noise: 1f64.to_radians(),
            ekf_innovation_lambda: 1.0,
            ekf_landmark_threshold: 5,
        }
    }
}

impl Config {
    pub fn ekf_params(&self) -> EkfParams {
        EkfParams {
            initial_uncertainty: self.ekf_initial_uncertainty,
            odometry_noise: self.ekf_odometry_noise,
            range_noise: self.ekf_range_noise,
            bearing_noise: self.ekf_bearing_noise,
            innovation_lambda: self.ekf_innovation_lambda,
            landmark_threshold: self.ekf_landmark_threshold,
        }
    }

    pub fn ransac_config(&self) -> RansacConfig {
        RansacConfig {
            max_tries: self.ransac_max_tries,
            samples: self.ransac_samples,
            range: self.ransac_range,
            error: self.ransac_error,
            consensus: self.ransac_consensus,
        }
    }
}
