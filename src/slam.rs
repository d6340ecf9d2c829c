//! The SLAM orchestrator: couples a [`SensingAndControl`] collaborator with
//! the landmark extractors, the [`Ekf`], and the [`CollisionMap`] on each
//! tick.

use crate::collision_map::CollisionMap;
use crate::config::Config;
use crate::ekf::Ekf;
use crate::landmark::{Landmark, LandmarkKind};
use crate::landmark_extraction::{extract_ransac, extract_spike};
use rand::rngs::ThreadRng;
use rand::Rng;

/// The abstract capability for reading the rangefinder and driving the
/// robot. `move_robot` turns by `delta_theta` then advances by `distance`,
/// returning the actual odometry traveled (which may differ from what was
/// commanded). `get_distance_reading` returns `(delta_theta, distance)`
/// pairs; a negative distance means "no return" and is filtered by the
/// extractors, not by this trait.
pub trait SensingAndControl {
    fn move_robot(&mut self, delta_theta: f64, distance: f64) -> f64;
    fn get_distance_reading(&mut self) -> Vec<(f64, f64)>;
}

/// Owns the EKF and collision map, and drives one tick of SLAM given a
/// [`SensingAndControl`] collaborator and a source of randomness for RANSAC.
pub struct Slam<C, R = ThreadRng> {
    control: C,
    ekf: Ekf,
    map: CollisionMap,
    spike_threshold: f64,
    ransac_config: crate::landmark_extraction::RansacConfig,
    rng: R,
}

impl<C: SensingAndControl> Slam<C, ThreadRng> {
    /// Builds a `Slam` using the system thread-local RNG for RANSAC.
    pub fn new(control: C, config: &Config) -> crate::error::Result<Self> {
        Self::with_rng(control, config, rand::rng())
    }
}

impl<C: SensingAndControl, R: Rng> Slam<C, R> {
    /// Builds a `Slam` with an explicit RNG, e.g. a seeded `ChaCha8Rng` for
    /// reproducible tests.
    pub fn with_rng(control: C, config: &Config, rng: R) -> crate::error::Result<Self> {
        let map = CollisionMap::new(config.collision_map_scale, config.collision_map_max_dist)?;
        Ok(Self {
            control,
            ekf: Ekf::new(config.ekf_params()),
            map,
            spike_threshold: config.spike_threshold,
            ransac_config: config.ransac_config(),
            rng,
        })
    }

    /// One tick: move, read, extract, update the EKF, then record the
    /// post-update pose into the collision map.
    pub fn move_observe_and_update(&mut self, delta_theta: f64, distance: f64) {
        let odometry = self.control.move_robot(delta_theta, distance);
        let scan = self.control.get_distance_reading();

        let pose = self.ekf.pose();

        let mut observed: Vec<Landmark> = extract_spike(pose, &scan, self.spike_threshold)
            .into_iter()
            .map(|(x, y)| Landmark::new(x, y, LandmarkKind::Spike))
            .collect();

        observed.extend(
            extract_ransac(pose, &scan, &self.ransac_config, &mut self.rng)
                .into_iter()
                .map(|(x, y)| Landmark::new(x, y, LandmarkKind::Ransac)),
        );

        log::debug!(
            "tick: delta_theta={delta_theta:.4} commanded={distance:.4} odometry={odometry:.4} observed={}",
            observed.len()
        );

        self.ekf.update(delta_theta, odometry, &observed);

        let (x, y, theta) = self.ekf.pose();
        self.map.record_observations(x, y, theta, &scan);
    }

    pub fn get_estimated_position(&self) -> (f64, f64, f64) {
        self.ekf.pose()
    }

    pub fn get_collision_map(&self) -> &CollisionMap {
        &self.map
    }

    pub fn get_ekf(&self) -> &Ekf {
        &self.ekf
    }

    pub fn control(&mut self) -> &mut C {
        &mut self.control
    }
}
