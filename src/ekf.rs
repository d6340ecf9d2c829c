//! Extended Kalman Filter for SLAM: a growing state vector (pose +
//! landmarks), covariance maintenance, data association, and landmark
//! insertion.
//!
//! Follows the sparse EKF-SLAM update equations (turn-then-move motion
//! model, range/bearing measurement model with heterogeneous landmark
//! types gated by Mahalanobis distance).

use crate::landmark::{Landmark, LandmarkKind};
use nalgebra::{DMatrix, DVector, Matrix2, Matrix2x3, Matrix3};

/// Tunable parameters of the filter, matching the `ekf_*` configuration
/// options.
#[derive(Debug, Clone, Copy)]
pub struct EkfParams {
    pub initial_uncertainty: f64,
    pub odometry_noise: f64,
    pub range_noise: f64,
    pub bearing_noise: f64,
    pub innovation_lambda: f64,
    pub landmark_threshold: u32,
}

impl Default for EkfParams {
    fn default() -> Self {
        Self {
            initial_uncertainty: 0.95,
            odometry_noise: 0.05,
            range_noise: 0.01,
            bearing_noise: 1f64.to_radians(),
            innovation_lambda: 1.0,
            landmark_threshold: 5,
        }
    }
}

/// Index into the state vector of the start of landmark `i`'s (x, y) pair.
fn state_index(landmark_index: usize) -> usize {
    3 + (2 * landmark_index)
}

/// An Extended Kalman Filter with a growing state vector, one (x, y) pair
/// per landmark appended after the 3-entry pose prefix.
pub struct Ekf {
    state: DVector<f64>,
    covariance: DMatrix<f64>,
    kinds: Vec<LandmarkKind>,
    counts: Vec<u32>,
    params: EkfParams,
}

impl Ekf {
    pub fn new(params: EkfParams) -> Self {
        Self {
            state: DVector::zeros(3),
            covariance: DMatrix::identity(3, 3) * params.initial_uncertainty,
            kinds: Vec::new(),
            counts: Vec::new(),
            params,
        }
    }

    /// Current pose estimate.
    pub fn pose(&self) -> (f64, f64, f64) {
        (self.state[0], self.state[1], self.state[2])
    }

    pub fn landmark_count(&self) -> usize {
        self.kinds.len()
    }

    /// The stored position and kind of landmark `index`.
    pub fn landmark(&self, index: usize) -> (f64, f64, LandmarkKind) {
        let i = state_index(index);
        (self.state[i], self.state[i + 1], self.kinds[index])
    }

    /// Sighting counter for landmark `index`.
    pub fn landmark_count_seen(&self, index: usize) -> u32 {
        self.counts[index]
    }

    pub fn state(&self) -> &DVector<f64> {
        &self.state
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Advances the filter by one control (turn `delta_theta`, then move
    /// `odometry`) and incorporates the given landmark observations
    /// (world-frame `(x, y, kind)` triples, as produced by the extractors).
    pub fn update(&mut self, delta_theta: f64, odometry: f64, observed: &[Landmark]) {
        self.predict(delta_theta, odometry);

        let (associated, new_landmarks) = self.associate(observed);
        self.correct(&associated);
        self.insert_landmarks(&new_landmarks, odometry);

        self.assert_invariants();
    }

    fn predict(&mut self, delta_theta: f64, odometry: f64) {
        let theta = self.state[2] + delta_theta;
        self.state[0] += odometry * theta.cos();
        self.state[1] += odometry * theta.sin();
        self.state[2] = theta;

        let f = Matrix3::new(
            1.0, 0.0, -odometry * theta.cos(),
            0.0, 1.0, odometry * theta.sin(),
            0.0, 0.0, 1.0,
        );

        let v = nalgebra::Vector3::new(odometry * theta.cos(), odometry * theta.sin(), delta_theta);
        let q = &v * v.transpose() * self.params.odometry_noise;

        let p_rr = self.covariance.fixed_view::<3, 3>(0, 0);
        let new_p_rr = (f * p_rr * f.transpose()) + q;
        self.covariance.fixed_view_mut::<3, 3>(0, 0).copy_from(&new_p_rr);
    }

    /// Associates each observation with the nearest same-kind existing
    /// landmark whose innovation passes the Mahalanobis gate. Returns
    /// `(matched, unmatched)` where `matched` holds `(observation, index)`.
    fn associate(&self, observed: &[Landmark]) -> (Vec<(Landmark, usize)>, Vec<Landmark>) {
        let mut matched = Vec::new();
        let mut unmatched = Vec::new();

        if self.kinds.is_empty() {
            return (matched, observed.to_vec());
        }

        let (pos_x, pos_y, _) = self.pose();

        for &observation in observed {
            let closest = (0..self.kinds.len())
                .filter(|&i| self.kinds[i] == observation.kind)
                .min_by(|&i, &j| {
                    self.landmark_dist(i, observation)
                        .partial_cmp(&self.landmark_dist(j, observation))
                        .unwrap()
                });

            let Some(closest_index) = closest else {
                unmatched.push(observation);
                continue;
            };

            let (old_x, old_y, _) = self.landmark(closest_index);
            let r = ((old_x - pos_x).powi(2) + (old_y - pos_y).powi(2)).sqrt();
            let h = self.measurement_jacobian(closest_index);
            let noise = Matrix2::new(r * self.params.range_noise, 0.0, 0.0, self.params.bearing_noise);
            let s = (&h * &self.covariance * h.transpose()) + noise;

            let innovation = nalgebra::Vector2::new(old_x - observation.x, old_y - observation.y);

            match s.try_inverse() {
                Some(s_inv) => {
                    let gate = (innovation.transpose() * s_inv * innovation)[(0, 0)];
                    if gate <= self.params.innovation_lambda {
                        log::trace!(
                            "associated observation ({:.3}, {:.3}) with landmark {closest_index} (gate={gate:.4})",
                            observation.x,
                            observation.y
                        );
                        matched.push((observation, closest_index));
                    } else {
                        log::trace!(
                            "rejected association with landmark {closest_index}: gate={gate:.4} > lambda={:.4}",
                            self.params.innovation_lambda
                        );
                        unmatched.push(observation);
                    }
                }
                None => {
                    log::debug!("singular innovation covariance for landmark {closest_index}, treating observation as new");
                    unmatched.push(observation);
                }
            }
        }

        (matched, unmatched)
    }

    fn landmark_dist(&self, index: usize, observation: Landmark) -> f64 {
        let (lx, ly, kind) = self.landmark(index);
        if kind != observation.kind {
            return f64::INFINITY;
        }
        ((lx - observation.x).powi(2) + (ly - observation.y).powi(2)).sqrt()
    }

    /// Jacobian of the range/bearing measurement model with respect to the
    /// full state, nonzero only in the pose columns and the matched
    /// landmark's two columns.
    fn measurement_jacobian(&self, landmark_index: usize) -> nalgebra::DMatrix<f64> {
        let (x, y, _) = self.pose();
        let (lx, ly, _) = self.landmark(landmark_index);
        let r = ((x - lx).powi(2) + (y - ly).powi(2)).sqrt();

        let mut h = DMatrix::zeros(2, self.state.len());
        h[(0, 0)] = (x - lx) / r;
        h[(0, 1)] = (y - ly) / r;
        h[(0, 2)] = 0.0;
        h[(1, 0)] = (ly - y) / (r * r);
        h[(1, 1)] = (lx - x) / (r * r);
        h[(1, 2)] = -1.0;

        let li = state_index(landmark_index);
        h[(0, li)] = -h[(0, 0)];
        h[(0, li + 1)] = -h[(0, 1)];
        h[(1, li)] = -h[(1, 0)];
        h[(1, li + 1)] = -h[(1, 1)];

        h
    }

    /// Applies the Kalman correction for every matched landmark that has
    /// been seen more than `landmark_threshold` times.
    ///
    /// The covariance is intentionally left unmodified by this step (no
    /// `Sigma <- (I - KH) Sigma`), matching the reference implementation;
    /// uncertainty instead tightens through the next prediction's motion
    /// noise term. See DESIGN.md for the rationale.
    fn correct(&mut self, matched: &[(Landmark, usize)]) {
        for &(observation, index) in matched {
            self.counts[index] += 1;
            if self.counts[index] <= self.params.landmark_threshold {
                continue;
            }

            let (pos_x, pos_y, pos_theta) = self.pose();
            let (old_x, old_y, _) = self.landmark(index);
            let r = ((old_x - pos_x).powi(2) + (old_y - pos_y).powi(2)).sqrt();

            let h = self.measurement_jacobian(index);
            let noise = Matrix2::new(r * self.params.range_noise, 0.0, 0.0, self.params.bearing_noise);
            let s = (&h * &self.covariance * h.transpose()) + noise;

            let Some(s_inv) = s.try_inverse() else {
                continue;
            };

            let kalman_gain = &self.covariance * h.transpose() * s_inv;

            let new_range = ((observation.x - pos_x).powi(2) + (observation.y - pos_y).powi(2)).sqrt();
            let new_bearing = (observation.y - pos_y).atan2(observation.x - pos_x) - pos_theta;
            let old_range = r;
            let old_bearing = (old_y - pos_y).atan2(old_x - pos_x) - pos_theta;

            let delta = nalgebra::Vector2::new(new_range - old_range, new_bearing - old_bearing);
            self.state += kalman_gain * delta;
        }
    }

    /// Grows the state vector and covariance once for the whole batch of
    /// `new_landmarks`, then fills each landmark's self/cross covariance
    /// blocks per the EKF-SLAM insertion formulas.
    fn insert_landmarks(&mut self, new_landmarks: &[Landmark], odometry: f64) {
        if new_landmarks.is_empty() {
            return;
        }

        let old_len = self.state.len();
        let new_len = old_len + (2 * new_landmarks.len());

        let state = std::mem::replace(&mut self.state, DVector::zeros(0));
        self.state = state.resize_vertically(new_len, 0.0);

        let covariance = std::mem::replace(&mut self.covariance, DMatrix::zeros(0, 0));
        self.covariance = covariance.resize(new_len, new_len, 0.0);

        let (pos_x, pos_y, theta) = self.pose();

        let j_xs = Matrix2x3::new(1.0, 0.0, -odometry * theta.sin(), 0.0, 1.0, odometry * theta.cos());
        let j_m = Matrix2::new(theta.cos(), -odometry * theta.sin(), theta.sin(), odometry * theta.cos());

        let mut next_index = old_len;

        for &landmark in new_landmarks {
            self.kinds.push(landmark.kind);
            self.counts.push(1);
            self.state[next_index] = landmark.x;
            self.state[next_index + 1] = landmark.y;

            let range_var = ((landmark.x - pos_x).powi(2) + (landmark.y - pos_y).powi(2)).sqrt()
                * self.params.range_noise;
            let noise = Matrix2::new(range_var, 0.0, 0.0, self.params.bearing_noise);

            let p_rr = self.covariance.fixed_view::<3, 3>(0, 0);
            let p_ll = (j_xs * p_rr * j_xs.transpose()) + (j_m * noise * j_m.transpose());
            self.covariance
                .view_mut((next_index, next_index), (2, 2))
                .copy_from(&p_ll);

            let p_rx = self.covariance.view((0, 0), (3, next_index));
            let p_lx = j_xs * p_rx;
            self.covariance.view_mut((next_index, 0), (2, next_index)).copy_from(&p_lx);
            self.covariance
                .view_mut((0, next_index), (next_index, 2))
                .copy_from(&p_lx.transpose());

            next_index += 2;
        }
    }

    fn assert_invariants(&self) {
        debug_assert_eq!(self.kinds.len(), self.counts.len());
        let expected_size = state_index(self.kinds.len());
        debug_assert_eq!(self.state.len(), expected_size);
        debug_assert_eq!(self.covariance.nrows(), expected_size);
        debug_assert_eq!(self.covariance.ncols(), expected_size);

        for i in 0..self.covariance.nrows() {
            for j in 0..self.covariance.ncols() {
                debug_assert!(
                    (self.covariance[(i, j)] - self.covariance[(j, i)]).abs() < 1e-6,
                    "covariance must stay symmetric"
                );
            }
        }
    }
}
