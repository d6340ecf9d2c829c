//! Landmark extraction over a polar range scan: the spike detector and the
//! RANSAC line detector.

use crate::geometry::{closest_point, linear_regression, min_distance, normalize_angle, normalized_angle_difference};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::f64::consts::PI;

/// Tolerance used when deciding whether a scan wraps around (first and
/// last angular steps match).
const WRAP_AROUND_EPSILON: f64 = 1e-9;

/// Detects sudden range dips bracketed by farther neighbors.
///
/// `observations` is a sequence of `(delta_theta, distance)` pairs in scan
/// order. Returns world-frame `(x, y)` landmark candidates, in scan order.
pub fn extract_spike(pose: (f64, f64, f64), observations: &[(f64, f64)], spike_threshold: f64) -> Vec<(f64, f64)> {
    let n = observations.len();
    if n == 0 {
        return Vec::new();
    }

    let wrap_around = n > 1 && {
        let first_step = normalized_angle_difference(observations[0].0, observations[1].0);
        let last_step = normalized_angle_difference(observations[n - 1].0, observations[0].0);
        (first_step - last_step).abs() < WRAP_AROUND_EPSILON
    };

    let (x, y, theta) = pose;
    let mut landmarks = Vec::new();

    for i in 0..n {
        if !wrap_around && (i == 0 || i == n - 1) {
            continue;
        }

        let a = observations[(i + n - 1) % n].1;
        let (delta_theta, b) = observations[i];
        let c = observations[(i + 1) % n].1;

        if a < 0.0 || b < 0.0 || c < 0.0 {
            continue;
        }

        if (a - b) + (c - b) >= spike_threshold {
            let mark_x = x + (b * (theta + delta_theta).cos());
            let mark_y = y + (b * (theta + delta_theta).sin());
            landmarks.push((mark_x, mark_y));
        }
    }

    landmarks
}

/// Configuration for [`extract_ransac`], matching the `ransac_*` options of
/// the crate's configuration surface.
#[derive(Debug, Clone, Copy)]
pub struct RansacConfig {
    pub max_tries: u32,
    pub samples: usize,
    pub range: f64,
    pub error: f64,
    pub consensus: usize,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_tries: 500,
            samples: 5,
            range: 10f64.to_radians(),
            error: 0.5,
            consensus: 15,
        }
    }
}

/// Fits lines to point clusters via RANSAC and returns the perpendicular
/// foot from the robot's own origin as a landmark for each accepted line
/// (walls appear as a single landmark each).
///
/// `rng` is the injectable determinism hook called for by the spec's
/// "seed override": pass a seeded `rand_chacha::ChaCha8Rng` for
/// reproducible output, or `rand::rng()` for production use.
pub fn extract_ransac(
    pose: (f64, f64, f64),
    observations: &[(f64, f64)],
    cfg: &RansacConfig,
    rng: &mut impl Rng,
) -> Vec<(f64, f64)> {
    assert!(cfg.range > 0.0 && cfg.range <= PI, "ransac_range must be in (0, pi]");

    let (x, y, theta) = pose;
    let data: Vec<(f64, f64, f64)> = observations
        .iter()
        .map(|&(angle, distance)| {
            (
                x + (distance * (theta + angle).cos()),
                y + (distance * (theta + angle).sin()),
                normalize_angle(angle),
            )
        })
        .collect();

    let mut landmarks = Vec::new();
    let mut associated: HashSet<usize> = HashSet::new();

    for attempt in 0..cfg.max_tries {
        if data.len() - associated.len() < cfg.consensus {
            log::trace!("ransac: only {} unassociated points left, stopping after {attempt} tries", data.len() - associated.len());
            break;
        }

        let unassociated: Vec<usize> = (0..data.len()).filter(|i| !associated.contains(i)).collect();
        let Some(&seed_index) = unassociated.choose(rng) else {
            break;
        };
        let seed_angle = data[seed_index].2;

        let start = normalize_angle(seed_angle - cfg.range);
        let end = normalize_angle(seed_angle + cfg.range);

        let possible: Vec<usize> = unassociated
            .iter()
            .copied()
            .filter(|&i| {
                if i == seed_index {
                    return false;
                }
                let angle = data[i].2;
                if start < end {
                    angle >= start && angle <= end
                } else {
                    angle >= end || angle <= start
                }
            })
            .collect();

        if possible.len() < cfg.samples.saturating_sub(1) {
            continue;
        }

        let mut sample_indices: Vec<usize> = possible
            .choose_multiple(rng, cfg.samples - 1)
            .copied()
            .collect();
        sample_indices.push(seed_index);

        let fit_points: Vec<(f64, f64)> = sample_indices.iter().map(|&i| (data[i].0, data[i].1)).collect();
        let line = linear_regression(&fit_points);

        let supporters: Vec<usize> = (0..data.len())
            .filter(|i| !associated.contains(i))
            .filter(|&i| min_distance(&line, (data[i].0, data[i].1)) < cfg.error)
            .collect();

        if supporters.len() < cfg.consensus {
            log::trace!("ransac: seed {seed_index} gathered only {} supporters, restarting", supporters.len());
            continue;
        }

        for &i in &supporters {
            associated.insert(i);
        }

        let supporter_points: Vec<(f64, f64)> = supporters.iter().map(|&i| (data[i].0, data[i].1)).collect();
        let refit = linear_regression(&supporter_points);

        let foot = closest_point(&refit, (0.0, 0.0));
        log::debug!("ransac: accepted line with {} supporters, landmark at ({:.3}, {:.3})", supporters.len(), foot.0, foot.1);
        landmarks.push(foot);
    }

    landmarks
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand_chacha::ChaCha8Rng;
    use rand::SeedableRng;

    #[test]
    fn spike_simple_extraction() {
        let pose = (0.0, 0.0, 0.0);
        let scan = [(0f64.to_radians(), 10.0), (1f64.to_radians(), 5.0), (2f64.to_radians(), 10.0)];
        let landmarks = extract_spike(pose, &scan, 0.5);
        assert_eq!(landmarks.len(), 1);
        assert_relative_eq!(landmarks[0].0, 5.0 * 1f64.to_radians().cos(), epsilon = 1e-9);
        assert_relative_eq!(landmarks[0].1, 5.0 * 1f64.to_radians().sin(), epsilon = 1e-9);
    }

    #[test]
    fn spike_simple_extraction_not_at_origin() {
        let pose = (2.0, 5.0, 73f64.to_radians());
        let scan = [(0f64.to_radians(), 10.0), (1f64.to_radians(), 5.0), (2f64.to_radians(), 10.0)];
        let landmarks = extract_spike(pose, &scan, 0.5);
        assert_eq!(landmarks.len(), 1);
        assert_relative_eq!(landmarks[0].0, 2.0 + (5.0 * 74f64.to_radians().cos()), epsilon = 1e-9);
        assert_relative_eq!(landmarks[0].1, 5.0 + (5.0 * 74f64.to_radians().sin()), epsilon = 1e-9);
    }

    #[test]
    fn spike_skips_negative_ranges() {
        let pose = (0.0, 0.0, 0.0);
        let scan = [(0f64.to_radians(), 10.0), (1f64.to_radians(), -5.0), (2f64.to_radians(), 10.0)];
        assert!(extract_spike(pose, &scan, 0.5).is_empty());
    }

    #[test]
    fn spike_no_wrap_around_skips_ends() {
        let pose = (0.0, 0.0, 0.0);
        let scan = [(0f64.to_radians(), 10.0), (1f64.to_radians(), 10.0), (2f64.to_radians(), 5.0)];
        assert!(extract_spike(pose, &scan, 0.5).is_empty());
    }

    #[test]
    fn spike_wrap_around_checks_endpoints() {
        let pose = (0.0, 0.0, 0.0);
        let scan = [
            (0f64.to_radians(), 5.0),
            (90f64.to_radians(), 10.0),
            (180f64.to_radians(), 10.0),
            (270f64.to_radians(), 10.0),
        ];
        let landmarks = extract_spike(pose, &scan, 0.5);
        assert_eq!(landmarks.len(), 1);
        assert_relative_eq!(landmarks[0].0, 5.0, epsilon = 1e-9);
        assert_relative_eq!(landmarks[0].1, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn spike_reversal_reverses_landmarks() {
        let pose = (0.0, 0.0, 0.0);
        let scan: Vec<(f64, f64)> = (0..20)
            .map(|i| {
                let d = if i == 10 { 3.0 } else { 10.0 };
                ((i as f64).to_radians(), d)
            })
            .collect();
        let forward = extract_spike(pose, &scan, 0.5);

        let n = scan.len();
        let reversed: Vec<(f64, f64)> = (0..n).map(|i| scan[n - 1 - i]).collect();
        let mut backward = extract_spike(pose, &reversed, 0.5);
        backward.reverse();

        assert_eq!(forward.len(), backward.len());
        for (f, b) in forward.iter().zip(backward.iter()) {
            assert_relative_eq!(f.0, b.0, epsilon = 1e-6);
            assert_relative_eq!(f.1, b.1, epsilon = 1e-6);
        }
    }

    fn square_scan() -> Vec<(f64, f64)> {
        (0..360)
            .map(|i| {
                let angle = (i as f64 + 0.5).to_radians();
                let d = (10.0 / angle.sin().abs()).min(10.0 / angle.cos().abs());
                (angle, d)
            })
            .collect()
    }

    #[test]
    fn ransac_circle_scan_yields_nothing() {
        let pose = (0.0, 0.0, 0.0);
        let scan: Vec<(f64, f64)> = (0..360).map(|i| ((i as f64).to_radians(), 10.0)).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let landmarks = extract_ransac(pose, &scan, &RansacConfig::default(), &mut rng);
        assert!(landmarks.is_empty());
    }

    #[test]
    fn ransac_square_scan_yields_four_walls() {
        let pose = (0.0, 0.0, 0.0);
        let scan = square_scan();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let landmarks = extract_ransac(pose, &scan, &RansacConfig::default(), &mut rng);
        assert_eq!(landmarks.len(), 4);
        for &(ex, ey) in &[(-10.0, 0.0), (10.0, 0.0), (0.0, -10.0), (0.0, 10.0)] {
            assert!(
                landmarks
                    .iter()
                    .any(|&(x, y)| (x - ex).abs() < 1e-6 && (y - ey).abs() < 1e-6),
                "missing landmark near ({ex}, {ey})"
            );
        }
    }

    #[test]
    fn ransac_is_deterministic_given_seed() {
        let pose = (0.0, 0.0, 0.0);
        let scan = square_scan();
        let mut rng_a = ChaCha8Rng::seed_from_u64(42);
        let mut rng_b = ChaCha8Rng::seed_from_u64(42);
        let a = extract_ransac(pose, &scan, &RansacConfig::default(), &mut rng_a);
        let b = extract_ransac(pose, &scan, &RansacConfig::default(), &mut rng_b);
        assert_eq!(a, b);
    }
}
