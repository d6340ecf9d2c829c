//! An unbounded occupancy grid populated by ray traversal from robot
//! observations. Cells hold plain integer counters, not probabilities.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Quantized integer coordinates of a map cell, always a multiple of
/// `scale`.
pub type Key = (i64, i64);

/// A single cell's traversal evidence.
///
/// `stepped`: the agent physically visited this cell.
/// `missed`: a scan beam passed through this cell.
/// `hit`: a scan beam terminated here (obstacle evidence).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell {
    pub stepped: u32,
    pub missed: u32,
    pub hit: u32,
}

/// A map recording possible obstacles given sensor readings, keyed by
/// quantized `(x, y)` cells. Missing cells read as all-zero; only writes
/// materialize a `Cell` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionMap {
    scale: u32,
    max_dist: u32,
    cells: HashMap<Key, Cell>,
}

impl CollisionMap {
    /// Creates an empty map. `scale` is the cell side; `max_dist` truncates
    /// rays. Both must be strictly positive.
    pub fn new(scale: u32, max_dist: u32) -> Result<Self> {
        if scale == 0 {
            return Err(Error::InvalidConfig("collision_map_scale must be > 0".into()));
        }
        if max_dist == 0 {
            return Err(Error::InvalidConfig("collision_map_max_dist must be > 0".into()));
        }
        Ok(Self {
            scale,
            max_dist,
            cells: HashMap::new(),
        })
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn max_dist(&self) -> u32 {
        self.max_dist
    }

    /// Number of materialized cells. Cells that have never been written to
    /// are not counted (they read as zero without being stored).
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Quantizes a real coordinate pair to its cell key. Cell centers land
    /// on multiples of `scale`, with half-open rounding: `+-(scale/2 - 1)`
    /// around 0 maps to 0.
    pub fn get_key(&self, x: f64, y: f64) -> Key {
        (quantize(x, self.scale), quantize(y, self.scale))
    }

    /// Reads the cell at `(x, y)` without materializing it.
    pub fn get(&self, x: f64, y: f64) -> Cell {
        let key = self.get_key(x, y);
        self.cells.get(&key).copied().unwrap_or_default()
    }

    /// Reads a cell by its already-quantized key.
    pub fn get_at_key(&self, key: Key) -> Cell {
        self.cells.get(&key).copied().unwrap_or_default()
    }

    fn get_or_insert(&mut self, key: Key) -> &mut Cell {
        self.cells.entry(key).or_default()
    }

    /// The 8 neighbors of the cell containing `(x, y)`.
    pub fn get_neighbor_keys(&self, x: f64, y: f64) -> Vec<Key> {
        let (kx, ky) = self.get_key(x, y);
        self.get_neighbor_keys_of(kx, ky)
    }

    /// The 8 neighbors of an already-quantized key.
    pub fn get_neighbor_keys_of(&self, kx: i64, ky: i64) -> Vec<Key> {
        let scale = self.scale as i64;
        let mut neighbors = Vec::with_capacity(8);
        for dx in [-scale, 0, scale] {
            for dy in [-scale, 0, scale] {
                if dx == 0 && dy == 0 {
                    continue;
                }
                neighbors.push((kx + dx, ky + dy));
            }
        }
        neighbors
    }

    /// Records one agent position and a set of `(delta_theta, distance)`
    /// observations taken from it: increments `stepped` on the agent's
    /// cell, then traces a ray for each observation.
    pub fn record_observations(&mut self, x: f64, y: f64, theta: f64, observations: &[(f64, f64)]) {
        let current_key = self.get_key(x, y);
        self.get_or_insert(current_key).stepped += 1;

        for &(delta_theta, distance) in observations {
            self.trace_ray(x, y, theta + delta_theta, distance, current_key);
        }
    }

    fn trace_ray(&mut self, start_x: f64, start_y: f64, theta: f64, distance: f64, start_key: Key) {
        let max_dist = self.max_dist as f64;
        let travel = distance.min(max_dist);
        let end_x = start_x + travel * theta.cos();
        let end_y = start_y + travel * theta.sin();
        let end_key = self.get_key(end_x, end_y);

        if distance <= max_dist {
            self.get_or_insert(end_key).hit += 1;
        }

        let (mut x, mut y) = start_key;
        let mut current_distance = dist_between((x, y), (end_x, end_y));

        let a = -theta.sin();
        let b = theta.cos();
        let c = (start_x * theta.sin()) - (start_y * theta.cos());

        while current_distance <= max_dist {
            if (x, y) != start_key {
                self.get_or_insert((x, y)).missed += 1;
            }

            if self
                .get_neighbor_keys_of(end_key.0, end_key.1)
                .contains(&(x, y))
            {
                break;
            }

            let mut next: Option<Key> = None;
            let mut next_error = f64::INFINITY;

            for (option_x, option_y) in self.get_neighbor_keys_of(x, y) {
                let option_dist = dist_between((option_x, option_y), (end_x, end_y));
                if option_dist >= current_distance {
                    continue;
                }

                let option_error = ((a * option_x as f64) + (b * option_y as f64) + c).abs()
                    / (a * a + b * b).sqrt();
                if option_error < next_error {
                    next = Some((option_x, option_y));
                    next_error = option_error;
                }
            }

            match next {
                Some(key) => {
                    x = key.0;
                    y = key.1;
                    current_distance = dist_between((x, y), (end_x, end_y));
                }
                None => break,
            }
        }
    }

    /// Queries the cells covered by the (possibly rotated) rectangle with
    /// the given four corners, supplied in cyclic (clockwise or
    /// counterclockwise) order. Returns `(covered, total_area)` where
    /// `covered` are the existing cells inside the rectangle and
    /// `total_area` is the count of distinct cell keys the rectangle
    /// spans, whether or not each has been materialized.
    pub fn get_locations_within_rectangle(
        &self,
        corners: [(f64, f64); 4],
    ) -> Result<(Vec<(Key, Cell)>, usize)> {
        let edges = validate_rectangle(&corners)?;

        let xs = corners.map(|p| p.0);
        let ys = corners.map(|p| p.1);
        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let scale = self.scale as i64;
        let key_min_x = quantize(min_x, self.scale);
        let key_max_x = quantize(max_x, self.scale);
        let key_min_y = quantize(min_y, self.scale);
        let key_max_y = quantize(max_y, self.scale);

        let mut total = 0usize;
        let mut covered = Vec::new();

        let mut kx = key_min_x;
        while kx <= key_max_x {
            let mut ky = key_min_y;
            while ky <= key_max_y {
                if point_inside_rectangle((kx as f64, ky as f64), &edges) {
                    total += 1;
                    if let Some(cell) = self.cells.get(&(kx, ky)) {
                        covered.push(((kx, ky), *cell));
                    }
                }
                ky += scale;
            }
            kx += scale;
        }

        Ok((covered, total))
    }
}

fn quantize(coord: f64, scale: u32) -> i64 {
    let scale = scale as f64;
    let shifted = coord + (scale / 2.0);
    (shifted - shifted.rem_euclid(scale)).floor() as i64
}

fn dist_between(a: (i64, i64), b: (f64, f64)) -> f64 {
    let dx = b.0 - a.0 as f64;
    let dy = b.1 - a.1 as f64;
    (dx * dx + dy * dy).sqrt()
}

/// A directed edge `(a, b, c)` in implicit form, with the inward half-plane
/// being `a*x + b*y + c >= 0`.
type Edge = (f64, f64, f64);

fn validate_rectangle(corners: &[(f64, f64); 4]) -> Result<[Edge; 4]> {
    for i in 0..4 {
        for j in (i + 1)..4 {
            if (corners[i].0 - corners[j].0).abs() < 1e-9 && (corners[i].1 - corners[j].1).abs() < 1e-9 {
                return Err(Error::InvalidRectangle("corners must be distinct".into()));
            }
        }
    }

    // Shoelace formula: positive area means the corners run
    // counterclockwise. The inward-normal construction below assumes CCW
    // winding, so a clockwise input is detected and compensated for.
    let signed_area: f64 = (0..4)
        .map(|i| {
            let p0 = corners[i];
            let p1 = corners[(i + 1) % 4];
            (p0.0 * p1.1) - (p1.0 * p0.1)
        })
        .sum();
    let orientation = if signed_area < 0.0 { -1.0 } else { 1.0 };

    let mut edges = Vec::with_capacity(4);
    for i in 0..4 {
        let p0 = corners[i];
        let p1 = corners[(i + 1) % 4];
        let dx = p1.0 - p0.0;
        let dy = p1.1 - p0.1;
        let len = (dx * dx + dy * dy).sqrt();
        if len < 1e-9 {
            return Err(Error::InvalidRectangle("degenerate edge".into()));
        }
        // Inward normal (rotate direction vector 90 degrees CCW), flipped
        // if the corners were given clockwise.
        let (nx, ny) = (orientation * -dy / len, orientation * dx / len);
        let c = -(nx * p0.0 + ny * p0.1);
        edges.push((nx, ny, c));
    }

    for i in 0..4 {
        let (ax, ay, _) = edges[i];
        let (bx, by, _) = edges[(i + 1) % 4];
        let dot = ax * bx + ay * by;
        if dot.abs() > 1e-6 {
            return Err(Error::InvalidRectangle(
                "corners are not ordered with four right angles".into(),
            ));
        }
    }

    let mut arr = [(0.0, 0.0, 0.0); 4];
    arr.copy_from_slice(&edges);
    Ok(arr)
}

fn point_inside_rectangle(point: (f64, f64), edges: &[Edge; 4]) -> bool {
    edges
        .iter()
        .all(|&(a, b, c)| (a * point.0) + (b * point.1) + c >= -1e-9)
}

impl fmt::Display for CollisionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "v1")?;
        writeln!(f, "scale,max_dist")?;
        writeln!(f, "{},{}", self.scale, self.max_dist)?;
        write!(f, "x,y,stepped_count,missed_count,hit_count")?;
        for (&(x, y), cell) in &self.cells {
            write!(f, "\n{},{},{},{},{}", x, y, cell.stepped, cell.missed, cell.hit)?;
        }
        Ok(())
    }
}

impl FromStr for CollisionMap {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let mut lines = input.lines().enumerate();

        let (_, version) = lines.next().ok_or_else(|| parse_err(1, "missing version line"))?;
        if version != "v1" {
            return Err(parse_err(1, &format!("unsupported version {version:?}")));
        }

        let (_, header) = lines.next().ok_or_else(|| parse_err(2, "missing scale header"))?;
        if header != "scale,max_dist" {
            return Err(parse_err(2, "expected 'scale,max_dist' header"));
        }

        let (line_no, values) = lines.next().ok_or_else(|| parse_err(3, "missing scale values"))?;
        let mut parts = values.split(',');
        let scale: u32 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| parse_err(line_no + 1, "invalid scale"))?;
        let max_dist: u32 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| parse_err(line_no + 1, "invalid max_dist"))?;

        let mut map = CollisionMap::new(scale, max_dist)
            .map_err(|_| parse_err(line_no + 1, "scale and max_dist must be positive"))?;

        let (_, cell_header) = lines
            .next()
            .ok_or_else(|| parse_err(4, "missing cell header"))?;
        if cell_header != "x,y,stepped_count,missed_count,hit_count" {
            return Err(parse_err(4, "expected cell header"));
        }

        for (i, line) in lines {
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split(',');
            let mut next_i64 = || -> Result<i64> {
                parts
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| parse_err(i + 1, "expected integer field"))
            };
            let x = next_i64()?;
            let y = next_i64()?;
            let mut next_u32 = || -> Result<u32> {
                parts
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| parse_err(i + 1, "expected integer field"))
            };
            let stepped = next_u32()?;
            let missed = next_u32()?;
            let hit = next_u32()?;
            map.cells.insert(
                (x, y),
                Cell {
                    stepped,
                    missed,
                    hit,
                },
            );
        }

        Ok(map)
    }
}

fn parse_err(line: usize, reason: &str) -> Error {
    Error::ParseCollisionMap {
        line,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    fn keys(map: &CollisionMap) -> HashSet<Key> {
        map.cells.keys().copied().collect()
    }

    #[test]
    fn s1_flat_observation() {
        let mut map = CollisionMap::new(5, 100).unwrap();
        map.record_observations(0.0, 0.0, 0.0, &[(0.0, 10.0)]);

        assert_eq!(keys(&map), HashSet::from([(0, 0), (5, 0), (10, 0)]));
        assert_eq!(map.get(0.0, 0.0), Cell { stepped: 1, missed: 0, hit: 0 });
        assert_eq!(map.get(5.0, 0.0), Cell { stepped: 0, missed: 1, hit: 0 });
        assert_eq!(map.get(10.0, 0.0), Cell { stepped: 0, missed: 0, hit: 1 });
    }

    #[test]
    fn s2_angled_observation() {
        let mut map = CollisionMap::new(5, 100).unwrap();
        map.record_observations(0.0, 0.0, 0.0, &[(FRAC_PI_4, 10.0 * 2f64.sqrt())]);

        assert_eq!(keys(&map), HashSet::from([(0, 0), (5, 5), (10, 10)]));
        assert_eq!(map.get(0.0, 0.0), Cell { stepped: 1, missed: 0, hit: 0 });
        assert_eq!(map.get(5.0, 5.0), Cell { stepped: 0, missed: 1, hit: 0 });
        assert_eq!(map.get(10.0, 10.0), Cell { stepped: 0, missed: 0, hit: 1 });
    }

    #[test]
    fn s3_truncated_ray() {
        let mut map = CollisionMap::new(5, 8).unwrap();
        map.record_observations(0.0, 0.0, 0.0, &[(0.0, 10.0)]);

        assert_eq!(keys(&map), HashSet::from([(0, 0), (5, 0)]));
        assert_eq!(map.get(0.0, 0.0), Cell { stepped: 1, missed: 0, hit: 0 });
        assert_eq!(map.get(5.0, 0.0), Cell { stepped: 0, missed: 1, hit: 0 });
    }

    #[test]
    fn s4_crossing_rays() {
        let mut map = CollisionMap::new(5, 100).unwrap();
        map.record_observations(0.0, 0.0, 0.0, &[(0.0, 10.0)]);
        map.record_observations(5.0, -5.0, FRAC_PI_2, &[(0.0, 10.0)]);

        assert_eq!(
            keys(&map),
            HashSet::from([(0, 0), (5, 0), (10, 0), (5, -5), (5, 5)])
        );
        assert_eq!(map.get(5.0, 0.0).missed, 2);
        assert_eq!(map.get(5.0, 5.0).hit, 1);
        assert_eq!(map.get(5.0, -5.0).stepped, 1);
    }

    #[test]
    fn s5_quantization() {
        let map = CollisionMap::new(5, 100).unwrap();
        assert_eq!(map.get_key(0.0, 0.0), (0, 0));
        assert_eq!(map.get_key(2.0, -2.0), (0, 0));
        assert_eq!(map.get_key(3.0, 3.0), (5, 5));
        assert_eq!(map.get_key(2.0, 10.0), (0, 10));
        assert_eq!(map.get_key(-10.0, -2.0), (-10, 0));
    }

    #[test]
    fn quantization_is_idempotent_within_half_cell() {
        let map = CollisionMap::new(5, 100).unwrap();
        let base = map.get_key(12.3, -7.8);
        for eps in [0.0, 0.4, -0.4, 1.9, -1.9] {
            assert_eq!(map.get_key(12.3 + eps, -7.8 + eps), base);
        }
    }

    #[test]
    fn serialization_round_trips() {
        let mut map = CollisionMap::new(5, 100).unwrap();
        map.record_observations(0.0, 0.0, 0.0, &[(0.0, 10.0), (FRAC_PI_2, 10.0)]);

        let text = map.to_string();
        let parsed: CollisionMap = text.parse().unwrap();
        assert_eq!(map, parsed);
    }

    #[test]
    fn serialization_matches_single_cell_format() {
        let mut map = CollisionMap::new(5, 100).unwrap();
        map.record_observations(0.0, 0.0, 0.0, &[]);
        assert_eq!(
            map.to_string(),
            "v1\nscale,max_dist\n5,100\nx,y,stepped_count,missed_count,hit_count\n0,0,1,0,0"
        );
    }

    #[test]
    fn counters_never_decrease_across_repeated_observations() {
        let mut map = CollisionMap::new(5, 100).unwrap();
        for _ in 0..3 {
            let before: Vec<(Key, Cell)> = map.cells.iter().map(|(k, v)| (*k, *v)).collect();
            map.record_observations(0.0, 0.0, 0.0, &[(0.0, 10.0)]);
            for (key, cell) in before {
                let after = map.get_at_key(key);
                assert!(after.stepped >= cell.stepped);
                assert!(after.missed >= cell.missed);
                assert!(after.hit >= cell.hit);
            }
        }
    }

    #[test]
    fn rectangle_query_reports_area_and_covered_cells() {
        let mut map = CollisionMap::new(5, 100).unwrap();
        map.record_observations(0.0, 0.0, 0.0, &[(0.0, 10.0)]);

        let corners = [(-2.5, -2.5), (12.5, -2.5), (12.5, 2.5), (-2.5, 2.5)];
        let (covered, total) = map.get_locations_within_rectangle(corners).unwrap();
        assert!(total >= covered.len());
        assert!(total > 0);
    }

    #[test]
    fn rectangle_query_rejects_degenerate_corners() {
        let map = CollisionMap::new(5, 100).unwrap();
        let corners = [(0.0, 0.0), (0.0, 0.0), (1.0, 1.0), (1.0, 0.0)];
        assert!(map.get_locations_within_rectangle(corners).is_err());
    }

    #[test]
    fn new_rejects_non_positive_parameters() {
        assert!(CollisionMap::new(0, 5).is_err());
        assert!(CollisionMap::new(5, 0).is_err());
    }
}
