//! Exploration planner: classifies collision-map cells, checks whether a
//! straight-line move is safe, and runs Dijkstra over the occupancy grid to
//! find the nearest unexplored cell.

use crate::collision_map::{Cell, CollisionMap, Key};
use crate::geometry::normalized_angle_difference;
use crate::slam::{SensingAndControl, Slam};
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceStatus {
    Unknown,
    Passable,
    Blocked,
}

/// Plans exploration moves over a [`Slam`] instance's collision map.
///
/// `step_threshold`/`miss_threshold`/`hit_threshold` gate
/// [`SpaceStatus`] classification; `size` is the robot's footprint width
/// used to build the travel-status rectangle.
pub struct Explorer {
    step_threshold: u32,
    miss_threshold: u32,
    hit_threshold: u32,
    size: f64,
    current_path: Option<Vec<Key>>,
    fully_explored: bool,
}

impl Explorer {
    pub fn new(size: f64) -> Self {
        Self::with_thresholds(size, 1, 5, 2)
    }

    pub fn with_thresholds(size: f64, step_threshold: u32, miss_threshold: u32, hit_threshold: u32) -> Self {
        Self {
            step_threshold,
            miss_threshold,
            hit_threshold,
            size,
            current_path: None,
            fully_explored: false,
        }
    }

    pub fn fully_explored(&self) -> bool {
        self.fully_explored
    }

    /// Classifies a cell's traversal status. Order matters: stepped is
    /// checked before hit, which is checked before missed: a cell that is
    /// both stepped and hit reads as passable.
    pub fn get_space_status(&self, cell: Cell) -> SpaceStatus {
        if cell.stepped >= self.step_threshold {
            return SpaceStatus::Passable;
        }
        if cell.hit >= self.hit_threshold {
            return SpaceStatus::Blocked;
        }
        if cell.missed >= self.miss_threshold {
            return SpaceStatus::Passable;
        }
        SpaceStatus::Unknown
    }

    /// The most prohibitive status along a straight move from `(x1, y1)` to
    /// `(x2, y2)`, built as a rectangle of width `size` between the two
    /// points.
    pub fn get_travel_status(&self, map: &CollisionMap, x1: f64, y1: f64, x2: f64, y2: f64) -> SpaceStatus {
        let travel_angle = (y2 - y1).atan2(x2 - x1);
        let (cos_a, sin_a) = (travel_angle.cos(), travel_angle.sin());
        let half = self.size / 2.0;

        let rotate = |lx: f64, ly: f64| (cos_a * lx - sin_a * ly, sin_a * lx + cos_a * ly);

        let (sx1, sy1) = rotate(-half, half);
        let (sx2, sy2) = rotate(-half, -half);
        let (ex1, ey1) = rotate(half, -half);
        let (ex2, ey2) = rotate(half, half);

        let corners = [
            (x1 + sx1, y1 + sy1),
            (x1 + sx2, y1 + sy2),
            (x2 + ex1, y2 + ey1),
            (x2 + ex2, y2 + ey2),
        ];

        let Ok((covered, area)) = map.get_locations_within_rectangle(corners) else {
            return SpaceStatus::Unknown;
        };

        let mut status = SpaceStatus::Passable;
        if covered.len() < area {
            status = SpaceStatus::Unknown;
        }

        for (_, cell) in &covered {
            let this_status = self.get_space_status(*cell);
            match this_status {
                SpaceStatus::Unknown if status == SpaceStatus::Passable => status = SpaceStatus::Unknown,
                SpaceStatus::Blocked => status = SpaceStatus::Blocked,
                _ => {}
            }
        }

        status
    }

    /// Dijkstra from the current cell to the nearest reachable cell whose
    /// status is `Unknown`. Matches the reference's "closed on first
    /// discovery" behavior: once a key has been queued it is never
    /// requeued, even if a shorter path to it is found later.
    ///
    /// Returns the path from goal back to (excluding) the start, goal at
    /// index 0, first step at the tail.
    fn pathfind<C: SensingAndControl, R: Rng>(&self, slam: &Slam<C, R>) -> Vec<Key> {
        let (x, y, _) = slam.get_estimated_position();
        let map = slam.get_collision_map();
        let start = map.get_key(x, y);

        let mut open: BinaryHeap<HeapEntry> = BinaryHeap::new();
        let mut trail: HashMap<Key, Option<Key>> = HashMap::new();

        open.push(HeapEntry { distance: 0.0, key: start });
        trail.insert(start, None);

        let mut target = None;

        while let Some(HeapEntry { distance, key }) = open.pop() {
            let status = self.get_space_status(map.get_at_key(key));

            if status == SpaceStatus::Blocked {
                continue;
            }
            if status == SpaceStatus::Unknown {
                target = Some(key);
                break;
            }

            for next_key in map.get_neighbor_keys_of(key.0, key.1) {
                if self.get_travel_status(map, key.0 as f64, key.1 as f64, next_key.0 as f64, next_key.1 as f64)
                    == SpaceStatus::Blocked
                {
                    continue;
                }

                let step = dist(key, next_key);
                if !trail.contains_key(&next_key) {
                    open.push(HeapEntry {
                        distance: distance + step,
                        key: next_key,
                    });
                    trail.insert(next_key, Some(key));
                }
            }
        }

        let Some(goal) = target else {
            return Vec::new();
        };

        let mut path = Vec::new();
        let mut current = goal;
        while let Some(prev) = trail[&current] {
            path.push(current);
            current = prev;
        }
        path
    }

    /// Runs one exploration step: recomputes the path if necessary, then
    /// issues a single `move_observe_and_update` via `slam`.
    pub fn step<C: SensingAndControl, R: Rng>(&mut self, slam: &mut Slam<C, R>) {
        if self.fully_explored {
            return;
        }

        let (x, y, theta) = slam.get_estimated_position();
        let map = slam.get_collision_map();

        let mut recompute = match &self.current_path {
            None => true,
            Some(path) => path.is_empty(),
        };
        if !recompute {
            let path = self.current_path.as_ref().unwrap();
            let goal = path[0];
            recompute = self.get_space_status(map.get_at_key(goal)) != SpaceStatus::Unknown;
        }
        if !recompute {
            let path = self.current_path.as_ref().unwrap();
            let farthest = *path.last().unwrap();
            recompute = self.get_travel_status(map, x, y, farthest.0 as f64, farthest.1 as f64) == SpaceStatus::Blocked;
        }

        if recompute {
            log::debug!("explorer: recomputing path from ({x:.2}, {y:.2})");
            self.current_path = Some(self.pathfind(slam));
        }

        let path_is_empty = match &self.current_path {
            None => true,
            Some(path) => path.is_empty(),
        };
        if path_is_empty {
            let map = slam.get_collision_map();
            let here_status = self.get_space_status(map.get(x, y));
            if here_status == SpaceStatus::Unknown {
                slam.move_observe_and_update(0.0, 0.0);
            } else {
                log::debug!("explorer: no reachable unknown cell, fully explored");
                self.fully_explored = true;
            }
            return;
        }

        let next_step = self.current_path.as_mut().unwrap().pop().unwrap();
        let dx = next_step.0 as f64 - x;
        let dy = next_step.1 as f64 - y;

        let target_theta = dy.atan2(dx);
        let target_distance = (dx * dx + dy * dy).sqrt();
        let delta_theta = normalized_angle_difference(theta, target_theta);

        slam.move_observe_and_update(delta_theta, target_distance);
    }
}

fn dist(a: Key, b: Key) -> f64 {
    let dx = (a.0 - b.0) as f64;
    let dy = (a.1 - b.1) as f64;
    (dx * dx + dy * dy).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HeapEntry {
    distance: f64,
    key: Key,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the smallest distance
        // first; ties break on key for deterministic ordering.
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision_map::Cell;
    use crate::config::Config;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn explorer() -> Explorer {
        Explorer::with_thresholds(10.0, 1, 5, 2)
    }

    #[test]
    fn classification_order_stepped_then_hit_then_missed() {
        let e = explorer();
        assert_eq!(
            e.get_space_status(Cell { stepped: 1, missed: 0, hit: 99 }),
            SpaceStatus::Passable
        );
        assert_eq!(
            e.get_space_status(Cell { stepped: 0, missed: 0, hit: 2 }),
            SpaceStatus::Blocked
        );
        assert_eq!(
            e.get_space_status(Cell { stepped: 0, missed: 5, hit: 0 }),
            SpaceStatus::Passable
        );
        assert_eq!(
            e.get_space_status(Cell { stepped: 0, missed: 0, hit: 0 }),
            SpaceStatus::Unknown
        );
    }

    /// A room bounded by walls at ±15 on both axes; the reading is a
    /// fixed-distance square scan regardless of pose, which is an
    /// approximation but enough to drive the planner to `fully_explored`.
    struct SquareRoom {
        half_extent: f64,
    }

    impl SensingAndControl for SquareRoom {
        fn move_robot(&mut self, _delta_theta: f64, distance: f64) -> f64 {
            distance
        }

        fn get_distance_reading(&mut self) -> Vec<(f64, f64)> {
            (0..360)
                .map(|deg| {
                    let angle = (deg as f64).to_radians();
                    let d = (self.half_extent / angle.sin().abs()).min(self.half_extent / angle.cos().abs());
                    (angle, d)
                })
                .collect()
        }
    }

    #[test]
    fn s7_explorer_eventually_fully_explores_a_bounded_room() {
        let control = SquareRoom { half_extent: 15.0 };
        let rng = ChaCha8Rng::seed_from_u64(3);
        let mut slam = Slam::with_rng(control, &Config::default(), rng).unwrap();
        let mut explorer = Explorer::new(5.0);

        for _ in 0..500 {
            if explorer.fully_explored() {
                break;
            }
            explorer.step(&mut slam);
        }

        assert!(explorer.fully_explored());
        assert!(!slam.get_collision_map().is_empty());
    }
}
