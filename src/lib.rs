//! SLAM core: landmark extraction, EKF-SLAM, the collision/occupancy map,
//! and an exploration planner for a ground robot with odometry and a
//! rotating rangefinder.
//!
//! This crate does not implement the hardware driver, the simulation
//! world, GUI rendering, or file persistence; those are external
//! collaborators wired in by a caller against [`slam::SensingAndControl`]
//! and the [`collision_map::CollisionMap`] `Display`/`FromStr` pair.

pub mod collision_map;
pub mod config;
pub mod ekf;
pub mod error;
pub mod explorer;
pub mod geometry;
pub mod landmark;
pub mod landmark_extraction;
pub mod slam;

pub use collision_map::CollisionMap;
pub use config::Config;
pub use ekf::Ekf;
pub use error::{Error, Result};
pub use explorer::{Explorer, SpaceStatus};
pub use landmark::{Landmark, LandmarkKind};
pub use slam::{SensingAndControl, Slam};
