//! Tunable arbitration parameters

use std::ops::Range;

/// Ticks after which a waiting vehicle is let through regardless of conflicts
pub const MAX_WAIT_TICKS: u32 = 75;

/// Ticks a vehicle must stand at a stop sign before it may check for traffic
pub const STOP_WAIT_TICKS: u32 = 2;

/// Squared velocity below which a vehicle counts as stopped
pub const STOP_VELOCITY_SQ: f32 = 0.1;

/// Range the per-approach yield threshold (a squared speed) is drawn from
pub const YIELD_THRESHOLD_RANGE: Range<f32> = 13.0..18.0;

/// Fraction of the lane speed limit allowed when crossing from a main road
pub const MAIN_SPEED_FACTOR: f32 = 0.8;

/// Ticks without an observation after which a vehicle slot is reclaimed
pub const STALE_VEHICLE_TICKS: u64 = 600;

/// Arbitration parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationConfig {
    pub max_wait_ticks: u32,
    pub stop_wait_ticks: u32,
    pub stop_velocity_sq: f32,
    pub yield_threshold_range: Range<f32>,
    pub main_speed_factor: f32,
    pub stale_vehicle_ticks: u64,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            max_wait_ticks: MAX_WAIT_TICKS,
            stop_wait_ticks: STOP_WAIT_TICKS,
            stop_velocity_sq: STOP_VELOCITY_SQ,
            yield_threshold_range: YIELD_THRESHOLD_RANGE,
            main_speed_factor: MAIN_SPEED_FACTOR,
            stale_vehicle_ticks: STALE_VEHICLE_TICKS,
        }
    }
}
