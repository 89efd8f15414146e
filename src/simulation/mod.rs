//! Junction topology and right-of-way simulation
//!
//! The `topology` cache and the `priority` engine are host independent and
//! talk to the road network only through the traits in `network`.
//! `SimNetwork` and `SimWorld` are an in-memory host that lets the whole
//! pipeline run headless from the console or from tests.

mod config;
mod network;
mod sim_network;
mod types;
mod world;

pub mod priority;
pub mod topology;

pub use config::{
    ArbitrationConfig, MAIN_SPEED_FACTOR, MAX_WAIT_TICKS, STALE_VEHICLE_TICKS, STOP_VELOCITY_SQ,
    STOP_WAIT_TICKS, YIELD_THRESHOLD_RANGE,
};
pub use network::{ConflictOracle, LaneDirections, NetworkProvider, RoadClass};
pub use sim_network::{Hop, RoadSpec, SimLane, SimNetwork, SimNode, SimSegment};
pub use types::{
    LaneId, NodeId, SegmentId, SegmentSet, Vector3, VehicleId, MAX_CONNECTED_SEGMENTS,
    MAX_NODE_SEGMENTS, MAX_TABLE_SLOTS,
};
pub use world::{
    IncomingTraffic, PathStatus, SimVehicle, SimWorld, VehicleUpdateResult, WorldStats,
    APPROACH_DISTANCE, HOUSEKEEPING_INTERVAL, SAFE_FOLLOWING_MULTIPLIER, VEHICLE_LENGTH,
};
