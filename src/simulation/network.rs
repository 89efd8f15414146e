//! Host collaborator interfaces
//!
//! The topology cache and the arbitration engine never own network or
//! vehicle state. Everything they need from the host goes through these
//! traits.

use super::types::{LaneId, NodeId, SegmentId, Vector3, VehicleId, MAX_NODE_SEGMENTS};

/// Road classification reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoadClass {
    #[default]
    Road,
    Highway,
}

/// Per-lane travel directions of a segment.
///
/// Bit `i` of `forward` is set when lane `i` carries traffic from the start
/// node to the end node, bit `i` of `backward` for the opposite direction.
/// `restricted` marks lanes reserved for buses or service vehicles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaneDirections {
    pub forward: u32,
    pub backward: u32,
    pub restricted: u32,
    /// The segment is stored reversed; forward and backward swap meaning
    pub inverted: bool,
}

impl LaneDirections {
    fn start_to_end(&self) -> bool {
        if self.inverted {
            self.backward != 0
        } else {
            self.forward != 0
        }
    }

    fn end_to_start(&self) -> bool {
        if self.inverted {
            self.forward != 0
        } else {
            self.backward != 0
        }
    }

    /// Whether any lane carries traffic toward the given end's node
    pub fn flows_toward(&self, at_start: bool) -> bool {
        if at_start {
            self.end_to_start()
        } else {
            self.start_to_end()
        }
    }

    /// Whether any lane carries traffic away from the given end's node
    pub fn flows_away(&self, at_start: bool) -> bool {
        self.flows_toward(!at_start)
    }

    /// True when traffic moves in exactly one direction
    pub fn is_one_way(&self) -> bool {
        self.start_to_end() != self.end_to_start()
    }

    pub fn has_restricted_lane(&self) -> bool {
        self.restricted != 0
    }
}

/// Read-only view of the host's road network
pub trait NetworkProvider {
    fn is_segment_valid(&self, segment: SegmentId) -> bool;

    fn is_node_valid(&self, node: NodeId) -> bool;

    /// The (start, end) nodes of a segment
    fn segment_endpoints(&self, segment: SegmentId) -> Option<(NodeId, NodeId)>;

    /// The segment slots of a node, in the host's slot order
    fn node_segments(&self, node: NodeId) -> [Option<SegmentId>; MAX_NODE_SEGMENTS];

    /// Direction of the segment at the given node, pointing away from the node
    fn segment_direction_at_node(&self, segment: SegmentId, node: NodeId) -> Option<Vector3>;

    fn lane_directions(&self, segment: SegmentId) -> LaneDirections;

    fn road_class(&self, segment: SegmentId) -> RoadClass;

    fn lane_speed_limit(&self, lane: LaneId) -> Option<f32>;
}

/// Answers whether other traffic is approaching a node in a way that
/// conflicts with the asking vehicle
pub trait ConflictOracle {
    fn has_incoming_vehicles_towards(&self, vehicle: VehicleId, node: NodeId) -> bool;
}

impl<F> ConflictOracle for F
where
    F: Fn(VehicleId, NodeId) -> bool,
{
    fn has_incoming_vehicles_towards(&self, vehicle: VehicleId, node: NodeId) -> bool {
        self(vehicle, node)
    }
}
