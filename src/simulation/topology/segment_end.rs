//! Direction classification for one end of a segment
//!
//! A `SegmentEndView` is rebuilt from scratch on every recalculation. It
//! records which other segments meet at the end's node and how each of them
//! relates to the managed segment: left, right or straight ahead, and
//! whether traffic on it flows into or out of the node.

use log::warn;

use crate::simulation::network::{NetworkProvider, RoadClass};
use crate::simulation::types::{NodeId, SegmentId, SegmentSet, Vector3};

/// Normalized cross product at or above which a neighbor is a left turn
pub const LEFT_CROSS_THRESHOLD: f32 = 0.5;

/// Normalized cross product at or below which a neighbor is a right turn
pub const RIGHT_CROSS_THRESHOLD: f32 = -0.5;

/// Identifies one of the two ends of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentEndId {
    pub segment: SegmentId,
    pub start_end: bool,
}

impl SegmentEndId {
    pub fn new(segment: SegmentId, start_end: bool) -> Self {
        Self { segment, start_end }
    }
}

/// Relative direction from a segment end into another segment at the same node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrowDirection {
    #[default]
    None,
    Left,
    Forward,
    Right,
    Turn,
}

/// Classify `other` relative to `own`. Both vectors point away from the
/// shared node and lie on the ground plane.
pub fn classify_direction(own: &Vector3, other: &Vector3) -> ArrowDirection {
    let cross = own.cross_y(other);
    if cross >= LEFT_CROSS_THRESHOLD {
        ArrowDirection::Left
    } else if cross <= RIGHT_CROSS_THRESHOLD {
        ArrowDirection::Right
    } else if own.dot(other) < 0.0 {
        ArrowDirection::Forward
    } else {
        ArrowDirection::Turn
    }
}

/// Classification result for one (segment, node side) pair
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SegmentEndView {
    pub id: Option<SegmentEndId>,
    /// Node this end is attached to, `None` when the segment is invalid
    pub node: Option<NodeId>,

    pub connected: SegmentSet,
    pub left: SegmentSet,
    pub right: SegmentSet,
    pub straight: SegmentSet,
    /// Subset of `straight` that points back the way the managed segment came
    pub turn: SegmentSet,

    pub incoming_left: SegmentSet,
    pub incoming_right: SegmentSet,
    pub incoming_straight: SegmentSet,
    pub outgoing_left: SegmentSet,
    pub outgoing_right: SegmentSet,
    pub outgoing_straight: SegmentSet,

    pub num_incoming: u8,
    pub num_outgoing: u8,

    pub only_highways: bool,
    pub outgoing_one_way: bool,
    pub incoming_one_way: bool,

    /// The managed segment carries traffic toward this end's node
    pub incoming: bool,
    /// The managed segment carries traffic away from this end's node
    pub outgoing: bool,
}

impl SegmentEndView {
    /// Build the view for `end` from the current state of the host network.
    ///
    /// Returns an empty view if the segment or its node no longer exists.
    pub fn compute(network: &dyn NetworkProvider, end: SegmentEndId) -> SegmentEndView {
        let mut view = SegmentEndView {
            id: Some(end),
            ..Default::default()
        };

        let segment = end.segment;
        if !network.is_segment_valid(segment) {
            return view;
        }
        let Some((start_node, end_node)) = network.segment_endpoints(segment) else {
            return view;
        };
        let node = if end.start_end { start_node } else { end_node };
        if !network.is_node_valid(node) {
            return view;
        }
        view.node = Some(node);

        let own_lanes = network.lane_directions(segment);
        let one_way = own_lanes.is_one_way();
        view.incoming = own_lanes.flows_toward(end.start_end);
        view.outgoing = own_lanes.flows_away(end.start_end);
        view.incoming_one_way = one_way && view.incoming;
        view.outgoing_one_way = one_way && view.outgoing;

        let own_dir = network
            .segment_direction_at_node(segment, node)
            .and_then(|dir| dir.flat_normalized());

        let mut only_highways = true;
        for other in network.node_segments(node).into_iter().flatten() {
            if other == segment || !network.is_segment_valid(other) {
                continue;
            }

            let other_at_start = match network.segment_endpoints(other) {
                Some((s, _)) if s == node => true,
                Some((_, e)) if e == node => false,
                _ => {
                    warn!(
                        "{} is listed at {} but does not end there; ignoring it",
                        other, node
                    );
                    continue;
                }
            };

            if !view.connected.insert(other) {
                warn!(
                    "{} has more than {} neighbors at {}; dropping {}",
                    segment,
                    crate::simulation::types::MAX_CONNECTED_SEGMENTS,
                    node,
                    other
                );
                break;
            }

            let other_dir = network
                .segment_direction_at_node(other, node)
                .and_then(|dir| dir.flat_normalized());
            let direction = match (own_dir, other_dir) {
                (Some(own), Some(theirs)) => classify_direction(&own, &theirs),
                _ => ArrowDirection::Forward,
            };

            // Recomputed per neighbor rather than read from the neighbor's
            // cached geometry, which may itself be stale right now.
            let other_lanes = network.lane_directions(other);
            let incoming = other_lanes.flows_toward(other_at_start);
            let outgoing = other_lanes.flows_away(other_at_start);

            let (all, inc, out) = match direction {
                ArrowDirection::Left => (
                    &mut view.left,
                    &mut view.incoming_left,
                    &mut view.outgoing_left,
                ),
                ArrowDirection::Right => (
                    &mut view.right,
                    &mut view.incoming_right,
                    &mut view.outgoing_right,
                ),
                _ => (
                    &mut view.straight,
                    &mut view.incoming_straight,
                    &mut view.outgoing_straight,
                ),
            };
            all.insert(other);
            if incoming {
                inc.insert(other);
            }
            if outgoing {
                out.insert(other);
            }
            if direction == ArrowDirection::Turn {
                view.turn.insert(other);
            }

            if network.road_class(other) != RoadClass::Highway || !other_lanes.is_one_way() {
                only_highways = false;
            }
        }

        view.only_highways = only_highways && !view.connected.is_empty();
        view.num_incoming = (view.incoming_left.len()
            + view.incoming_right.len()
            + view.incoming_straight.len()) as u8;
        view.num_outgoing = (view.outgoing_left.len()
            + view.outgoing_right.len()
            + view.outgoing_straight.len()) as u8;
        view
    }

    /// True if this view carries no classification
    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }

    pub fn num_connected(&self) -> usize {
        self.connected.len()
    }

    /// Relative direction from the managed segment into `other`
    pub fn direction_to(&self, other: SegmentId) -> ArrowDirection {
        if self.left.contains(other) {
            ArrowDirection::Left
        } else if self.right.contains(other) {
            ArrowDirection::Right
        } else if self.turn.contains(other) {
            ArrowDirection::Turn
        } else if self.straight.contains(other) {
            ArrowDirection::Forward
        } else {
            ArrowDirection::None
        }
    }

    /// All neighbors with traffic flowing into the node
    pub fn incoming_segments(&self) -> Vec<SegmentId> {
        let mut ids = self.incoming_left.union(&self.incoming_right);
        ids.extend(self.incoming_straight.iter());
        ids
    }

    /// All neighbors with traffic flowing out of the node
    pub fn outgoing_segments(&self) -> Vec<SegmentId> {
        let mut ids = self.outgoing_left.union(&self.outgoing_right);
        ids.extend(self.outgoing_straight.iter());
        ids
    }
}

/// Owns and recomputes the view of one segment end
#[derive(Debug, Clone)]
pub struct SegmentEndGeometry {
    id: SegmentEndId,
    view: SegmentEndView,
}

impl SegmentEndGeometry {
    pub fn new(id: SegmentEndId) -> Self {
        Self {
            id,
            view: SegmentEndView {
                id: Some(id),
                ..Default::default()
            },
        }
    }

    pub fn id(&self) -> SegmentEndId {
        self.id
    }

    pub fn view(&self) -> &SegmentEndView {
        &self.view
    }

    pub fn node(&self) -> Option<NodeId> {
        self.view.node
    }

    pub fn recalculate(&mut self, network: &dyn NetworkProvider) {
        self.view = SegmentEndView::compute(network, self.id);
    }

    pub fn clear(&mut self) {
        self.view = SegmentEndView {
            id: Some(self.id),
            ..Default::default()
        };
    }
}
