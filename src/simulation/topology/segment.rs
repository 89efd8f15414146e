//! Segment-wide geometry: both end views plus derived flags

use crate::simulation::network::{NetworkProvider, RoadClass};
use crate::simulation::types::{NodeId, SegmentId};

use super::segment_end::{SegmentEndGeometry, SegmentEndId, SegmentEndView};

/// Cached geometry of one road segment
#[derive(Debug, Clone)]
pub struct SegmentGeometry {
    id: SegmentId,
    start: SegmentEndGeometry,
    end: SegmentEndGeometry,
    pub one_way: bool,
    /// One-way segment of highway class
    pub highway: bool,
    /// At least one lane is reserved for buses or service vehicles
    pub bus_lane: bool,
    valid: bool,
}

impl SegmentGeometry {
    pub fn new(id: SegmentId) -> Self {
        Self {
            id,
            start: SegmentEndGeometry::new(SegmentEndId::new(id, true)),
            end: SegmentEndGeometry::new(SegmentEndId::new(id, false)),
            one_way: false,
            highway: false,
            bus_lane: false,
            valid: false,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn end(&self, start_end: bool) -> &SegmentEndGeometry {
        if start_end {
            &self.start
        } else {
            &self.end
        }
    }

    pub fn view(&self, start_end: bool) -> &SegmentEndView {
        self.end(start_end).view()
    }

    /// Nodes the two ends are currently attached to (start, end)
    pub fn nodes(&self) -> (Option<NodeId>, Option<NodeId>) {
        (self.start.node(), self.end.node())
    }

    /// Which end of this segment touches `node`, if any
    pub fn end_at(&self, node: NodeId) -> Option<&SegmentEndGeometry> {
        if self.start.node() == Some(node) {
            Some(&self.start)
        } else if self.end.node() == Some(node) {
            Some(&self.end)
        } else {
            None
        }
    }

    /// Rebuild flags and both end views from the host network.
    pub fn recalculate(&mut self, network: &dyn NetworkProvider) {
        self.valid = network.is_segment_valid(self.id);
        if !self.valid {
            self.clear();
            return;
        }

        let lanes = network.lane_directions(self.id);
        self.one_way = lanes.is_one_way();
        self.highway = self.one_way && network.road_class(self.id) == RoadClass::Highway;
        self.bus_lane = lanes.has_restricted_lane();

        self.start.recalculate(network);
        self.end.recalculate(network);
    }

    fn clear(&mut self) {
        self.one_way = false;
        self.highway = false;
        self.bus_lane = false;
        self.start.clear();
        self.end.clear();
    }
}
