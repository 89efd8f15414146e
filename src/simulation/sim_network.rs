//! In-memory road network used as the host in headless runs and tests
//!
//! Owns node and segment storage, lane layout, a petgraph routing graph and
//! per-direction vehicle occupancy. Implements `NetworkProvider` so the
//! topology cache can read from it.

use anyhow::{Context, Result};
use ordered_float::OrderedFloat;
use petgraph::algo::astar;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use super::network::{LaneDirections, NetworkProvider, RoadClass};
use super::types::{
    table_capacity, LaneId, NodeId, SegmentId, Vector3, VehicleId, MAX_NODE_SEGMENTS,
};

/// Lane direction masks are 32 bits wide
pub const MAX_SEGMENT_LANES: u32 = u32::BITS;

/// Lane layout and class of a new segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoadSpec {
    /// Lanes running from the start node to the end node
    pub forward_lanes: u8,
    /// Lanes running from the end node to the start node
    pub backward_lanes: u8,
    pub class: RoadClass,
    pub speed_limit: f32,
    /// Reserve the first lane for buses
    pub bus_lane: bool,
    /// Store the segment reversed
    pub inverted: bool,
}

impl RoadSpec {
    pub fn two_way(speed_limit: f32) -> Self {
        Self {
            forward_lanes: 1,
            backward_lanes: 1,
            class: RoadClass::Road,
            speed_limit,
            bus_lane: false,
            inverted: false,
        }
    }

    pub fn one_way(speed_limit: f32) -> Self {
        Self {
            backward_lanes: 0,
            ..Self::two_way(speed_limit)
        }
    }

    pub fn highway(speed_limit: f32) -> Self {
        Self {
            forward_lanes: 2,
            class: RoadClass::Highway,
            ..Self::one_way(speed_limit)
        }
    }

    fn lane_count(&self) -> u32 {
        u32::from(self.forward_lanes) + u32::from(self.backward_lanes)
    }

    /// Only valid once `lane_count` is known to fit `MAX_SEGMENT_LANES`
    fn lane_directions(&self) -> LaneDirections {
        let forward = (1u64 << self.forward_lanes) - 1;
        let backward = ((1u64 << self.backward_lanes) - 1) << self.forward_lanes;
        LaneDirections {
            forward: forward as u32,
            backward: backward as u32,
            restricted: if self.bus_lane { 1 } else { 0 },
            inverted: self.inverted,
        }
    }
}

/// One step of a route: drive along `segment` until reaching `node`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub segment: SegmentId,
    pub node: NodeId,
}

/// Edge data for the routing graph
#[derive(Debug, Clone, Copy)]
struct RoadEdge {
    segment: SegmentId,
    weight: u32, // Segment length scaled for integer weights
}

#[derive(Debug, Clone)]
pub struct SimNode {
    pub id: NodeId,
    pub position: Vector3,
    pub segments: [Option<SegmentId>; MAX_NODE_SEGMENTS],
    graph_index: NodeIndex,
}

#[derive(Debug, Clone)]
pub struct SimSegment {
    pub id: SegmentId,
    pub start: NodeId,
    pub end: NodeId,
    pub spec: RoadSpec,
    pub length: f32,
    pub lanes: Vec<LaneId>,
    edges: Vec<EdgeIndex>,
}

#[derive(Debug, Clone, Copy)]
pub struct SimLane {
    pub id: LaneId,
    pub segment: SegmentId,
    /// Node traffic in this lane drives toward
    pub toward: NodeId,
    pub speed_limit: f32,
}

pub struct SimNetwork {
    nodes: Vec<Option<SimNode>>,
    segments: Vec<Option<SimSegment>>,
    lanes: Vec<Option<SimLane>>,

    /// Routing graph; one edge per drivable direction of each segment
    graph: StableDiGraph<NodeId, RoadEdge>,

    /// Vehicles per (segment, destination node), keyed by distance travelled
    vehicles_on_segments: HashMap<(SegmentId, NodeId), BTreeMap<OrderedFloat<f32>, VehicleId>>,
}

impl SimNetwork {
    pub fn new(max_nodes: usize, max_segments: usize) -> Self {
        Self {
            nodes: vec![None; table_capacity(max_nodes, "Node")],
            segments: vec![None; table_capacity(max_segments, "Segment")],
            lanes: Vec::new(),
            graph: StableDiGraph::new(),
            vehicles_on_segments: HashMap::new(),
        }
    }

    pub fn max_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn max_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.get(id.index())?.as_ref()
    }

    pub fn segment(&self, id: SegmentId) -> Option<&SimSegment> {
        self.segments.get(id.index())?.as_ref()
    }

    pub fn lane(&self, id: LaneId) -> Option<&SimLane> {
        self.lanes.get(id.index())?.as_ref()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.iter().flatten().count()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().flatten().map(|n| n.id).collect()
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.iter().flatten().map(|s| s.id).collect()
    }

    /// Adds a node at the given position
    pub fn add_node(&mut self, position: Vector3) -> Result<NodeId> {
        let index = self
            .nodes
            .iter()
            .position(Option::is_none)
            .context("Node table is full")?;
        let id = NodeId(index as u16);
        let graph_index = self.graph.add_node(id);
        self.nodes[index] = Some(SimNode {
            id,
            position,
            segments: [None; MAX_NODE_SEGMENTS],
            graph_index,
        });
        Ok(id)
    }

    /// Adds a segment between two nodes
    pub fn add_segment(&mut self, start: NodeId, end: NodeId, spec: RoadSpec) -> Result<SegmentId> {
        if start == end {
            anyhow::bail!("Segment would start and end at {}", start);
        }
        match spec.lane_count() {
            0 => anyhow::bail!("Segment needs at least one lane"),
            n if n > MAX_SEGMENT_LANES => anyhow::bail!(
                "Segment has {} lanes, at most {} are supported",
                n,
                MAX_SEGMENT_LANES
            ),
            _ => {}
        }
        for node in [start, end] {
            let node = self.node(node).with_context(|| format!("{} not found", node))?;
            if node.segments.iter().all(Option::is_some) {
                anyhow::bail!(
                    "{} already has {} segments attached",
                    node.id,
                    MAX_NODE_SEGMENTS
                );
            }
        }
        if let Some(existing) = self.segments.iter().flatten().find(|s| {
            (s.start == start && s.end == end) || (s.start == end && s.end == start)
        }) {
            anyhow::bail!("{} already connects {} and {}", existing.id, start, end);
        }

        let index = self
            .segments
            .iter()
            .position(Option::is_none)
            .context("Segment table is full")?;
        let id = SegmentId(index as u16);

        let start_pos = self.node_position(start)?;
        let end_pos = self.node_position(end)?;
        let length = start_pos.distance(&end_pos);

        self.attach_to_node(start, id)?;
        self.attach_to_node(end, id)?;

        let mut segment = SimSegment {
            id,
            start,
            end,
            spec,
            length,
            lanes: Vec::new(),
            edges: Vec::new(),
        };
        self.build_lanes(&mut segment);
        self.build_edges(&mut segment)?;
        self.segments[index] = Some(segment);
        Ok(id)
    }

    fn node_position(&self, node: NodeId) -> Result<Vector3> {
        self.node(node)
            .map(|n| n.position)
            .with_context(|| format!("{} not found", node))
    }

    fn attach_to_node(&mut self, node: NodeId, segment: SegmentId) -> Result<()> {
        let slots = &mut self
            .nodes
            .get_mut(node.index())
            .and_then(Option::as_mut)
            .with_context(|| format!("{} not found", node))?
            .segments;
        let slot = slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .with_context(|| format!("{} has no free segment slot", node))?;
        *slot = Some(segment);
        Ok(())
    }

    fn detach_from_node(&mut self, node: NodeId, segment: SegmentId) {
        if let Some(node) = self.nodes.get_mut(node.index()).and_then(Option::as_mut) {
            for slot in node.segments.iter_mut() {
                if *slot == Some(segment) {
                    *slot = None;
                }
            }
        }
    }

    fn build_lanes(&mut self, segment: &mut SimSegment) {
        let directions = segment.spec.lane_directions();
        let lane_count = segment.spec.lane_count();
        for i in 0..lane_count {
            let start_to_end = (directions.forward >> i) & 1 == 1;
            // Inverted segments run their forward lanes from end to start
            let toward = if start_to_end != directions.inverted {
                segment.end
            } else {
                segment.start
            };
            let id = match self.lanes.iter().position(Option::is_none) {
                Some(free) => LaneId(free as u32),
                None => {
                    self.lanes.push(None);
                    LaneId((self.lanes.len() - 1) as u32)
                }
            };
            self.lanes[id.index()] = Some(SimLane {
                id,
                segment: segment.id,
                toward,
                speed_limit: segment.spec.speed_limit,
            });
            segment.lanes.push(id);
        }
    }

    fn build_edges(&mut self, segment: &mut SimSegment) -> Result<()> {
        for edge in segment.edges.drain(..) {
            self.graph.remove_edge(edge);
        }
        let start = self
            .node(segment.start)
            .context("Start node not found")?
            .graph_index;
        let end = self
            .node(segment.end)
            .context("End node not found")?
            .graph_index;
        let weight = ((segment.length * 100.0) as u32).max(1);
        let edge = RoadEdge {
            segment: segment.id,
            weight,
        };
        let directions = segment.spec.lane_directions();
        if directions.flows_toward(false) {
            segment.edges.push(self.graph.add_edge(start, end, edge));
        }
        if directions.flows_toward(true) {
            segment.edges.push(self.graph.add_edge(end, start, edge));
        }
        Ok(())
    }

    /// Remove a segment. Returns the vehicles that were on it.
    pub fn remove_segment(&mut self, id: SegmentId) -> Result<Vec<VehicleId>> {
        let segment = self
            .segments
            .get_mut(id.index())
            .and_then(Option::take)
            .with_context(|| format!("{} not found", id))?;

        self.detach_from_node(segment.start, id);
        self.detach_from_node(segment.end, id);
        for edge in &segment.edges {
            self.graph.remove_edge(*edge);
        }
        for lane in &segment.lanes {
            if let Some(slot) = self.lanes.get_mut(lane.index()) {
                *slot = None;
            }
        }

        let mut vehicles = Vec::new();
        for node in [segment.start, segment.end] {
            if let Some(map) = self.vehicles_on_segments.remove(&(id, node)) {
                vehicles.extend(map.into_values());
            }
        }
        Ok(vehicles)
    }

    /// Remove a node and every segment attached to it.
    /// Returns (removed segments, vehicles that were on them).
    pub fn remove_node(&mut self, id: NodeId) -> Result<(Vec<SegmentId>, Vec<VehicleId>)> {
        let node = self.node(id).with_context(|| format!("{} not found", id))?;
        let attached: Vec<SegmentId> = node.segments.iter().flatten().copied().collect();
        let graph_index = node.graph_index;

        let mut vehicles = Vec::new();
        for segment in &attached {
            vehicles.extend(self.remove_segment(*segment)?);
        }
        self.graph.remove_node(graph_index);
        self.nodes[id.index()] = None;
        Ok((attached, vehicles))
    }

    /// Move one end of a segment to another node.
    /// Returns the vehicles that were on the segment.
    pub fn reconnect_segment(
        &mut self,
        id: SegmentId,
        start_end: bool,
        new_node: NodeId,
    ) -> Result<Vec<VehicleId>> {
        let segment = self.segment(id).with_context(|| format!("{} not found", id))?;
        let (old_node, other) = if start_end {
            (segment.start, segment.end)
        } else {
            (segment.end, segment.start)
        };
        if new_node == other {
            anyhow::bail!("Reconnecting {} would make it a loop at {}", id, new_node);
        }
        if new_node == old_node {
            return Ok(Vec::new());
        }

        self.attach_to_node(new_node, id)?;
        self.detach_from_node(old_node, id);

        let mut segment = self.segments[id.index()]
            .take()
            .with_context(|| format!("{} not found", id))?;
        if start_end {
            segment.start = new_node;
        } else {
            segment.end = new_node;
        }
        segment.length = self
            .node_position(segment.start)?
            .distance(&self.node_position(segment.end)?);
        for lane in segment.lanes.drain(..) {
            if let Some(slot) = self.lanes.get_mut(lane.index()) {
                *slot = None;
            }
        }
        self.build_lanes(&mut segment);
        let built = self.build_edges(&mut segment);
        self.segments[id.index()] = Some(segment);
        built?;

        let mut vehicles = Vec::new();
        for node in [old_node, other] {
            if let Some(map) = self.vehicles_on_segments.remove(&(id, node)) {
                vehicles.extend(map.into_values());
            }
        }
        Ok(vehicles)
    }

    /// Finds the shortest drivable route between two nodes
    pub fn find_path(&self, start: NodeId, end: NodeId) -> Option<Vec<Hop>> {
        if start == end {
            return Some(Vec::new());
        }
        let start_index = self.node(start)?.graph_index;
        let end_index = self.node(end)?.graph_index;

        let (_, node_path) = astar(
            &self.graph,
            start_index,
            |node| node == end_index,
            |edge| edge.weight().weight,
            |_| 0, // Null heuristic = Dijkstra
        )?;

        node_path
            .windows(2)
            .map(|pair| {
                let edge = self
                    .graph
                    .edges(pair[0])
                    .filter(|edge| edge.target() == pair[1])
                    .min_by_key(|edge| edge.weight().weight)?;
                Some(Hop {
                    segment: edge.weight().segment,
                    node: *self.graph.node_weight(pair[1])?,
                })
            })
            .collect()
    }

    /// A lane of `segment` whose traffic drives toward `node`
    pub fn lane_toward(&self, segment: SegmentId, node: NodeId) -> Option<LaneId> {
        self.segment(segment)?
            .lanes
            .iter()
            .copied()
            .find(|lane| self.lane(*lane).is_some_and(|l| l.toward == node))
    }

    /// Update a vehicle's position for traffic tracking
    pub fn update_vehicle_position(
        &mut self,
        vehicle: VehicleId,
        hop: Hop,
        distance: OrderedFloat<f32>,
        previous: Option<(Hop, OrderedFloat<f32>)>,
    ) {
        if let Some((prev_hop, prev_distance)) = previous {
            if let Some(map) = self
                .vehicles_on_segments
                .get_mut(&(prev_hop.segment, prev_hop.node))
            {
                if map.get(&prev_distance) == Some(&vehicle) {
                    map.remove(&prev_distance);
                }
            }
        }
        self.vehicles_on_segments
            .entry((hop.segment, hop.node))
            .or_default()
            .insert(distance, vehicle);
    }

    /// Remove a vehicle from tracking
    pub fn remove_vehicle(&mut self, vehicle: VehicleId) {
        for map in self.vehicles_on_segments.values_mut() {
            map.retain(|_, id| *id != vehicle);
        }
    }

    /// Find the vehicle directly ahead in the same direction
    pub fn find_vehicle_ahead(
        &self,
        hop: Hop,
        distance: &OrderedFloat<f32>,
    ) -> Option<(OrderedFloat<f32>, VehicleId)> {
        self.vehicles_on_segments
            .get(&(hop.segment, hop.node))?
            .range((Bound::Excluded(distance), Bound::Unbounded))
            .next()
            .map(|(distance, vehicle)| (*distance, *vehicle))
    }

    /// Vehicles driving along `segment` toward `node`
    pub fn vehicles_toward(&self, segment: SegmentId, node: NodeId) -> Vec<VehicleId> {
        self.vehicles_on_segments
            .get(&(segment, node))
            .map(|map| map.values().copied().collect())
            .unwrap_or_default()
    }
}

impl NetworkProvider for SimNetwork {
    fn is_segment_valid(&self, segment: SegmentId) -> bool {
        self.segment(segment).is_some()
    }

    fn is_node_valid(&self, node: NodeId) -> bool {
        self.node(node).is_some()
    }

    fn segment_endpoints(&self, segment: SegmentId) -> Option<(NodeId, NodeId)> {
        self.segment(segment).map(|s| (s.start, s.end))
    }

    fn node_segments(&self, node: NodeId) -> [Option<SegmentId>; MAX_NODE_SEGMENTS] {
        self.node(node)
            .map(|n| n.segments)
            .unwrap_or([None; MAX_NODE_SEGMENTS])
    }

    fn segment_direction_at_node(&self, segment: SegmentId, node: NodeId) -> Option<Vector3> {
        let segment = self.segment(segment)?;
        let start = self.node(segment.start)?.position;
        let end = self.node(segment.end)?.position;
        if node == segment.start {
            Some(end - start)
        } else if node == segment.end {
            Some(start - end)
        } else {
            None
        }
    }

    fn lane_directions(&self, segment: SegmentId) -> LaneDirections {
        self.segment(segment)
            .map(|s| s.spec.lane_directions())
            .unwrap_or_default()
    }

    fn road_class(&self, segment: SegmentId) -> RoadClass {
        self.segment(segment)
            .map(|s| s.spec.class)
            .unwrap_or_default()
    }

    fn lane_speed_limit(&self, lane: LaneId) -> Option<f32> {
        self.lane(lane).map(|l| l.speed_limit)
    }
}
