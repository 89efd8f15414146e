//! Indexed storage for all segment and node geometry
//!
//! The registry owns one `SegmentGeometry` per possible segment id and one
//! `NodeGeometry` per possible node id. Recalculation entry points take the
//! host network by reference and must only be driven from the single
//! mutation phase of a tick; everything else reads through `&self`.

use log::{trace, warn};

use crate::simulation::network::NetworkProvider;
use crate::simulation::types::{table_capacity, NodeId, SegmentId};

use super::node::NodeGeometry;
use super::segment::SegmentGeometry;
use super::segment_end::{ArrowDirection, SegmentEndId, SegmentEndView};

/// How far a segment recalculation reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcMode {
    /// Bulk construction: attach only, no detaching and no cross-calls
    Init,
    /// Also recalculate every other segment sharing a node with this one
    Propagate,
    /// This segment and its own node attachments only
    NoPropagate,
}

/// Emitted after each recalculation; drained by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEvent {
    SegmentRecalculated(SegmentId),
    /// A node finished recalculating. Sent on every recalculation, whether
    /// or not anything changed.
    NodeSettled(NodeId),
}

pub struct TopologyRegistry {
    segments: Vec<SegmentGeometry>,
    nodes: Vec<NodeGeometry>,
    events: Vec<TopologyEvent>,
}

impl TopologyRegistry {
    /// Create an empty registry with one slot per possible id
    pub fn new(max_segments: usize, max_nodes: usize) -> Self {
        let max_segments = table_capacity(max_segments, "Segment");
        let max_nodes = table_capacity(max_nodes, "Node");
        Self {
            segments: (0..max_segments)
                .map(|i| SegmentGeometry::new(SegmentId(i as u16)))
                .collect(),
            nodes: (0..max_nodes)
                .map(|i| NodeGeometry::new(NodeId(i as u16)))
                .collect(),
            events: Vec::new(),
        }
    }

    /// Create a registry and populate it from the host network
    pub fn build(network: &dyn NetworkProvider, max_segments: usize, max_nodes: usize) -> Self {
        let mut registry = Self::new(max_segments, max_nodes);
        registry.initialize(network);
        registry
    }

    /// Rebuild every segment and node unconditionally
    pub fn initialize(&mut self, network: &dyn NetworkProvider) {
        for i in 0..self.segments.len() {
            self.recalculate_segment(network, SegmentId(i as u16), RecalcMode::Init);
        }
        for i in 0..self.nodes.len() {
            self.recalculate_node(network, NodeId(i as u16));
        }
    }

    pub fn segment_capacity(&self) -> usize {
        self.segments.len()
    }

    pub fn node_capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Recalculate a segment from the host network.
    ///
    /// Ends that moved to another node, or belong to a segment that has
    /// become invalid, are detached from their old node first. Under
    /// `Propagate` every other segment attached to any affected node is then
    /// recalculated once with `NoPropagate`.
    pub fn recalculate_segment(
        &mut self,
        network: &dyn NetworkProvider,
        id: SegmentId,
        mode: RecalcMode,
    ) {
        let Some(segment) = self.segments.get_mut(id.index()) else {
            warn!("{} is outside the topology table; skipping recalculation", id);
            return;
        };

        let (old_start, old_end) = segment.nodes();
        segment.recalculate(network);
        let valid = segment.is_valid();
        let (new_start, new_end) = segment.nodes();
        trace!("Recalculated {} ({:?}, valid={})", id, mode, valid);
        self.events.push(TopologyEvent::SegmentRecalculated(id));

        let mut affected: Vec<NodeId> = Vec::with_capacity(4);
        for (start_end, old, new) in [(true, old_start, new_start), (false, old_end, new_end)] {
            let end = SegmentEndId::new(id, start_end);
            if let Some(old_node) = old {
                if old != new {
                    self.detach(network, old_node, end, mode);
                    affected.push(old_node);
                }
            }
            if let Some(new_node) = new {
                self.attach(network, new_node, end, mode);
                affected.push(new_node);
            }
        }

        if mode != RecalcMode::Propagate {
            return;
        }

        affected.sort();
        affected.dedup();
        let mut siblings: Vec<SegmentId> = Vec::new();
        for node in &affected {
            let Some(geometry) = self.nodes.get(node.index()) else {
                continue;
            };
            for end in geometry.segment_ends() {
                if end.segment != id && !siblings.contains(&end.segment) {
                    siblings.push(end.segment);
                }
            }
        }

        for sibling in siblings {
            self.recalculate_segment(network, sibling, RecalcMode::NoPropagate);
        }
    }

    /// Rederive a node's counts from its attached ends
    pub fn recalculate_node(&mut self, network: &dyn NetworkProvider, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id.index()) else {
            warn!("{} is outside the topology table; skipping recalculation", id);
            return;
        };
        let segments = &self.segments;
        node.recalculate(network.is_node_valid(id), |end| {
            segments
                .get(end.segment.index())
                .map(|segment| segment.view(end.start_end))
        });
        trace!(
            "Recalculated {} (in={}, out={}, simple={})",
            id,
            node.incoming_count,
            node.outgoing_count,
            node.simple_junction
        );
        self.events.push(TopologyEvent::NodeSettled(id));
    }

    fn attach(
        &mut self,
        network: &dyn NetworkProvider,
        node: NodeId,
        end: SegmentEndId,
        mode: RecalcMode,
    ) {
        let Some(geometry) = self.nodes.get_mut(node.index()) else {
            warn!("{} is outside the topology table; cannot attach {:?}", node, end);
            return;
        };
        if let Err(e) = geometry.attach_segment_end(end, mode) {
            warn!("Dropping segment end attachment: {:#}", e);
        }
        if mode != RecalcMode::Init {
            self.recalculate_node(network, node);
        }
    }

    fn detach(
        &mut self,
        network: &dyn NetworkProvider,
        node: NodeId,
        end: SegmentEndId,
        mode: RecalcMode,
    ) {
        let Some(geometry) = self.nodes.get_mut(node.index()) else {
            warn!("{} is outside the topology table; cannot detach {:?}", node, end);
            return;
        };
        if !network.is_node_valid(node) {
            // Recalculating a removed node empties all of its slots at once
            if mode != RecalcMode::Init && geometry.is_valid() {
                self.recalculate_node(network, node);
            }
            return;
        }
        if let Err(e) = geometry.detach_segment_end(end, mode) {
            warn!("Ignoring segment end removal: {:#}", e);
        }
        if mode != RecalcMode::Init {
            self.recalculate_node(network, node);
        }
    }

    /// Take all events emitted since the last drain
    pub fn drain_events(&mut self) -> Vec<TopologyEvent> {
        std::mem::take(&mut self.events)
    }

    /// Geometry of a valid segment
    pub fn segment(&self, id: SegmentId) -> Option<&SegmentGeometry> {
        self.segments.get(id.index()).filter(|s| s.is_valid())
    }

    pub fn segment_end_view(&self, id: SegmentId, start_end: bool) -> Option<&SegmentEndView> {
        self.segment(id)
            .map(|segment| segment.view(start_end))
            .filter(|view| !view.is_empty())
    }

    /// View of whichever end of `segment` is attached to `node`
    pub fn segment_end_at(&self, segment: SegmentId, node: NodeId) -> Option<&SegmentEndView> {
        self.segment(segment)?
            .end_at(node)
            .map(|end| end.view())
    }

    /// Geometry of a valid node
    pub fn node_geometry(&self, id: NodeId) -> Option<&NodeGeometry> {
        self.nodes.get(id.index()).filter(|n| n.is_valid())
    }

    /// Raw node slot storage, including invalid nodes
    pub fn node_slot(&self, id: NodeId) -> Option<&NodeGeometry> {
        self.nodes.get(id.index())
    }

    pub fn direction(&self, from: SegmentId, to: SegmentId, node: NodeId) -> ArrowDirection {
        self.segment_end_at(from, node)
            .map(|view| view.direction_to(to))
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeGeometry> {
        self.nodes.iter().filter(|n| n.is_valid())
    }

    pub fn segments(&self) -> impl Iterator<Item = &SegmentGeometry> {
        self.segments.iter().filter(|s| s.is_valid())
    }
}
