//! Topology cache validation tests
//!
//! These tests build small networks on the in-memory host and check the
//! cached segment end views and node counts against them.

use junction_priority::simulation::topology::{
    classify_direction, ArrowDirection, NodeGeometry, RecalcMode, SegmentEndId, TopologyEvent,
    TopologyRegistry,
};
use junction_priority::simulation::priority::PriorityJunctionRegistry;
use junction_priority::simulation::{
    ArbitrationConfig, NodeId, RoadSpec, SegmentId, SimNetwork, SimWorld, Vector3,
    MAX_NODE_SEGMENTS, MAX_TABLE_SLOTS,
};

const MAX_NODES: usize = 16;
const MAX_SEGMENTS: usize = 16;

/// A four-way junction at the origin
struct Cross {
    network: SimNetwork,
    centre: NodeId,
    north_node: NodeId,
    east_node: NodeId,
    /// centre -> north
    north: SegmentId,
    /// south -> centre
    south: SegmentId,
    /// centre -> east
    east: SegmentId,
    /// west -> centre
    west: SegmentId,
}

fn cross_with(north_spec: RoadSpec) -> Cross {
    let mut network = SimNetwork::new(MAX_NODES, MAX_SEGMENTS);
    let centre = network.add_node(Vector3::new(0.0, 0.0, 0.0)).unwrap();
    let north_node = network.add_node(Vector3::new(0.0, 0.0, 10.0)).unwrap();
    let south_node = network.add_node(Vector3::new(0.0, 0.0, -10.0)).unwrap();
    let east_node = network.add_node(Vector3::new(10.0, 0.0, 0.0)).unwrap();
    let west_node = network.add_node(Vector3::new(-10.0, 0.0, 0.0)).unwrap();

    let north = network.add_segment(centre, north_node, north_spec).unwrap();
    let south = network
        .add_segment(south_node, centre, RoadSpec::two_way(10.0))
        .unwrap();
    let east = network
        .add_segment(centre, east_node, RoadSpec::two_way(10.0))
        .unwrap();
    let west = network
        .add_segment(west_node, centre, RoadSpec::two_way(10.0))
        .unwrap();

    Cross {
        network,
        centre,
        north_node,
        east_node,
        north,
        south,
        east,
        west,
    }
}

fn cross() -> Cross {
    cross_with(RoadSpec::two_way(10.0))
}

fn build(network: &SimNetwork) -> TopologyRegistry {
    TopologyRegistry::build(network, MAX_SEGMENTS, MAX_NODES)
}

#[test]
fn test_cross_junction_classification() {
    let cross = cross();
    let topology = build(&cross.network);

    let view = topology.segment_end_at(cross.south, cross.centre).unwrap();
    assert_eq!(view.node, Some(cross.centre));
    assert_eq!(view.num_connected(), 3);
    assert!(view.left.contains(cross.west));
    assert!(view.right.contains(cross.east));
    assert!(view.straight.contains(cross.north));
    assert!(view.turn.is_empty());
    assert_eq!(view.num_incoming, 3);
    assert_eq!(view.num_outgoing, 3);
    assert!(view.incoming);
    assert!(view.outgoing);
    assert!(!view.only_highways);

    assert_eq!(
        topology.direction(cross.south, cross.west, cross.centre),
        ArrowDirection::Left
    );
    assert_eq!(
        topology.direction(cross.south, cross.east, cross.centre),
        ArrowDirection::Right
    );
    assert_eq!(
        topology.direction(cross.south, cross.north, cross.centre),
        ArrowDirection::Forward
    );
    assert_eq!(
        topology.direction(cross.south, cross.south, cross.centre),
        ArrowDirection::None
    );
}

#[test]
fn test_classify_direction_thresholds() {
    // Own segment points south from the node
    let own = Vector3::new(0.0, 0.0, -1.0);

    assert_eq!(
        classify_direction(&own, &Vector3::new(-1.0, 0.0, 0.0)),
        ArrowDirection::Left
    );
    assert_eq!(
        classify_direction(&own, &Vector3::new(1.0, 0.0, 0.0)),
        ArrowDirection::Right
    );
    assert_eq!(
        classify_direction(&own, &Vector3::new(0.0, 0.0, 1.0)),
        ArrowDirection::Forward
    );
    assert_eq!(
        classify_direction(&own, &Vector3::new(0.0, 0.0, -1.0)),
        ArrowDirection::Turn
    );

    // A slight bend stays straight
    let bend = Vector3::new(0.3, 0.0, 1.0).flat_normalized().unwrap();
    assert_eq!(classify_direction(&own, &bend), ArrowDirection::Forward);

    // A sharp turn back still below the cross threshold is a U-turn
    let back = Vector3::new(0.3, 0.0, -1.0).flat_normalized().unwrap();
    assert_eq!(classify_direction(&own, &back), ArrowDirection::Turn);
}

#[test]
fn test_direction_partition_is_total_and_disjoint() {
    let world = SimWorld::create_demo_world(ArbitrationConfig::default(), Some(1)).unwrap();

    let mut checked = 0;
    for segment in world.topology.segments() {
        for start_end in [true, false] {
            let view = segment.view(start_end);
            assert!(!view.is_empty());

            assert!(view.left.is_disjoint(&view.right));
            assert!(view.left.is_disjoint(&view.straight));
            assert!(view.right.is_disjoint(&view.straight));
            assert_eq!(
                view.left.len() + view.right.len() + view.straight.len(),
                view.connected.len()
            );
            for other in view.connected.iter() {
                assert_ne!(other, segment.id());
                assert!(
                    view.left.contains(other)
                        || view.right.contains(other)
                        || view.straight.contains(other)
                );
            }
            for other in view.turn.iter() {
                assert!(view.straight.contains(other));
            }
            for other in view.incoming_segments() {
                assert!(view.connected.contains(other));
            }
            for other in view.outgoing_segments() {
                assert!(view.connected.contains(other));
            }
            assert_eq!(view.num_incoming as usize, view.incoming_segments().len());
            assert_eq!(view.num_outgoing as usize, view.outgoing_segments().len());
            assert!(view.num_incoming as usize <= view.num_connected());
            assert!(view.num_outgoing as usize <= view.num_connected());
            checked += 1;
        }
    }
    assert_eq!(checked, 24);
}

#[test]
fn test_node_counts_match_attached_views() {
    let world = SimWorld::create_demo_world(ArbitrationConfig::default(), Some(2)).unwrap();

    for node in world.topology.nodes() {
        let mut incoming = 0;
        let mut outgoing = 0;
        for end in node.segment_ends() {
            let view = world
                .topology
                .segment_end_view(end.segment, end.start_end)
                .unwrap();
            assert_eq!(view.node, Some(node.id()));
            if view.incoming {
                incoming += 1;
            }
            if view.outgoing {
                outgoing += 1;
            }
        }
        assert_eq!(node.incoming_count, incoming);
        assert_eq!(node.outgoing_count, outgoing);
        assert!(node.num_segment_ends() <= MAX_NODE_SEGMENTS);
    }
}

#[test]
fn test_incremental_build_matches_full_build() {
    let world = SimWorld::create_demo_world(ArbitrationConfig::default(), Some(3)).unwrap();
    let rebuilt = TopologyRegistry::build(
        &world.network,
        world.topology.segment_capacity(),
        world.topology.node_capacity(),
    );

    for segment in world.topology.segments() {
        let fresh = rebuilt.segment(segment.id()).unwrap();
        assert_eq!(segment.view(true), fresh.view(true));
        assert_eq!(segment.view(false), fresh.view(false));
        assert_eq!(segment.one_way, fresh.one_way);
    }
    for node in world.topology.nodes() {
        let fresh = rebuilt.node_geometry(node.id()).unwrap();
        assert_eq!(node.incoming_count, fresh.incoming_count);
        assert_eq!(node.outgoing_count, fresh.outgoing_count);
        assert_eq!(node.simple_junction, fresh.simple_junction);
        assert_eq!(node.num_segment_ends(), fresh.num_segment_ends());
    }
}

#[test]
fn test_recalculation_is_idempotent() {
    let cross = cross();
    let mut topology = build(&cross.network);

    topology.recalculate_segment(&cross.network, cross.south, RecalcMode::Propagate);
    let first = *topology.segment_end_at(cross.south, cross.centre).unwrap();
    let first_node = topology.node_geometry(cross.centre).unwrap().clone();

    topology.recalculate_segment(&cross.network, cross.south, RecalcMode::Propagate);
    let second = *topology.segment_end_at(cross.south, cross.centre).unwrap();
    let second_node = topology.node_geometry(cross.centre).unwrap();

    assert_eq!(first, second);
    assert_eq!(first_node.slots(), second_node.slots());
    assert_eq!(first_node.incoming_count, second_node.incoming_count);
    assert_eq!(first_node.outgoing_count, second_node.outgoing_count);
}

#[test]
fn test_propagation_visits_each_sibling_once() {
    let cross = cross();
    let mut topology = build(&cross.network);
    topology.drain_events();

    topology.recalculate_segment(&cross.network, cross.south, RecalcMode::Propagate);

    let recalculated: Vec<SegmentId> = topology
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            TopologyEvent::SegmentRecalculated(id) => Some(id),
            TopologyEvent::NodeSettled(_) => None,
        })
        .collect();

    assert_eq!(recalculated.len(), 4);
    assert_eq!(recalculated[0], cross.south);
    for segment in [cross.north, cross.east, cross.west] {
        assert_eq!(recalculated.iter().filter(|id| **id == segment).count(), 1);
    }
}

#[test]
fn test_no_propagate_touches_only_own_segment() {
    let cross = cross();
    let mut topology = build(&cross.network);
    topology.drain_events();

    topology.recalculate_segment(&cross.network, cross.south, RecalcMode::NoPropagate);

    let events = topology.drain_events();
    let segments: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, TopologyEvent::SegmentRecalculated(_)))
        .collect();
    assert_eq!(segments, vec![&TopologyEvent::SegmentRecalculated(cross.south)]);
    assert!(events.contains(&TopologyEvent::NodeSettled(cross.centre)));
}

#[test]
fn test_removed_segment_is_detached_and_siblings_updated() {
    let mut cross = cross();
    let mut topology = build(&cross.network);
    assert_eq!(topology.node_geometry(cross.centre).unwrap().num_segment_ends(), 4);

    cross.network.remove_segment(cross.east).unwrap();
    topology.recalculate_segment(&cross.network, cross.east, RecalcMode::Propagate);

    assert!(topology.segment(cross.east).is_none());
    assert!(topology.segment_end_at(cross.east, cross.centre).is_none());

    let centre = topology.node_geometry(cross.centre).unwrap();
    assert_eq!(centre.num_segment_ends(), 3);
    assert!(!centre.contains(SegmentEndId::new(cross.east, true)));
    assert_eq!(centre.incoming_count, 3);
    assert_eq!(centre.outgoing_count, 3);

    let east_node = topology.node_geometry(cross.east_node).unwrap();
    assert_eq!(east_node.num_segment_ends(), 0);

    let view = topology.segment_end_at(cross.south, cross.centre).unwrap();
    assert!(view.right.is_empty());
    assert!(!view.connected.contains(cross.east));
    assert_eq!(view.num_connected(), 2);
}

#[test]
fn test_removed_node_clears_slots() {
    let mut cross = cross();
    let mut topology = build(&cross.network);

    let (segments, _) = cross.network.remove_node(cross.north_node).unwrap();
    assert_eq!(segments, vec![cross.north]);
    for segment in segments {
        topology.recalculate_segment(&cross.network, segment, RecalcMode::Propagate);
    }
    topology.recalculate_node(&cross.network, cross.north_node);

    assert!(topology.node_geometry(cross.north_node).is_none());
    let slot = topology.node_slot(cross.north_node).unwrap();
    assert_eq!(slot.num_segment_ends(), 0);
    assert!(!slot.is_valid());

    let view = topology.segment_end_at(cross.south, cross.centre).unwrap();
    assert!(view.straight.is_empty());
}

#[test]
fn test_reconnected_end_moves_between_nodes() {
    let mut cross = cross();
    let mut topology = build(&cross.network);

    let far = cross
        .network
        .add_node(Vector3::new(20.0, 0.0, 5.0))
        .unwrap();
    topology.recalculate_node(&cross.network, far);

    cross
        .network
        .reconnect_segment(cross.east, false, far)
        .unwrap();
    topology.recalculate_segment(&cross.network, cross.east, RecalcMode::Propagate);

    let old = topology.node_geometry(cross.east_node).unwrap();
    assert_eq!(old.num_segment_ends(), 0);

    let new = topology.node_geometry(far).unwrap();
    assert!(new.contains(SegmentEndId::new(cross.east, false)));
    assert_eq!(new.num_segment_ends(), 1);

    let centre = topology.node_geometry(cross.centre).unwrap();
    assert!(centre.contains(SegmentEndId::new(cross.east, true)));
    assert_eq!(centre.num_segment_ends(), 4);

    let segment = topology.segment(cross.east).unwrap();
    assert_eq!(segment.nodes(), (Some(cross.centre), Some(far)));
}

#[test]
fn test_node_capacity_overflow_leaves_slots_untouched() {
    let mut node = NodeGeometry::new(NodeId(0));
    for i in 0..MAX_NODE_SEGMENTS {
        let end = SegmentEndId::new(SegmentId(i as u16), i % 2 == 0);
        assert!(node.attach_segment_end(end, RecalcMode::NoPropagate).is_ok());
    }
    let before = *node.slots();

    // Re-attaching an existing end is fine even when full
    let existing = SegmentEndId::new(SegmentId(0), true);
    assert!(node.attach_segment_end(existing, RecalcMode::NoPropagate).is_ok());

    let overflow = SegmentEndId::new(SegmentId(42), true);
    assert!(node.attach_segment_end(overflow, RecalcMode::NoPropagate).is_err());
    assert_eq!(*node.slots(), before);
    assert!(!node.contains(overflow));
}

#[test]
fn test_detach_is_noop_during_init() {
    let mut node = NodeGeometry::new(NodeId(0));
    let end = SegmentEndId::new(SegmentId(3), false);
    node.attach_segment_end(end, RecalcMode::Init).unwrap();

    assert!(node.detach_segment_end(end, RecalcMode::Init).is_ok());
    assert!(node.contains(end));

    assert!(node.detach_segment_end(end, RecalcMode::NoPropagate).is_ok());
    assert!(!node.contains(end));
    assert!(node.detach_segment_end(end, RecalcMode::NoPropagate).is_err());
}

#[test]
fn test_one_way_segment_directions() {
    let cross = cross_with(RoadSpec::one_way(10.0));
    let topology = build(&cross.network);

    let segment = topology.segment(cross.north).unwrap();
    assert!(segment.one_way);
    assert!(!segment.highway);

    let at_centre = topology.segment_end_at(cross.north, cross.centre).unwrap();
    assert!(!at_centre.incoming);
    assert!(at_centre.outgoing);
    assert!(at_centre.outgoing_one_way);
    assert!(!at_centre.incoming_one_way);

    let at_north = topology.segment_end_at(cross.north, cross.north_node).unwrap();
    assert!(at_north.incoming);
    assert!(!at_north.outgoing);
    assert!(at_north.incoming_one_way);

    let south = topology.segment_end_at(cross.south, cross.centre).unwrap();
    assert!(south.outgoing_straight.contains(cross.north));
    assert!(!south.incoming_straight.contains(cross.north));
    assert_eq!(south.num_incoming, 2);
    assert_eq!(south.num_outgoing, 3);

    let centre = topology.node_geometry(cross.centre).unwrap();
    assert_eq!(centre.incoming_count, 3);
    assert_eq!(centre.outgoing_count, 4);
}

#[test]
fn test_inverted_segment_flips_flow() {
    let spec = RoadSpec {
        inverted: true,
        ..RoadSpec::one_way(10.0)
    };
    let cross = cross_with(spec);
    let topology = build(&cross.network);

    let at_centre = topology.segment_end_at(cross.north, cross.centre).unwrap();
    assert!(at_centre.incoming);
    assert!(!at_centre.outgoing);

    let south = topology.segment_end_at(cross.south, cross.centre).unwrap();
    assert!(south.incoming_straight.contains(cross.north));
    assert!(!south.outgoing_straight.contains(cross.north));

    let lane = cross
        .network
        .lane_toward(cross.north, cross.centre)
        .unwrap();
    assert_eq!(cross.network.lane(lane).unwrap().toward, cross.centre);
}

#[test]
fn test_highway_and_bus_lane_flags() {
    let mut network = SimNetwork::new(MAX_NODES, MAX_SEGMENTS);
    let a = network.add_node(Vector3::new(0.0, 0.0, 0.0)).unwrap();
    let m = network.add_node(Vector3::new(0.0, 0.0, 50.0)).unwrap();
    let b = network.add_node(Vector3::new(0.0, 0.0, 100.0)).unwrap();
    let into = network.add_segment(a, m, RoadSpec::highway(30.0)).unwrap();
    let out = network.add_segment(m, b, RoadSpec::highway(30.0)).unwrap();

    let mut topology = build(&network);
    let segment = topology.segment(into).unwrap();
    assert!(segment.highway);
    assert!(segment.one_way);
    assert!(!segment.bus_lane);
    assert!(topology.segment_end_at(into, m).unwrap().only_highways);
    assert!(topology.segment_end_at(out, m).unwrap().only_highways);

    // A dead-end highway has no neighbors
    assert!(!topology.segment_end_at(into, a).unwrap().only_highways);

    let side = network.add_node(Vector3::new(20.0, 0.0, 50.0)).unwrap();
    topology.recalculate_node(&network, side);
    let spec = RoadSpec {
        bus_lane: true,
        ..RoadSpec::two_way(10.0)
    };
    let ramp = network.add_segment(m, side, spec).unwrap();
    topology.recalculate_segment(&network, ramp, RecalcMode::Propagate);

    assert!(topology.segment(ramp).unwrap().bus_lane);
    assert!(!topology.segment(ramp).unwrap().highway);
    assert!(!topology.segment_end_at(into, m).unwrap().only_highways);
}

#[test]
fn test_simple_junction_detection() {
    let mut network = SimNetwork::new(MAX_NODES, MAX_SEGMENTS);
    let a = network.add_node(Vector3::new(0.0, 0.0, 0.0)).unwrap();
    let m = network.add_node(Vector3::new(10.0, 0.0, 0.0)).unwrap();
    let b = network.add_node(Vector3::new(20.0, 0.0, 0.0)).unwrap();
    network.add_segment(a, m, RoadSpec::one_way(10.0)).unwrap();
    network.add_segment(m, b, RoadSpec::one_way(10.0)).unwrap();

    let topology = build(&network);
    let joint = topology.node_geometry(m).unwrap();
    assert_eq!(joint.incoming_count, 1);
    assert_eq!(joint.outgoing_count, 1);
    assert!(joint.simple_junction);

    let cross = cross();
    let topology = build(&cross.network);
    assert!(!topology.node_geometry(cross.centre).unwrap().simple_junction);
}

#[test]
fn test_out_of_range_ids_are_ignored() {
    let cross = cross();
    let mut topology = TopologyRegistry::new(2, 2);
    topology.recalculate_segment(&cross.network, SegmentId(99), RecalcMode::Propagate);
    topology.recalculate_node(&cross.network, NodeId(99));
    assert!(topology.drain_events().is_empty());
    assert!(topology.segment(SegmentId(99)).is_none());
    assert!(topology.node_geometry(NodeId(99)).is_none());
}

#[test]
fn test_propagation_on_full_node_visits_each_sibling_once() {
    let mut network = SimNetwork::new(MAX_NODES, MAX_SEGMENTS);
    let centre = network.add_node(Vector3::new(0.0, 0.0, 0.0)).unwrap();
    let spokes: Vec<SegmentId> = (0..MAX_NODE_SEGMENTS)
        .map(|i| {
            let angle = i as f32 * std::f32::consts::TAU / MAX_NODE_SEGMENTS as f32;
            let outer = network
                .add_node(Vector3::new(angle.cos() * 10.0, 0.0, angle.sin() * 10.0))
                .unwrap();
            network
                .add_segment(outer, centre, RoadSpec::two_way(10.0))
                .unwrap()
        })
        .collect();

    let mut topology = build(&network);
    let node = topology.node_geometry(centre).unwrap();
    assert_eq!(node.num_segment_ends(), MAX_NODE_SEGMENTS);
    assert!(node.slots().iter().all(Option::is_some));
    for spoke in &spokes {
        let view = topology.segment_end_at(*spoke, centre).unwrap();
        assert_eq!(view.num_connected(), MAX_NODE_SEGMENTS - 1);
    }
    topology.drain_events();

    topology.recalculate_segment(&network, spokes[0], RecalcMode::Propagate);

    let recalculated: Vec<SegmentId> = topology
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            TopologyEvent::SegmentRecalculated(id) => Some(id),
            TopologyEvent::NodeSettled(_) => None,
        })
        .collect();

    assert_eq!(recalculated.len(), MAX_NODE_SEGMENTS);
    assert_eq!(recalculated[0], spokes[0]);
    for spoke in &spokes {
        assert_eq!(recalculated.iter().filter(|id| *id == spoke).count(), 1);
    }
}

#[test]
fn test_oversized_tables_are_clamped_to_id_range() {
    let network = SimNetwork::new(1, MAX_TABLE_SLOTS + 10);
    assert_eq!(network.max_nodes(), 1);
    assert_eq!(network.max_segments(), MAX_TABLE_SLOTS);

    let topology = TopologyRegistry::new(1, MAX_TABLE_SLOTS + 1);
    let last = topology.node_slot(NodeId(u16::MAX)).unwrap();
    assert_eq!(last.id(), NodeId(u16::MAX));
    assert!(topology.node_slot(NodeId(0)).is_some());

    let registry = PriorityJunctionRegistry::new(1, MAX_TABLE_SLOTS * 2);
    assert_eq!(registry.vehicle_capacity(), MAX_TABLE_SLOTS);
}
