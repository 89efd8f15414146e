//! Main simulation world that ties everything together
//!
//! `SimWorld` plays the host's part: it owns the road network and the
//! vehicles, mutates the network, drives topology recalculation, answers
//! conflict queries and applies the arbitration engine's speed directives.

use anyhow::{Context, Result};
use log::{info, warn};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::Rng;
use rand::SeedableRng;
use std::collections::HashMap;

use super::config::ArbitrationConfig;
use super::network::ConflictOracle;
use super::priority::{
    ApproachQuery, ArbitrationEngine, HostContext, PriorityRuleKind, PriorityRuleTable, RuleStore,
    SpeedDirective,
};
use super::sim_network::{Hop, RoadSpec, SimNetwork};
use super::topology::{RecalcMode, TopologyRegistry};
use super::types::{table_capacity, LaneId, NodeId, SegmentId, Vector3, VehicleId};

/// Distance from a node at which vehicles start asking for right of way
pub const APPROACH_DISTANCE: f32 = 6.0;

/// Length of a vehicle in world units
pub const VEHICLE_LENGTH: f32 = 2.0;

/// Safe following distance multiplier for VEHICLE_LENGTH
pub const SAFE_FOLLOWING_MULTIPLIER: f32 = 1.5;

/// Ticks between engine housekeeping passes
pub const HOUSEKEEPING_INTERVAL: u64 = 100;

const DEFAULT_MAX_NODES: usize = 64;
const DEFAULT_MAX_SEGMENTS: usize = 128;
const DEFAULT_MAX_VEHICLES: usize = 256;

/// Route lookup progress for a vehicle
#[derive(Debug, Clone, PartialEq)]
pub enum PathStatus {
    /// Requested, resolved during the next tick's path phase
    Pending,
    Ready(Vec<Hop>),
    Failed,
}

/// Result of a vehicle update indicating what action should be taken
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VehicleUpdateResult {
    Continue,
    /// Crossed a node and moved onto the next segment of its route
    CrossedNode(NodeId),
    ArrivedAtDestination(NodeId),
    Despawn,
}

/// A vehicle in the simulation
#[derive(Debug, Clone)]
pub struct SimVehicle {
    pub id: VehicleId,
    pub origin: NodeId,
    pub destination: NodeId,
    pub path: PathStatus,
    /// Index of the current hop in the route
    pub hop: usize,
    pub distance_along_segment: OrderedFloat<f32>,
    pub speed: f32,
    pub desired_speed: f32,
    pub lane: Option<LaneId>,
}

impl SimVehicle {
    pub fn current_hop(&self) -> Option<Hop> {
        match &self.path {
            PathStatus::Ready(path) => path.get(self.hop).copied(),
            _ => None,
        }
    }

    /// Remaining distance to the node ahead
    pub fn distance_to_node(&self, network: &SimNetwork) -> Option<f32> {
        let hop = self.current_hop()?;
        let length = network.segment(hop.segment)?.length;
        Some((length - self.distance_along_segment.into_inner()).max(0.0))
    }

    /// Advance along the route, obeying the speed directive if one was issued
    pub fn update(
        &mut self,
        delta_secs: f32,
        directive: Option<SpeedDirective>,
        network: &mut SimNetwork,
    ) -> Result<VehicleUpdateResult> {
        let Some(hop) = self.current_hop() else {
            return Ok(VehicleUpdateResult::Despawn);
        };
        let segment = network.segment(hop.segment).context("Segment not found")?;
        let length = segment.length;
        let limit = segment.spec.speed_limit;
        let previous = (hop, self.distance_along_segment);

        self.speed = match directive {
            Some(SpeedDirective::Hold) => 0.0,
            Some(SpeedDirective::Decelerate(target_sq)) => {
                self.speed.min(target_sq.max(0.0).sqrt())
            }
            Some(SpeedDirective::Proceed(max_speed)) => self.desired_speed.min(max_speed),
            None => self.desired_speed.min(limit),
        };

        let mut distance_delta = self.speed * delta_secs;
        if let Some((ahead_distance, _)) =
            network.find_vehicle_ahead(hop, &self.distance_along_segment)
        {
            let gap = ahead_distance - self.distance_along_segment;
            let safe_following_distance = VEHICLE_LENGTH * SAFE_FOLLOWING_MULTIPLIER;
            if gap <= OrderedFloat(distance_delta + safe_following_distance) {
                distance_delta = 0.0;
                self.speed = 0.0;
            }
        }

        self.distance_along_segment += distance_delta;

        if self.distance_along_segment >= OrderedFloat(length) {
            self.hop += 1;
            let Some(next) = self.current_hop() else {
                network.remove_vehicle(self.id);
                return Ok(VehicleUpdateResult::ArrivedAtDestination(hop.node));
            };
            self.distance_along_segment = OrderedFloat(0.0);
            self.lane = network.lane_toward(next.segment, next.node);
            network.update_vehicle_position(
                self.id,
                next,
                self.distance_along_segment,
                Some(previous),
            );
            return Ok(VehicleUpdateResult::CrossedNode(hop.node));
        }

        network.update_vehicle_position(self.id, hop, self.distance_along_segment, Some(previous));
        Ok(VehicleUpdateResult::Continue)
    }
}

/// Trip counters for the world
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldStats {
    pub spawned: u64,
    pub completed: u64,
    pub failed_paths: u64,
    pub despawned: u64,
}

/// Answers conflict queries from the current vehicle positions.
///
/// Vehicles on stop or yield approaches give way to anything approaching on
/// a main or uncontrolled approach. Main-road vehicles give way to main-road
/// traffic coming from their right.
pub struct IncomingTraffic<'a> {
    pub vehicles: &'a HashMap<VehicleId, SimVehicle>,
    pub network: &'a SimNetwork,
    pub topology: &'a TopologyRegistry,
    pub rules: &'a dyn RuleStore,
}

impl ConflictOracle for IncomingTraffic<'_> {
    fn has_incoming_vehicles_towards(&self, vehicle: VehicleId, node: NodeId) -> bool {
        let Some(own_hop) = self.vehicles.get(&vehicle).and_then(SimVehicle::current_hop) else {
            return false;
        };
        let own_rule = self.rules.rule_for(node, own_hop.segment);
        let Some(own_view) = self.topology.segment_end_at(own_hop.segment, node) else {
            return false;
        };
        let incoming = own_view.incoming_segments();

        self.vehicles.values().any(|other| {
            if other.id == vehicle {
                return false;
            }
            let Some(hop) = other.current_hop() else {
                return false;
            };
            if hop.node != node || !incoming.contains(&hop.segment) {
                return false;
            }
            if !other
                .distance_to_node(self.network)
                .is_some_and(|d| d <= APPROACH_DISTANCE)
            {
                return false;
            }

            let other_has_priority = matches!(
                self.rules.rule_for(node, hop.segment),
                None | Some(PriorityRuleKind::Main)
            );
            match own_rule {
                Some(PriorityRuleKind::Stop) | Some(PriorityRuleKind::Yield) => other_has_priority,
                Some(PriorityRuleKind::Main) | None => {
                    other_has_priority && own_view.incoming_right.contains(hop.segment)
                }
            }
        })
    }
}

/// The main simulation world
pub struct SimWorld {
    pub network: SimNetwork,
    pub topology: TopologyRegistry,
    pub rules: PriorityRuleTable,
    pub engine: ArbitrationEngine,
    pub vehicles: HashMap<VehicleId, SimVehicle>,
    max_vehicles: usize,

    /// Optional seeded RNG for reproducible simulations
    rng: Option<StdRng>,

    /// Simulation time
    pub time: f32,
    pub ticks: u64,
    pub stats: WorldStats,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new(ArbitrationConfig::default())
    }
}

impl SimWorld {
    fn new_internal(
        config: ArbitrationConfig,
        max_nodes: usize,
        max_segments: usize,
        max_vehicles: usize,
        seed: Option<u64>,
    ) -> Self {
        let network = SimNetwork::new(max_nodes, max_segments);
        let topology = TopologyRegistry::build(&network, max_segments, max_nodes);
        let engine = match seed {
            Some(seed) => ArbitrationEngine::with_seed(config, max_segments, max_vehicles, seed),
            None => ArbitrationEngine::new(config, max_segments, max_vehicles),
        };
        Self {
            network,
            topology,
            rules: PriorityRuleTable::new(),
            engine,
            vehicles: HashMap::new(),
            max_vehicles: table_capacity(max_vehicles, "Vehicle"),
            rng: seed.map(StdRng::seed_from_u64),
            time: 0.0,
            ticks: 0,
            stats: WorldStats::default(),
        }
    }

    pub fn new(config: ArbitrationConfig) -> Self {
        Self::new_internal(
            config,
            DEFAULT_MAX_NODES,
            DEFAULT_MAX_SEGMENTS,
            DEFAULT_MAX_VEHICLES,
            None,
        )
    }

    /// Create a new SimWorld with a seeded RNG for reproducible simulations
    pub fn new_with_seed(config: ArbitrationConfig, seed: u64) -> Self {
        Self::new_internal(
            config,
            DEFAULT_MAX_NODES,
            DEFAULT_MAX_SEGMENTS,
            DEFAULT_MAX_VEHICLES,
            Some(seed),
        )
    }

    /// Create a world with explicit table sizes
    pub fn with_capacity(
        config: ArbitrationConfig,
        max_nodes: usize,
        max_segments: usize,
        max_vehicles: usize,
        seed: Option<u64>,
    ) -> Self {
        Self::new_internal(config, max_nodes, max_segments, max_vehicles, seed)
    }

    fn random_range(&mut self, range: std::ops::Range<f32>) -> f32 {
        match &mut self.rng {
            Some(rng) => rng.random_range(range),
            None => rand::rng().random_range(range),
        }
    }

    fn choose_random<T: Copy>(&mut self, slice: &[T]) -> Option<T> {
        match &mut self.rng {
            Some(rng) => slice.choose(rng).copied(),
            None => slice.choose(&mut rand::rng()).copied(),
        }
    }

    /// Hand pending topology events to the arbitration engine
    fn sync_topology(&mut self) {
        let events = self.topology.drain_events();
        self.engine.apply_topology_events(&self.topology, &events);
    }

    fn recalculate_segment(&mut self, segment: SegmentId) {
        self.topology
            .recalculate_segment(&self.network, segment, RecalcMode::Propagate);
    }

    /// Add a node to the world
    pub fn add_node(&mut self, position: Vector3) -> Result<NodeId> {
        let id = self.network.add_node(position)?;
        self.topology.recalculate_node(&self.network, id);
        self.sync_topology();
        Ok(id)
    }

    /// Add a segment between two nodes
    pub fn add_road(&mut self, start: NodeId, end: NodeId, spec: RoadSpec) -> Result<SegmentId> {
        let id = self.network.add_segment(start, end, spec)?;
        self.recalculate_segment(id);
        self.sync_topology();
        Ok(id)
    }

    /// Add a two-way, single-lane-each-way segment
    pub fn add_two_way_road(
        &mut self,
        start: NodeId,
        end: NodeId,
        speed_limit: f32,
    ) -> Result<SegmentId> {
        self.add_road(start, end, RoadSpec::two_way(speed_limit))
    }

    /// Remove a segment. Vehicles on it are despawned and its rules dropped.
    pub fn remove_road(&mut self, segment: SegmentId) -> Result<()> {
        let vehicles = self.network.remove_segment(segment)?;
        for vehicle in vehicles {
            self.despawn_vehicle(vehicle);
        }
        self.rules.remove_segment(segment);
        self.recalculate_segment(segment);
        self.sync_topology();
        Ok(())
    }

    /// Remove a node with all its segments
    pub fn remove_node(&mut self, node: NodeId) -> Result<()> {
        let (segments, vehicles) = self.network.remove_node(node)?;
        for vehicle in vehicles {
            self.despawn_vehicle(vehicle);
        }
        self.rules.remove_node(node);
        for segment in segments {
            self.rules.remove_segment(segment);
            self.recalculate_segment(segment);
        }
        self.topology.recalculate_node(&self.network, node);
        self.sync_topology();
        Ok(())
    }

    /// Move one end of a segment onto another node
    pub fn reconnect_road(
        &mut self,
        segment: SegmentId,
        start_end: bool,
        node: NodeId,
    ) -> Result<()> {
        let vehicles = self.network.reconnect_segment(segment, start_end, node)?;
        for vehicle in vehicles {
            self.despawn_vehicle(vehicle);
        }
        self.rules.remove_segment(segment);
        self.recalculate_segment(segment);
        self.sync_topology();
        Ok(())
    }

    /// Configure a priority rule on the approach from `segment` into `node`
    pub fn set_rule(
        &mut self,
        node: NodeId,
        segment: SegmentId,
        rule: PriorityRuleKind,
    ) -> Result<()> {
        self.topology
            .segment_end_at(segment, node)
            .with_context(|| format!("{} does not end at {}", segment, node))?;
        self.rules.set_rule(node, segment, rule);
        Ok(())
    }

    pub fn remove_rule(&mut self, node: NodeId, segment: SegmentId) {
        self.rules.remove_rule(node, segment);
    }

    fn next_vehicle_id(&self) -> Result<VehicleId> {
        (0..self.max_vehicles)
            .map(|i| VehicleId(i as u16))
            .find(|id| !self.vehicles.contains_key(id))
            .context("Vehicle table is full")
    }

    /// Request a trip. The route is looked up during the next tick.
    pub fn request_trip(&mut self, origin: NodeId, destination: NodeId) -> Result<VehicleId> {
        if self.network.node(origin).is_none() {
            anyhow::bail!("Origin {} not found", origin);
        }
        if self.network.node(destination).is_none() {
            anyhow::bail!("Destination {} not found", destination);
        }
        let id = self.next_vehicle_id()?;
        let desired_speed = self.random_range(5.0..8.0);
        self.vehicles.insert(
            id,
            SimVehicle {
                id,
                origin,
                destination,
                path: PathStatus::Pending,
                hop: 0,
                distance_along_segment: OrderedFloat(0.0),
                speed: desired_speed,
                desired_speed,
                lane: None,
            },
        );
        self.stats.spawned += 1;
        Ok(id)
    }

    /// Request up to `count` trips between random distinct nodes.
    /// Returns how many were accepted.
    pub fn spawn_random_trips(&mut self, count: usize) -> usize {
        let nodes = self.network.node_ids();
        if nodes.len() < 2 {
            return 0;
        }
        let mut spawned = 0;
        for _ in 0..count {
            let (Some(origin), Some(destination)) =
                (self.choose_random(&nodes), self.choose_random(&nodes))
            else {
                break;
            };
            if origin == destination {
                continue;
            }
            match self.request_trip(origin, destination) {
                Ok(_) => spawned += 1,
                Err(e) => {
                    warn!("Failed to request trip: {:#}", e);
                    break;
                }
            }
        }
        spawned
    }

    /// Despawn a vehicle and clean up references
    fn despawn_vehicle(&mut self, vehicle: VehicleId) {
        if self.vehicles.remove(&vehicle).is_some() {
            self.stats.despawned += 1;
        }
        self.network.remove_vehicle(vehicle);
        self.engine.release_vehicle(vehicle);
    }

    /// Resolve pending route requests
    fn resolve_paths(&mut self) {
        let mut pending: Vec<VehicleId> = self
            .vehicles
            .values()
            .filter(|vehicle| vehicle.path == PathStatus::Pending)
            .map(|vehicle| vehicle.id)
            .collect();
        pending.sort();

        let mut failed = Vec::new();
        for id in pending {
            let Some(vehicle) = self.vehicles.get_mut(&id) else {
                continue;
            };
            match self.network.find_path(vehicle.origin, vehicle.destination) {
                Some(path) if !path.is_empty() => {
                    let first = path[0];
                    vehicle.lane = self.network.lane_toward(first.segment, first.node);
                    vehicle.path = PathStatus::Ready(path);
                    self.network.update_vehicle_position(
                        vehicle.id,
                        first,
                        vehicle.distance_along_segment,
                        None,
                    );
                }
                _ => {
                    vehicle.path = PathStatus::Failed;
                    failed.push(vehicle.id);
                }
            }
        }
        for vehicle in failed {
            self.stats.failed_paths += 1;
            self.despawn_vehicle(vehicle);
        }
    }

    /// Ask the engine for a directive for every vehicle close to its next node
    fn arbitrate(&mut self) -> HashMap<VehicleId, SpeedDirective> {
        let traffic = IncomingTraffic {
            vehicles: &self.vehicles,
            network: &self.network,
            topology: &self.topology,
            rules: &self.rules,
        };
        let host = HostContext {
            network: &self.network,
            rules: &self.rules,
            oracle: &traffic,
        };

        let mut ids: Vec<VehicleId> = self.vehicles.keys().copied().collect();
        ids.sort();

        let mut directives = HashMap::new();
        for id in ids {
            let Some(vehicle) = self.vehicles.get(&id) else {
                continue;
            };
            let (Some(hop), Some(lane)) = (vehicle.current_hop(), vehicle.lane) else {
                continue;
            };
            if !vehicle
                .distance_to_node(&self.network)
                .is_some_and(|d| d <= APPROACH_DISTANCE)
            {
                continue;
            }
            let directive = self.engine.resolve_approach_and_arbitrate(
                &self.topology,
                &host,
                ApproachQuery {
                    vehicle: id,
                    node: hop.node,
                    segment: hop.segment,
                    lane,
                    velocity_sq: vehicle.speed * vehicle.speed,
                },
            );
            directives.insert(id, directive);
        }
        directives
    }

    /// Update all vehicles in the simulation
    fn update_vehicles(
        &mut self,
        delta_secs: f32,
        directives: &HashMap<VehicleId, SpeedDirective>,
    ) -> Vec<(VehicleId, VehicleUpdateResult)> {
        let mut results = Vec::new();

        let mut ids: Vec<VehicleId> = self.vehicles.keys().copied().collect();
        ids.sort();

        for id in ids {
            let Some(vehicle) = self.vehicles.get_mut(&id) else {
                continue;
            };
            if vehicle.current_hop().is_none() {
                continue;
            }
            let result = vehicle
                .update(delta_secs, directives.get(&id).copied(), &mut self.network)
                .unwrap_or_else(|e| {
                    warn!("Vehicle {} update failed: {:#}", id, e);
                    VehicleUpdateResult::Despawn
                });
            results.push((id, result));
        }

        results
    }

    /// Advance the world by one tick
    pub fn tick(&mut self, delta_secs: f32) {
        self.time += delta_secs;
        self.ticks += 1;
        self.engine.advance_tick();

        self.resolve_paths();
        let directives = self.arbitrate();

        for (id, result) in self.update_vehicles(delta_secs, &directives) {
            match result {
                VehicleUpdateResult::Continue => {}
                VehicleUpdateResult::CrossedNode(_) => self.engine.clear_approach(id),
                VehicleUpdateResult::ArrivedAtDestination(_) => {
                    self.stats.completed += 1;
                    self.vehicles.remove(&id);
                    self.engine.release_vehicle(id);
                }
                VehicleUpdateResult::Despawn => self.despawn_vehicle(id),
            }
        }

        if self.ticks % HOUSEKEEPING_INTERVAL == 0 {
            self.engine.housekeeping(&self.rules);
        }
    }

    /// Create the default demo world
    pub fn create_demo_world(config: ArbitrationConfig, seed: Option<u64>) -> Result<Self> {
        let world = match seed {
            Some(seed) => Self::new_with_seed(config, seed),
            None => Self::new(config),
        };
        Self::build_demo_world(world)
    }

    /// Lay out a 3x3 grid of two-way roads.
    ///
    /// East-west roads are main roads. North-south roads stop at the centre
    /// junction and yield everywhere else.
    pub fn build_demo_world(mut world: SimWorld) -> Result<Self> {
        let spacing = 40.0;
        let speed_limit = 8.0;
        let mut grid = [[NodeId::default(); 3]; 3];

        for (row, nodes) in grid.iter_mut().enumerate() {
            for (col, node) in nodes.iter_mut().enumerate() {
                let x = (col as f32 - 1.0) * spacing;
                let z = (row as f32 - 1.0) * spacing;
                *node = world.add_node(Vector3::new(x, 0.0, z))?;
            }
        }

        let mut main_roads = Vec::new();
        for row in grid.iter() {
            for col in 0..2 {
                let id = world.add_two_way_road(row[col], row[col + 1], speed_limit)?;
                main_roads.push((id, row[col], row[col + 1]));
            }
        }

        let mut side_roads = Vec::new();
        for row in 0..2 {
            for col in 0..3 {
                let id = world.add_two_way_road(grid[row][col], grid[row + 1][col], speed_limit)?;
                side_roads.push((id, grid[row][col], grid[row + 1][col]));
            }
        }

        let centre = grid[1][1];
        for (segment, a, b) in main_roads {
            for node in [a, b] {
                if world.is_junction(node) {
                    world.set_rule(node, segment, PriorityRuleKind::Main)?;
                }
            }
        }
        for (segment, a, b) in side_roads {
            for node in [a, b] {
                if world.is_junction(node) {
                    let rule = if node == centre {
                        PriorityRuleKind::Stop
                    } else {
                        PriorityRuleKind::Yield
                    };
                    world.set_rule(node, segment, rule)?;
                }
            }
        }

        Ok(world)
    }

    /// More than two segment ends meet at the node
    pub fn is_junction(&self, node: NodeId) -> bool {
        self.topology
            .node_geometry(node)
            .is_some_and(|geometry| geometry.num_segment_ends() > 2)
    }

    /// Log a summary of the world state
    pub fn log_summary(&self) {
        let arbitration = self.engine.stats();
        info!("Time: {:.2}s ({} ticks)", self.time, self.ticks);
        info!(
            "Nodes: {}, Segments: {}, Priority rules: {}",
            self.network.node_count(),
            self.network.segment_count(),
            self.rules.len()
        );
        info!("Active vehicles: {}", self.vehicles.len());
        info!("Trips spawned: {}", self.stats.spawned);
        info!("Trips completed: {}", self.stats.completed);
        info!("Failed routes: {}", self.stats.failed_paths);
        info!(
            "Directives: proceed={}, hold={}, decelerate={}",
            arbitration.proceeds, arbitration.holds, arbitration.decelerations
        );
        info!(
            "Releases: forced={}, implicit={}",
            arbitration.forced_releases, arbitration.implicit_releases
        );
    }
}
