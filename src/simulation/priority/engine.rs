//! Per-tick arbitration entry point
//!
//! The host calls `resolve_approach_and_arbitrate` once per vehicle per
//! simulation step. The engine works out which controlled approach the
//! vehicle is on, keeps approach membership in sync, and runs the vehicle's
//! state machine to produce a speed directive.

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::simulation::config::ArbitrationConfig;
use crate::simulation::network::{ConflictOracle, NetworkProvider};
use crate::simulation::topology::{TopologyEvent, TopologyRegistry};
use crate::simulation::types::{LaneId, NodeId, SegmentId, VehicleId};

use super::registry::PriorityJunctionRegistry;
use super::rules::{ApproachKey, PriorityRuleKind, RuleStore};
use super::state::{step, CarState, SpeedDirective, StepInput, VehicleArbitrationState};

/// Host collaborators consulted during arbitration
#[derive(Clone, Copy)]
pub struct HostContext<'a> {
    pub network: &'a dyn NetworkProvider,
    pub rules: &'a dyn RuleStore,
    pub oracle: &'a dyn ConflictOracle,
}

/// Where a vehicle is this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproachQuery {
    pub vehicle: VehicleId,
    /// The node the vehicle is driving toward
    pub node: NodeId,
    /// The segment the vehicle is on
    pub segment: SegmentId,
    pub lane: LaneId,
    pub velocity_sq: f32,
}

/// Running totals of arbitration outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArbitrationStats {
    pub proceeds: u64,
    pub holds: u64,
    pub decelerations: u64,
    /// Vehicles let through after waiting the maximum number of ticks
    pub forced_releases: u64,
    /// Vehicles released because their approach stopped being controlled
    pub implicit_releases: u64,
}

pub struct ArbitrationEngine {
    config: ArbitrationConfig,
    registry: PriorityJunctionRegistry,
    rng: Option<StdRng>,
    tick: u64,
    stats: ArbitrationStats,
}

impl ArbitrationEngine {
    fn new_internal(
        config: ArbitrationConfig,
        max_segments: usize,
        max_vehicles: usize,
        rng: Option<StdRng>,
    ) -> Self {
        Self {
            config,
            registry: PriorityJunctionRegistry::new(max_segments, max_vehicles),
            rng,
            tick: 0,
            stats: ArbitrationStats::default(),
        }
    }

    pub fn new(config: ArbitrationConfig, max_segments: usize, max_vehicles: usize) -> Self {
        Self::new_internal(config, max_segments, max_vehicles, None)
    }

    /// Create an engine with a seeded RNG for reproducible yield thresholds
    pub fn with_seed(
        config: ArbitrationConfig,
        max_segments: usize,
        max_vehicles: usize,
        seed: u64,
    ) -> Self {
        Self::new_internal(
            config,
            max_segments,
            max_vehicles,
            Some(StdRng::seed_from_u64(seed)),
        )
    }

    pub fn config(&self) -> &ArbitrationConfig {
        &self.config
    }

    pub fn registry(&self) -> &PriorityJunctionRegistry {
        &self.registry
    }

    pub fn state(&self, vehicle: VehicleId) -> Option<&VehicleArbitrationState> {
        self.registry.state(vehicle)
    }

    pub fn stats(&self) -> &ArbitrationStats {
        &self.stats
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn advance_tick(&mut self) {
        self.tick += 1;
    }

    fn random_yield_threshold(&mut self) -> f32 {
        let range = self.config.yield_threshold_range.clone();
        match &mut self.rng {
            Some(rng) => rng.random_range(range),
            None => rand::rng().random_range(range),
        }
    }

    /// The rule governing `key`, if it is a controlled approach that traffic
    /// can actually arrive on
    fn resolve_rule(
        topology: &TopologyRegistry,
        rules: &dyn RuleStore,
        key: ApproachKey,
    ) -> Option<PriorityRuleKind> {
        let view = topology.segment_end_at(key.segment, key.node)?;
        if !view.incoming {
            return None;
        }
        rules.rule_for(key.node, key.segment)
    }

    /// Arbitrate one vehicle for this tick
    pub fn resolve_approach_and_arbitrate(
        &mut self,
        topology: &TopologyRegistry,
        host: &HostContext<'_>,
        query: ApproachQuery,
    ) -> SpeedDirective {
        // No limit known for the lane means no cap.
        let speed_limit = host
            .network
            .lane_speed_limit(query.lane)
            .unwrap_or(f32::INFINITY);
        let vehicle = query.vehicle;
        let tick = self.tick;
        let capacity = self.registry.vehicle_capacity();

        let Some(slot) = self.registry.state_mut(vehicle) else {
            warn!(
                "{} does not fit the vehicle table (capacity {}); letting it through",
                vehicle, capacity
            );
            self.stats.proceeds += 1;
            return SpeedDirective::Proceed(speed_limit);
        };
        slot.last_seen_tick = tick;
        let mut state = *slot;

        let key = ApproachKey::new(query.node, query.segment);
        let rule = Self::resolve_rule(topology, host.rules, key);

        let moved = state.current_approach != Some(key) || state.lane != Some(query.lane);
        if moved {
            if let Some(old) = state.current_approach {
                self.registry.part(vehicle, old);
            }
            state.reset();
            if let Some(rule) = rule {
                let threshold = self.random_yield_threshold();
                state.enter(key, query.lane, threshold);
                debug!(
                    "{} entered {:?} approach {}->{} (yield threshold {:.2})",
                    vehicle, rule, key.segment, key.node, threshold
                );
            }
        } else if rule.is_none() && state.current_approach.is_some() && !state.has_left() {
            warn!(
                "{} is on {}->{} which is no longer a controlled approach; releasing it",
                vehicle, key.segment, key.node
            );
            self.registry.part(vehicle, key);
            state.leave();
            self.stats.implicit_releases += 1;
        }

        if let Some(rule) = rule {
            if self.registry.ensure_approach(key, rule) {
                self.registry.join(vehicle, key);
            }
        }

        let directive = match rule {
            Some(rule) => {
                let input = StepInput {
                    rule,
                    velocity_sq: query.velocity_sq,
                    speed_limit,
                };
                // Nothing can conflict when no neighbor carries traffic into the node
                let has_incoming_neighbors = topology
                    .segment_end_at(key.segment, key.node)
                    .is_some_and(|view| view.num_incoming > 0);
                let oracle = host.oracle;
                let (next, directive) = step(state, &input, &self.config, || {
                    has_incoming_neighbors
                        && oracle.has_incoming_vehicles_towards(vehicle, query.node)
                });
                if next.car_state != state.car_state {
                    debug!(
                        "{} {:?} -> {:?} at {} after {} ticks",
                        vehicle, state.car_state, next.car_state, query.node, next.wait_ticks
                    );
                }
                if next.car_state == CarState::Leave
                    && state.car_state != CarState::Leave
                    && next.wait_ticks >= self.config.max_wait_ticks
                {
                    self.stats.forced_releases += 1;
                }
                state = next;
                directive
            }
            None => SpeedDirective::Proceed(speed_limit),
        };

        match directive {
            SpeedDirective::Proceed(_) => self.stats.proceeds += 1,
            SpeedDirective::Hold => self.stats.holds += 1,
            SpeedDirective::Decelerate(_) => self.stats.decelerations += 1,
        }

        if let Some(slot) = self.registry.state_mut(vehicle) {
            *slot = state;
        }
        directive
    }

    /// The vehicle has crossed its node; forget its approach
    pub fn clear_approach(&mut self, vehicle: VehicleId) {
        let Some(slot) = self.registry.state_mut(vehicle) else {
            return;
        };
        let previous = slot.current_approach;
        slot.reset();
        if let Some(key) = previous {
            self.registry.part(vehicle, key);
        }
    }

    /// The host destroyed the vehicle
    pub fn release_vehicle(&mut self, vehicle: VehicleId) {
        self.registry.release_vehicle(vehicle);
    }

    /// Drop approaches invalidated by topology changes
    pub fn apply_topology_events(&mut self, topology: &TopologyRegistry, events: &[TopologyEvent]) {
        for event in events {
            let stale = match *event {
                TopologyEvent::NodeSettled(node) => self.registry.approach_keys(|approach| {
                    approach.key.node == node
                        && (topology.node_geometry(node).is_none()
                            || topology.segment_end_at(approach.key.segment, node).is_none())
                }),
                TopologyEvent::SegmentRecalculated(segment) => {
                    if topology.segment(segment).is_some() {
                        continue;
                    }
                    self.registry
                        .approaches_on(segment)
                        .map(|approach| approach.key)
                        .collect()
                }
            };
            for key in stale {
                self.drop_approach(key);
            }
        }
    }

    /// Drop approaches whose rule was removed and reclaim vehicles the host
    /// has not reported for a while
    pub fn housekeeping(&mut self, rules: &dyn RuleStore) {
        let unruled = self
            .registry
            .approach_keys(|approach| rules.rule_for(approach.key.node, approach.key.segment).is_none());
        for key in unruled {
            self.drop_approach(key);
        }

        let horizon = self.config.stale_vehicle_ticks;
        let stale: Vec<VehicleId> = self
            .registry
            .states()
            .filter(|(_, state)| self.tick.saturating_sub(state.last_seen_tick) > horizon)
            .map(|(vehicle, _)| vehicle)
            .collect();
        for vehicle in stale {
            debug!("Reclaiming {} (not seen for {} ticks)", vehicle, horizon);
            self.registry.release_vehicle(vehicle);
        }
    }

    fn drop_approach(&mut self, key: ApproachKey) {
        let Some(approach) = self.registry.remove_approach(key) else {
            return;
        };
        debug!(
            "Dropping approach {}->{} with {} vehicles",
            key.segment,
            key.node,
            approach.len()
        );
        for vehicle in approach.vehicles() {
            if let Some(state) = self.registry.state_mut(vehicle) {
                if state.current_approach == Some(key) && !state.has_left() {
                    state.leave();
                    self.stats.implicit_releases += 1;
                }
            }
        }
    }
}
