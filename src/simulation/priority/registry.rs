//! Storage for controlled approaches and per-vehicle arbitration state
//!
//! Approaches live in a table indexed by segment id with one slot per
//! segment end. Vehicle states live in a table indexed by vehicle id and
//! are created on first observation.

use log::{debug, warn};

use crate::simulation::types::{table_capacity, SegmentId, VehicleId};

use super::rules::{ApproachKey, PriorityApproach, PriorityRuleKind};
use super::state::VehicleArbitrationState;

pub struct PriorityJunctionRegistry {
    approaches: Vec<[Option<PriorityApproach>; 2]>,
    vehicles: Vec<Option<VehicleArbitrationState>>,
}

impl PriorityJunctionRegistry {
    pub fn new(max_segments: usize, max_vehicles: usize) -> Self {
        let max_segments = table_capacity(max_segments, "Segment");
        let max_vehicles = table_capacity(max_vehicles, "Vehicle");
        Self {
            approaches: (0..max_segments).map(|_| [None, None]).collect(),
            vehicles: vec![None; max_vehicles],
        }
    }

    pub fn vehicle_capacity(&self) -> usize {
        self.vehicles.len()
    }

    pub fn approach(&self, key: ApproachKey) -> Option<&PriorityApproach> {
        self.approaches
            .get(key.segment.index())?
            .iter()
            .flatten()
            .find(|approach| approach.key == key)
    }

    fn approach_mut(&mut self, key: ApproachKey) -> Option<&mut PriorityApproach> {
        self.approaches
            .get_mut(key.segment.index())?
            .iter_mut()
            .flatten()
            .find(|approach| approach.key == key)
    }

    pub fn approaches(&self) -> impl Iterator<Item = &PriorityApproach> {
        self.approaches.iter().flat_map(|slots| slots.iter().flatten())
    }

    /// Approaches configured on a segment
    pub fn approaches_on(&self, segment: SegmentId) -> impl Iterator<Item = &PriorityApproach> {
        self.approaches
            .get(segment.index())
            .into_iter()
            .flat_map(|slots| slots.iter().flatten())
    }

    /// Make sure an approach exists with the given rule
    pub fn ensure_approach(&mut self, key: ApproachKey, rule: PriorityRuleKind) -> bool {
        if let Some(approach) = self.approach_mut(key) {
            if approach.rule != rule {
                debug!(
                    "Approach {}->{} rule changed {:?} -> {:?}",
                    key.segment, key.node, approach.rule, rule
                );
                approach.rule = rule;
            }
            return true;
        }

        let Some(slots) = self.approaches.get_mut(key.segment.index()) else {
            warn!("{} is outside the approach table", key.segment);
            return false;
        };
        match slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(PriorityApproach::new(key, rule));
                true
            }
            None => {
                warn!(
                    "{} already has approaches at both ends; cannot add one at {}",
                    key.segment, key.node
                );
                false
            }
        }
    }

    /// Remove an approach, returning it with its remaining members
    pub fn remove_approach(&mut self, key: ApproachKey) -> Option<PriorityApproach> {
        self.approaches
            .get_mut(key.segment.index())?
            .iter_mut()
            .find(|slot| matches!(slot, Some(approach) if approach.key == key))?
            .take()
    }

    /// Keys of all approaches matching a predicate
    pub fn approach_keys<F>(&self, mut keep: F) -> Vec<ApproachKey>
    where
        F: FnMut(&PriorityApproach) -> bool,
    {
        self.approaches()
            .filter(|approach| keep(approach))
            .map(|approach| approach.key)
            .collect()
    }

    /// Add a vehicle to an approach. Returns false if the approach does not exist.
    pub fn join(&mut self, vehicle: VehicleId, key: ApproachKey) -> bool {
        match self.approach_mut(key) {
            Some(approach) => {
                if approach.add_vehicle(vehicle) {
                    debug!("{} joined approach {}->{}", vehicle, key.segment, key.node);
                }
                true
            }
            None => false,
        }
    }

    /// Remove a vehicle from an approach
    pub fn part(&mut self, vehicle: VehicleId, key: ApproachKey) {
        if let Some(approach) = self.approach_mut(key) {
            if approach.remove_vehicle(vehicle) {
                debug!("{} left approach {}->{}", vehicle, key.segment, key.node);
            }
        }
    }

    pub fn state(&self, vehicle: VehicleId) -> Option<&VehicleArbitrationState> {
        self.vehicles.get(vehicle.index())?.as_ref()
    }

    /// State of a vehicle, created on first access.
    /// Returns `None` if the id does not fit the vehicle table.
    pub fn state_mut(&mut self, vehicle: VehicleId) -> Option<&mut VehicleArbitrationState> {
        let slot = self.vehicles.get_mut(vehicle.index())?;
        Some(slot.get_or_insert_with(VehicleArbitrationState::default))
    }

    pub fn states(&self) -> impl Iterator<Item = (VehicleId, &VehicleArbitrationState)> {
        self.vehicles
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|state| (VehicleId(i as u16), state)))
    }

    pub fn tracked_vehicle_count(&self) -> usize {
        self.vehicles.iter().flatten().count()
    }

    /// Forget a vehicle entirely, dropping any approach membership
    pub fn release_vehicle(&mut self, vehicle: VehicleId) {
        let Some(state) = self.vehicles.get_mut(vehicle.index()).and_then(Option::take) else {
            return;
        };
        if let Some(key) = state.current_approach {
            self.part(vehicle, key);
        }
        debug!("Released {}", vehicle);
    }
}
