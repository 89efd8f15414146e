//! Priority rule configuration and per-approach membership

use std::collections::HashMap;

use sorted_vec::{FindOrInsert, SortedSet};

use crate::simulation::types::{NodeId, SegmentId, VehicleId};

/// Right-of-way rule configured on a junction approach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorityRuleKind {
    /// Come to a full stop, then go when clear
    Stop,
    /// Slow down, go when clear
    Yield,
    /// Main road; the other approaches yield to this one
    Main,
}

/// Identifies a junction approach: a node and the segment leading into it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApproachKey {
    pub node: NodeId,
    pub segment: SegmentId,
}

impl ApproachKey {
    pub fn new(node: NodeId, segment: SegmentId) -> Self {
        Self { node, segment }
    }
}

/// Externally authored rule configuration, read-only to the arbitration engine
pub trait RuleStore {
    fn rule_for(&self, node: NodeId, segment: SegmentId) -> Option<PriorityRuleKind>;
}

/// In-memory rule store
#[derive(Debug, Clone, Default)]
pub struct PriorityRuleTable {
    rules: HashMap<ApproachKey, PriorityRuleKind>,
}

impl PriorityRuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rule(&mut self, node: NodeId, segment: SegmentId, rule: PriorityRuleKind) {
        self.rules.insert(ApproachKey::new(node, segment), rule);
    }

    pub fn remove_rule(&mut self, node: NodeId, segment: SegmentId) -> Option<PriorityRuleKind> {
        self.rules.remove(&ApproachKey::new(node, segment))
    }

    /// Remove every rule configured at a node
    pub fn remove_node(&mut self, node: NodeId) {
        self.rules.retain(|key, _| key.node != node);
    }

    /// Remove every rule on approaches from a segment
    pub fn remove_segment(&mut self, segment: SegmentId) {
        self.rules.retain(|key, _| key.segment != segment);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ApproachKey, PriorityRuleKind)> + '_ {
        self.rules.iter().map(|(key, rule)| (*key, *rule))
    }
}

impl RuleStore for PriorityRuleTable {
    fn rule_for(&self, node: NodeId, segment: SegmentId) -> Option<PriorityRuleKind> {
        self.rules.get(&ApproachKey::new(node, segment)).copied()
    }
}

/// A configured approach and the vehicles currently on it
#[derive(Debug, Clone)]
pub struct PriorityApproach {
    pub key: ApproachKey,
    pub rule: PriorityRuleKind,
    vehicles: SortedSet<VehicleId>,
}

impl PriorityApproach {
    pub fn new(key: ApproachKey, rule: PriorityRuleKind) -> Self {
        Self {
            key,
            rule,
            vehicles: SortedSet::new(),
        }
    }

    /// Returns true if the vehicle was not already a member
    pub fn add_vehicle(&mut self, vehicle: VehicleId) -> bool {
        matches!(
            self.vehicles.find_or_insert(vehicle),
            FindOrInsert::Inserted(_)
        )
    }

    /// Returns true if the vehicle was a member
    pub fn remove_vehicle(&mut self, vehicle: VehicleId) -> bool {
        self.vehicles.remove_item(&vehicle).is_some()
    }

    pub fn contains(&self, vehicle: VehicleId) -> bool {
        self.vehicles.binary_search(&vehicle).is_ok()
    }

    pub fn vehicles(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.vehicles.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}
