//! Junction right-of-way arbitration
//!
//! Stop, yield and main-road rules are configured per approach. Each vehicle
//! on a controlled approach runs a small state machine that decides whether
//! it may enter the junction this tick.

mod engine;
mod registry;
mod rules;
mod state;

pub use engine::{ApproachQuery, ArbitrationEngine, ArbitrationStats, HostContext};
pub use registry::PriorityJunctionRegistry;
pub use rules::{ApproachKey, PriorityApproach, PriorityRuleKind, PriorityRuleTable, RuleStore};
pub use state::{step, CarState, SpeedDirective, StepInput, VehicleArbitrationState};
