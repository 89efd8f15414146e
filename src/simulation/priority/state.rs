//! Per-vehicle arbitration state machine
//!
//! `step` is a pure function of the previous state and this tick's input.
//! It decides whether to consult the conflict oracle, but never consults
//! anything else.

use crate::simulation::config::ArbitrationConfig;
use crate::simulation::types::LaneId;

use super::rules::{ApproachKey, PriorityRuleKind};

/// Where a vehicle is in its passage through a controlled approach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CarState {
    /// Not on a controlled approach
    #[default]
    None,
    /// Just arrived on a controlled approach
    Enter,
    /// Waiting at a stop sign
    Stop,
    /// Slowing down at a yield sign
    Yield,
    /// Cleared to go
    Leave,
    /// Crossing the junction
    Transit,
}

/// Speed instruction handed back to the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedDirective {
    /// Continue at no more than this speed
    Proceed(f32),
    /// Do not enter the junction
    Hold,
    /// Slow down to this squared speed
    Decelerate(f32),
}

/// Arbitration bookkeeping for one vehicle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleArbitrationState {
    pub current_approach: Option<ApproachKey>,
    pub lane: Option<LaneId>,
    pub car_state: CarState,
    pub wait_ticks: u32,
    pub stopped: bool,
    /// Squared speed below which a yielding vehicle checks for traffic
    pub yield_speed_threshold: f32,
    pub last_seen_tick: u64,
}

impl VehicleArbitrationState {
    /// Forget the current approach and all wait bookkeeping
    pub fn reset(&mut self) {
        *self = Self {
            last_seen_tick: self.last_seen_tick,
            ..Self::default()
        };
    }

    /// Start tracking a newly entered approach
    pub fn enter(&mut self, key: ApproachKey, lane: LaneId, yield_speed_threshold: f32) {
        self.reset();
        self.current_approach = Some(key);
        self.lane = Some(lane);
        self.car_state = CarState::Enter;
        self.yield_speed_threshold = yield_speed_threshold;
    }

    /// Release the vehicle from its approach without forgetting it
    pub fn leave(&mut self) {
        self.car_state = CarState::Leave;
        self.stopped = false;
    }

    pub fn has_left(&self) -> bool {
        matches!(self.car_state, CarState::Leave | CarState::Transit)
    }
}

/// Per-tick input for one vehicle on a controlled approach
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInput {
    pub rule: PriorityRuleKind,
    pub velocity_sq: f32,
    pub speed_limit: f32,
}

/// Advance one vehicle's state machine by one tick.
///
/// `has_conflicts` is only called when the rule needs the answer.
pub fn step<F>(
    state: VehicleArbitrationState,
    input: &StepInput,
    config: &ArbitrationConfig,
    has_conflicts: F,
) -> (VehicleArbitrationState, SpeedDirective)
where
    F: FnOnce() -> bool,
{
    let mut next = state;
    let proceed = SpeedDirective::Proceed(input.speed_limit);

    match next.car_state {
        CarState::None | CarState::Leave | CarState::Transit => return (next, proceed),
        CarState::Enter | CarState::Stop | CarState::Yield => {}
    }

    if next.wait_ticks >= config.max_wait_ticks {
        next.leave();
        return (next, proceed);
    }

    let directive = match input.rule {
        PriorityRuleKind::Stop => {
            next.car_state = CarState::Stop;
            if input.velocity_sq < config.stop_velocity_sq {
                next.stopped = true;
            }
            if next.stopped {
                next.wait_ticks = next.wait_ticks.saturating_add(1);
            }

            if next.wait_ticks >= config.max_wait_ticks {
                next.leave();
                proceed
            } else if next.wait_ticks > config.stop_wait_ticks && !has_conflicts() {
                next.leave();
                proceed
            } else {
                SpeedDirective::Hold
            }
        }
        PriorityRuleKind::Yield => {
            next.car_state = CarState::Yield;
            next.wait_ticks = next.wait_ticks.saturating_add(1);

            if next.wait_ticks >= config.max_wait_ticks {
                next.leave();
                proceed
            } else if input.velocity_sq < next.yield_speed_threshold {
                if has_conflicts() {
                    next.stopped = true;
                    SpeedDirective::Hold
                } else {
                    next.leave();
                    proceed
                }
            } else {
                SpeedDirective::Decelerate(input.velocity_sq - next.yield_speed_threshold)
            }
        }
        PriorityRuleKind::Main => {
            if has_conflicts() {
                next.stopped = true;
                next.wait_ticks = next.wait_ticks.saturating_add(1);
                if next.wait_ticks >= config.max_wait_ticks {
                    next.leave();
                    proceed
                } else {
                    SpeedDirective::Hold
                }
            } else {
                next.stopped = false;
                SpeedDirective::Proceed(input.speed_limit * config.main_speed_factor)
            }
        }
    };

    (next, directive)
}
