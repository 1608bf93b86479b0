use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate reservability of a signal's route, from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InternalBlockstate {
    Reserved,
    Reservable,
    OccupiedSameDirection,
    ReservedOther,
    ForcedWait,
    OccupiedOppositeDirection,
    Open,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    Granted,
    Requested,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldState {
    None,
    StationStop,
    ManualLock,
    ManualPass,
    ManualApproach,
}

impl HoldState {
    /// Holds that force the signal to its most restrictive state.
    pub fn forces_stop(self) -> bool {
        matches!(self, HoldState::StationStop | HoldState::ManualLock)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalFunction {
    Normal,
    Distance,
    Repeater,
    Shunting,
    Speed,
    Info,
}

impl SignalFunction {
    pub const ALL: [SignalFunction; 6] = [
        SignalFunction::Normal,
        SignalFunction::Distance,
        SignalFunction::Repeater,
        SignalFunction::Shunting,
        SignalFunction::Speed,
        SignalFunction::Info,
    ];
}

/// Displayed aspect, from most to least restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Aspect {
    Stop,
    StopAndProceed,
    Restricting,
    Approach1,
    Approach2,
    Approach3,
    Clear1,
    Clear2,
}

impl Aspect {
    pub fn from_code(code: i64) -> Aspect {
        match code {
            i64::MIN..=0 => Aspect::Stop,
            1 => Aspect::StopAndProceed,
            2 => Aspect::Restricting,
            3 => Aspect::Approach1,
            4 => Aspect::Approach2,
            5 => Aspect::Approach3,
            6 => Aspect::Clear1,
            _ => Aspect::Clear2,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn at_least_approach(self) -> bool {
        self >= Aspect::Approach1
    }
}

/// Which extreme an aspect query over several heads asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restrictive {
    Most,
    Least,
}

/// A train together with the subpath of its route it is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrainRef {
    pub train: TrainId,
    pub subpath: usize,
}

#[derive(Debug, Clone)]
pub struct SignalHead {
    pub function: SignalFunction,
    pub script: Option<String>,
    pub aspect: Aspect,
    pub draw_state: i64,
}

impl SignalHead {
    pub fn new(function: SignalFunction, script: Option<String>) -> Self {
        SignalHead {
            function,
            script,
            aspect: Aspect::Stop,
            draw_state: 0,
        }
    }
}

/// Clear-ahead budget: the static default, an optional live override set
/// by scripts, and the value in force for the current clearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClearAhead {
    pub default: u32,
    pub live: Option<u32>,
    pub active: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ApproachControl {
    pub armed: bool,
    pub cleared: bool,
    pub claim_locked: bool,
    pub force_propagate: bool,
    /// Release distance; armed signals clear once the enabled train is closer.
    pub release_distance: Option<f64>,
}

impl ApproachControl {
    pub fn holds(&self) -> bool {
        self.armed && !self.cleared
    }
}

/// Observable phase of a signal's clearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearancePhase {
    NotEnabled,
    Pending,
    Reserved { full: bool },
    Propagated,
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub index: SignalIdx,
    pub name: String,
    /// The signal protects the far end of `node` when travelling in `direction`.
    pub node: NodeIdx,
    pub direction: Direction,
    pub heads: Vec<SignalHead>,
    pub fixed_route: Option<TrainRoute>,

    pub enabled_train: Option<TrainRef>,
    pub route: TrainRoute,
    pub block_state: InternalBlockstate,
    pub permission: Permission,
    pub hold: HoldState,
    pub next_signals: BTreeMap<SignalFunction, Option<SignalIdx>>,
    pub clear_ahead: ClearAhead,
    pub approach: ApproachControl,
    pub propagated: bool,
    pub propagated_from: Option<SignalIdx>,
    /// Position in `route` of the last node reserved by this signal.
    pub last_reserved: Option<usize>,
    pub call_on: bool,
    pub local_vars: BTreeMap<i64, i64>,
    /// Trains this signal stays at danger for.
    pub locks: Vec<TrainRef>,
}

impl Signal {
    pub fn new(
        index: SignalIdx,
        name: String,
        node: NodeIdx,
        direction: Direction,
        heads: Vec<SignalHead>,
    ) -> Self {
        Signal {
            index,
            name,
            node,
            direction,
            heads,
            fixed_route: None,
            enabled_train: None,
            route: Vec::new(),
            block_state: InternalBlockstate::Blocked,
            permission: Permission::Denied,
            hold: HoldState::None,
            next_signals: BTreeMap::new(),
            clear_ahead: ClearAhead::default(),
            approach: ApproachControl::default(),
            propagated: false,
            propagated_from: None,
            last_reserved: None,
            call_on: false,
            local_vars: BTreeMap::new(),
            locks: Vec::new(),
        }
    }

    pub fn has_function(&self, function: SignalFunction) -> bool {
        self.heads.iter().any(|h| h.function == function)
    }

    pub fn is_normal(&self) -> bool {
        self.has_function(SignalFunction::Normal)
    }

    pub fn enabled_for(&self, train: TrainId) -> bool {
        self.enabled_train.map(|t| t.train == train).unwrap_or(false)
    }

    pub fn has_lock_for(&self, train: TrainRef) -> bool {
        self.locks.contains(&train)
    }

    pub fn phase(&self) -> ClearancePhase {
        if self.enabled_train.is_none() {
            return ClearancePhase::NotEnabled;
        }
        if self.propagated {
            return ClearancePhase::Propagated;
        }
        match self.last_reserved {
            None => ClearancePhase::Pending,
            Some(last) => ClearancePhase::Reserved {
                full: last + 1 >= self.route.len(),
            },
        }
    }

    /// Aspect over all heads of `function`, or `None` if the signal has no
    /// such head.
    pub fn aspect(&self, function: SignalFunction, extreme: Restrictive) -> Option<Aspect> {
        let aspects = self
            .heads
            .iter()
            .filter(|h| h.function == function)
            .map(|h| h.aspect);
        match extreme {
            Restrictive::Most => aspects.min(),
            Restrictive::Least => aspects.max(),
        }
    }

    /// Most restrictive normal aspect; signals without normal heads show stop.
    pub fn normal_aspect(&self) -> Aspect {
        self.aspect(SignalFunction::Normal, Restrictive::Most)
            .unwrap_or(Aspect::Stop)
    }

    pub fn invalidate_next_signals(&mut self) {
        self.next_signals.clear();
    }

    /// Drop the clearance state, leaving the fixed default route (if any)
    /// as the captured route.
    pub fn clear_enabled(&mut self) {
        self.enabled_train = None;
        self.route = self.fixed_route.clone().unwrap_or_default();
        self.block_state = InternalBlockstate::Blocked;
        self.permission = Permission::Denied;
        self.propagated = false;
        self.propagated_from = None;
        self.last_reserved = None;
        self.call_on = false;
        self.clear_ahead.live = None;
        self.clear_ahead.active = self.clear_ahead.default;
        self.approach.cleared = false;
        self.approach.claim_locked = false;
        self.invalidate_next_signals();
    }
}
