use crate::signal::InternalBlockstate;
use crate::types::*;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitType {
    Normal,
    Junction,
    Crossover,
    EndOfTrack,
    Empty,
}

/// Link from one node end to the neighbouring node, and the direction of
/// travel on the neighbour after crossing the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    pub link: NodeIdx,
    pub direction: Direction,
}

impl Pin {
    pub fn element(&self) -> RouteElement {
        RouteElement::new(self.link, self.direction)
    }
}

/// A train standing on a node, with the occupied offset range measured along
/// the node's ahead orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Occupant {
    pub direction: Direction,
    pub from: f64,
    pub to: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeState {
    pub occupation: BTreeMap<TrainId, Occupant>,
    pub reserved: Option<TrainId>,
    pub pre_reserved: Vec<TrainId>,
    pub claimed: Vec<TrainId>,
}

#[derive(Debug, Clone)]
pub struct TrackNode {
    pub index: NodeIdx,
    pub name: String,
    pub length: f64,
    pub circuit_type: CircuitType,
    /// `pins[dir][leg]`: outgoing links when travelling in `dir`. Only
    /// junction ends carry a second leg.
    pub pins: [[Option<Pin>; 2]; 2],
    /// Currently aligned (reserved) equivalent of `pins`.
    pub active_pins: [[Option<Pin>; 2]; 2],
    pub end_signals: [Option<SignalIdx>; 2],
    pub speed_limits: [Option<f64>; 2],
    /// Leg of the last commanded switch setting.
    pub last_route: usize,
    /// Leg set by the operator, which scans may choose to honour.
    pub manual_route: Option<usize>,
    /// Zone for which this node is a boundary.
    pub deadlock_reference: Option<ZoneIdx>,
    /// Zone this node lies inside of.
    pub deadlock_zone: Option<ZoneIdx>,
    pub deadlock_awaited: BTreeSet<TrainId>,
    /// Trapped train -> the opposing trains it has to wait for.
    pub deadlock_traps: BTreeMap<TrainId, BTreeSet<TrainId>>,
    pub signals_passing_routes: BTreeSet<SignalIdx>,
    pub state: NodeState,
}

impl TrackNode {
    pub fn new(index: NodeIdx, name: String, length: f64) -> Self {
        TrackNode {
            index,
            name,
            length,
            circuit_type: CircuitType::Normal,
            pins: [[None; 2]; 2],
            active_pins: [[None; 2]; 2],
            end_signals: [None; 2],
            speed_limits: [None; 2],
            last_route: 0,
            manual_route: None,
            deadlock_reference: None,
            deadlock_zone: None,
            deadlock_awaited: BTreeSet::new(),
            deadlock_traps: BTreeMap::new(),
            signals_passing_routes: BTreeSet::new(),
            state: NodeState::default(),
        }
    }

    /// Is the end in direction `dir` a switchable (facing) end?
    pub fn is_facing_switch(&self, dir: Direction) -> bool {
        self.pins[dir.index()][1].is_some()
    }

    pub fn is_switch(&self) -> bool {
        matches!(
            self.circuit_type,
            CircuitType::Junction | CircuitType::Crossover
        )
    }

    /// Leg that leads from this node to `next` when travelling in `dir`.
    pub fn leg_towards(&self, dir: Direction, next: NodeIdx) -> Option<usize> {
        self.pins[dir.index()]
            .iter()
            .position(|p| p.map(|p| p.link == next).unwrap_or(false))
    }

    pub fn occupied(&self) -> bool {
        !self.state.occupation.is_empty()
    }

    pub fn occupied_by_this_train(&self, train: TrainId) -> bool {
        self.state.occupation.contains_key(&train)
    }

    pub fn occupied_by_other_trains(&self, train: TrainId) -> bool {
        self.state.occupation.keys().any(|t| *t != train)
    }

    pub fn reserved_by_other(&self, train: TrainId) -> bool {
        matches!(self.state.reserved, Some(t) if t != train)
    }

    /// Node is reserved for or occupied by this train.
    pub fn is_set(&self, train: TrainId) -> bool {
        self.state.reserved == Some(train) || self.occupied_by_this_train(train)
    }

    /// Node could be reserved by this train right now.
    pub fn is_available(&self, train: TrainId) -> bool {
        if self.is_set(train) {
            return true;
        }
        if self.state.reserved.is_some() || self.occupied_by_other_trains(train) {
            return false;
        }
        match self.state.claimed.first() {
            Some(first) => *first == train,
            None => true,
        }
    }

    /// Block state of this node as seen by `train` travelling in `dir`,
    /// combined with the state accumulated so far along the route.
    pub fn get_section_state(
        &self,
        train: TrainId,
        dir: Direction,
        prior: InternalBlockstate,
        route: &[RouteElement],
        requesting_signal: Option<SignalIdx>,
    ) -> InternalBlockstate {
        let local = self.local_state(train, dir, route);
        if local > InternalBlockstate::Reservable {
            trace!(
                "{} {:?} for train {} (signal {:?})",
                self.index,
                local,
                train,
                requesting_signal
            );
        }
        prior.max(local)
    }

    fn local_state(&self, train: TrainId, dir: Direction, route: &[RouteElement]) -> InternalBlockstate {
        if self.circuit_type == CircuitType::Empty {
            return InternalBlockstate::Blocked;
        }

        if self
            .deadlock_traps
            .get(&train)
            .map(|others| !others.is_empty())
            .unwrap_or(false)
        {
            return InternalBlockstate::ForcedWait;
        }

        let others = self
            .state
            .occupation
            .iter()
            .filter(|(t, _)| **t != train)
            .map(|(_, o)| o.direction)
            .collect::<Vec<_>>();
        if !others.is_empty() {
            return if others.iter().all(|d| *d == dir) {
                InternalBlockstate::OccupiedSameDirection
            } else {
                InternalBlockstate::OccupiedOppositeDirection
            };
        }

        if self.reserved_by_other(train) {
            return InternalBlockstate::ReservedOther;
        }

        if let Some(first) = self.state.claimed.first() {
            if *first != train {
                return InternalBlockstate::ReservedOther;
            }
        }

        // A facing switch under the train cannot be moved to another leg.
        if self.is_facing_switch(dir) && self.occupied_by_this_train(train) {
            if let Some(next) = self.next_on_route(route) {
                let active = self.active_pins[dir.index()][0];
                if active.map(|p| p.link != next).unwrap_or(false) {
                    return InternalBlockstate::Blocked;
                }
            }
        }

        if self.is_set(train) {
            InternalBlockstate::Reserved
        } else {
            InternalBlockstate::Reservable
        }
    }

    fn next_on_route(&self, route: &[RouteElement]) -> Option<NodeIdx> {
        let pos = route_position(route, self.index)?;
        route.get(pos + 1).map(|e| e.node)
    }

    /// Reserve the node for `train`, aligning the switch to the way `route`
    /// continues.
    pub fn reserve(&mut self, train: TrainId, route: &[RouteElement]) {
        if self.reserved_by_other(train) {
            error!(
                "{} already reserved by train {:?}, refusing reservation for train {}",
                self.index, self.state.reserved, train
            );
            return;
        }
        self.state.reserved = Some(train);
        self.state.claimed.retain(|t| *t != train);
        self.state.pre_reserved.retain(|t| *t != train);

        if let Some(pos) = route_position(route, self.index) {
            let dir = route[pos].direction;
            if let Some(next) = route.get(pos + 1) {
                if let Some(leg) = self.leg_towards(dir, next.node) {
                    self.active_pins[dir.index()] = [self.pins[dir.index()][leg], None];
                    if self.is_facing_switch(dir) {
                        self.last_route = leg;
                    }
                }
            }
            if pos > 0 {
                let prev = route[pos - 1].node;
                let back = dir.reverse();
                if let Some(leg) = self.leg_towards(back, prev) {
                    self.active_pins[back.index()] = [self.pins[back.index()][leg], None];
                    if self.is_facing_switch(back) {
                        self.last_route = leg;
                    }
                }
            }
        }
    }

    pub fn pre_reserve(&mut self, train: TrainId) {
        if !self.state.pre_reserved.contains(&train) {
            self.state.pre_reserved.push(train);
        }
    }

    pub fn claim(&mut self, train: TrainId) {
        if !self.state.claimed.contains(&train) {
            self.state.claimed.push(train);
        }
    }

    pub fn unreserve(&mut self) {
        self.state.reserved = None;
        if !self.occupied() {
            self.active_pins = [[None; 2]; 2];
        }
    }

    /// Drop every trace of `train` from the node's state.
    pub fn remove_train(&mut self, train: TrainId) {
        self.state.occupation.remove(&train);
        if self.state.reserved == Some(train) {
            self.unreserve();
        }
        self.state.claimed.retain(|t| *t != train);
        self.state.pre_reserved.retain(|t| *t != train);
        self.deadlock_awaited.remove(&train);
        self.deadlock_traps.remove(&train);
        if !self.occupied() && self.state.reserved.is_none() {
            self.active_pins = [[None; 2]; 2];
        }
    }

    pub fn set_occupied(&mut self, train: TrainId, occupant: Occupant) {
        self.state.occupation.insert(train, occupant);
        self.state.claimed.retain(|t| *t != train);
        self.state.pre_reserved.retain(|t| *t != train);
    }

    /// Distance from `offset` to the nearest other train on this node,
    /// looking in direction `dir`.
    pub fn test_train_ahead(&self, train: TrainId, offset: f64, dir: Direction) -> Option<f64> {
        self.state
            .occupation
            .iter()
            .filter(|(t, _)| **t != train)
            .filter_map(|(_, o)| match dir {
                Direction::Ahead if o.to >= offset => Some((o.from - offset).max(0.0)),
                Direction::Reverse if o.from <= offset => Some((offset - o.to).max(0.0)),
                _ => None,
            })
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.min(d))))
    }

    /// Are trains other than `train` waiting at this node for a deadlock path?
    pub fn check_deadlock_awaited(&self, train: TrainId) -> bool {
        self.deadlock_awaited.iter().any(|t| *t != train)
    }

    /// Another train has an unresolved deadlock trap on this node.
    pub fn has_trap_of_other(&self, train: TrainId) -> bool {
        self.deadlock_traps
            .iter()
            .any(|(t, others)| *t != train && !others.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(i: usize) -> TrackNode {
        TrackNode::new(NodeIdx(i), format!("n{}", i), 100.0)
    }

    #[test]
    fn test_single_reservation_holder() {
        let mut n = node(0);
        n.reserve(1, &[]);
        assert!(n.is_set(1));
        n.reserve(2, &[]);
        assert_eq!(n.state.reserved, Some(1));
        assert!(!n.is_available(2));
        assert_eq!(
            n.get_section_state(2, Direction::Ahead, InternalBlockstate::Reserved, &[], None),
            InternalBlockstate::ReservedOther
        );
    }

    #[test]
    fn test_occupation_direction() {
        let mut n = node(0);
        n.set_occupied(
            1,
            Occupant {
                direction: Direction::Ahead,
                from: 20.0,
                to: 60.0,
            },
        );
        let prior = InternalBlockstate::Reserved;
        assert_eq!(
            n.get_section_state(2, Direction::Ahead, prior, &[], None),
            InternalBlockstate::OccupiedSameDirection
        );
        assert_eq!(
            n.get_section_state(2, Direction::Reverse, prior, &[], None),
            InternalBlockstate::OccupiedOppositeDirection
        );
        assert_eq!(n.test_train_ahead(2, 0.0, Direction::Ahead), Some(20.0));
        assert_eq!(n.test_train_ahead(2, 100.0, Direction::Reverse), Some(40.0));
        assert_eq!(n.test_train_ahead(1, 0.0, Direction::Ahead), None);
    }

    #[test]
    fn test_claim_queue() {
        let mut n = node(0);
        n.claim(3);
        n.claim(4);
        assert!(n.is_available(3));
        assert!(!n.is_available(4));
        n.reserve(3, &[]);
        assert!(n.state.claimed == vec![4]);
        n.remove_train(3);
        assert!(n.is_available(4));
    }

    #[test]
    fn test_trap_forces_wait() {
        let mut n = node(0);
        n.deadlock_traps.insert(1, vec![2].into_iter().collect());
        assert_eq!(
            n.get_section_state(1, Direction::Ahead, InternalBlockstate::Reserved, &[], None),
            InternalBlockstate::ForcedWait
        );
        assert!(n.has_trap_of_other(2));
        assert!(!n.has_trap_of_other(1));
    }
}
