use crate::deadlock::DeadlockManager;
use crate::error::InterlockError;
use crate::script::ScriptLibrary;
use crate::settings::EngineSettings;
use crate::signal::*;
use crate::track::{Occupant, TrackNode};
use crate::train::{ControlMode, Train};
use crate::types::*;
use log::*;
use std::collections::BTreeMap;

/// Everything the interlocking works on, passed explicitly to every
/// operation.
#[derive(Debug, Clone, Default)]
pub struct Network {
    pub nodes: Vec<TrackNode>,
    pub signals: Vec<Signal>,
    pub deadlocks: DeadlockManager,
    pub trains: BTreeMap<TrainId, Train>,
    pub scripts: ScriptLibrary,
    pub settings: EngineSettings,
}

impl Network {
    pub fn new(settings: EngineSettings) -> Self {
        Network {
            settings,
            ..Default::default()
        }
    }

    pub fn node(&self, idx: NodeIdx) -> Result<&TrackNode, InterlockError> {
        self.nodes.get(idx.0).ok_or(InterlockError::UnknownNode(idx))
    }

    pub fn signal(&self, idx: SignalIdx) -> Result<&Signal, InterlockError> {
        self.signals.get(idx.0).ok_or(InterlockError::UnknownSignal(idx))
    }

    pub fn signal_mut(&mut self, idx: SignalIdx) -> Result<&mut Signal, InterlockError> {
        self.signals.get_mut(idx.0).ok_or(InterlockError::UnknownSignal(idx))
    }

    pub fn train(&self, id: TrainId) -> Result<&Train, InterlockError> {
        self.trains.get(&id).ok_or(InterlockError::UnknownTrain(id))
    }

    pub fn train_mut(&mut self, id: TrainId) -> Result<&mut Train, InterlockError> {
        self.trains.get_mut(&id).ok_or(InterlockError::UnknownTrain(id))
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeIdx> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.index)
    }

    pub fn signal_by_name(&self, name: &str) -> Option<SignalIdx> {
        self.signals.iter().find(|s| s.name == name).map(|s| s.index)
    }

    pub fn train_by_name(&self, name: &str) -> Option<TrainId> {
        self.trains.values().find(|t| t.name == name).map(|t| t.id)
    }

    pub fn add_node(&mut self, name: String, length: f64) -> NodeIdx {
        let idx = NodeIdx(self.nodes.len());
        self.nodes.push(TrackNode::new(idx, name, length));
        idx
    }

    /// Place a signal at the far end of `node` for travel in `direction`.
    pub fn add_signal(
        &mut self,
        name: String,
        node: NodeIdx,
        direction: Direction,
        heads: Vec<SignalHead>,
    ) -> Result<SignalIdx, InterlockError> {
        let idx = SignalIdx(self.signals.len());
        let slot = &mut self
            .nodes
            .get_mut(node.0)
            .ok_or(InterlockError::UnknownNode(node))?
            .end_signals[direction.index()];
        if let Some(old) = slot {
            warn!("{} already has signal {} facing {:?}, replacing it", node, old, direction);
        }
        *slot = Some(idx);

        let mut signal = Signal::new(idx, name, node, direction, heads);
        let default = signal
            .heads
            .iter()
            .map(|h| self.settings.clear_ahead_for(h.function))
            .max()
            .unwrap_or(0);
        signal.clear_ahead = ClearAhead {
            default,
            live: None,
            active: default,
        };
        self.signals.push(signal);
        Ok(idx)
    }

    /// Put a train on the network with its front on the first node of its
    /// route.
    pub fn add_train(&mut self, mut train: Train) -> Result<TrainId, InterlockError> {
        let first = *train
            .route
            .first()
            .ok_or(InterlockError::UnknownTrain(train.id))?;
        let node = self
            .nodes
            .get_mut(first.node.0)
            .ok_or(InterlockError::UnknownNode(first.node))?;
        let covered = train.length.min(node.length);
        let (from, to) = match first.direction {
            Direction::Ahead => (node.length - covered, node.length),
            Direction::Reverse => (0.0, covered),
        };
        node.set_occupied(
            train.id,
            Occupant {
                direction: first.direction,
                from,
                to,
            },
        );
        node.reserve(train.id, &train.route);
        train.front = 0;
        train.front_offset = node.length;
        train.occupied = vec![0];
        let id = train.id;
        self.trains.insert(id, train);
        Ok(id)
    }

    /// First signal ahead of the front of the train along its route, looking
    /// at the front node's own end signal first.
    pub fn next_signal_on_route(&self, train: &Train) -> Option<SignalIdx> {
        train.route_ahead().iter().find_map(|e| {
            self.nodes[e.node.0].end_signals[e.direction.index()].filter(|s| self.signals[s.0].is_normal())
        })
    }

    /// Downgrade a train to the most conservative control mode.
    pub fn set_node_control(&mut self, train: TrainId) {
        if let Some(t) = self.trains.get_mut(&train) {
            if t.control_mode != ControlMode::AutoNode {
                warn!("train {} ({}) switched to node control", t.id, t.name);
                t.control_mode = ControlMode::AutoNode;
            }
        }
    }

    /// Release every reservation `train` holds on nodes it does not occupy.
    pub fn unwind_reservations(&mut self, train: TrainId) {
        for node in self.nodes.iter_mut() {
            if node.state.reserved == Some(train) && !node.occupied_by_this_train(train) {
                node.unreserve();
            }
            node.state.claimed.retain(|t| *t != train);
            node.state.pre_reserved.retain(|t| *t != train);
        }
    }

    /// Throw the switch at `node` to `leg` by hand. Refused while the node
    /// is reserved or occupied.
    pub fn throw_switch(&mut self, node: NodeIdx, leg: usize) -> Result<bool, InterlockError> {
        let n = self.nodes.get_mut(node.0).ok_or(InterlockError::UnknownNode(node))?;
        let has_leg = (0..2).any(|d| n.pins[d][1].is_some() && n.pins[d].get(leg).map(|p| p.is_some()).unwrap_or(false));
        if !has_leg {
            return Err(InterlockError::NoSuchLeg { node, leg });
        }
        if n.state.reserved.is_some() || n.occupied() {
            info!("switch {} is locked, not throwing", node);
            return Ok(false);
        }
        n.manual_route = Some(leg);
        n.last_route = leg;
        self.reset_route(node);
        Ok(true)
    }

    pub fn set_hold(&mut self, signal: SignalIdx, hold: HoldState) -> Result<(), InterlockError> {
        self.signal_mut(signal)?.hold = hold;
        Ok(())
    }

    pub fn clear_hold(&mut self, signal: SignalIdx) -> Result<(), InterlockError> {
        self.set_hold(signal, HoldState::None)
    }

    /// Ask for permission to pass the signal into an occupied section.
    pub fn request_permission(&mut self, signal: SignalIdx) -> Result<(), InterlockError> {
        let s = self.signal_mut(signal)?;
        if s.permission != Permission::Granted {
            s.permission = Permission::Requested;
        }
        Ok(())
    }

    /// Lock `signal` at danger for one train.
    pub fn lock_signal(&mut self, signal: SignalIdx, train: TrainRef) -> Result<(), InterlockError> {
        let s = self.signal_mut(signal)?;
        if !s.locks.contains(&train) {
            s.locks.push(train);
        }
        Ok(())
    }

    pub fn unlock_signal(&mut self, signal: SignalIdx, train: TrainRef) -> Result<(), InterlockError> {
        self.signal_mut(signal)?.locks.retain(|t| *t != train);
        Ok(())
    }

    /// Take a train that reached the end of its route off the network.
    pub fn retire_train(&mut self, train: TrainId) -> Result<(), InterlockError> {
        let tref = self.train(train)?.train_ref();
        let enabled = self
            .signals
            .iter()
            .filter(|s| s.enabled_for(train))
            .map(|s| s.index)
            .collect::<Vec<_>>();
        for s in enabled {
            self.reset_signal(s, false);
        }
        for node in self.nodes.iter_mut() {
            node.remove_train(train);
        }
        self.remove_deadlock_references(tref);
        let t = self.train_mut(train)?;
        t.occupied.clear();
        t.finished = true;
        t.next_signal = None;
        info!("train {} ({}) finished", t.id, t.name);
        Ok(())
    }

    /// Remove a train's reference from every deadlock zone, with the traps
    /// and waiting marks it left behind.
    pub fn remove_deadlock_references(&mut self, train: TrainRef) {
        for zone in self.deadlocks.zones.iter_mut() {
            zone.remove_train_reference(train);
        }
        for node in self.nodes.iter_mut() {
            node.deadlock_awaited.remove(&train.train);
            node.deadlock_traps.remove(&train.train);
        }
        self.release_traps(train.train);
    }

    /// Stop other trains from waiting on `train`.
    pub fn release_traps(&mut self, train: TrainId) {
        for node in self.nodes.iter_mut() {
            for others in node.deadlock_traps.values_mut() {
                others.remove(&train);
            }
        }
    }
}
