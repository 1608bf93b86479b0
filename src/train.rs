use crate::signal::TrainRef;
use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    /// Movement authority comes from signals.
    AutoSignal,
    /// Conservative fallback: the train reserves one free node at a time.
    AutoNode,
}

/// A train and the subpath of its route that it is currently running.
#[derive(Debug, Clone)]
pub struct Train {
    pub id: TrainId,
    pub name: String,
    pub length: f64,
    pub freight: bool,
    pub subpath: usize,
    pub route: TrainRoute,
    /// Index in `route` of the node holding the front of the train.
    pub front: usize,
    /// Offset of the front measured from the start of the front node in the
    /// direction of travel.
    pub front_offset: f64,
    /// Route indices of nodes currently occupied, rear first.
    pub occupied: Vec<usize>,
    pub control_mode: ControlMode,
    /// The train queues behind an occupied section and claims what it needs.
    pub claim_mode: bool,
    pub next_signal: Option<SignalIdx>,
    pub finished: bool,
}

impl Train {
    pub fn new(id: TrainId, name: String, length: f64, route: TrainRoute) -> Self {
        Train {
            id,
            name,
            length,
            freight: false,
            subpath: 0,
            route,
            front: 0,
            front_offset: 0.0,
            occupied: vec![0],
            control_mode: ControlMode::AutoSignal,
            claim_mode: false,
            next_signal: None,
            finished: false,
        }
    }

    pub fn train_ref(&self) -> TrainRef {
        TrainRef {
            train: self.id,
            subpath: self.subpath,
        }
    }

    pub fn front_element(&self) -> Option<RouteElement> {
        self.route.get(self.front).copied()
    }

    /// Route from the front of the train onwards, front node included.
    pub fn route_ahead(&self) -> &[RouteElement] {
        &self.route[self.front.min(self.route.len())..]
    }

    pub fn at_route_end(&self) -> bool {
        self.front + 1 >= self.route.len()
    }

    /// Position in the remaining route of `node`, searching from the front.
    pub fn position_ahead(&self, node: NodeIdx) -> Option<usize> {
        route_position(self.route_ahead(), node).map(|p| p + self.front)
    }
}
