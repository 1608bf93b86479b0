//! Save and restore of the runtime state of deadlock zones and signals.
//!
//! The network itself is rebuilt from its scenario; only what changes while
//! running is written.

use crate::deadlock::DeadlockManager;
use crate::error::PersistError;
use crate::network::Network;
use crate::signal::*;
use crate::types::*;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSignal {
    pub name: String,
    pub enabled_train: Option<TrainRef>,
    pub next_signals: BTreeMap<SignalFunction, Option<SignalIdx>>,
    pub route: TrainRoute,
    pub block_state: InternalBlockstate,
    pub hold: HoldState,
    pub propagated: bool,
    pub propagated_from: Option<SignalIdx>,
    pub last_reserved: Option<usize>,
    pub clear_ahead: ClearAhead,
    pub approach: ApproachControl,
    pub permission: Permission,
    pub call_on: bool,
    pub local_vars: BTreeMap<i64, i64>,
    pub locks: Vec<TrainRef>,
}

impl From<&Signal> for SavedSignal {
    fn from(s: &Signal) -> Self {
        SavedSignal {
            name: s.name.clone(),
            enabled_train: s.enabled_train,
            next_signals: s.next_signals.clone(),
            route: s.route.clone(),
            block_state: s.block_state,
            hold: s.hold,
            propagated: s.propagated,
            propagated_from: s.propagated_from,
            last_reserved: s.last_reserved,
            clear_ahead: s.clear_ahead,
            approach: s.approach,
            permission: s.permission,
            call_on: s.call_on,
            local_vars: s.local_vars.clone(),
            locks: s.locks.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    pub deadlocks: DeadlockManager,
    pub signals: Vec<SavedSignal>,
}

impl SavedState {
    pub fn capture(net: &Network) -> Self {
        SavedState {
            deadlocks: net.deadlocks.clone(),
            signals: net.signals.iter().map(SavedSignal::from).collect(),
        }
    }

    /// Write the saved state back into a network built from the same
    /// scenario.
    pub fn apply(self, net: &mut Network) -> Result<(), PersistError> {
        if self.signals.len() != net.signals.len() {
            return Err(PersistError::SignalCountMismatch {
                saved: self.signals.len(),
                network: net.signals.len(),
            });
        }
        for node in net.nodes.iter_mut() {
            node.signals_passing_routes.clear();
        }
        for (i, saved) in self.signals.into_iter().enumerate() {
            let idx = SignalIdx(i);
            for e in saved.route.iter() {
                net.node(e.node)?;
                net.nodes[e.node.0].signals_passing_routes.insert(idx);
            }
            let s = net.signal_mut(idx)?;
            if s.name != saved.name {
                warn!("Saved signal {} restored onto {}", saved.name, s.name);
            }
            s.enabled_train = saved.enabled_train;
            s.next_signals = saved.next_signals;
            s.route = saved.route;
            s.block_state = saved.block_state;
            s.hold = saved.hold;
            s.propagated = saved.propagated;
            s.propagated_from = saved.propagated_from;
            s.last_reserved = saved.last_reserved;
            s.clear_ahead = saved.clear_ahead;
            s.approach = saved.approach;
            s.permission = saved.permission;
            s.call_on = saved.call_on;
            s.local_vars = saved.local_vars;
            s.locks = saved.locks;
        }
        net.deadlocks = self.deadlocks;
        Ok(())
    }
}

pub fn save_state(filename: &Path, net: &Network) -> Result<(), PersistError> {
    let state = SavedState::capture(net);
    std::fs::write(filename, serde_json::to_string_pretty(&state)?)?;
    Ok(())
}

pub fn restore_state(filename: &Path, net: &mut Network) -> Result<(), PersistError> {
    let contents = std::fs::read_to_string(filename)?;
    let state: SavedState = serde_json::from_str(&contents)?;
    state.apply(net)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadlock::tests::passing_loop;

    #[test]
    fn test_deadlock_info_round_trip() {
        let mut net = passing_loop();
        let route = {
            let n = |name: &str| RouteElement::new(net.node_by_name(name).unwrap(), Direction::Ahead);
            vec![n("w"), n("A"), n("p1"), n("B"), n("e")]
        };
        let zone = &mut net.deadlocks.zones[0];
        zone.assign_train_path(TrainRef { train: 4, subpath: 0 }, 120.0, &route, &net.nodes);

        let text = serde_json::to_string(&SavedState::capture(&net)).unwrap();
        let restored: SavedState = serde_json::from_str(&text).unwrap();
        let zone = &net.deadlocks.zones[0];
        let back = &restored.deadlocks.zones[0];
        assert_eq!(back.paths, zone.paths);
        assert_eq!(back.inverse_paths, zone.inverse_paths);
        assert_eq!(back.train_own_path, zone.train_own_path);
        assert_eq!(back.train_length_fit, zone.train_length_fit);
        assert_eq!(back.train_subpath_index, zone.train_subpath_index);
        assert_eq!(back.next_handle, zone.next_handle);
    }

    #[test]
    fn test_signal_state_restored() {
        let mut net = passing_loop();
        let mut fresh = net.clone();
        let a = net.node_by_name("A").unwrap();
        let idx = net
            .add_signal("S".to_string(), a, Direction::Ahead, vec![SignalHead::new(SignalFunction::Normal, None)])
            .unwrap();
        fresh
            .add_signal("S".to_string(), a, Direction::Ahead, vec![SignalHead::new(SignalFunction::Normal, None)])
            .unwrap();
        {
            let s = &mut net.signals[idx.0];
            s.hold = HoldState::ManualLock;
            s.local_vars.insert(2, 9);
            s.locks.push(TrainRef { train: 1, subpath: 0 });
            s.route = vec![RouteElement::new(net.nodes[a.0].index, Direction::Ahead)];
        }
        SavedState::capture(&net).apply(&mut fresh).unwrap();
        assert_eq!(SavedSignal::from(&fresh.signals[idx.0]), SavedSignal::from(&net.signals[idx.0]));
        assert!(fresh.nodes[a.0].signals_passing_routes.contains(&idx));

        let empty = Network::default();
        assert!(matches!(
            SavedState::capture(&empty).apply(&mut fresh),
            Err(PersistError::SignalCountMismatch { saved: 0, network: 1 })
        ));
    }
}
