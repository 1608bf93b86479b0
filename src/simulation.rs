//! Tick driver.
//!
//! Every tick, each train under signal control asks its next signal to clear,
//! a slice of the signals refreshes its aspects, and then every train moves
//! at most one node. A full pass over all signals is done once before the
//! first tick.

use crate::clearance::ClearRequest;
use crate::error::InterlockError;
use crate::network::Network;
use crate::plan::{Plan, SimulationResult};
use crate::signal::Aspect;
use crate::track::Occupant;
use crate::train::ControlMode;
use crate::types::*;
use log::*;

pub struct Simulation {
    pub net: Network,
    pub tick: usize,
    cursor: usize,
    idle: usize,
    plan: Plan,
}

impl Simulation {
    pub fn new(net: Network) -> Self {
        Simulation {
            net,
            tick: 0,
            cursor: 0,
            idle: 0,
            plan: Plan::default(),
        }
    }

    /// Run until every train has finished, or until nothing moved for the
    /// configured number of ticks.
    pub fn run(&mut self) -> Result<SimulationResult, InterlockError> {
        self.preload()?;
        loop {
            if self.all_finished() {
                info!("All trains finished after {} ticks", self.tick);
                return Ok(SimulationResult::Finished(std::mem::take(&mut self.plan)));
            }
            if self.idle >= self.net.settings.stall_ticks {
                warn!("No train moved for {} ticks, stalled at tick {}", self.idle, self.tick);
                self.report_waiting();
                return Ok(SimulationResult::Stalled(std::mem::take(&mut self.plan)));
            }
            if self.tick >= self.net.settings.max_ticks {
                warn!("Reached the tick limit {}", self.net.settings.max_ticks);
                return Ok(SimulationResult::Stalled(std::mem::take(&mut self.plan)));
            }
            self.step()?;
        }
    }

    pub fn all_finished(&self) -> bool {
        self.net.trains.values().all(|t| t.finished)
    }

    /// Refresh every signal, then let the trains make their first requests.
    pub fn preload(&mut self) -> Result<(), InterlockError> {
        let _p = hprof::enter("preload");
        for s in 0..self.net.signals.len() {
            self.net.update_aspects(SignalIdx(s));
        }
        self.request_signals()?;
        self.plan.record(&self.net);
        Ok(())
    }

    /// One tick. Returns whether any train moved.
    pub fn step(&mut self) -> Result<bool, InterlockError> {
        let _p = hprof::enter("tick");
        self.tick += 1;
        self.request_signals()?;
        self.refresh_slice();

        let ids = self.net.trains.keys().copied().collect::<Vec<_>>();
        let mut moved = false;
        for id in ids {
            moved |= self.advance(id)?;
        }
        if moved {
            self.idle = 0;
        } else {
            self.idle += 1;
        }
        trace!("tick {} moved {}", self.tick, moved);
        self.plan.record(&self.net);
        Ok(moved)
    }

    fn request_signals(&mut self) -> Result<(), InterlockError> {
        let _p = hprof::enter("requests");
        let ids = self.net.trains.keys().copied().collect::<Vec<_>>();
        for id in ids {
            let (tref, next) = {
                let train = self.net.train(id)?;
                if train.finished || train.control_mode != ControlMode::AutoSignal {
                    continue;
                }
                (train.train_ref(), self.net.next_signal_on_route(train))
            };
            self.net.train_mut(id)?.next_signal = next;
            if let Some(sig) = next {
                self.net.update_approach(sig);
                let cleared = self.net.request_clear(sig, ClearRequest::new(tref))?;
                trace!("train {} at {}: cleared {}", id, self.net.signals[sig.0].name, cleared);
            }
        }
        Ok(())
    }

    fn refresh_slice(&mut self) {
        let count = self.net.signals.len();
        if count == 0 {
            return;
        }
        for _ in 0..self.net.settings.signals_per_tick.min(count) {
            let sig = SignalIdx(self.cursor % count);
            self.net.update_approach(sig);
            self.net.update_aspects(sig);
            self.cursor = (self.cursor + 1) % count;
        }
    }

    /// Move the train one node ahead if it may. Returns whether it moved.
    fn advance(&mut self, id: TrainId) -> Result<bool, InterlockError> {
        let (front, next, mode) = {
            let train = self.net.train(id)?;
            if train.finished {
                return Ok(false);
            }
            if train.at_route_end() {
                self.net.retire_train(id)?;
                return Ok(true);
            }
            (train.route[train.front], train.route[train.front + 1], train.control_mode)
        };

        let signal = self.net.nodes[front.node.0].end_signals[front.direction.index()]
            .filter(|s| self.net.signals[s.0].is_normal());
        let target = &self.net.nodes[next.node.0];
        let may_enter = match mode {
            ControlMode::AutoSignal => {
                let signal_ok = signal
                    .map(|s| {
                        let s = &self.net.signals[s.0];
                        s.enabled_for(id) && s.normal_aspect() > Aspect::Stop
                    })
                    .unwrap_or(true);
                signal_ok && target.state.reserved == Some(id) && !target.occupied_by_other_trains(id)
            }
            ControlMode::AutoNode => target.is_available(id),
        };
        if !may_enter {
            return Ok(false);
        }

        if mode == ControlMode::AutoNode {
            let route = self.net.train(id)?.route.clone();
            self.net.nodes[next.node.0].reserve(id, &route);
        }
        if let Some(s) = signal.filter(|s| self.net.signals[s.0].enabled_for(id)) {
            debug!("train {} passes {}", id, self.net.signals[s.0].name);
            self.net.signal_passed(s);
        }

        let length = self.net.nodes[next.node.0].length;
        self.net.nodes[next.node.0].set_occupied(
            id,
            Occupant {
                direction: next.direction,
                from: 0.0,
                to: length,
            },
        );
        self.leave_zone(id, front.node, next.node)?;

        let released = {
            let train = self.net.trains.get_mut(&id).ok_or(InterlockError::UnknownTrain(id))?;
            train.front += 1;
            train.front_offset = length;
            train.occupied.push(train.front);
            let mut released = Vec::new();
            let nodes = &self.net.nodes;
            while train.occupied.len() > 1
                && train.occupied[1..]
                    .iter()
                    .map(|i| nodes[train.route[*i].node.0].length)
                    .sum::<f64>()
                    >= train.length
            {
                released.push(train.route[train.occupied.remove(0)].node);
            }
            released
        };
        for node in released {
            trace!("train {} releases {}", id, node);
            self.net.nodes[node.0].remove_train(id);
        }
        Ok(true)
    }

    /// Drop the train's zone reference once it leaves a passing loop.
    fn leave_zone(&mut self, id: TrainId, from: NodeIdx, to: NodeIdx) -> Result<(), InterlockError> {
        let zone = match (self.net.nodes[from.0].deadlock_zone, self.net.nodes[to.0].deadlock_reference) {
            (Some(inside), Some(boundary)) if inside == boundary => inside,
            _ => return Ok(()),
        };
        let tref = self.net.train(id)?.train_ref();
        let info = self.net.deadlocks.get_mut(zone).ok_or(InterlockError::UnknownZone(zone))?;
        debug!("train {} leaves {}", id, zone);
        info.remove_train_reference(tref);
        self.net.release_traps(id);
        Ok(())
    }

    fn report_waiting(&self) {
        for train in self.net.trains.values().filter(|t| !t.finished) {
            let front = train.front_element().map(|e| e.to_string()).unwrap_or_default();
            let signal = train
                .next_signal
                .map(|s| {
                    let s = &self.net.signals[s.0];
                    format!("{} ({:?})", s.name, s.block_state)
                })
                .unwrap_or_else(|| "none".to_string());
            warn!(
                "train {} ({}) stuck at {} in {:?}, next signal {}",
                train.id, train.name, front, train.control_mode, signal
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::tests::network_from;
    use serde_json::json;

    #[test]
    fn test_leaving_missing_zone_is_an_error() {
        let mut net = network_from(json!({
            "nodes": [
                {"name": "a", "length": 100.0},
                {"name": "b", "length": 100.0},
            ],
            "links": [{"from": "a", "to": ["b"]}],
            "trains": [{"name": "T1", "length": 50.0, "route": ["a", "b"]}],
        }));
        let t1 = net.train_by_name("T1").unwrap();
        let (a, b) = (net.node_by_name("a").unwrap(), net.node_by_name("b").unwrap());
        net.nodes[a.0].deadlock_zone = Some(ZoneIdx(3));
        net.nodes[b.0].deadlock_reference = Some(ZoneIdx(3));
        net.train_mut(t1).unwrap().control_mode = ControlMode::AutoNode;

        let mut sim = Simulation::new(net);
        assert!(matches!(sim.step(), Err(InterlockError::UnknownZone(ZoneIdx(3)))));
    }
}
