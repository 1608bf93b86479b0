//! Route clearance.
//!
//! A train asks the next signal ahead of it to clear. The signal captures the
//! stretch of the train's route up to the next normal signal, checks how much
//! of it can be reserved, reserves what it can, and hands the request on to
//! the signals beyond as far as its clear-ahead budget allows. Requests that
//! cannot be satisfied leave the signal restrictive and are simply repeated
//! on a later tick.

use crate::deadlock::PathAssignment;
use crate::error::InterlockError;
use crate::network::Network;
use crate::scanner::{scan, scan_route, ScanPolicy, ScanState};
use crate::script::{default_aspect, evaluate, ScriptInputs, ScriptLibrary};
use crate::signal::*;
use crate::types::*;
use log::*;
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Copy)]
pub struct ClearRequest {
    pub train: TrainRef,
    /// Clear-ahead budget handed over by the requester.
    pub clear_ahead: Option<u32>,
    pub propagated: bool,
    pub origin: Option<SignalIdx>,
    /// The requester allows checking past the first switch or signal.
    pub full_route_check: bool,
}

impl ClearRequest {
    pub fn new(train: TrainRef) -> Self {
        ClearRequest {
            train,
            clear_ahead: None,
            propagated: false,
            origin: None,
            full_route_check: true,
        }
    }
}

struct StepOutcome {
    accepted: bool,
    budget: u32,
    propagate_to: Option<SignalIdx>,
}

impl StepOutcome {
    fn rejected() -> Self {
        StepOutcome {
            accepted: false,
            budget: 0,
            propagate_to: None,
        }
    }
}

enum PathChoice {
    Uncataloged,
    Wait(BTreeSet<TrainId>),
    Current,
    Other { far: NodeIdx, name: String, path: TrainRoute },
}

enum Resolution {
    /// The route already follows the selected path.
    Free,
    /// The train's route now follows another path through the zone.
    Spliced,
    Wait,
    Broken,
}

impl Network {
    /// Ask `signal` to clear for the requesting train. Returns whether the
    /// signal now shows at least an approach aspect.
    pub fn request_clear(&mut self, signal: SignalIdx, request: ClearRequest) -> Result<bool, InterlockError> {
        self.signal(signal)?;
        self.train(request.train.train)?;

        let drive = !request.propagated;
        let mut current = signal;
        let mut request = request;
        let mut visited = Vec::new();

        // Each signal is visited at most once per request.
        while visited.len() < self.signals.len() {
            let outcome = self.clear_step(current, &request)?;
            visited.push(current);
            if !outcome.accepted || !drive {
                break;
            }
            match outcome.propagate_to {
                Some(next) if !visited.contains(&next) => {
                    trace!(
                        "{} propagating clear request for train {} to {} (budget {})",
                        current,
                        request.train.train,
                        next,
                        outcome.budget
                    );
                    request = ClearRequest {
                        clear_ahead: Some(outcome.budget),
                        propagated: true,
                        origin: Some(current),
                        ..request
                    };
                    current = next;
                }
                _ => break,
            }
        }

        for s in visited.iter().rev() {
            self.update_aspects(*s);
        }
        Ok(self.signals[signal.0].normal_aspect().at_least_approach())
    }

    fn clear_step(&mut self, sig: SignalIdx, request: &ClearRequest) -> Result<StepOutcome, InterlockError> {
        let t = request.train.train;
        let (enabled, locked, node, direction) = {
            let s = self.signal(sig)?;
            (s.enabled_train, s.has_lock_for(request.train), s.node, s.direction)
        };

        if let Some(holder) = enabled {
            if holder.train != t {
                self.recover_conflict(sig, holder.train, t);
                return Ok(StepOutcome::rejected());
            }
        }
        if locked {
            debug!("{} is locked for train {}", sig, t);
            return Ok(StepOutcome::rejected());
        }

        let train = self.train(t)?;
        let position = match train
            .route_ahead()
            .iter()
            .position(|e| e.node == node && e.direction == direction)
        {
            Some(p) => p + train.front,
            None => {
                debug!("route of train {} does not reach {}", t, sig);
                return Ok(StepOutcome::rejected());
            }
        };

        if enabled != Some(request.train) {
            let route = self.capture_route(&train.route, position);
            self.enable(sig, request.train, route);
        }

        let budget = {
            let function_default = self.signals[sig.0].clear_ahead.default;
            let s = &mut self.signals[sig.0];
            s.propagated = request.propagated;
            s.propagated_from = request.origin;
            let active = match (s.clear_ahead.live, request.clear_ahead) {
                (Some(live), _) => live,
                (None, Some(b)) if request.propagated => b.saturating_sub(1),
                (None, Some(b)) => b,
                (None, None) => function_default,
            };
            s.clear_ahead.active = active;
            active
        };

        // Behind a signal that stays at stop only the first section is checked.
        let origin_at_stop = request
            .origin
            .map(|o| {
                let o = &self.signals[o.0];
                o.block_state > InternalBlockstate::Reserved || o.hold == HoldState::ManualApproach
            })
            .unwrap_or(false);
        let full_check =
            request.full_route_check && self.settings.full_route_check && !(request.propagated && origin_at_stop);
        self.check_route_state(sig, request.train, full_check);

        let s = &self.signals[sig.0];
        let holds_propagation = s.approach.armed && !s.approach.force_propagate && !s.approach.cleared;
        let propagate_to = if budget > 0 && s.block_state <= InternalBlockstate::Reservable && !holds_propagation {
            self.signal_at_route_end(sig)
        } else {
            None
        };

        Ok(StepOutcome {
            accepted: true,
            budget,
            propagate_to,
        })
    }

    /// The stretch of `route` after `position` up to and including the node
    /// ending at the next normal signal, or up to the end of track. A node
    /// seen twice cuts the route short.
    pub fn capture_route(&self, route: &[RouteElement], position: usize) -> TrainRoute {
        let policy = ScanPolicy::next_signal(SignalFunction::Normal);
        let result = scan_route(self, route, position + 1, 0.0, &policy);
        if result.state == ScanState::Loop {
            debug!("route revisits a node, truncating at {}", format_route(&result.elements));
        }
        result.elements
    }

    fn enable(&mut self, sig: SignalIdx, train: TrainRef, route: TrainRoute) {
        let old = std::mem::take(&mut self.signals[sig.0].route);
        for e in old.iter() {
            self.nodes[e.node.0].signals_passing_routes.remove(&sig);
        }
        for e in route.iter() {
            self.nodes[e.node.0].signals_passing_routes.insert(sig);
        }
        let s = &mut self.signals[sig.0];
        debug!("{} enabled for train {} over {}", s.name, train.train, format_route(&route));
        s.enabled_train = Some(train);
        s.route = route;
        s.last_reserved = None;
        s.invalidate_next_signals();
    }

    fn signal_at_route_end(&self, sig: SignalIdx) -> Option<SignalIdx> {
        let last = self.signals[sig.0].route.last()?;
        self.nodes[last.node.0].end_signals[last.direction.index()]
            .filter(|s| *s != sig && self.signals[s.0].is_normal())
    }

    /// Two trains claim the same signal: put both under node control and
    /// unwind what either has reserved ahead of itself.
    fn recover_conflict(&mut self, sig: SignalIdx, holder: TrainId, requester: TrainId) {
        error!(
            "{} is enabled for train {} but train {} requests it, falling back to node control",
            self.signals[sig.0].name, holder, requester
        );
        self.reset_signal(sig, true);
        for train in [holder, requester] {
            self.set_node_control(train);
            self.unwind_reservations(train);
        }
    }

    /// Determine the block state of the signal's route and commit the
    /// reservations it allows.
    pub fn check_route_state(&mut self, sig: SignalIdx, train: TrainRef, full_check: bool) {
        let t = train.train;
        let hold = self.signals[sig.0].hold;
        if hold.forces_stop() {
            let s = &mut self.signals[sig.0];
            s.block_state = InternalBlockstate::Blocked;
            s.permission = Permission::Denied;
            return;
        }

        let mut state = InternalBlockstate::Reserved;
        let mut checked = 0;
        let mut resolved_zones = BTreeSet::new();
        let mut i = 0;
        loop {
            let route = self.signals[sig.0].route.clone();
            if i >= route.len() {
                break;
            }

            // Zone entries are resolved before the boundary node itself is
            // looked at, so a waiting train is re-evaluated on every request
            // and never holds the boundary while it waits.
            let mut entries = Vec::new();
            if i == 0 {
                entries.push((self.signals[sig.0].node, route[0].node, 0));
            }
            if let Some(next) = route.get(i + 1) {
                entries.push((route[i].node, next.node, i));
            }
            let mut spliced = false;
            let mut wait_from = None;
            for (from, to, boundary_pos) in entries {
                let zone = match self.zone_entered(from, to) {
                    Some(zone) if resolved_zones.insert(zone) => zone,
                    _ => continue,
                };
                match self.resolve_deadlock(sig, zone, from, train) {
                    Resolution::Free => {}
                    Resolution::Spliced => {
                        spliced = true;
                        break;
                    }
                    Resolution::Wait => {
                        state = state.max(InternalBlockstate::ForcedWait);
                        wait_from = Some(boundary_pos);
                        break;
                    }
                    Resolution::Broken => {
                        state = InternalBlockstate::Blocked;
                        wait_from = Some(boundary_pos);
                        break;
                    }
                }
            }
            if spliced {
                continue;
            }
            if let Some(pos) = wait_from {
                self.release_from(sig, t, pos);
                break;
            }

            let e = route[i];
            let node = &self.nodes[e.node.0];
            state = node.get_section_state(t, e.direction, state, &route, Some(sig));
            if state > InternalBlockstate::Reservable {
                break;
            }
            checked = i + 1;
            let stop_here = node.is_facing_switch(e.direction)
                || node.is_switch()
                || node.end_signals[e.direction.index()].is_some()
                || node.pins[e.direction.index()][0].is_none();
            if !full_check && stop_here {
                break;
            }
            i += 1;
        }

        self.commit(sig, train, state, checked);
    }

    /// Give up what the signal's route holds for `train` from `pos` on.
    fn release_from(&mut self, sig: SignalIdx, train: TrainId, pos: usize) {
        let route = self.signals[sig.0].route.clone();
        for e in route.iter().skip(pos) {
            let node = &mut self.nodes[e.node.0];
            if node.state.reserved == Some(train) && !node.occupied_by_this_train(train) {
                trace!("{} released by train {} while waiting", e.node, train);
                node.unreserve();
            }
        }
    }

    fn zone_entered(&self, from: NodeIdx, to: NodeIdx) -> Option<ZoneIdx> {
        let zone = self.nodes[from.0].deadlock_reference?;
        (self.nodes[to.0].deadlock_zone == Some(zone)).then(|| zone)
    }

    fn commit(&mut self, sig: SignalIdx, train: TrainRef, state: InternalBlockstate, checked: usize) {
        let t = train.train;
        let (route, approach_held) = {
            let s = &self.signals[sig.0];
            (
                s.route.clone(),
                s.approach.holds() || s.hold == HoldState::ManualApproach,
            )
        };

        {
            let s = &mut self.signals[sig.0];
            s.permission = match (state, s.permission) {
                (InternalBlockstate::OccupiedSameDirection, Permission::Requested)
                | (InternalBlockstate::OccupiedSameDirection, Permission::Granted) => Permission::Granted,
                _ => Permission::Denied,
            };
        }

        if route.is_empty() {
            self.signals[sig.0].block_state = InternalBlockstate::Blocked;
            return;
        }

        if approach_held && state <= InternalBlockstate::Reservable {
            self.signals[sig.0].block_state = InternalBlockstate::Reservable;
            return;
        }

        for e in &route[..checked] {
            self.nodes[e.node.0].reserve(t, &route);
        }
        let s = &mut self.signals[sig.0];
        s.last_reserved = checked.checked_sub(1);
        if state <= InternalBlockstate::Reservable {
            s.block_state = InternalBlockstate::Reserved;
            return;
        }
        s.block_state = state;

        // Queue behind trains running the same way.
        for e in &route[checked..] {
            let node = &mut self.nodes[e.node.0];
            let same_way = node.occupied_by_other_trains(t)
                && node
                    .state
                    .occupation
                    .iter()
                    .all(|(o, occ)| *o == t || occ.direction == e.direction);
            if !same_way {
                break;
            }
            node.pre_reserve(t);
        }

        let claiming = self
            .trains
            .get(&t)
            .map(|tr| tr.claim_mode && tr.next_signal == Some(sig))
            .unwrap_or(false);
        if claiming {
            for e in &route[checked..] {
                let node = &mut self.nodes[e.node.0];
                if node.has_trap_of_other(t) {
                    break;
                }
                node.claim(t);
            }
        }
    }

    /// Make sure the train's route through `zone` entered at `boundary`
    /// follows an available path, splicing in another one if needed.
    fn resolve_deadlock(&mut self, sig: SignalIdx, zone: ZoneIdx, boundary: NodeIdx, train: TrainRef) -> Resolution {
        let t = train.train;
        let (route, front, length) = match self.trains.get(&t) {
            Some(tr) => (tr.route.clone(), tr.front, tr.length),
            None => return Resolution::Broken,
        };
        let ahead = &route[front..];

        let choice = {
            let Network { deadlocks, nodes, .. } = &mut *self;
            let info = match deadlocks.get_mut(zone) {
                Some(info) => info,
                None => return Resolution::Broken,
            };
            if info.assign_or_register(train, length, ahead, nodes).is_none() {
                PathChoice::Uncataloged
            } else {
                let candidates = info.check_availability(boundary, train, nodes);
                let far = info.far_boundary(boundary);
                let chosen = if candidates.is_empty() {
                    None
                } else {
                    info.select_path(&candidates, train, boundary)
                };
                match chosen {
                    None => PathChoice::Wait(info.contenders(far, t).into_iter().map(|(o, _)| o).collect()),
                    Some(chosen) => {
                        let at = ahead.iter().position(|e| e.node == boundary);
                        if at.and_then(|at| info.matching_path(ahead, at, info.handle(train))) == Some(chosen) {
                            PathChoice::Current
                        } else {
                            PathChoice::Other {
                                far,
                                name: info.paths[chosen].name.clone(),
                                path: info.paths[chosen].path.clone(),
                            }
                        }
                    }
                }
            }
        };

        let (far, name, path) = match choice {
            PathChoice::Uncataloged => {
                error!("train {} enters {} at {} on a path that cannot be cataloged", t, zone, boundary);
                self.set_node_control(t);
                return Resolution::Broken;
            }
            PathChoice::Wait(opponents) => {
                let node = &mut self.nodes[boundary.0];
                if node.deadlock_awaited.insert(t) {
                    debug!("train {} waits at {} for a path through {}", t, boundary, zone);
                }
                node.deadlock_traps.insert(t, opponents);
                return Resolution::Wait;
            }
            PathChoice::Current => {
                self.release_wait(boundary, t);
                return Resolution::Free;
            }
            PathChoice::Other { far, name, path } => (far, name, path),
        };
        self.release_wait(boundary, t);

        let at = ahead.iter().position(|e| e.node == boundary);
        let end = at.and_then(|at| ahead[at + 1..].iter().position(|e| e.node == far).map(|p| at + 1 + p));
        let (at, end) = match (at, end) {
            (Some(at), Some(end)) => (at, end),
            _ => {
                error!("route of train {} does not reconnect at {} after {}", t, far, zone);
                self.set_node_control(t);
                self.unwind_reservations(t);
                return Resolution::Broken;
            }
        };
        let replaced = ahead[at + 1..end].iter().map(|e| e.node).collect::<BTreeSet<_>>();
        info!("train {} takes path {:?} through {}", t, name, zone);

        let mut new_route = route[..front + at].to_vec();
        new_route.extend(path);
        new_route.extend_from_slice(&route[front + end + 1..]);

        // Other clearances of this train over the old path no longer hold.
        let stale = self
            .signals
            .iter()
            .filter(|s| s.index != sig && s.enabled_for(t))
            .filter(|s| s.route.iter().any(|e| replaced.contains(&e.node)))
            .map(|s| s.index)
            .collect::<Vec<_>>();
        for s in stale {
            self.reset_signal(s, false);
        }
        for e in self.signals[sig.0].route.clone() {
            let node = &mut self.nodes[e.node.0];
            if replaced.contains(&e.node) && node.state.reserved == Some(t) && !node.occupied_by_this_train(t) {
                node.unreserve();
            }
        }

        let position = new_route[front..]
            .iter()
            .position(|e| e.node == self.signals[sig.0].node)
            .map(|p| p + front);
        let captured = match position {
            Some(p) => self.capture_route(&new_route, p),
            None => return Resolution::Broken,
        };
        if let Some(tr) = self.trains.get_mut(&t) {
            tr.route = new_route;
        }
        self.enable(sig, train, captured);
        Resolution::Spliced
    }

    fn release_wait(&mut self, boundary: NodeIdx, train: TrainId) {
        let node = &mut self.nodes[boundary.0];
        node.deadlock_awaited.remove(&train);
        node.deadlock_traps.remove(&train);
    }

    /// Clear the signal and, with `propagate`, the chain of signals beyond it
    /// enabled for the same train, releasing the nodes they reserved.
    pub fn reset_signal(&mut self, sig: SignalIdx, propagate: bool) {
        let train = match self.signals[sig.0].enabled_train {
            Some(t) => t.train,
            None => return,
        };
        let mut current = Some(sig);
        let mut visited = HashSet::new();
        while let Some(s) = current {
            if !visited.insert(s) || !self.signals[s.0].enabled_for(train) {
                break;
            }
            let route = std::mem::take(&mut self.signals[s.0].route);
            for e in route.iter() {
                let node = &mut self.nodes[e.node.0];
                if node.state.reserved == Some(train) && !node.occupied_by_this_train(train) {
                    node.unreserve();
                }
                node.state.claimed.retain(|c| *c != train);
                node.state.pre_reserved.retain(|c| *c != train);
                node.signals_passing_routes.remove(&s);
            }
            current = if propagate {
                route.last().and_then(|last| {
                    self.nodes[last.node.0].end_signals[last.direction.index()].filter(|n| *n != s)
                })
            } else {
                None
            };
            debug!("{} reset for train {}", self.signals[s.0].name, train);
            self.signals[s.0].clear_enabled();
            self.update_aspects(s);
        }
    }

    /// The train has passed the signal: the signal returns to not-enabled
    /// while the nodes stay with the train.
    pub fn signal_passed(&mut self, sig: SignalIdx) {
        let route = std::mem::take(&mut self.signals[sig.0].route);
        for e in route.iter() {
            self.nodes[e.node.0].signals_passing_routes.remove(&sig);
        }
        self.signals[sig.0].clear_enabled();
        self.update_aspects(sig);
    }

    /// A switch on `node` has been relaid: signals whose routes pass it must
    /// look up their next signals again.
    pub fn reset_route(&mut self, node: NodeIdx) {
        let passing = self.nodes[node.0].signals_passing_routes.iter().copied().collect::<Vec<_>>();
        for s in passing {
            trace!("{} drops next-signal cache after change at {}", s, node);
            self.signals[s.0].invalidate_next_signals();
        }
        for s in self.signals.iter_mut().filter(|s| s.enabled_train.is_none()) {
            s.invalidate_next_signals();
        }
    }

    /// Next signal with a head of `function` beyond `sig`, along its route
    /// when enabled and along the current switch settings otherwise.
    pub fn next_signal(&mut self, sig: SignalIdx, function: SignalFunction) -> Option<SignalIdx> {
        if let Some(cached) = self.signals[sig.0].next_signals.get(&function) {
            return *cached;
        }
        let s = &self.signals[sig.0];
        let policy = ScanPolicy {
            max_distance: Some(self.settings.max_scan_distance),
            ..ScanPolicy::next_signal(function)
        };
        let found = if !s.route.is_empty() {
            scan_route(self, &s.route, 0, 0.0, &policy).found_signal()
        } else {
            let node = &self.nodes[s.node.0];
            let d = s.direction.index();
            let leg = if node.is_facing_switch(s.direction) { node.last_route } else { 0 };
            node.active_pins[d][0]
                .or(node.pins[d][leg])
                .and_then(|pin| scan(self, pin.element(), 0.0, &policy).found_signal())
        };
        self.signals[sig.0].next_signals.insert(function, found);
        found
    }

    /// Release an armed approach control once the enabled train is close
    /// enough.
    pub fn update_approach(&mut self, sig: SignalIdx) {
        let (armed, enabled, node, release, locked) = {
            let s = &self.signals[sig.0];
            (
                s.approach.armed,
                s.enabled_train,
                s.node,
                s.approach.release_distance.unwrap_or(self.settings.approach_release_distance),
                s.approach.claim_locked,
            )
        };
        let train = match (armed, enabled) {
            (true, Some(t)) => t.train,
            _ => return,
        };
        let distance = self.trains.get(&train).and_then(|tr| {
            let pos = tr.position_ahead(node)?;
            let front_node = &self.nodes[tr.route[tr.front].node.0];
            let mut d = (front_node.length - tr.front_offset).max(0.0);
            for e in &tr.route[tr.front + 1..=pos.max(tr.front)] {
                d += self.nodes[e.node.0].length;
            }
            Some(d)
        });
        let s = &mut self.signals[sig.0];
        match distance {
            Some(d) if d <= release => {
                if !s.approach.cleared {
                    debug!("{} approach control released at {:.0} m", s.name, d);
                }
                s.approach.cleared = true;
            }
            _ if !locked => s.approach.cleared = false,
            _ => {}
        }
    }

    /// Recompute the aspect of every head of the signal.
    pub fn update_aspects(&mut self, sig: SignalIdx) {
        let next_aspect = self
            .next_signal(sig, SignalFunction::Normal)
            .map(|n| self.signals[n.0].normal_aspect());
        let Network { signals, scripts, .. } = &mut *self;
        let scripts: &ScriptLibrary = scripts;
        let s = &mut signals[sig.0];
        let inputs = ScriptInputs {
            block_state: s.block_state,
            enabled: s.enabled_train.is_some(),
            next_aspect,
            permission: s.permission,
            approach_held: s.approach.holds() || s.hold == HoldState::ManualApproach,
        };
        for h in 0..s.heads.len() {
            let function = s.heads[h].function;
            let script = s.heads[h].script.as_ref().and_then(|name| {
                let script = scripts.get(name);
                if script.is_none() {
                    debug!("{} uses unknown script {}, using default", s.name, name);
                }
                script
            });
            let (aspect, draw_state) = match script {
                Some(script) => evaluate(script, &inputs, &mut *s),
                None => {
                    let aspect = default_aspect(function, &inputs, s.call_on);
                    (aspect, aspect.code())
                }
            };
            s.heads[h].aspect = aspect;
            s.heads[h].draw_state = draw_state;
        }
    }

    /// Assign the train to a catalog path in every zone its route passes,
    /// registering its own path where none matches.
    pub fn assign_deadlock_paths(&mut self, train: TrainId) -> Result<(), InterlockError> {
        let (tref, length, route) = {
            let tr = self.train(train)?;
            (tr.train_ref(), tr.length, tr.route.clone())
        };
        let Network { deadlocks, nodes, .. } = &mut *self;
        for zone in deadlocks.zones.iter_mut() {
            match zone.assign_train_path(tref, length, &route, nodes) {
                PathAssignment::NoMatch => {
                    if zone.assign_or_register(tref, length, &route, nodes).is_none() {
                        warn!("train {} passes {} on a path that could not be registered", train, zone.id);
                    }
                }
                PathAssignment::Own(p) => trace!("train {} assigned path {} in {}", train, p, zone.id),
                PathAssignment::OutOfZone => {}
            }
        }
        Ok(())
    }
}
