//! Stateless traversal of the track network.
//!
//! A scan walks node by node from a start position, either following the
//! switch alignment found in the network or a given train route, and stops at
//! the first qualifying item or when the track, the path or the authority
//! ends. Revisiting a node ends the scan with [`ScanState::Loop`].

use crate::network::Network;
use crate::signal::SignalFunction;
use crate::track::{Pin, TrackNode};
use crate::types::*;
use log::*;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
pub struct ScanPolicy {
    /// Scan in the direction of travel, or backwards against it.
    pub forward: bool,
    /// Stop at the first signal with a head of this function.
    pub stop_at_signal: Option<SignalFunction>,
    pub stop_at_speed_restriction: bool,
    pub honour_manual_switches: bool,
    /// Only walk nodes reserved for or occupied by this train.
    pub reserved_only: Option<TrainId>,
    pub max_distance: Option<f64>,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        ScanPolicy {
            forward: true,
            stop_at_signal: None,
            stop_at_speed_restriction: false,
            honour_manual_switches: false,
            reserved_only: None,
            max_distance: None,
        }
    }
}

impl ScanPolicy {
    pub fn next_signal(function: SignalFunction) -> Self {
        ScanPolicy {
            stop_at_signal: Some(function),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanItem {
    Signal(SignalIdx),
    SpeedRestriction { node: NodeIdx, limit: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanState {
    ItemFound(ScanItem),
    EndOfTrack,
    EndOfPath,
    EndOfAuthority,
    MaxDistanceExceeded,
    Loop,
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Traversed nodes with their direction of traversal, start included.
    pub elements: TrainRoute,
    pub state: ScanState,
    /// Distance from the start position to the end of the last element.
    pub distance: f64,
}

impl ScanResult {
    pub fn found_signal(&self) -> Option<SignalIdx> {
        match self.state {
            ScanState::ItemFound(ScanItem::Signal(s)) => Some(s),
            _ => None,
        }
    }
}

enum Source<'a> {
    Network,
    Route(&'a [RouteElement], usize),
}

/// Scan through the network from `start`, `offset` metres into the node in
/// its direction of travel, following current switch alignment.
pub fn scan(net: &Network, start: RouteElement, offset: f64, policy: &ScanPolicy) -> ScanResult {
    run(net, start, offset, policy, Source::Network)
}

/// Scan along a given route starting at `route[start]`, towards its end or,
/// for a backward policy, towards its beginning. Running off the route gives
/// [`ScanState::EndOfPath`].
pub fn scan_route(
    net: &Network,
    route: &[RouteElement],
    start: usize,
    offset: f64,
    policy: &ScanPolicy,
) -> ScanResult {
    match route.get(start) {
        Some(first) => run(net, *first, offset, policy, Source::Route(route, start)),
        None => ScanResult {
            elements: Vec::new(),
            state: ScanState::EndOfPath,
            distance: 0.0,
        },
    }
}

fn run(net: &Network, start: RouteElement, offset: f64, policy: &ScanPolicy, mut source: Source) -> ScanResult {
    let mut current = if policy.forward { start } else { start.reversed() };
    let mut elements = Vec::new();
    let mut visited = HashSet::new();
    let mut distance = 0.0;
    let mut first = true;

    let state = loop {
        if !visited.insert(current.node) {
            trace!("scan from {} looped at {}", start, current.node);
            break ScanState::Loop;
        }
        let node = &net.nodes[current.node.0];

        if let Some(train) = policy.reserved_only {
            if !first && !node.is_set(train) {
                break ScanState::EndOfAuthority;
            }
        }

        elements.push(current);

        if policy.stop_at_speed_restriction && !first {
            if let Some(limit) = node.speed_limits[current.direction.index()] {
                break ScanState::ItemFound(ScanItem::SpeedRestriction {
                    node: current.node,
                    limit,
                });
            }
        }

        distance += if first {
            if policy.forward {
                (node.length - offset).max(0.0)
            } else {
                offset.min(node.length)
            }
        } else {
            node.length
        };

        if let Some(max) = policy.max_distance {
            if distance > max {
                break ScanState::MaxDistanceExceeded;
            }
        }

        if let Some(function) = policy.stop_at_signal {
            // Backward scans report signals facing the original direction.
            let facing = if policy.forward {
                current.direction
            } else {
                current.direction.reverse()
            };
            let skip = !policy.forward && first;
            if !skip {
                if let Some(sig) = node.end_signals[facing.index()] {
                    if net.signals[sig.0].has_function(function) {
                        break ScanState::ItemFound(ScanItem::Signal(sig));
                    }
                }
            }
        }

        first = false;

        let next = match &mut source {
            Source::Network => match next_pin(node, current.direction, policy) {
                Ok(Some(pin)) => pin.element(),
                Ok(None) => break ScanState::EndOfTrack,
                Err(state) => break state,
            },
            Source::Route(route, idx) => {
                let step = if policy.forward { idx.checked_add(1) } else { idx.checked_sub(1) };
                match step.and_then(|i| route.get(i).map(|e| (i, *e))) {
                    Some((i, e)) => {
                        *idx = i;
                        if policy.forward {
                            e
                        } else {
                            e.reversed()
                        }
                    }
                    None => {
                        if node.pins[current.direction.index()][0].is_none() {
                            break ScanState::EndOfTrack;
                        }
                        break ScanState::EndOfPath;
                    }
                }
            }
        };
        current = next;
    };

    ScanResult {
        elements,
        state,
        distance,
    }
}

/// Link to follow out of `node` in `dir`: the aligned link if the switch is
/// set, otherwise the operator setting or last commanded leg, unless the scan
/// is restricted to reserved track.
fn next_pin(node: &TrackNode, dir: Direction, policy: &ScanPolicy) -> Result<Option<Pin>, ScanState> {
    let pins = &node.pins[dir.index()];
    if !node.is_facing_switch(dir) {
        return Ok(pins[0]);
    }
    if let Some(active) = node.active_pins[dir.index()][0] {
        return Ok(Some(active));
    }
    if policy.reserved_only.is_some() {
        return Err(ScanState::EndOfAuthority);
    }
    let leg = match (policy.honour_manual_switches, node.manual_route) {
        (true, Some(leg)) => leg,
        _ => node.last_route,
    };
    Ok(pins.get(leg).copied().flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::tests::network_from;
    use serde_json::json;

    fn line() -> Network {
        network_from(json!({
            "nodes": [
                {"name": "a", "length": 100.0},
                {"name": "b", "length": 100.0},
                {"name": "c", "length": 100.0},
                {"name": "d", "length": 100.0},
            ],
            "links": [
                {"from": "a", "to": ["b"]},
                {"from": "b", "to": ["c", "d"]},
            ],
            "signals": [
                {"name": "S1", "node": "a", "heads": [{"function": "normal"}]},
                {"name": "D1", "node": "b", "heads": [{"function": "distance"}]},
            ],
        }))
    }

    fn el(net: &Network, name: &str) -> RouteElement {
        RouteElement::new(net.node_by_name(name).unwrap(), Direction::Ahead)
    }

    #[test]
    fn test_follows_last_route_at_switch() {
        let net = line();
        let result = scan(&net, el(&net, "a"), 0.0, &ScanPolicy::default());
        assert_eq!(result.state, ScanState::EndOfTrack);
        assert_eq!(
            result.elements,
            vec![el(&net, "a"), el(&net, "b"), el(&net, "c")]
        );
        assert_eq!(result.distance, 300.0);
    }

    #[test]
    fn test_honours_manual_setting() {
        let mut net = line();
        let b = net.node_by_name("b").unwrap();
        net.nodes[b.0].manual_route = Some(1);
        let policy = ScanPolicy {
            honour_manual_switches: true,
            ..Default::default()
        };
        let result = scan(&net, el(&net, "a"), 0.0, &policy);
        assert_eq!(result.elements.last(), Some(&el(&net, "d")));
        let result = scan(&net, el(&net, "a"), 0.0, &ScanPolicy::default());
        assert_eq!(result.elements.last(), Some(&el(&net, "c")));
    }

    #[test]
    fn test_stops_at_signal_of_function() {
        let net = line();
        let result = scan(&net, el(&net, "b"), 0.0, &ScanPolicy::next_signal(SignalFunction::Distance));
        assert_eq!(result.found_signal(), net.signal_by_name("D1"));
        let result = scan(&net, el(&net, "b"), 0.0, &ScanPolicy::next_signal(SignalFunction::Normal));
        assert_eq!(result.state, ScanState::EndOfTrack);
    }

    #[test]
    fn test_reserved_only_ends_at_unset_switch() {
        let mut net = line();
        let a = net.node_by_name("a").unwrap();
        let b = net.node_by_name("b").unwrap();
        net.nodes[a.0].state.reserved = Some(7);
        net.nodes[b.0].state.reserved = Some(7);
        let policy = ScanPolicy {
            reserved_only: Some(7),
            ..Default::default()
        };
        let result = scan(&net, el(&net, "a"), 0.0, &policy);
        assert_eq!(result.state, ScanState::EndOfAuthority);
        assert_eq!(result.elements.len(), 2);
    }

    #[test]
    fn test_max_distance() {
        let net = line();
        let policy = ScanPolicy {
            max_distance: Some(150.0),
            ..Default::default()
        };
        let result = scan(&net, el(&net, "a"), 0.0, &policy);
        assert_eq!(result.state, ScanState::MaxDistanceExceeded);
        assert_eq!(result.elements.len(), 2);
    }

    #[test]
    fn test_cycle_returns_loop() {
        let net = network_from(json!({
            "nodes": [
                {"name": "a", "length": 50.0},
                {"name": "b", "length": 50.0},
                {"name": "c", "length": 50.0},
            ],
            "links": [
                {"from": "a", "to": ["b"]},
                {"from": "b", "to": ["c"]},
                {"from": "c", "to": ["a"]},
            ],
        }));
        let result = scan(&net, el(&net, "a"), 0.0, &ScanPolicy::default());
        assert_eq!(result.state, ScanState::Loop);
        assert_eq!(result.elements.len(), 3);
    }

    #[test]
    fn test_scan_route_end_of_path() {
        let net = line();
        let route = vec![el(&net, "a"), el(&net, "b")];
        let result = scan_route(&net, &route, 0, 0.0, &ScanPolicy::default());
        assert_eq!(result.state, ScanState::EndOfPath);
        assert_eq!(result.elements, route);
    }

    #[test]
    fn test_backward_scan_finds_signal_behind() {
        let net = line();
        let policy = ScanPolicy {
            forward: false,
            ..ScanPolicy::next_signal(SignalFunction::Normal)
        };
        let result = scan(&net, el(&net, "c"), 50.0, &policy);
        assert_eq!(result.found_signal(), net.signal_by_name("S1"));
        assert_eq!(result.distance, 250.0);
    }

    #[test]
    fn test_backward_route_scan() {
        let net = line();
        let route = vec![el(&net, "a"), el(&net, "b"), el(&net, "c")];
        let policy = ScanPolicy {
            forward: false,
            ..ScanPolicy::next_signal(SignalFunction::Normal)
        };
        let result = scan_route(&net, &route, 2, 50.0, &policy);
        assert_eq!(result.found_signal(), net.signal_by_name("S1"));
        assert_eq!(
            result.elements,
            vec![route[2].reversed(), route[1].reversed(), route[0].reversed()]
        );
        assert_eq!(result.distance, 250.0);

        let backward = ScanPolicy {
            forward: false,
            ..Default::default()
        };
        let result = scan_route(&net, &route[1..], 1, 0.0, &backward);
        assert_eq!(result.state, ScanState::EndOfPath);
        assert_eq!(result.elements, vec![route[2].reversed(), route[1].reversed()]);
    }
}
