//! Scenario files: track nodes, links, signals, scripts, trains and passing
//! loops, read from JSON and converted into a [`Network`].

use crate::deadlock::AllowedTrains;
use crate::error::ScenarioError;
use crate::network::Network;
use crate::script::ScriptLibrary;
use crate::settings::EngineSettings;
use crate::signal::*;
use crate::track::{CircuitType, Pin};
use crate::train::Train;
use crate::types::*;
use log::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use velcro::iter;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub settings: EngineSettings,
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub links: Vec<RawLink>,
    #[serde(default)]
    pub signals: Vec<RawSignal>,
    #[serde(default)]
    pub scripts: ScriptLibrary,
    #[serde(default)]
    pub trains: Vec<RawTrain>,
    #[serde(default)]
    pub passing_loops: Vec<RawPassingLoop>,
}

#[derive(Debug, Deserialize)]
pub struct RawNode {
    pub name: String,
    pub length: f64,
    /// Derived from the links when left out.
    pub kind: Option<CircuitType>,
    /// Speed limits for ahead and reverse travel.
    #[serde(default)]
    pub speed_limits: [Option<f64>; 2],
}

/// Connects the ahead end of `from` to each node of `to`, at their reverse
/// end, or at their ahead end if `reversed`.
#[derive(Debug, Deserialize)]
pub struct RawLink {
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub reversed: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawSignal {
    pub name: String,
    pub node: String,
    #[serde(default = "ahead")]
    pub direction: Direction,
    pub heads: Vec<RawHead>,
    pub clear_ahead: Option<u32>,
    pub approach: Option<RawApproach>,
    /// Route shown while not enabled, as node names.
    pub fixed_route: Option<Vec<String>>,
}

fn ahead() -> Direction {
    Direction::Ahead
}

#[derive(Debug, Deserialize)]
pub struct RawHead {
    pub function: SignalFunction,
    pub script: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawApproach {
    pub release_distance: Option<f64>,
    #[serde(default)]
    pub force_propagate: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawTrain {
    pub name: String,
    pub length: f64,
    /// Node names, prefixed with `-` for reverse travel.
    pub route: Vec<String>,
    #[serde(default)]
    pub freight: bool,
    #[serde(default)]
    pub claim_mode: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawPassingLoop {
    pub entry: String,
    pub exit: String,
    pub paths: Vec<RawPassingPath>,
}

#[derive(Debug, Deserialize)]
pub struct RawPassingPath {
    pub name: String,
    /// Interior nodes, from entry to exit.
    pub via: Vec<String>,
    #[serde(default = "yes")]
    pub both_directions: bool,
}

fn yes() -> bool {
    true
}

pub fn load(filename: &Path) -> Result<Network, ScenarioError> {
    let contents = {
        let _h = hprof::enter("read file");
        trace!("Loading file {}", filename.display());
        std::fs::read_to_string(filename)?
    };
    let scenario: Scenario = {
        let _h = hprof::enter("parse");
        serde_json::from_str(&contents)?
    };
    let _h = hprof::enter("convert");
    convert(scenario)
}

pub fn convert(scenario: Scenario) -> Result<Network, ScenarioError> {
    if scenario.nodes.is_empty() {
        return Err(ScenarioError::Empty);
    }
    trace!(
        "Converting scenario with {} nodes {} signals {} trains",
        scenario.nodes.len(),
        scenario.signals.len(),
        scenario.trains.len()
    );

    let mut net = Network::new(scenario.settings);
    net.scripts = scenario.scripts;

    let mut names: HashMap<String, NodeIdx> = HashMap::new();
    for raw in scenario.nodes.iter() {
        if names.contains_key(&raw.name) {
            warn!("Duplicate node name {}, dropping", raw.name);
            continue;
        }
        if raw.length <= 0.0 {
            warn!("Node {} has length {}, dropping", raw.name, raw.length);
            continue;
        }
        let idx = net.add_node(raw.name.clone(), raw.length);
        net.nodes[idx.0].speed_limits = raw.speed_limits;
        names.insert(raw.name.clone(), idx);
    }

    for link in scenario.links.iter() {
        let from = match names.get(&link.from) {
            Some(n) => *n,
            None => {
                warn!("Link from unknown node {}, dropping", link.from);
                continue;
            }
        };
        for to in link.to.iter() {
            match names.get(to) {
                Some(to) => connect(&mut net, from, *to, link.reversed),
                None => warn!("Link from {} to unknown node {}, dropping", link.from, to),
            }
        }
    }

    for node in net.nodes.iter_mut() {
        let kind = scenario.nodes.iter().find(|r| r.name == node.name).and_then(|r| r.kind);
        node.circuit_type = kind.unwrap_or_else(|| {
            if node.pins.iter().any(|p| p[1].is_some()) {
                CircuitType::Junction
            } else if node.pins.iter().any(|p| p[0].is_none()) {
                CircuitType::EndOfTrack
            } else {
                CircuitType::Normal
            }
        });
    }

    for raw in scenario.signals.iter() {
        if let Err(reason) = add_signal(&mut net, &names, raw) {
            warn!("Signal {}: {}, dropping", raw.name, reason);
        }
    }

    for (n, passing) in scenario.passing_loops.iter().enumerate() {
        add_passing_loop(&mut net, &names, n, passing);
    }

    for raw in scenario.trains.iter() {
        if let Err(reason) = add_train(&mut net, &names, raw) {
            warn!("Train {}: {}, dropping", raw.name, reason);
        }
    }

    debug!(
        "Scenario has {} nodes, {} signals, {} zones, {} trains",
        net.nodes.len(),
        net.signals.len(),
        net.deadlocks.zones.len(),
        net.trains.len()
    );
    Ok(net)
}

/// Link the ahead end of `from` to `to`.
fn connect(net: &mut Network, from: NodeIdx, to: NodeIdx, reversed: bool) {
    let from_end = Direction::Ahead;
    let to_end = if reversed {
        Direction::Ahead
    } else {
        Direction::Reverse
    };
    let free_leg = |net: &Network, n: NodeIdx, end: Direction| net.nodes[n.0].pins[end.index()].iter().position(|p| p.is_none());
    let (a, b) = match (free_leg(net, from, from_end), free_leg(net, to, to_end)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            warn!(
                "Link {} - {} would give a node more than two legs, dropping",
                net.nodes[from.0].name, net.nodes[to.0].name
            );
            return;
        }
    };
    net.nodes[from.0].pins[from_end.index()][a] = Some(Pin {
        link: to,
        direction: to_end.reverse(),
    });
    net.nodes[to.0].pins[to_end.index()][b] = Some(Pin {
        link: from,
        direction: from_end.reverse(),
    });
}

fn add_signal(net: &mut Network, names: &HashMap<String, NodeIdx>, raw: &RawSignal) -> Result<(), String> {
    let node = *names.get(&raw.node).ok_or_else(|| format!("unknown node {}", raw.node))?;
    if raw.heads.is_empty() {
        return Err("no heads".to_string());
    }
    let fixed_route = match &raw.fixed_route {
        Some(route) => Some(parse_route(net, names, route)?),
        None => None,
    };
    let heads = raw
        .heads
        .iter()
        .map(|h| SignalHead::new(h.function, h.script.clone()))
        .collect();
    let idx = net
        .add_signal(raw.name.clone(), node, raw.direction, heads)
        .map_err(|e| e.to_string())?;

    let signal = &mut net.signals[idx.0];
    if let Some(n) = raw.clear_ahead {
        signal.clear_ahead.default = n;
        signal.clear_ahead.active = n;
    }
    if let Some(approach) = &raw.approach {
        signal.approach.armed = true;
        signal.approach.force_propagate = approach.force_propagate;
        signal.approach.release_distance = approach.release_distance;
    }
    if let Some(route) = fixed_route {
        signal.route = route.clone();
        signal.fixed_route = Some(route);
    }
    Ok(())
}

/// Resolve node names, `-` prefixed for reverse travel, and check that each
/// step follows a link.
fn parse_route(net: &Network, names: &HashMap<String, NodeIdx>, route: &[String]) -> Result<TrainRoute, String> {
    let elements = route
        .iter()
        .map(|name| {
            let (name, direction) = match name.strip_prefix('-') {
                Some(n) => (n, Direction::Reverse),
                None => (name.as_str(), Direction::Ahead),
            };
            names
                .get(name)
                .map(|n| RouteElement::new(*n, direction))
                .ok_or_else(|| format!("unknown node {} in route", name))
        })
        .collect::<Result<TrainRoute, String>>()?;
    for w in elements.windows(2) {
        let linked = net.nodes[w[0].node.0].pins[w[0].direction.index()]
            .iter()
            .flatten()
            .any(|p| p.element() == w[1]);
        if !linked {
            return Err(format!("no link from {} to {}", w[0], w[1]));
        }
    }
    Ok(elements)
}

/// Follow the links through `names`, taking the first node in whichever
/// direction leads to the second.
fn walk(net: &Network, names: &HashMap<String, NodeIdx>, path: &[&String]) -> Option<TrainRoute> {
    let nodes = path.iter().map(|n| names.get(*n).copied()).collect::<Option<Vec<_>>>()?;
    let first = *nodes.first()?;
    let second = *nodes.get(1)?;
    let mut dir = [Direction::Ahead, Direction::Reverse]
        .into_iter()
        .find(|d| net.nodes[first.0].leg_towards(*d, second).is_some())?;
    let mut route = vec![RouteElement::new(first, dir)];
    for w in nodes.windows(2) {
        let leg = net.nodes[w[0].0].leg_towards(dir, w[1])?;
        let pin = net.nodes[w[0].0].pins[dir.index()][leg]?;
        dir = pin.direction;
        route.push(pin.element());
    }
    Some(route)
}

fn add_passing_loop(net: &mut Network, names: &HashMap<String, NodeIdx>, n: usize, raw: &RawPassingLoop) {
    let (entry, exit) = match (names.get(&raw.entry), names.get(&raw.exit)) {
        (Some(a), Some(b)) if a != b => (*a, *b),
        _ => {
            warn!("Passing loop {} - {} has unknown boundaries, dropping", raw.entry, raw.exit);
            return;
        }
    };
    let Network { deadlocks, nodes, .. } = &mut *net;
    let zone = deadlocks.zone_between(entry, exit, nodes);

    for path in raw.paths.iter() {
        let names_along = iter![&raw.entry, ..path.via.iter(), &raw.exit].collect::<Vec<_>>();
        let forward = match walk(net, names, &names_along) {
            Some(route) => route,
            None => {
                warn!("Path {} through loop {} does not follow the track, dropping", path.name, n);
                continue;
            }
        };
        let backward = forward.iter().rev().map(|e| e.reversed()).collect::<TrainRoute>();

        let Network { deadlocks, nodes, .. } = &mut *net;
        let info = match deadlocks.get_mut(zone) {
            Some(info) => info,
            None => return,
        };
        info.register_path(&forward, entry, Some(&path.name), Some(n), AllowedTrains::All, nodes);
        if path.both_directions {
            info.register_path(&backward, exit, Some(&path.name), Some(n), AllowedTrains::All, nodes);
        }
    }
}

fn add_train(net: &mut Network, names: &HashMap<String, NodeIdx>, raw: &RawTrain) -> Result<(), String> {
    let route = parse_route(net, names, &raw.route)?;
    let first = route.first().ok_or_else(|| "empty route".to_string())?;
    if net.nodes[first.node.0].occupied() || net.nodes[first.node.0].state.reserved.is_some() {
        return Err(format!("start node {} is taken", net.nodes[first.node.0].name));
    }
    if raw.length <= 0.0 {
        return Err(format!("length {}", raw.length));
    }

    let id = net.trains.keys().next_back().map(|t| t + 1).unwrap_or(1);
    let mut train = Train::new(id, raw.name.clone(), raw.length, route);
    train.freight = raw.freight;
    train.claim_mode = raw.claim_mode;
    net.add_train(train).map_err(|e| e.to_string())?;
    net.assign_deadlock_paths(id).map_err(|e| e.to_string())
}
