//! Path choice through passing loops.
//!
//! Each passing-loop zone keeps a catalog of the alternative paths between its
//! two boundary nodes, which train (and subpath) uses which path, and which
//! path covers the same track as another in the opposite direction. Before a
//! train enters a zone, the set of paths it may take without locking out the
//! trains waiting at the far end is computed and one is selected.

use crate::signal::TrainRef;
use crate::track::TrackNode;
use crate::types::*;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const MAIN_PATH: &str = "MAIN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AllowedTrains {
    All,
    /// Handle ids of the trains allowed on the path.
    Only(BTreeSet<usize>),
}

impl AllowedTrains {
    pub fn allows(&self, handle: Option<usize>) -> bool {
        match self {
            AllowedTrains::All => true,
            AllowedTrains::Only(set) => handle.map(|h| set.contains(&h)).unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlockPathInfo {
    /// `MAIN`, `PASSnn`, or empty for paths registered for a single train.
    pub name: String,
    pub groups: Vec<usize>,
    /// Entry boundary first, exit boundary last.
    pub path: TrainRoute,
    pub end_node: NodeIdx,
    pub usable_length: f64,
    pub allowed: AllowedTrains,
}

impl DeadlockPathInfo {
    pub fn interior(&self) -> &[RouteElement] {
        if self.path.len() <= 2 {
            &[]
        } else {
            &self.path[1..self.path.len() - 1]
        }
    }

    fn same_nodes(&self, path: &[RouteElement]) -> bool {
        self.path.len() == path.len() && self.path.iter().zip(path.iter()).all(|(a, b)| a.node == b.node)
    }

    fn reversed_nodes(&self, path: &[RouteElement]) -> bool {
        self.path.len() == path.len()
            && self
                .path
                .iter()
                .zip(path.iter().rev())
                .all(|(a, b)| a.node == b.node)
    }
}

/// Result of matching a train's route against a zone's catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathAssignment {
    Own(usize),
    /// The route passes through the zone on a path not in the catalog.
    NoMatch,
    /// The route never enters the zone.
    OutOfZone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlockInfo {
    pub id: ZoneIdx,
    pub boundaries: [NodeIdx; 2],
    pub paths: Vec<DeadlockPathInfo>,
    /// Boundary node -> catalog indices of paths entering from it.
    pub path_references: BTreeMap<NodeIdx, Vec<usize>>,
    /// Handle -> boundary node the train enters from.
    pub train_references: BTreeMap<usize, NodeIdx>,
    pub train_own_path: BTreeMap<usize, usize>,
    /// Handle -> path -> train fits in the path's usable length.
    pub train_length_fit: BTreeMap<usize, BTreeMap<usize, bool>>,
    /// Symmetric: same track, opposite sense.
    pub inverse_paths: BTreeMap<usize, usize>,
    /// Train -> subpath -> handle.
    pub train_subpath_index: BTreeMap<TrainId, BTreeMap<usize, usize>>,
    pub next_handle: usize,
}

impl DeadlockInfo {
    pub fn new(id: ZoneIdx, boundaries: [NodeIdx; 2]) -> Self {
        DeadlockInfo {
            id,
            boundaries,
            paths: Vec::new(),
            path_references: BTreeMap::new(),
            train_references: BTreeMap::new(),
            train_own_path: BTreeMap::new(),
            train_length_fit: BTreeMap::new(),
            inverse_paths: BTreeMap::new(),
            train_subpath_index: BTreeMap::new(),
            next_handle: 0,
        }
    }

    pub fn far_boundary(&self, boundary: NodeIdx) -> NodeIdx {
        if self.boundaries[0] == boundary {
            self.boundaries[1]
        } else {
            self.boundaries[0]
        }
    }

    pub fn handle(&self, train: TrainRef) -> Option<usize> {
        self.train_subpath_index
            .get(&train.train)
            .and_then(|subpaths| subpaths.get(&train.subpath))
            .copied()
    }

    fn handle_or_allocate(&mut self, train: TrainRef) -> usize {
        if let Some(h) = self.handle(train) {
            return h;
        }
        let h = self.next_handle;
        self.next_handle += 1;
        self.train_subpath_index
            .entry(train.train)
            .or_default()
            .insert(train.subpath, h);
        h
    }

    /// Add a path to the catalog, or find the identical one already there.
    /// Returns `None` if the path does not start at `entry` or does not run
    /// between the zone's boundaries.
    pub fn register_path(
        &mut self,
        path: &[RouteElement],
        entry: NodeIdx,
        name: Option<&str>,
        group: Option<usize>,
        allowed: AllowedTrains,
        nodes: &mut [TrackNode],
    ) -> Option<(usize, bool)> {
        let (first, last) = match (path.first(), path.last()) {
            (Some(f), Some(l)) if path.len() >= 2 => (f, l),
            _ => {
                warn!("{}: rejecting path with fewer than two nodes", self.id);
                return None;
            }
        };
        if first.node != entry || !self.boundaries.contains(&entry) || self.far_boundary(entry) != last.node {
            warn!(
                "{}: rejecting path {} not running between boundaries {} and {}",
                self.id,
                format_route(path),
                self.boundaries[0],
                self.boundaries[1]
            );
            return None;
        }
        let name = name.unwrap_or("");

        if let Some(existing) = self.path_references.get(&entry).and_then(|refs| {
            refs.iter()
                .copied()
                .find(|i| self.paths[*i].same_nodes(path) && (name.is_empty() || self.paths[*i].name == name))
        }) {
            return Some((existing, true));
        }

        let index = self.paths.len();
        let mut usable_length = 0.0;
        for e in &path[1..path.len() - 1] {
            nodes[e.node.0].deadlock_zone = Some(self.id);
            usable_length += nodes[e.node.0].length;
        }

        let inverses = self
            .paths
            .iter()
            .enumerate()
            .filter(|(_, p)| p.reversed_nodes(path))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        for other in inverses {
            self.inverse_paths.insert(index, other);
            self.inverse_paths.insert(other, index);
        }

        debug!(
            "{}: registered path {} {:?} from {} ({} m)",
            self.id, index, name, entry, usable_length
        );
        self.paths.push(DeadlockPathInfo {
            name: name.to_string(),
            groups: group.into_iter().collect(),
            path: path.to_vec(),
            end_node: last.node,
            usable_length,
            allowed,
        });
        self.path_references.entry(entry).or_default().push(index);
        Some((index, false))
    }

    /// Position in `route` where it enters this zone through a boundary.
    pub fn entry_position(&self, route: &[RouteElement], nodes: &[TrackNode]) -> Option<usize> {
        route.windows(2).position(|w| {
            self.path_references.contains_key(&w[0].node) && nodes[w[1].node.0].deadlock_zone == Some(self.id)
        })
    }

    /// Catalog path that `route` follows from position `at`, if any.
    pub fn matching_path(&self, route: &[RouteElement], at: usize, handle: Option<usize>) -> Option<usize> {
        let entry = route.get(at)?.node;
        self.path_references.get(&entry)?.iter().copied().find(|i| {
            let p = &self.paths[*i];
            p.allowed.allows(handle) && route.len() >= at + p.path.len() && p.path[..] == route[at..at + p.path.len()]
        })
    }

    /// Match a train's route against the catalog and record the result.
    pub fn assign_train_path(
        &mut self,
        train: TrainRef,
        train_length: f64,
        route: &[RouteElement],
        nodes: &[TrackNode],
    ) -> PathAssignment {
        let at = match self.entry_position(route, nodes) {
            Some(at) => at,
            None => return PathAssignment::OutOfZone,
        };
        let entry = route[at].node;
        let handle = self.handle_or_allocate(train);
        self.train_references.insert(handle, entry);

        let fits = self.path_references[&entry]
            .iter()
            .map(|i| (*i, train_length < self.paths[*i].usable_length))
            .collect::<BTreeMap<_, _>>();
        self.train_length_fit.insert(handle, fits);

        match self.matching_path(route, at, Some(handle)) {
            Some(own) => {
                self.train_own_path.insert(handle, own);
                PathAssignment::Own(own)
            }
            None => PathAssignment::NoMatch,
        }
    }

    /// Assign a path to the train, registering the route's own path through
    /// the zone for this train alone if it is not yet cataloged.
    pub fn assign_or_register(
        &mut self,
        train: TrainRef,
        train_length: f64,
        route: &[RouteElement],
        nodes: &mut [TrackNode],
    ) -> Option<usize> {
        match self.assign_train_path(train, train_length, route, nodes) {
            PathAssignment::Own(own) => Some(own),
            PathAssignment::OutOfZone => None,
            PathAssignment::NoMatch => {
                let at = self.entry_position(route, nodes)?;
                let entry = route[at].node;
                let far = self.far_boundary(entry);
                let end = match route[at + 1..].iter().position(|e| e.node == far) {
                    Some(p) => at + 1 + p,
                    None => {
                        warn!(
                            "{}: route of train {} enters at {} but never reaches {}",
                            self.id, train.train, entry, far
                        );
                        return None;
                    }
                };
                let handle = self.handle_or_allocate(train);
                let allowed = AllowedTrains::Only(std::iter::once(handle).collect());
                self.register_path(&route[at..=end], entry, None, None, allowed, nodes)?;
                match self.assign_train_path(train, train_length, route, nodes) {
                    PathAssignment::Own(own) => Some(own),
                    other => {
                        error!("{}: train {} still unassigned ({:?}) after registering its path", self.id, train.train, other);
                        None
                    }
                }
            }
        }
    }

    pub fn remove_train_reference(&mut self, train: TrainRef) {
        let handle = match self.handle(train) {
            Some(h) => h,
            None => return,
        };
        if let Some(subpaths) = self.train_subpath_index.get_mut(&train.train) {
            subpaths.remove(&train.subpath);
            if subpaths.is_empty() {
                self.train_subpath_index.remove(&train.train);
            }
        }
        self.train_references.remove(&handle);
        self.train_own_path.remove(&handle);
        self.train_length_fit.remove(&handle);
    }

    /// Trains, other than `train`, registered as entering from `boundary`.
    pub fn contenders(&self, boundary: NodeIdx, train: TrainId) -> Vec<(TrainId, usize)> {
        self.train_subpath_index
            .iter()
            .filter(|(t, _)| **t != train)
            .flat_map(|(t, subpaths)| subpaths.values().map(move |h| (*t, *h)))
            .filter(|(_, h)| self.train_references.get(h) == Some(&boundary))
            .collect()
    }

    /// Paths from `boundary` the train may use and whose interior is free.
    pub fn free_paths(&self, boundary: NodeIdx, train: TrainId, handle: Option<usize>, nodes: &[TrackNode]) -> BTreeSet<usize> {
        self.path_references
            .get(&boundary)
            .map(|refs| {
                refs.iter()
                    .copied()
                    .filter(|i| self.paths[*i].allowed.allows(handle))
                    .filter(|i| self.paths[*i].interior().iter().all(|e| nodes[e.node.0].is_available(train)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn inverse(&self, paths: &BTreeSet<usize>) -> BTreeSet<usize> {
        paths.iter().filter_map(|p| self.inverse_paths.get(p)).copied().collect()
    }

    /// Candidate paths for `train` entering at `boundary`, leaving the trains
    /// waiting at the far boundary a way through where possible.
    pub fn check_availability(&self, boundary: NodeIdx, train: TrainRef, nodes: &[TrackNode]) -> BTreeSet<usize> {
        let handle = self.handle(train);
        let far = self.far_boundary(boundary);
        let free = self.free_paths(boundary, train.train, handle, nodes);

        let mut used = BTreeSet::new();
        let mut common: Option<BTreeSet<usize>> = None;
        let mut single = BTreeSet::new();
        for (other_train, other_handle) in self.contenders(far, train.train) {
            let other_free = self.free_paths(far, other_train, Some(other_handle), nodes);
            used.extend(other_free.iter().copied());
            if other_free.len() == 1 {
                single.extend(other_free.iter().copied());
            }
            common = Some(match common {
                None => other_free,
                Some(c) => c.intersection(&other_free).copied().collect(),
            });
        }
        let inv_used = self.inverse(&used);
        let inv_common = self.inverse(&common.unwrap_or_default());
        let inv_single = self.inverse(&single);

        if nodes[far.0].check_deadlock_awaited(train.train) {
            let without_used = free.difference(&inv_used).copied().collect::<BTreeSet<_>>();
            if !without_used.is_empty() {
                return without_used;
            }
            if !inv_common.is_empty() {
                let without_common = free.difference(&inv_common).copied().collect::<BTreeSet<_>>();
                if !without_common.is_empty() {
                    return without_common;
                }
            }
            if !inv_single.is_empty() {
                let without_single = free.difference(&inv_single).copied().collect::<BTreeSet<_>>();
                if !without_single.is_empty() {
                    return without_single;
                }
            }
            if !nodes[boundary.0].deadlock_awaited.is_empty() {
                debug!(
                    "{}: trains waiting at both {} and {}, releasing all free paths to train {}",
                    self.id, boundary, far, train.train
                );
                return free;
            }
            BTreeSet::new()
        } else {
            let without_single = free.difference(&inv_single).copied().collect::<BTreeSet<_>>();
            if without_single.is_empty() {
                free
            } else {
                without_single
            }
        }
    }

    /// Choose one of `candidates` for `train` entering at `boundary`.
    pub fn select_path(&self, candidates: &BTreeSet<usize>, train: TrainRef, boundary: NodeIdx) -> Option<usize> {
        let handle = self.handle(train);
        let own = handle.and_then(|h| self.train_own_path.get(&h)).copied();
        let fits = |p: usize| {
            handle
                .and_then(|h| self.train_length_fit.get(&h))
                .and_then(|fit| fit.get(&p))
                .copied()
                .unwrap_or(false)
        };

        let own = own.filter(|o| candidates.contains(o));
        if let Some(own) = own.filter(|o| fits(*o)) {
            return Some(own);
        }

        let main = candidates.iter().copied().find(|p| self.paths[*p].name == MAIN_PATH);
        let contended = !self.contenders(self.far_boundary(boundary), train.train).is_empty();
        if let Some(main) = main.filter(|m| fits(*m)) {
            if !contended {
                return Some(main);
            }
        }

        let others = candidates.iter().copied().filter(|p| Some(*p) != main && Some(*p) != own);
        if let Some(other) = others.clone().find(|p| fits(*p)) {
            return Some(other);
        }

        if let Some(main) = main.filter(|m| fits(*m)) {
            return Some(main);
        }

        // Nothing is long enough, so take the first candidate in order of
        // preference anyway.
        let chosen = own.or(main).or_else(|| others.clone().next());
        match chosen {
            Some(p) => warn!(
                "{}: no path among {:?} fits train {}, using {}",
                self.id, candidates, train.train, self.paths[p].name
            ),
            None => error!("{}: no path at all for train {} from {}", self.id, train.train, boundary),
        }
        chosen
    }
}

/// All deadlock zones of the network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeadlockManager {
    pub zones: Vec<DeadlockInfo>,
}

impl DeadlockManager {
    /// Zone bounded by `a` and `b`, created on first request.
    pub fn zone_between(&mut self, a: NodeIdx, b: NodeIdx, nodes: &mut [TrackNode]) -> ZoneIdx {
        if let Some(zone) = self
            .zones
            .iter()
            .find(|z| z.boundaries.contains(&a) && z.boundaries.contains(&b))
        {
            return zone.id;
        }
        let id = ZoneIdx(self.zones.len());
        for n in [a, b] {
            if let Some(old) = nodes[n.0].deadlock_reference {
                warn!("{} already bounds {}, now also bounding {}", n, old, id);
            }
            nodes[n.0].deadlock_reference = Some(id);
        }
        debug!("created deadlock zone {} between {} and {}", id, a, b);
        self.zones.push(DeadlockInfo::new(id, [a, b]));
        id
    }

    pub fn get(&self, zone: ZoneIdx) -> Option<&DeadlockInfo> {
        self.zones.get(zone.0)
    }

    pub fn get_mut(&mut self, zone: ZoneIdx) -> Option<&mut DeadlockInfo> {
        self.zones.get_mut(zone.0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::network::Network;
    use crate::scenario::tests::network_from;
    use serde_json::json;

    /// w - A < m1 , p1 > B - e, with the loop nodes 500 m long.
    pub(crate) fn passing_loop() -> Network {
        network_from(json!({
            "nodes": [
                {"name": "w", "length": 200.0},
                {"name": "A", "length": 50.0},
                {"name": "m1", "length": 500.0},
                {"name": "p1", "length": 500.0},
                {"name": "B", "length": 50.0},
                {"name": "e", "length": 200.0},
            ],
            "links": [
                {"from": "w", "to": ["A"]},
                {"from": "A", "to": ["m1", "p1"]},
                {"from": "m1", "to": ["B"]},
                {"from": "p1", "to": ["B"]},
                {"from": "B", "to": ["e"]},
            ],
            "passing_loops": [
                {"entry": "A", "exit": "B", "paths": [
                    {"name": "MAIN", "via": ["m1"]},
                    {"name": "PASS01", "via": ["p1"]},
                ]},
            ],
        }))
    }

    fn el(net: &Network, name: &str, dir: Direction) -> RouteElement {
        RouteElement::new(net.node_by_name(name).unwrap(), dir)
    }

    fn forward(net: &Network, names: &[&str]) -> TrainRoute {
        names.iter().map(|n| el(net, n, Direction::Ahead)).collect()
    }

    fn backward(net: &Network, names: &[&str]) -> TrainRoute {
        names.iter().map(|n| el(net, n, Direction::Reverse)).collect()
    }

    fn t(train: TrainId) -> TrainRef {
        TrainRef { train, subpath: 0 }
    }

    #[test]
    fn test_catalog_and_inverses() {
        let net = passing_loop();
        let zone = &net.deadlocks.zones[0];
        // Two paths each way, each with its inverse.
        assert_eq!(zone.paths.len(), 4);
        for (p, q) in zone.inverse_paths.iter() {
            assert_eq!(zone.inverse_paths[q], *p);
            assert_eq!(zone.paths[*p].name, zone.paths[*q].name);
        }
        let m1 = net.node_by_name("m1").unwrap();
        let a = net.node_by_name("A").unwrap();
        assert_eq!(net.nodes[m1.0].deadlock_zone, Some(zone.id));
        assert_eq!(net.nodes[a.0].deadlock_reference, Some(zone.id));
        assert_eq!(zone.paths[0].usable_length, 500.0);
    }

    #[test]
    fn test_register_path_dedups() {
        let mut net = passing_loop();
        let path = forward(&net, &["A", "m1", "B"]);
        let a = path[0].node;
        let zone = &mut net.deadlocks.zones[0];
        let (index, existed) = zone
            .register_path(&path, a, None, None, AllowedTrains::All, &mut net.nodes)
            .unwrap();
        assert!(existed);
        assert_eq!(zone.paths[index].name, MAIN_PATH);
        let bad = vec![path[1], path[2]];
        assert!(zone
            .register_path(&bad, a, None, None, AllowedTrains::All, &mut net.nodes)
            .is_none());
    }

    #[test]
    fn test_assign_train_path() {
        let mut net = passing_loop();
        let through_pass = forward(&net, &["w", "A", "p1", "B", "e"]);
        let elsewhere = forward(&net, &["e"]);
        let zone = &mut net.deadlocks.zones[0];
        match zone.assign_train_path(t(1), 300.0, &through_pass, &net.nodes) {
            PathAssignment::Own(p) => assert_eq!(zone.paths[p].name, "PASS01"),
            other => panic!("unexpected {:?}", other),
        }
        let h = zone.handle(t(1)).unwrap();
        assert!(zone.train_length_fit[&h].values().all(|f| *f));
        assert_eq!(
            zone.assign_train_path(t(2), 300.0, &elsewhere, &net.nodes),
            PathAssignment::OutOfZone
        );
        // A second subpath of the same train gets its own handle.
        zone.assign_train_path(TrainRef { train: 1, subpath: 1 }, 300.0, &through_pass, &net.nodes);
        assert_ne!(zone.handle(TrainRef { train: 1, subpath: 1 }), Some(h));
        zone.remove_train_reference(t(1));
        assert_eq!(zone.handle(t(1)), None);
    }

    #[test]
    fn test_select_path_priority() {
        let mut net = passing_loop();
        let route = forward(&net, &["w", "A", "p1", "B", "e"]);
        let a = route[1].node;
        let main_route = forward(&net, &["A", "m1", "B"]);
        let zone = &mut net.deadlocks.zones[0];
        // Own path PASS01 does not fit, MAIN does.
        zone.assign_train_path(t(1), 300.0, &route, &net.nodes);
        let h = zone.handle(t(1)).unwrap();
        let pass = zone.train_own_path[&h];
        let main = zone.matching_path(&main_route, 0, Some(h)).unwrap();
        zone.train_length_fit.get_mut(&h).unwrap().insert(pass, false);
        let candidates = vec![pass, main].into_iter().collect();
        assert_eq!(zone.select_path(&candidates, t(1), a), Some(main));

        // Own path alone and fitting is taken whatever MAIN's fit.
        zone.train_length_fit.get_mut(&h).unwrap().insert(pass, true);
        zone.train_length_fit.get_mut(&h).unwrap().insert(main, false);
        let candidates = vec![pass].into_iter().collect();
        assert_eq!(zone.select_path(&candidates, t(1), a), Some(pass));
    }

    #[test]
    fn test_select_path_main_suppressed_when_contended() {
        let mut net = passing_loop();
        let route = forward(&net, &["w", "A", "m1", "B", "e"]);
        let opposing = backward(&net, &["e", "B", "p1", "A", "w"]);
        let a = route[1].node;
        let zone = &mut net.deadlocks.zones[0];
        zone.assign_train_path(t(1), 100.0, &route, &net.nodes);
        zone.assign_train_path(t(2), 100.0, &opposing, &net.nodes);
        let h = zone.handle(t(1)).unwrap();
        // Forget the own path so the choice is between MAIN and PASS01.
        zone.train_own_path.remove(&h);
        let candidates = zone.path_references[&a].iter().copied().collect();
        let chosen = zone.select_path(&candidates, t(1), a).unwrap();
        assert_eq!(zone.paths[chosen].name, "PASS01");
    }

    #[test]
    fn test_select_path_never_leaves_candidates() {
        let mut net = three_paths();
        let a = net.node_by_name("A").unwrap();
        let y = net.node_by_name("y").unwrap();
        let route = forward(&net, &["A", "x", "B"]);
        let opposing = backward(&net, &["B", "x", "A"]);
        net.nodes[y.0].state.reserved = Some(3);
        let zone = &mut net.deadlocks.zones[0];
        // Own path MAIN, and too long for any path.
        zone.assign_train_path(t(1), 2000.0, &route, &net.nodes);
        zone.assign_train_path(t(2), 100.0, &opposing, &net.nodes);
        let candidates = zone.check_availability(a, t(1), &net.nodes);
        let chosen = zone.select_path(&candidates, t(1), a).unwrap();
        assert!(candidates.contains(&chosen));
        assert_eq!(zone.paths[chosen].name, "PASS02");
    }

    /// A < x > B on the main line, and A - q < y , z > r - B as two loops
    /// of which only the one through `y` is signalled both ways.
    fn three_paths() -> Network {
        network_from(json!({
            "nodes": [
                {"name": "A", "length": 50.0},
                {"name": "x", "length": 400.0},
                {"name": "q", "length": 50.0},
                {"name": "y", "length": 400.0},
                {"name": "z", "length": 400.0},
                {"name": "r", "length": 50.0},
                {"name": "B", "length": 50.0},
            ],
            "links": [
                {"from": "A", "to": ["x", "q"]},
                {"from": "q", "to": ["y", "z"]},
                {"from": "y", "to": ["r"]},
                {"from": "z", "to": ["r"]},
                {"from": "x", "to": ["B"]},
                {"from": "r", "to": ["B"]},
            ],
            "passing_loops": [
                {"entry": "A", "exit": "B", "paths": [
                    {"name": "MAIN", "via": ["x"]},
                    {"name": "PASS01", "via": ["q", "y", "r"]},
                    {"name": "PASS02", "via": ["q", "z", "r"], "both_directions": false},
                ]},
            ],
        }))
    }

    #[test]
    fn test_availability_single_route_filter_only() {
        let mut net = three_paths();
        let a = net.node_by_name("A").unwrap();
        let opposing = backward(&net, &["B", "x", "A"]);
        let zone = &mut net.deadlocks.zones[0];
        // The opponent at B may use MAIN and PASS01 backwards, which makes
        // them common to all opponents, but neither is its only option.
        zone.assign_train_path(t(2), 100.0, &opposing, &net.nodes);
        let candidates = zone.check_availability(a, t(1), &net.nodes);
        let names = candidates.iter().map(|p| zone.paths[*p].name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["MAIN", "PASS01", "PASS02"]);
    }

    #[test]
    fn test_availability_avoids_opponents_single_option() {
        let mut net = three_paths();
        let a = net.node_by_name("A").unwrap();
        let y = net.node_by_name("y").unwrap();
        let opposing = backward(&net, &["B", "x", "A"]);
        // Train 3 sits in PASS01, leaving the opponent at B only MAIN.
        net.nodes[y.0].state.reserved = Some(3);
        let zone = &mut net.deadlocks.zones[0];
        zone.assign_train_path(t(2), 100.0, &opposing, &net.nodes);
        let candidates = zone.check_availability(a, t(1), &net.nodes);
        let names = candidates.iter().map(|p| zone.paths[*p].name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["PASS02"]);

        // Once the opponent waits at B, the same filter applies through the
        // used routes.
        let b = net.node_by_name("B").unwrap();
        net.nodes[b.0].deadlock_awaited.insert(2);
        let zone = &net.deadlocks.zones[0];
        let candidates = zone.check_availability(a, t(1), &net.nodes);
        let names = candidates.iter().map(|p| zone.paths[*p].name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["PASS02"]);
    }

    #[test]
    fn test_starvation_breaker() {
        let mut net = network_from(json!({
            "nodes": [
                {"name": "A", "length": 50.0},
                {"name": "s", "length": 400.0},
                {"name": "B", "length": 50.0},
            ],
            "links": [
                {"from": "A", "to": ["s"]},
                {"from": "s", "to": ["B"]},
            ],
            "passing_loops": [
                {"entry": "A", "exit": "B", "paths": [{"name": "MAIN", "via": ["s"]}]},
            ],
        }));
        let a = net.node_by_name("A").unwrap();
        let b = net.node_by_name("B").unwrap();
        let east = forward(&net, &["A", "s", "B"]);
        let west = backward(&net, &["B", "s", "A"]);
        {
            let zone = &mut net.deadlocks.zones[0];
            zone.assign_train_path(t(1), 100.0, &east, &net.nodes);
            zone.assign_train_path(t(2), 100.0, &west, &net.nodes);
        }
        net.nodes[b.0].deadlock_awaited.insert(2);
        let zone = &net.deadlocks.zones[0];
        // Only train 2 waits: train 1 must leave the single path to it.
        assert!(zone.check_availability(a, t(1), &net.nodes).is_empty());

        net.nodes[a.0].deadlock_awaited.insert(1);
        let zone = &net.deadlocks.zones[0];
        let east_free = zone.free_paths(a, 1, zone.handle(t(1)), &net.nodes);
        let west_free = zone.free_paths(b, 2, zone.handle(t(2)), &net.nodes);
        assert_eq!(east_free.len(), 1);
        assert_eq!(zone.check_availability(a, t(1), &net.nodes), east_free);
        assert_eq!(zone.check_availability(b, t(2), &net.nodes), west_free);
    }
}
