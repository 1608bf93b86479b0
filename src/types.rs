use serde::{Deserialize, Serialize};
use std::fmt;

pub type TrainId = usize;

/// Index of a track resource node in the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIdx(pub usize);

/// Index of a signal in the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalIdx(pub usize);

/// Index of a deadlock zone (passing loop) in the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneIdx(pub usize);

impl fmt::Display for NodeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for SignalIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for ZoneIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "z{}", self.0)
    }
}

/// Direction of travel relative to a node's own orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ahead,
    Reverse,
}

impl Direction {
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Ahead => Direction::Reverse,
            Direction::Reverse => Direction::Ahead,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Direction::Ahead => 0,
            Direction::Reverse => 1,
        }
    }
}

/// One step of a route: a node and the direction it is traversed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteElement {
    pub node: NodeIdx,
    pub direction: Direction,
}

impl RouteElement {
    pub fn new(node: NodeIdx, direction: Direction) -> Self {
        RouteElement { node, direction }
    }

    pub fn reversed(&self) -> Self {
        RouteElement {
            node: self.node,
            direction: self.direction.reverse(),
        }
    }

    /// Signed node index, negative for reverse travel. Node 0 reverse is `-0`
    /// and so cannot be told apart from ahead; only used for printing.
    pub fn signed(&self) -> i64 {
        match self.direction {
            Direction::Ahead => self.node.0 as i64,
            Direction::Reverse => -(self.node.0 as i64),
        }
    }
}

impl fmt::Display for RouteElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Ahead => write!(f, "+{}", self.node),
            Direction::Reverse => write!(f, "-{}", self.node),
        }
    }
}

pub type TrainRoute = Vec<RouteElement>;

/// Position of the first element of `route` whose node is `node`.
pub fn route_position(route: &[RouteElement], node: NodeIdx) -> Option<usize> {
    route.iter().position(|e| e.node == node)
}

pub fn format_route(route: &[RouteElement]) -> String {
    route
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
