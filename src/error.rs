use crate::types::*;
use thiserror::Error;

/// Contract violations at engine entry points.
#[derive(Debug, Error)]
pub enum InterlockError {
    #[error("Unknown signal {0}")]
    UnknownSignal(SignalIdx),

    #[error("Unknown node {0}")]
    UnknownNode(NodeIdx),

    #[error("Unknown train {0}")]
    UnknownTrain(TrainId),

    #[error("Unknown deadlock zone {0}")]
    UnknownZone(ZoneIdx),

    #[error("Switch leg {leg} does not exist on {node}")]
    NoSuchLeg { node: NodeIdx, leg: usize },
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Could not read scenario file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse scenario: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Scenario has no track nodes")]
    Empty,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Could not write or read saved state: {0}")]
    Io(#[from] std::io::Error),

    #[error("Saved state is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Saved state has {saved} signals, network has {network}")]
    SignalCountMismatch { saved: usize, network: usize },

    #[error(transparent)]
    Interlock(#[from] InterlockError),
}
