//! Railway interlocking engine: route reservation behind signals, forward
//! clearance propagation and path choice through single-track passing loops.

pub mod clearance;
pub mod deadlock;
pub mod error;
pub mod network;
pub mod persist;
pub mod plan;
pub mod scanner;
pub mod scenario;
pub mod script;
pub mod settings;
pub mod signal;
pub mod simulation;
pub mod track;
pub mod train;
pub mod types;

pub use network::Network;
