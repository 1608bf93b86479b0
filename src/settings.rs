use crate::signal::SignalFunction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Number of signals updated per tick. A preload pass updates all of them.
    pub signals_per_tick: usize,
    pub default_clear_ahead: BTreeMap<SignalFunction, u32>,
    pub max_scan_distance: f64,
    /// Allow route state checks to look past the first switch or signal.
    pub full_route_check: bool,
    /// Ticks without any train movement before a run is reported stalled.
    pub stall_ticks: usize,
    pub max_ticks: usize,
    pub approach_release_distance: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            signals_per_tick: 8,
            default_clear_ahead: SignalFunction::ALL
                .iter()
                .map(|f| (*f, if *f == SignalFunction::Normal { 1 } else { 0 }))
                .collect(),
            max_scan_distance: 10_000.0,
            full_route_check: true,
            stall_ticks: 50,
            max_ticks: 1000,
            approach_release_distance: 300.0,
        }
    }
}

impl EngineSettings {
    pub fn clear_ahead_for(&self, function: SignalFunction) -> u32 {
        self.default_clear_ahead.get(&function).copied().unwrap_or(0)
    }
}
