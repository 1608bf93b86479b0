use crate::network::Network;
use crate::signal::Aspect;
use crate::types::TrainId;
use serde_json::json;
use std::{collections::HashMap, path::Path};

#[derive(Debug)]
pub enum SimulationResult {
    Finished(Plan),
    Stalled(Plan),
}

impl SimulationResult {
    pub fn plan(&self) -> &Plan {
        match self {
            SimulationResult::Finished(plan) | SimulationResult::Stalled(plan) => plan,
        }
    }
}

/// Node holders and normal signal aspects after each tick.
#[derive(Debug, Default)]
pub struct Plan {
    pub steps: Vec<Vec<(String, Option<TrainId>)>>,
    pub aspects: Vec<Vec<(String, Aspect)>>,
}

impl Plan {
    /// Record the current holder of every node, the occupying train first,
    /// and the aspect of every signal with a normal head.
    pub fn record(&mut self, net: &Network) {
        self.steps.push(
            net.nodes
                .iter()
                .map(|n| {
                    let holder = n.state.occupation.keys().next().copied().or(n.state.reserved);
                    (n.name.clone(), holder)
                })
                .collect(),
        );
        self.aspects.push(
            net.signals
                .iter()
                .filter(|s| s.is_normal())
                .map(|s| (s.name.clone(), s.normal_aspect()))
                .collect(),
        );
    }
}

pub fn write_plan_json(filename: &Path, plan: &Plan) -> std::io::Result<()> {
    std::fs::write(filename, serde_json::to_string_pretty(&plan_json(plan))?)?;
    Ok(())
}

fn plan_json(plan: &Plan) -> serde_json::Value {
    let steps = plan
        .steps
        .iter()
        .map(|s| s.iter().cloned().collect::<HashMap<String, _>>())
        .collect::<Vec<_>>();
    let aspects = plan
        .aspects
        .iter()
        .map(|s| s.iter().cloned().collect::<HashMap<String, _>>())
        .collect::<Vec<_>>();
    json!({ "steps": steps, "aspects": aspects })
}

fn held_before(plan: &Plan, step_n: usize, node: &str, train: TrainId) -> bool {
    step_n > 0
        && plan.steps[step_n - 1]
            .iter()
            .find(|(prev, _)| prev == node)
            .map(|(_, t)| *t == Some(train))
            .unwrap_or(false)
}

/// Summary table with one line per tick, and the list of nodes each train
/// newly took per tick.
pub fn print_plan(plan: &Plan) -> (String, String) {
    let mut summary = String::new();
    let mut commands = Vec::new();
    for (step_n, step) in plan.steps.iter().enumerate() {
        let mut taken = Vec::new();
        for (n, t) in step.iter() {
            if let Some(t) = t {
                if !held_before(plan, step_n, n, *t) {
                    taken.push(format!("t{} {}", t, n));
                }
            }
        }
        if !taken.is_empty() {
            commands.push(format!("Step {}:\n{}", step_n, taken.join("\n")));
        }

        summary.push_str(&format!("Step {}: ", step_n));
        summary.push_str(
            &step
                .iter()
                .map(|(n, t)| {
                    format!(
                        "{:>8} {:<3}",
                        n,
                        match t {
                            Some(t) if held_before(plan, step_n, n, *t) => format!(".{}", t),
                            Some(t) => format!("*{}", t),
                            None => "___".to_string(),
                        }
                    )
                })
                .collect::<Vec<_>>()
                .join(" "),
        );
        if let Some(aspects) = plan.aspects.get(step_n) {
            let shown = aspects
                .iter()
                .filter(|(_, a)| *a != Aspect::Stop)
                .map(|(s, a)| format!("{}={:?}", s, a))
                .collect::<Vec<_>>();
            if !shown.is_empty() {
                summary.push_str(" | ");
                summary.push_str(&shown.join(" "));
            }
        }
        summary.push('\n');
    }
    (summary, commands.join("\n\n"))
}
