//! Aspect scripts.
//!
//! A script is a small statement tree evaluated per signal head. It reads the
//! head's inputs (block state, enabled flag, next aspect, permission), a
//! scratch array of slots, and the signal's persistent local variables, and
//! produces an aspect and a draw state. The only effects a script may have on
//! its signal go through [`ScriptHost`].

use crate::signal::*;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    Const(i64),
    Aspect(Aspect),
    State(InternalBlockstate),
    /// Scratch slot of the current evaluation.
    Slot(usize),
    /// Persistent local variable of the signal.
    Local(i64),
    BlockState,
    Enabled,
    /// Aspect of the next normal signal, `-1` if there is none.
    NextAspect,
    PermissionGranted,
    ApproachHeld,
    ClearAhead,
    Add(Box<Term>, Box<Term>),
    Sub(Box<Term>, Box<Term>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    True,
    Eq(Term, Term),
    Lt(Term, Term),
    Gt(Term, Term),
    Not(Box<Condition>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    If {
        cond: Condition,
        then: Vec<Statement>,
        #[serde(default)]
        otherwise: Vec<Statement>,
    },
    SetAspect(Term),
    SetDrawState(Term),
    Let { slot: usize, value: Term },
    Store { var: i64, value: Term },
    IncClearAhead,
    DecClearAhead,
    SetClearAhead(Term),
    ResetClearAhead,
    ApproachClaimLock,
    RequestCallOn,
    Return,
}

pub type Script = Vec<Statement>;

/// Named scripts available to signal heads.
pub type ScriptLibrary = BTreeMap<String, Script>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptInputs {
    pub block_state: InternalBlockstate,
    pub enabled: bool,
    pub next_aspect: Option<Aspect>,
    pub permission: Permission,
    pub approach_held: bool,
}

/// The callbacks a script may invoke on its signal.
pub trait ScriptHost {
    fn inc_clear_ahead(&mut self);
    fn dec_clear_ahead(&mut self);
    fn set_clear_ahead(&mut self, count: u32);
    fn reset_clear_ahead(&mut self);
    fn store_local(&mut self, var: i64, value: i64);
    fn read_local(&self, var: i64) -> i64;
    fn approach_claim_lock(&mut self);
    /// Returns whether call-on is currently granted.
    fn request_call_on(&mut self) -> bool;
    fn clear_ahead(&self) -> u32;
}

impl ScriptHost for Signal {
    fn inc_clear_ahead(&mut self) {
        let current = self.clear_ahead.live.unwrap_or(self.clear_ahead.active);
        self.clear_ahead.live = Some(current.saturating_add(1));
    }

    fn dec_clear_ahead(&mut self) {
        let current = self.clear_ahead.live.unwrap_or(self.clear_ahead.active);
        self.clear_ahead.live = Some(current.saturating_sub(1));
    }

    fn set_clear_ahead(&mut self, count: u32) {
        self.clear_ahead.live = Some(count);
    }

    fn reset_clear_ahead(&mut self) {
        self.clear_ahead.live = None;
    }

    fn store_local(&mut self, var: i64, value: i64) {
        self.local_vars.insert(var, value);
    }

    fn read_local(&self, var: i64) -> i64 {
        self.local_vars.get(&var).copied().unwrap_or(0)
    }

    fn approach_claim_lock(&mut self) {
        self.approach.claim_locked = true;
    }

    fn request_call_on(&mut self) -> bool {
        self.call_on = true;
        self.permission == Permission::Granted
            || self.block_state == InternalBlockstate::OccupiedSameDirection
    }

    fn clear_ahead(&self) -> u32 {
        self.clear_ahead.live.unwrap_or(self.clear_ahead.active)
    }
}

struct Evaluation<'a> {
    inputs: &'a ScriptInputs,
    host: &'a mut dyn ScriptHost,
    slots: Vec<i64>,
    aspect: Aspect,
    draw_state: i64,
}

enum Flow {
    Continue,
    Return,
}

/// Evaluate `script` and return the resulting aspect and draw state. Heads
/// start out at stop; a script that sets nothing leaves them there.
pub fn evaluate(script: &[Statement], inputs: &ScriptInputs, host: &mut dyn ScriptHost) -> (Aspect, i64) {
    let mut eval = Evaluation {
        inputs,
        host,
        slots: vec![0; slot_count(script)],
        aspect: Aspect::Stop,
        draw_state: 0,
    };
    eval.block(script);
    (eval.aspect, eval.draw_state)
}

fn slot_count(script: &[Statement]) -> usize {
    fn term(t: &Term) -> usize {
        match t {
            Term::Slot(i) => i + 1,
            Term::Add(a, b) | Term::Sub(a, b) => term(a).max(term(b)),
            _ => 0,
        }
    }
    fn cond(c: &Condition) -> usize {
        match c {
            Condition::True => 0,
            Condition::Eq(a, b) | Condition::Lt(a, b) | Condition::Gt(a, b) => term(a).max(term(b)),
            Condition::Not(c) => cond(c),
            Condition::And(cs) | Condition::Or(cs) => cs.iter().map(cond).max().unwrap_or(0),
        }
    }
    script
        .iter()
        .map(|s| match s {
            Statement::If {
                cond: c,
                then,
                otherwise,
            } => cond(c).max(slot_count(then)).max(slot_count(otherwise)),
            Statement::Let { slot, value } => (slot + 1).max(term(value)),
            Statement::SetAspect(t)
            | Statement::SetDrawState(t)
            | Statement::SetClearAhead(t)
            | Statement::Store { value: t, .. } => term(t),
            _ => 0,
        })
        .max()
        .unwrap_or(0)
}

impl<'a> Evaluation<'a> {
    fn block(&mut self, statements: &[Statement]) -> Flow {
        for statement in statements {
            if let Flow::Return = self.statement(statement) {
                return Flow::Return;
            }
        }
        Flow::Continue
    }

    fn statement(&mut self, statement: &Statement) -> Flow {
        match statement {
            Statement::If {
                cond,
                then,
                otherwise,
            } => {
                return if self.condition(cond) {
                    self.block(then)
                } else {
                    self.block(otherwise)
                };
            }
            Statement::SetAspect(t) => self.aspect = Aspect::from_code(self.term(t)),
            Statement::SetDrawState(t) => self.draw_state = self.term(t),
            Statement::Let { slot, value } => {
                let v = self.term(value);
                self.slots[*slot] = v;
            }
            Statement::Store { var, value } => {
                let v = self.term(value);
                self.host.store_local(*var, v);
            }
            Statement::IncClearAhead => self.host.inc_clear_ahead(),
            Statement::DecClearAhead => self.host.dec_clear_ahead(),
            Statement::SetClearAhead(t) => {
                let v = u32::try_from(self.term(t).max(0)).unwrap_or(u32::MAX);
                self.host.set_clear_ahead(v);
            }
            Statement::ResetClearAhead => self.host.reset_clear_ahead(),
            Statement::ApproachClaimLock => self.host.approach_claim_lock(),
            Statement::RequestCallOn => {
                if self.host.request_call_on() {
                    trace!("call-on granted");
                }
            }
            Statement::Return => return Flow::Return,
        }
        Flow::Continue
    }

    fn condition(&mut self, cond: &Condition) -> bool {
        match cond {
            Condition::True => true,
            Condition::Eq(a, b) => self.term(a) == self.term(b),
            Condition::Lt(a, b) => self.term(a) < self.term(b),
            Condition::Gt(a, b) => self.term(a) > self.term(b),
            Condition::Not(c) => !self.condition(c),
            Condition::And(cs) => cs.iter().all(|c| self.condition(c)),
            Condition::Or(cs) => cs.iter().any(|c| self.condition(c)),
        }
    }

    fn term(&self, term: &Term) -> i64 {
        match term {
            Term::Const(v) => *v,
            Term::Aspect(a) => a.code(),
            Term::State(s) => *s as i64,
            Term::Slot(i) => self.slots[*i],
            Term::Local(v) => self.host.read_local(*v),
            Term::BlockState => self.inputs.block_state as i64,
            Term::Enabled => self.inputs.enabled as i64,
            Term::NextAspect => self.inputs.next_aspect.map(|a| a.code()).unwrap_or(-1),
            Term::PermissionGranted => (self.inputs.permission == Permission::Granted) as i64,
            Term::ApproachHeld => self.inputs.approach_held as i64,
            Term::ClearAhead => self.host.clear_ahead() as i64,
            Term::Add(a, b) => self.term(a).saturating_add(self.term(b)),
            Term::Sub(a, b) => self.term(a).saturating_sub(self.term(b)),
        }
    }
}

/// Built-in behaviour for heads without a script.
pub fn default_aspect(function: SignalFunction, inputs: &ScriptInputs, call_on: bool) -> Aspect {
    let next_stop = inputs.next_aspect.map(|a| a == Aspect::Stop).unwrap_or(true);
    match function {
        SignalFunction::Normal => {
            if !inputs.enabled {
                Aspect::Stop
            } else if inputs.block_state == InternalBlockstate::Reserved && !inputs.approach_held {
                if next_stop {
                    Aspect::Approach1
                } else {
                    Aspect::Clear2
                }
            } else if inputs.block_state == InternalBlockstate::OccupiedSameDirection
                && (inputs.permission == Permission::Granted || call_on)
            {
                Aspect::Restricting
            } else {
                Aspect::Stop
            }
        }
        SignalFunction::Distance => {
            if next_stop {
                Aspect::Approach1
            } else {
                Aspect::Clear2
            }
        }
        SignalFunction::Repeater => inputs.next_aspect.unwrap_or(Aspect::Stop),
        SignalFunction::Shunting => {
            if inputs.enabled && inputs.block_state <= InternalBlockstate::OccupiedSameDirection {
                Aspect::Restricting
            } else {
                Aspect::Stop
            }
        }
        SignalFunction::Speed | SignalFunction::Info => Aspect::Clear2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use serde_json::json;

    fn signal() -> Signal {
        Signal::new(
            SignalIdx(0),
            "S".to_string(),
            NodeIdx(0),
            Direction::Ahead,
            vec![SignalHead::new(SignalFunction::Normal, Some("three".to_string()))],
        )
    }

    fn inputs(block_state: InternalBlockstate, next: Option<Aspect>) -> ScriptInputs {
        ScriptInputs {
            block_state,
            enabled: true,
            next_aspect: next,
            permission: Permission::Denied,
            approach_held: false,
        }
    }

    fn three_aspect() -> Script {
        serde_json::from_value(json!([
            {"if": {
                "cond": {"gt": ["block_state", {"state": "Reservable"}]},
                "then": [{"set_aspect": {"aspect": "Stop"}}, "return"],
            }},
            {"if": {
                "cond": {"eq": ["next_aspect", {"aspect": "Stop"}]},
                "then": [{"set_aspect": {"aspect": "Approach1"}}],
                "otherwise": [{"set_aspect": {"aspect": "Clear2"}}],
            }},
            {"set_draw_state": {"const": 2}},
        ]))
        .unwrap()
    }

    #[test]
    fn test_three_aspect_script() {
        let script = three_aspect();
        let mut s = signal();
        let (a, d) = evaluate(&script, &inputs(InternalBlockstate::Reserved, Some(Aspect::Stop)), &mut s);
        assert_eq!((a, d), (Aspect::Approach1, 2));
        let (a, _) = evaluate(&script, &inputs(InternalBlockstate::Reserved, Some(Aspect::Clear2)), &mut s);
        assert_eq!(a, Aspect::Clear2);
        let (a, d) = evaluate(&script, &inputs(InternalBlockstate::ReservedOther, None), &mut s);
        assert_eq!((a, d), (Aspect::Stop, 0));
    }

    #[test]
    fn test_callbacks_reach_signal() {
        let script: Script = serde_json::from_value(json!([
            {"let": {"slot": 1, "value": {"add": [{"local": 5}, {"const": 3}]}}},
            {"store": {"var": 5, "value": {"slot": 1}}},
            {"set_clear_ahead": {"const": 4}},
            "dec_clear_ahead",
            "approach_claim_lock",
        ]))
        .unwrap();
        let mut s = signal();
        s.local_vars.insert(5, 2);
        evaluate(&script, &inputs(InternalBlockstate::Reserved, None), &mut s);
        assert_eq!(s.local_vars[&5], 5);
        assert_eq!(s.clear_ahead.live, Some(3));
        assert!(s.approach.claim_locked);
    }

    #[test]
    fn test_arithmetic_saturates() {
        let script: Script = serde_json::from_value(json!([
            {"store": {"var": 1, "value": {"add": [{"const": i64::MAX}, {"const": 1}]}}},
            {"store": {"var": 2, "value": {"sub": [{"const": i64::MIN}, {"const": 1}]}}},
            {"set_clear_ahead": {"const": i64::MAX}},
            "inc_clear_ahead",
        ]))
        .unwrap();
        let mut s = signal();
        evaluate(&script, &inputs(InternalBlockstate::Reserved, None), &mut s);
        assert_eq!(s.local_vars[&1], i64::MAX);
        assert_eq!(s.local_vars[&2], i64::MIN);
        assert_eq!(s.clear_ahead.live, Some(u32::MAX));
    }

    #[test]
    fn test_call_on_request() {
        let script: Script = serde_json::from_value(json!([
            "request_call_on",
            {"if": {"cond": {"eq": ["permission_granted", {"const": 1}]},
                    "then": [{"set_aspect": {"aspect": "Restricting"}}]}},
        ]))
        .unwrap();
        let mut s = signal();
        s.permission = Permission::Granted;
        let mut i = inputs(InternalBlockstate::OccupiedSameDirection, None);
        i.permission = Permission::Granted;
        let (a, _) = evaluate(&script, &i, &mut s);
        assert_eq!(a, Aspect::Restricting);
        assert!(s.call_on);
    }

    #[test]
    fn test_default_aspects() {
        let i = inputs(InternalBlockstate::Reserved, None);
        assert_eq!(default_aspect(SignalFunction::Normal, &i, false), Aspect::Approach1);
        let i = inputs(InternalBlockstate::Reserved, Some(Aspect::Approach1));
        assert_eq!(default_aspect(SignalFunction::Normal, &i, false), Aspect::Clear2);
        assert_eq!(default_aspect(SignalFunction::Repeater, &i, false), Aspect::Approach1);
        let mut i = inputs(InternalBlockstate::Reserved, None);
        i.approach_held = true;
        assert_eq!(default_aspect(SignalFunction::Normal, &i, false), Aspect::Stop);
    }
}
