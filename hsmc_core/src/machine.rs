//! In-memory model of a hierarchical state machine.
//!
//! A [`StateMachine`] is the root aggregate produced by a front-end parser:
//! an ownership tree of [`State`]s, each carrying entry/exit actions and
//! outgoing [`Transition`]s, plus flat [`EventDecl`] and [`DataMember`]
//! records used to seed generated declarations.
//!
//! Transition targets are plain string tokens after parsing and become
//! fully qualified dotted paths once [`crate::resolve::resolve`] has run.
//! A target that never resolves is kept as-is so that
//! [`crate::validate::validate`] can report it with full location context.
//! The model is rebuilt from scratch on every parse; no stage retains a
//! reference to it after returning.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reserved token marking the initial (and terminal) pseudostate.
pub const INITIAL_MARKER: &str = "[*]";

/// Pseudo-event carried by synthesized initial transitions.
pub const INIT_EVENT: &str = "__init__";

/// Returns `true` if `token` names a pseudostate rather than a real state.
///
/// Pseudostate tokens are bracketed: the initial/terminal marker `[*]` and
/// the history markers `[H]` and `[H*]`.
pub fn is_pseudostate(token: &str) -> bool {
    token.starts_with('[') && token.ends_with(']')
}

/// The base behavior the generated machine derives from.
///
/// This is a closed set: front ends map unknown kind tokens to the default
/// rather than failing, since the kind only selects boilerplate in the
/// generated constructor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MachineKind {
    /// An active object with its own event queue and thread of control.
    #[default]
    Active,
    /// A bare hierarchical state machine, run by its host.
    Hsm,
}

/// The error type returned when a kind token is not part of the closed set.
#[derive(Debug, Clone, Error)]
#[error("unknown machine kind: `{0}`")]
pub struct UnknownKind(pub String);

impl FromStr for MachineKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" | "qactive" => Ok(MachineKind::Active),
            "hsm" | "qhsm" => Ok(MachineKind::Hsm),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

impl fmt::Display for MachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineKind::Active => write!(f, "active"),
            MachineKind::Hsm => write!(f, "hsm"),
        }
    }
}

/// A transition out of a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Triggering event name; [`INIT_EVENT`] on initial transitions.
    pub event: String,
    /// Target token: raw text after parsing, a dotted path after resolution.
    pub target: String,
    /// Opaque guard expression, if any.
    pub guard: Option<String>,
    /// Opaque action expression, if any.
    pub action: Option<String>,
    /// Internal transitions run their action without changing state.
    pub internal: bool,
}

impl Transition {
    /// A plain transition on `event` towards `target`.
    pub fn new(event: impl Into<String>, target: impl Into<String>) -> Self {
        Transition {
            event: event.into(),
            target: target.into(),
            guard: None,
            action: None,
            internal: false,
        }
    }
}

/// A state in the hierarchy.
///
/// A `State` exclusively owns its children; dropping it drops the subtree.
/// The `parent` field is only a name key for lookups, never an ownership
/// edge. Sibling names are expected to be unique, but this is enforced by
/// the validator, not by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    /// Name, unique within its sibling scope.
    pub name: String,
    /// Name of the enclosing state, if nested.
    pub parent: Option<String>,
    /// Entry actions, in declaration order.
    pub entry: Vec<String>,
    /// Exit actions, in declaration order.
    pub exit: Vec<String>,
    /// Outgoing transitions, in declaration order.
    pub transitions: Vec<Transition>,
    /// Owned child states.
    pub children: Vec<State>,
    /// Initial transition; only meaningful on composite states.
    pub initial: Option<Transition>,
    /// Set when the source designates this state as its parent's default child.
    pub is_default_child: bool,
}

impl State {
    /// A fresh, empty state called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        State {
            name: name.into(),
            ..State::default()
        }
    }

    /// Returns `true` if this state has children.
    pub fn is_composite(&self) -> bool {
        !self.children.is_empty()
    }

    /// Finds a direct child by name.
    pub fn child(&self, name: &str) -> Option<&State> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Finds a direct child by name, mutably.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut State> {
        self.children.iter_mut().find(|c| c.name == name)
    }
}

/// A declared event, seeding the generated signals enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventDecl {
    /// Event name as used on transitions.
    pub name: String,
    /// Declared signal value token, passed through unparsed.
    pub signal: Option<String>,
    /// Documentation string, if any.
    pub doc: Option<String>,
}

/// A declared data member of the machine's context struct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataMember {
    /// Member name.
    pub name: String,
    /// Declared type token, passed through unparsed.
    pub ty: String,
    /// Documentation string, if any.
    pub doc: Option<String>,
}

/// Root aggregate of one compiled diagram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMachine {
    /// Machine name, used to prefix every generated identifier.
    pub name: String,
    /// Base behavior tag.
    pub kind: MachineKind,
    /// Declared priority, passed through unvalidated.
    pub priority: Option<u32>,
    /// Declared stack size, passed through unvalidated.
    pub stack_size: Option<u32>,
    /// Top-level states, in declaration order.
    pub states: Vec<State>,
    /// Name of the designated initial state.
    pub initial: Option<String>,
    /// Declared events, in declaration order.
    pub events: Vec<EventDecl>,
    /// Declared data members, in declaration order.
    pub data: Vec<DataMember>,
}

impl StateMachine {
    /// An empty machine called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        StateMachine {
            name: name.into(),
            ..StateMachine::default()
        }
    }

    /// Finds a top-level state by name.
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Looks up a state by its fully qualified dotted path.
    pub fn find_path(&self, path: &str) -> Option<&State> {
        let mut segments = path.split('.');
        let mut state = self.state(segments.next()?)?;
        for segment in segments {
            state = state.child(segment)?;
        }
        Some(state)
    }

    /// Collects the dotted path of every state, depth-first in declaration
    /// order. The ordering is deterministic and is relied upon by both the
    /// validator and the code generator.
    pub fn collect_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for state in &self.states {
            collect_into(state, "", &mut paths);
        }
        paths
    }

    /// Visits every state together with its dotted path, depth-first.
    pub fn visit<'a>(&'a self, mut f: impl FnMut(&'a State, &str)) {
        for state in &self.states {
            visit_inner(state, "", &mut f);
        }
    }
}

fn collect_into(state: &State, prefix: &str, paths: &mut Vec<String>) {
    let path = join_path(prefix, &state.name);
    paths.push(path.clone());
    for child in &state.children {
        collect_into(child, &path, paths);
    }
}

fn visit_inner<'a>(state: &'a State, prefix: &str, f: &mut impl FnMut(&'a State, &str)) {
    let path = join_path(prefix, &state.name);
    f(state, &path);
    for child in &state.children {
        visit_inner(child, &path, f);
    }
}

/// Joins a dotted path prefix and a state name.
pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
