//! Static analysis over a resolved [`StateMachine`].
//!
//! [`validate`] is a pure function: it inspects the model, attaches
//! nothing, and reports every finding as a [`Diagnostic`]. It never fails
//! and never stops early, so one broken guard does not hide a missing
//! initial state. Whether errors block code generation is the caller's
//! policy; the convention is that [`Severity::Error`] blocks and
//! [`Severity::Warning`] does not.

use crate::machine::{is_pseudostate, State, StateMachine, INIT_EVENT};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

/// Event name conventionally driven by a periodic timer.
pub const TIMEOUT_EVENT: &str = "TIMEOUT";

/// Data-member type expected alongside [`TIMEOUT_EVENT`].
pub const TIMER_TYPE: &str = "QTimeEvt";

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational only.
    Info,
    /// Suspicious but generation-safe.
    Warning,
    /// The model is structurally broken; generated code would be too.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One validation finding.
///
/// Every diagnostic carries a message; the state path and transition event
/// are attached whenever the finding maps to a specific location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity of the finding.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Dotted path of the state concerned, if any.
    pub state: Option<String>,
    /// Event of the transition concerned, if any.
    pub transition: Option<String>,
}

impl Diagnostic {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            message: message.into(),
            state: None,
            transition: None,
        }
    }

    /// An error-severity diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic::new(Severity::Error, message)
    }

    /// A warning-severity diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic::new(Severity::Warning, message)
    }

    /// Attaches the dotted path of the state concerned.
    pub fn at_state(mut self, path: impl Into<String>) -> Self {
        self.state = Some(path.into());
        self
    }

    /// Attaches the event of the transition concerned.
    pub fn at_transition(mut self, event: impl Into<String>) -> Self {
        self.transition = Some(event.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(state) = &self.state {
            write!(f, " [state `{state}`")?;
            if let Some(transition) = &self.transition {
                write!(f, ", on `{transition}`")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Returns `true` if any diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}

/// Runs every check over the machine and returns the findings.
pub fn validate(machine: &StateMachine) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    check_structure(machine, &mut diagnostics);
    check_duplicate_names(machine, &mut diagnostics);
    check_initial_transitions(machine, &mut diagnostics);
    check_reachability(machine, &mut diagnostics);
    check_transitions(machine, &mut diagnostics);
    check_naming(machine, &mut diagnostics);
    check_timer_convention(machine, &mut diagnostics);
    diagnostics
}

fn check_structure(machine: &StateMachine, out: &mut Vec<Diagnostic>) {
    if machine.name.is_empty() {
        out.push(Diagnostic::error("state machine has no name"));
    }
    if machine.states.is_empty() {
        out.push(Diagnostic::error("state machine declares no states"));
    }
    match &machine.initial {
        None => out.push(Diagnostic::error("state machine has no initial state")),
        Some(initial) if machine.state(initial).is_none() => out.push(
            Diagnostic::error(format!("initial state `{initial}` does not exist")),
        ),
        Some(_) => {}
    }
}

fn check_duplicate_names(machine: &StateMachine, out: &mut Vec<Diagnostic>) {
    let mut seen = HashSet::new();
    for path in machine.collect_paths() {
        if !seen.insert(path.clone()) {
            out.push(
                Diagnostic::error(format!("duplicate state name `{path}`")).at_state(path),
            );
        }
    }
}

fn check_initial_transitions(machine: &StateMachine, out: &mut Vec<Diagnostic>) {
    machine.visit(|state, path| {
        if state.is_composite() && state.initial.is_none() {
            out.push(
                Diagnostic::error(format!(
                    "composite state `{path}` has no initial transition"
                ))
                .at_state(path),
            );
        }
        if !state.is_composite() && state.initial.is_some() {
            out.push(
                Diagnostic::warning(format!(
                    "state `{path}` declares an initial transition but has no children"
                ))
                .at_state(path),
            );
        }
    });
}

fn check_reachability(machine: &StateMachine, out: &mut Vec<Diagnostic>) {
    let Some(initial) = &machine.initial else {
        // Already reported as a structure error; nothing to traverse from.
        return;
    };
    let mut by_path: HashMap<String, &State> = HashMap::new();
    machine.visit(|state, path| {
        by_path.insert(path.to_string(), state);
    });
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    if by_path.contains_key(initial.as_str()) {
        queue.push_back(initial.clone());
    }
    while let Some(path) = queue.pop_front() {
        if !visited.insert(path.clone()) {
            continue;
        }
        // Entering a nested state enters every enclosing state, whose
        // transitions stay live while inside it.
        for (index, _) in path.match_indices('.') {
            queue.push_back(path[..index].to_string());
        }
        let Some(state) = by_path.get(&path) else {
            continue;
        };
        let targets = state
            .transitions
            .iter()
            .chain(state.initial.iter())
            .map(|t| &t.target);
        for target in targets {
            if by_path.contains_key(target.as_str()) && !visited.contains(target.as_str()) {
                queue.push_back(target.clone());
            }
        }
    }
    for path in machine.collect_paths() {
        let leaf = path.rsplit('.').next().unwrap_or(&path);
        if leaf.starts_with("history_") {
            continue;
        }
        if !visited.contains(&path) {
            out.push(
                Diagnostic::warning(format!("state `{path}` is unreachable")).at_state(path),
            );
        }
    }
}

fn check_transitions(machine: &StateMachine, out: &mut Vec<Diagnostic>) {
    let known: HashSet<String> = machine.collect_paths().into_iter().collect();
    machine.visit(|state, path| {
        let mut seen = HashSet::new();
        for transition in &state.transitions {
            if !is_pseudostate(&transition.target) && !known.contains(&transition.target) {
                out.push(
                    Diagnostic::error(format!(
                        "transition target `{}` does not exist",
                        transition.target
                    ))
                    .at_state(path)
                    .at_transition(&transition.event),
                );
            }
            if !seen.insert((transition.event.clone(), transition.guard.clone())) {
                out.push(
                    Diagnostic::error(format!(
                        "duplicate transition on `{}`{}",
                        transition.event,
                        transition
                            .guard
                            .as_deref()
                            .map(|g| format!(" with guard `{g}`"))
                            .unwrap_or_default()
                    ))
                    .at_state(path)
                    .at_transition(&transition.event),
                );
            }
            if let Some(guard) = &transition.guard {
                check_guard(guard, path, &transition.event, out);
            }
        }
    });
}

fn check_guard(guard: &str, path: &str, event: &str, out: &mut Vec<Diagnostic>) {
    let mut depth = 0i32;
    for c in guard.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            break;
        }
    }
    if depth != 0 {
        out.push(
            Diagnostic::error(format!("guard `{guard}` has unbalanced parentheses"))
                .at_state(path)
                .at_transition(event),
        );
    }
    // Heuristic: a lone `=` is almost always a typo for `==`.
    let bytes = guard.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'=' {
            continue;
        }
        let prev = i.checked_sub(1).map(|j| bytes[j]);
        let next = bytes.get(i + 1).copied();
        let part_of_operator = matches!(prev, Some(b'=') | Some(b'<') | Some(b'>') | Some(b'!'))
            || next == Some(b'=');
        if !part_of_operator {
            out.push(
                Diagnostic::warning(format!(
                    "guard `{guard}` contains a single `=`; did you mean `==`?"
                ))
                .at_state(path)
                .at_transition(event),
            );
            break;
        }
    }
}

fn is_upper_camel(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

fn is_upper_snake(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn check_naming(machine: &StateMachine, out: &mut Vec<Diagnostic>) {
    machine.visit(|state, path| {
        if !state.name.starts_with("history_") && !is_upper_camel(&state.name) {
            out.push(
                Diagnostic::warning(format!(
                    "state name `{}` is not UpperCamelCase",
                    state.name
                ))
                .at_state(path),
            );
        }
    });
    let mut events = BTreeSet::new();
    for declared in &machine.events {
        events.insert(declared.name.clone());
    }
    machine.visit(|state, _| {
        for transition in &state.transitions {
            if transition.event != INIT_EVENT {
                events.insert(transition.event.clone());
            }
        }
    });
    for event in events {
        if !is_upper_snake(&event) {
            out.push(Diagnostic::warning(format!(
                "event name `{event}` is not UPPER_SNAKE_CASE"
            )));
        }
    }
}

fn check_timer_convention(machine: &StateMachine, out: &mut Vec<Diagnostic>) {
    let mut uses_timeout = false;
    machine.visit(|state, _| {
        uses_timeout |= state.transitions.iter().any(|t| t.event == TIMEOUT_EVENT);
    });
    if uses_timeout && !machine.data.iter().any(|d| d.ty.contains(TIMER_TYPE)) {
        out.push(Diagnostic::warning(format!(
            "`{TIMEOUT_EVENT}` is used but no `{TIMER_TYPE}` data member is declared"
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{DataMember, Transition};
    use crate::resolve::resolve;

    fn blinky() -> StateMachine {
        let mut machine = StateMachine::new("Blinky");
        let mut off = State::new("Off");
        off.transitions.push(Transition::new("TIMEOUT", "On"));
        let mut on = State::new("On");
        on.transitions.push(Transition::new("TIMEOUT", "Off"));
        machine.states.push(off);
        machine.states.push(on);
        machine.initial = Some("Off".to_string());
        machine.data.push(DataMember {
            name: "timer".to_string(),
            ty: "QTimeEvt".to_string(),
            doc: None,
        });
        resolve(&mut machine);
        machine
    }

    #[test]
    fn blinky_is_clean() {
        let diagnostics = validate(&blinky());
        assert!(!has_errors(&diagnostics), "{diagnostics:?}");
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn missing_name_and_initial() {
        let machine = StateMachine::default();
        let diagnostics = validate(&machine);
        assert!(has_errors(&diagnostics));
        assert!(diagnostics
            .iter()
            .any(|d| d.message.contains("no initial state")));
        assert!(diagnostics.iter().any(|d| d.message.contains("no name")));
        assert!(diagnostics.iter().any(|d| d.message.contains("no states")));
    }

    #[test]
    fn unreachable_state_is_one_warning() {
        let mut machine = blinky();
        machine.states.push(State::new("Orphan"));
        let diagnostics = validate(&machine);
        let unreachable: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.message.contains("unreachable"))
            .collect();
        assert_eq!(unreachable.len(), 1);
        assert_eq!(unreachable[0].severity, Severity::Warning);
        assert_eq!(unreachable[0].state.as_deref(), Some("Orphan"));
    }

    #[test]
    fn nested_states_reached_through_initial_transition() {
        let mut machine = blinky();
        let on = machine.states.iter_mut().find(|s| s.name == "On").unwrap();
        on.children.push(State::new("Dim"));
        on.children.push(State::new("Bright"));
        on.children[0]
            .transitions
            .push(Transition::new("BRIGHTNESS", "Bright"));
        resolve(&mut machine);
        let diagnostics = validate(&machine);
        assert!(
            !diagnostics.iter().any(|d| d.message.contains("unreachable")),
            "{diagnostics:?}"
        );
    }

    #[test]
    fn composite_entered_through_nested_target() {
        let mut machine = blinky();
        let on = machine.states.iter_mut().find(|s| s.name == "On").unwrap();
        on.children.push(State::new("Dim"));
        on.children.push(State::new("Bright"));
        on.children[0]
            .transitions
            .push(Transition::new("BRIGHTNESS", "Bright"));
        // Off jumps straight into the child; nothing ever targets On itself.
        machine.states[0].transitions[0].target = "On.Dim".to_string();
        resolve(&mut machine);
        let diagnostics = validate(&machine);
        assert!(
            !diagnostics.iter().any(|d| d.message.contains("unreachable")),
            "{diagnostics:?}"
        );
    }

    #[test]
    fn dangling_target_is_an_error() {
        let mut machine = blinky();
        machine.states[0]
            .transitions
            .push(Transition::new("GO", "Nowhere"));
        let diagnostics = validate(&machine);
        let dangling: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.message.contains("does not exist"))
            .collect();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].severity, Severity::Error);
        assert_eq!(dangling[0].state.as_deref(), Some("Off"));
        assert_eq!(dangling[0].transition.as_deref(), Some("GO"));
    }

    #[test]
    fn duplicate_transitions_same_guard() {
        let mut machine = blinky();
        let mut duplicated = Transition::new("TIMEOUT", "On");
        duplicated.target = "On".to_string();
        machine.states[0].transitions.push(duplicated);
        let diagnostics = validate(&machine);
        assert!(diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error && d.message.contains("duplicate transition")));
    }

    #[test]
    fn differing_guards_are_not_duplicates() {
        let mut machine = blinky();
        let mut guarded = Transition::new("TIMEOUT", "On");
        guarded.guard = Some("me->count > 3".to_string());
        machine.states[0].transitions.push(guarded);
        let diagnostics = validate(&machine);
        assert!(!diagnostics
            .iter()
            .any(|d| d.message.contains("duplicate transition")));
    }

    #[test]
    fn guard_sanity() {
        let mut machine = blinky();
        machine.states[0].transitions[0].guard = Some("(a > b".to_string());
        let diagnostics = validate(&machine);
        assert!(diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error && d.message.contains("unbalanced")));

        let mut machine = blinky();
        machine.states[0].transitions[0].guard = Some("count = 3".to_string());
        let diagnostics = validate(&machine);
        assert!(diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning && d.message.contains("single `=`")));

        let mut machine = blinky();
        machine.states[0].transitions[0].guard = Some("count >= 3 && mode == 1".to_string());
        assert!(!validate(&machine).iter().any(|d| d.message.contains('=')));
    }

    #[test]
    fn naming_conventions_warn_only() {
        let mut machine = blinky();
        machine.states.push(State::new("lower_case"));
        machine.states[0]
            .transitions
            .push(Transition::new("goFast", "On"));
        let diagnostics = validate(&machine);
        assert!(diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning
                && d.message.contains("not UpperCamelCase")));
        assert!(diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning
                && d.message.contains("not UPPER_SNAKE_CASE")));
    }

    #[test]
    fn timeout_without_timer_member() {
        let mut machine = blinky();
        machine.data.clear();
        let diagnostics = validate(&machine);
        assert!(diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning && d.message.contains("QTimeEvt")));
    }

    #[test]
    fn vacuous_initial_transition() {
        let mut machine = blinky();
        machine.states[0].initial = Some(Transition::new(INIT_EVENT, "Off"));
        let diagnostics = validate(&machine);
        assert!(diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning && d.message.contains("no children")));
    }
}
