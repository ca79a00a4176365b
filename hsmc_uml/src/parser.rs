//! Structural parser for the annotated state-diagram dialect.
//!
//! Unlike the preprocessor, which only sanitizes the text for rendering,
//! this parser reads the *original* annotated source at full fidelity and
//! builds a [`StateMachine`]. It keeps an explicit stack of currently
//! open composite states: whatever is parsed while the stack is non-empty
//! attaches to the state on top, and to the machine root otherwise.
//!
//! States come into existence on first textual reference, so forward
//! references are legal: naming a state as a transition source before its
//! `state ... {` block is seen creates it in the current scope. Ordinary
//! transition *targets* are kept as raw tokens and resolved later by
//! `hsmc_core::resolve`; a target that never resolves is a validator
//! finding, not a parse error.

use hsmc_core::machine::{
    DataMember, EventDecl, MachineKind, State, StateMachine, Transition, INITIAL_MARKER,
    INIT_EVENT,
};
use log::{debug, trace, warn};
use serde::Deserialize;
use thiserror::Error;

/// The error type for structurally broken diagrams.
///
/// Only bracket mismatches are fatal; everything else degrades to a
/// partial model plus validator diagnostics.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// A `}` with no open state block.
    #[error("unexpected `}}` at line {0}")]
    UnexpectedClose(usize),
    /// End of input with state blocks still open.
    #[error("{0} state block(s) left open at end of input")]
    UnclosedBlocks(usize),
}

/// How the `@meta` block was understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaFormat {
    /// Parsed as a JSON object.
    Structured,
    /// Salvaged by scanning for `key: value` lines.
    LineScanned,
    /// Absent, empty, or nothing salvageable.
    Empty,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MetaBlock {
    name: Option<String>,
    kind: Option<String>,
    priority: Option<u32>,
    stack: Option<u32>,
    events: Vec<MetaEvent>,
    data: Vec<MetaMember>,
}

#[derive(Debug, Clone, Deserialize)]
struct MetaEvent {
    name: String,
    signal: Option<serde_json::Value>,
    doc: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MetaMember {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    doc: Option<String>,
}

fn value_token(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Parser for annotated diagram source.
#[derive(Debug)]
pub struct Parser {
    machine: StateMachine,
    stack: Vec<State>,
    /// How the metadata block was understood, for logging and tests.
    pub meta_format: MetaFormat,
}

impl Parser {
    /// Parses `source` into a [`StateMachine`].
    ///
    /// The returned model is structurally complete but unresolved:
    /// transition targets are still raw tokens.
    pub fn parse(source: &str) -> Result<StateMachine, ParseError> {
        Ok(Self::parse_full(source)?.machine)
    }

    /// Like [`Parser::parse`], but keeps the parser around so callers can
    /// inspect how the metadata block was understood.
    pub fn parse_full(source: &str) -> Result<Parser, ParseError> {
        let mut parser = Parser {
            machine: StateMachine::default(),
            stack: Vec::new(),
            meta_format: MetaFormat::Empty,
        };
        debug!("begin parsing");
        let mut meta_lines: Option<Vec<&str>> = None;
        for (index, line) in source.lines().enumerate() {
            let number = index + 1;
            let trimmed = line.trim();
            if let Some(lines) = &mut meta_lines {
                if trimmed == "@endmeta" {
                    let block = lines.join("\n");
                    parser.meta_format = parser.parse_meta(&block);
                    meta_lines = None;
                } else {
                    lines.push(line);
                }
                continue;
            }
            if trimmed == "@meta" || trimmed.starts_with("@meta ") {
                meta_lines = Some(Vec::new());
                continue;
            }
            parser.parse_line(trimmed, number)?;
        }
        // A block truncated at end of input is still salvageable.
        if let Some(lines) = meta_lines {
            let block = lines.join("\n");
            parser.meta_format = parser.parse_meta(&block);
        }
        if !parser.stack.is_empty() {
            return Err(ParseError::UnclosedBlocks(parser.stack.len()));
        }
        debug!(
            "parsed machine `{}` with {} top-level states",
            parser.machine.name,
            parser.machine.states.len()
        );
        Ok(parser)
    }

    /// The parsed model.
    pub fn into_machine(self) -> StateMachine {
        self.machine
    }

    fn scope(&mut self) -> &mut Vec<State> {
        match self.stack.last_mut() {
            Some(open) => &mut open.children,
            None => &mut self.machine.states,
        }
    }

    fn parse_line(&mut self, trimmed: &str, number: usize) -> Result<(), ParseError> {
        if trimmed.is_empty() || trimmed.starts_with('\'') {
            return Ok(());
        }
        if let Some(rest) = trimmed.strip_prefix("state ") {
            if let Some(name) = rest.strip_suffix('{').map(str::trim) {
                // Reopen the state if a forward reference already created it.
                let scope = self.scope();
                let state = match scope.iter().position(|s| s.name == name) {
                    Some(at) => scope.remove(at),
                    None => State::new(name),
                };
                trace!("opening state `{}` at line {number}", state.name);
                self.stack.push(state);
                return Ok(());
            }
        }
        if trimmed == "}" {
            let mut state = self
                .stack
                .pop()
                .ok_or(ParseError::UnexpectedClose(number))?;
            state.parent = self.stack.last().map(|parent| parent.name.clone());
            trace!("closing state `{}` at line {number}", state.name);
            self.scope().push(state);
            return Ok(());
        }
        if let Some(action) = trimmed.strip_prefix("entry:") {
            match self.stack.last_mut() {
                Some(open) => open.entry.push(action.trim().to_string()),
                None => warn!("line {number}: `entry:` outside a state block"),
            }
            return Ok(());
        }
        if let Some(action) = trimmed.strip_prefix("exit:") {
            match self.stack.last_mut() {
                Some(open) => open.exit.push(action.trim().to_string()),
                None => warn!("line {number}: `exit:` outside a state block"),
            }
            return Ok(());
        }
        if let Some((lhs, rhs)) = trimmed.split_once("-->") {
            self.parse_transition(lhs.trim(), rhs.trim(), number);
            return Ok(());
        }
        if let Some(label) = trimmed.strip_prefix(':') {
            self.parse_internal(label.trim(), number);
            return Ok(());
        }
        trace!("line {number} not recognized, skipping: `{trimmed}`");
        Ok(())
    }

    fn parse_transition(&mut self, lhs: &str, rhs: &str, number: usize) {
        let (target, label) = match rhs.split_once(':') {
            Some((target, label)) => (target.trim(), Some(label.trim())),
            None => (rhs, None),
        };
        if lhs == INITIAL_MARKER {
            match self.stack.last_mut() {
                None => {
                    trace!("initial state is `{target}`");
                    self.machine.initial = Some(target.to_string());
                    let scope = self.scope();
                    if !scope.iter().any(|s| s.name == target) {
                        scope.push(State::new(target));
                    }
                }
                Some(open) => {
                    open.initial = Some(Transition::new(INIT_EVENT, target));
                    match open.child_mut(target) {
                        Some(child) => child.is_default_child = true,
                        None => {
                            let mut child = State::new(target);
                            child.parent = Some(open.name.clone());
                            child.is_default_child = true;
                            open.children.push(child);
                        }
                    }
                }
            }
            return;
        }
        let Some((event, guard, action)) = label.and_then(split_label) else {
            warn!("line {number}: transition without an event, skipping");
            return;
        };
        let mut transition = Transition::new(event, target);
        transition.guard = guard;
        transition.action = action;
        let parent = self.stack.last().map(|open| open.name.clone());
        let scope = self.scope();
        let source = match scope.iter().position(|s| s.name == lhs) {
            Some(at) => &mut scope[at],
            None => {
                trace!("creating state `{lhs}` on first reference");
                let mut state = State::new(lhs);
                state.parent = parent;
                scope.push(state);
                scope.last_mut().expect("state was just pushed")
            }
        };
        source.transitions.push(transition);
    }

    fn parse_internal(&mut self, label: &str, number: usize) {
        let Some(open) = self.stack.last_mut() else {
            warn!("line {number}: internal transition outside a state block");
            return;
        };
        let Some((event, guard, action)) = split_label(label) else {
            warn!("line {number}: internal transition without an event, skipping");
            return;
        };
        let mut transition = Transition::new(event, open.name.clone());
        transition.guard = guard;
        transition.action = action;
        transition.internal = true;
        open.transitions.push(transition);
    }

    /// Best-effort extraction of the metadata block. Never fails: a block
    /// that is not valid JSON is scanned line by line, and a block that
    /// yields nothing is simply ignored.
    fn parse_meta(&mut self, block: &str) -> MetaFormat {
        let body = block.trim();
        if body.is_empty() {
            return MetaFormat::Empty;
        }
        match serde_json::from_str::<MetaBlock>(body) {
            Ok(meta) => {
                debug!("metadata block parsed as JSON");
                self.apply_meta(meta);
                MetaFormat::Structured
            }
            Err(err) => {
                trace!("metadata block is not JSON ({err}), scanning lines");
                self.scan_meta_lines(body)
            }
        }
    }

    fn apply_meta(&mut self, meta: MetaBlock) {
        if let Some(name) = meta.name {
            self.machine.name = name;
        }
        if let Some(kind) = meta.kind {
            self.machine.kind = parse_kind(&kind);
        }
        self.machine.priority = meta.priority.or(self.machine.priority);
        self.machine.stack_size = meta.stack.or(self.machine.stack_size);
        for event in meta.events {
            self.machine.events.push(EventDecl {
                name: event.name,
                signal: event.signal.map(value_token),
                doc: event.doc,
            });
        }
        for member in meta.data {
            self.machine.data.push(DataMember {
                name: member.name,
                ty: member.ty,
                doc: member.doc,
            });
        }
    }

    fn scan_meta_lines(&mut self, body: &str) -> MetaFormat {
        let mut matched = false;
        for line in body.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "name" => {
                    self.machine.name = value.to_string();
                    matched = true;
                }
                "kind" => {
                    self.machine.kind = parse_kind(value);
                    matched = true;
                }
                "priority" => {
                    if let Ok(priority) = value.parse() {
                        self.machine.priority = Some(priority);
                        matched = true;
                    }
                }
                "stack" => {
                    if let Ok(stack) = value.parse() {
                        self.machine.stack_size = Some(stack);
                        matched = true;
                    }
                }
                "event" => {
                    let (value, doc) = split_doc(value);
                    let (name, signal) = match value.split_once('=') {
                        Some((name, signal)) => {
                            (name.trim(), Some(signal.trim().to_string()))
                        }
                        None => (value, None),
                    };
                    self.machine.events.push(EventDecl {
                        name: name.to_string(),
                        signal,
                        doc,
                    });
                    matched = true;
                }
                "data" => {
                    let (value, doc) = split_doc(value);
                    if let Some((name, ty)) = value.split_once(':') {
                        self.machine.data.push(DataMember {
                            name: name.trim().to_string(),
                            ty: ty.trim().to_string(),
                            doc,
                        });
                        matched = true;
                    }
                }
                other => trace!("unknown metadata key `{other}`"),
            }
        }
        if matched {
            MetaFormat::LineScanned
        } else {
            MetaFormat::Empty
        }
    }
}

fn parse_kind(token: &str) -> MachineKind {
    token.parse().unwrap_or_else(|err| {
        warn!("{err}, defaulting to `{}`", MachineKind::default());
        MachineKind::default()
    })
}

/// Splits a transition label into event, guard and action.
///
/// Shape: `EVENT [/ action] [[guard]]`, with the guard in the trailing
/// bracket pair. Returns `None` when no event is present.
fn split_label(label: &str) -> Option<(String, Option<String>, Option<String>)> {
    let mut rest = label.trim();
    let mut guard = None;
    if rest.ends_with(']') {
        if let Some(open) = rest.rfind('[') {
            guard = Some(rest[open + 1..rest.len() - 1].trim().to_string());
            rest = rest[..open].trim_end();
        }
    }
    let (event, action) = match rest.split_once('/') {
        Some((event, action)) => (event.trim(), Some(action.trim().to_string())),
        None => (rest, None),
    };
    if event.is_empty() {
        None
    } else {
        Some((event.to_string(), guard, action))
    }
}

fn split_doc(value: &str) -> (&str, Option<String>) {
    match value.split_once("--") {
        Some((value, doc)) => (value.trim(), Some(doc.trim().to_string())),
        None => (value, None),
    }
}
