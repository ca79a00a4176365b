//! Scope resolution over a parsed [`StateMachine`].
//!
//! The structural parser leaves transition targets as the raw tokens found
//! in the source. [`resolve`] rewrites each token into a fully qualified
//! dotted path by searching the composite-state tree, assigns a default
//! initial transition to every composite state that lacks one, and leaves
//! tokens it cannot resolve untouched for the validator to report.
//!
//! Resolution is idempotent: running it twice over the same machine yields
//! a structurally identical model.

use crate::machine::{is_pseudostate, join_path, State, StateMachine, Transition, INIT_EVENT};
use log::{debug, trace};
use std::collections::HashSet;

/// Resolves transition targets and initial transitions in place.
///
/// For every target token that is not a pseudostate marker the search
/// proceeds, deterministically, through:
///
/// 1. an exact match as a fully qualified dotted path;
/// 2. the token joined to each scope enclosing the owning state, from the
///    owning state's own scope outward through every ancestor;
/// 3. the bare token as a top-level name.
///
/// The first match wins, so an inner scope always shadows an outer one.
pub fn resolve(machine: &mut StateMachine) {
    let known: HashSet<String> = machine.collect_paths().into_iter().collect();
    debug!("resolving {} states", known.len());
    for state in &mut machine.states {
        resolve_state(state, "", &known);
    }
}

fn resolve_state(state: &mut State, prefix: &str, known: &HashSet<String>) {
    let path = join_path(prefix, &state.name);
    for transition in &mut state.transitions {
        resolve_target(&mut transition.target, &path, known);
    }
    if state.is_composite() {
        match &mut state.initial {
            Some(initial) => resolve_target(&mut initial.target, &path, known),
            None => {
                let child = state
                    .children
                    .iter()
                    .find(|c| c.is_default_child)
                    .unwrap_or(&state.children[0]);
                let target = join_path(&path, &child.name);
                debug!("defaulting initial transition of `{path}` to `{target}`");
                state.initial = Some(Transition::new(INIT_EVENT, target));
            }
        }
    }
    for child in &mut state.children {
        resolve_state(child, &path, known);
    }
}

/// Rewrites `target` into a qualified path, if a match exists.
fn resolve_target(target: &mut String, owner: &str, known: &HashSet<String>) {
    if is_pseudostate(target) {
        return;
    }
    if target.contains('.') && known.contains(target.as_str()) {
        return;
    }
    let mut scope = owner;
    loop {
        let candidate = join_path(scope, target);
        if known.contains(&candidate) {
            trace!("`{target}` resolved to `{candidate}` from `{owner}`");
            *target = candidate;
            return;
        }
        match scope.rsplit_once('.') {
            Some((outer, _)) => scope = outer,
            None if !scope.is_empty() => scope = "",
            None => break,
        }
    }
    trace!("`{target}` not resolved from `{owner}`");
}

/// Least common ancestor of two dotted paths: their longest common prefix
/// in whole path segments. Empty when the paths share no ancestor.
pub fn lca(a: &str, b: &str) -> String {
    let mut common = Vec::new();
    for (x, y) in a.split('.').zip(b.split('.')) {
        if x == y {
            common.push(x);
        } else {
            break;
        }
    }
    common.join(".")
}

/// States exited on a transition from `source` to `target`: the chain from
/// `source` upward, excluding the least common ancestor itself.
pub fn exit_sequence(source: &str, target: &str) -> Vec<String> {
    let ancestor = lca(source, target);
    let mut sequence = Vec::new();
    let mut current = source.to_string();
    while current != ancestor && !current.is_empty() {
        sequence.push(current.clone());
        current = match current.rsplit_once('.') {
            Some((outer, _)) => outer.to_string(),
            None => String::new(),
        };
    }
    sequence
}

/// States entered on a transition from `source` to `target`: the chain from
/// just below the least common ancestor down to and including `target`.
pub fn entry_sequence(source: &str, target: &str) -> Vec<String> {
    let ancestor = lca(source, target);
    let mut sequence = Vec::new();
    let mut current = String::from(ancestor);
    let depth = if current.is_empty() {
        0
    } else {
        current.split('.').count()
    };
    for segment in target.split('.').skip(depth) {
        current = join_path(&current, segment);
        sequence.push(current.clone());
    }
    sequence
}
