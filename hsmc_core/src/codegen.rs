//! Emission of QP-style C/C++ scaffolding from a resolved [`StateMachine`].
//!
//! One handler function is generated per state, named after the state's
//! dotted path with dots flattened to underscores, so nested states with
//! repeated names cannot collide. Unhandled events fall through a
//! `default` arm to the immediate parent's handler (or to the framework's
//! top handler for root states), which is what encodes behavioral
//! inheritance in the generated code.
//!
//! The generator assumes its input has been resolved and validated. It
//! performs no checks of its own: feeding it a machine with unresolved
//! targets produces syntactically broken output. That is a documented
//! precondition, not a defect.

use crate::machine::{MachineKind, State, StateMachine, Transition};
use log::debug;
use std::fmt::Write;
use std::str::FromStr;
use thiserror::Error;

/// Language flavor of the generated pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetLang {
    /// QP/C (`qpc.h`).
    #[default]
    C,
    /// QP/C++ (`qpcpp.hpp`).
    Cpp,
}

/// The error type returned when a target-language token is unknown.
#[derive(Debug, Clone, Error)]
#[error("unknown target language: `{0}`")]
pub struct UnknownLang(pub String);

impl FromStr for TargetLang {
    type Err = UnknownLang;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(TargetLang::C),
            "cpp" | "c++" => Ok(TargetLang::Cpp),
            _ => Err(UnknownLang(s.to_string())),
        }
    }
}

/// Options controlling generation.
#[derive(Debug, Clone, Default)]
pub struct GenOptions {
    /// Language flavor.
    pub lang: TargetLang,
    /// Emit explanatory comments in the output.
    pub comments: bool,
}

/// The generated header/source pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    /// Header text (`.h`).
    pub header: String,
    /// Source text (`.c` / `.cpp`).
    pub source: String,
}

struct Lang {
    include: &'static str,
    qstate: &'static str,
    qevt: &'static str,
    top: &'static str,
    user_sig: &'static str,
}

impl Lang {
    fn of(lang: TargetLang) -> Lang {
        match lang {
            TargetLang::C => Lang {
                include: "qpc.h",
                qstate: "QState",
                qevt: "QEvt",
                top: "&QHsm_top",
                user_sig: "Q_USER_SIG",
            },
            TargetLang::Cpp => Lang {
                include: "qpcpp.hpp",
                qstate: "QP::QState",
                qevt: "QP::QEvt",
                top: "&QP::QHsm::top",
                user_sig: "QP::Q_USER_SIG",
            },
        }
    }

    fn base(&self, kind: MachineKind, lang: TargetLang) -> &'static str {
        match (kind, lang) {
            (MachineKind::Active, TargetLang::C) => "QActive",
            (MachineKind::Hsm, TargetLang::C) => "QHsm",
            (MachineKind::Active, TargetLang::Cpp) => "QP::QActive",
            (MachineKind::Hsm, TargetLang::Cpp) => "QP::QHsm",
        }
    }
}

/// Flattens a dotted state path into a collision-free C identifier.
pub fn flat_ident(path: &str) -> String {
    path.replace('.', "_")
}

fn handler(machine: &str, path: &str) -> String {
    format!("{machine}_{}", flat_ident(path))
}

fn signal(event: &str) -> String {
    if event.ends_with("_SIG") {
        event.to_string()
    } else {
        format!("{event}_SIG")
    }
}

/// Every event used by the machine, declared events first, then
/// undeclared transition events in depth-first encounter order.
fn all_events(machine: &StateMachine) -> Vec<String> {
    let mut events: Vec<String> = machine.events.iter().map(|e| e.name.clone()).collect();
    machine.visit(|state, _| {
        for transition in &state.transitions {
            if !events.contains(&transition.event) {
                events.push(transition.event.clone());
            }
        }
    });
    events
}

/// Generates the header/source pair for `machine`.
///
/// Precondition: `machine` has been through [`crate::resolve::resolve`]
/// and carries no error-severity diagnostics.
pub fn generate(machine: &StateMachine, options: &GenOptions) -> GeneratedCode {
    debug!(
        "generating {:?} code for `{}`",
        options.lang, machine.name
    );
    GeneratedCode {
        header: gen_header(machine, options),
        source: gen_source(machine, options),
    }
}

fn gen_header(machine: &StateMachine, options: &GenOptions) -> String {
    let lang = Lang::of(options.lang);
    let name = &machine.name;
    let upper = name.to_uppercase();
    let mut out = String::new();
    if options.comments {
        let _ = writeln!(out, "/* {name} state machine (generated) */");
    }
    let _ = writeln!(out, "#ifndef {upper}_H");
    let _ = writeln!(out, "#define {upper}_H");
    let _ = writeln!(out);
    let _ = writeln!(out, "#include \"{}\"", lang.include);
    let _ = writeln!(out);
    let _ = writeln!(out, "enum {name}Signals {{");
    let mut first = true;
    for event in all_events(machine) {
        let declared = machine.events.iter().find(|e| e.name == event);
        if options.comments {
            if let Some(doc) = declared.and_then(|e| e.doc.as_deref()) {
                let _ = writeln!(out, "    /* {doc} */");
            }
        }
        let value = declared.and_then(|e| e.signal.as_deref());
        match (first, value) {
            (_, Some(value)) => {
                let _ = writeln!(out, "    {} = {value},", signal(&event));
            }
            (true, None) => {
                let _ = writeln!(out, "    {} = {},", signal(&event), lang.user_sig);
            }
            (false, None) => {
                let _ = writeln!(out, "    {},", signal(&event));
            }
        }
        first = false;
    }
    let _ = writeln!(out, "    {upper}_MAX_SIG");
    let _ = writeln!(out, "}};");
    let _ = writeln!(out);
    let _ = writeln!(out, "typedef struct {{");
    let _ = writeln!(out, "    {} super;", lang.base(machine.kind, options.lang));
    for member in &machine.data {
        if options.comments {
            if let Some(doc) = &member.doc {
                let _ = writeln!(out, "    /* {doc} */");
            }
        }
        let _ = writeln!(out, "    {} {};", member.ty, member.name);
    }
    let _ = writeln!(out, "}} {name};");
    let _ = writeln!(out);
    let _ = writeln!(out, "void {name}_ctor({name} * const me);");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} {name}_initial({name} * const me, void const * const par);",
        lang.qstate
    );
    machine.visit(|_, path| {
        let _ = writeln!(
            out,
            "{} {}({name} * const me, {} const * const e);",
            lang.qstate,
            handler(name, path),
            lang.qevt
        );
    });
    let _ = writeln!(out);
    let _ = writeln!(out, "#endif /* {upper}_H */");
    out
}

fn gen_source(machine: &StateMachine, options: &GenOptions) -> String {
    let lang = Lang::of(options.lang);
    let name = &machine.name;
    let mut out = String::new();
    if options.comments {
        let _ = writeln!(out, "/* {name} state machine (generated) */");
    }
    let _ = writeln!(out, "#include \"{}.h\"", name.to_lowercase());
    let _ = writeln!(out);
    let ctor = match (machine.kind, options.lang) {
        (MachineKind::Active, TargetLang::C) => "QActive_ctor",
        (MachineKind::Hsm, TargetLang::C) => "QHsm_ctor",
        (MachineKind::Active, TargetLang::Cpp) => "QP::QActive_ctor",
        (MachineKind::Hsm, TargetLang::Cpp) => "QP::QHsm_ctor",
    };
    let _ = writeln!(out, "void {name}_ctor({name} * const me) {{");
    let _ = writeln!(
        out,
        "    {ctor}(&me->super, Q_STATE_CAST(&{name}_initial));"
    );
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} {name}_initial({name} * const me, void const * const par) {{",
        lang.qstate
    );
    let _ = writeln!(out, "    (void)me;");
    let _ = writeln!(out, "    (void)par;");
    let initial = machine.initial.as_deref().unwrap_or_default();
    let _ = writeln!(out, "    return Q_TRAN(&{});", handler(name, initial));
    let _ = writeln!(out, "}}");
    machine.visit(|state, path| {
        let _ = writeln!(out);
        gen_handler(&mut out, machine, state, path, &lang, options);
    });
    out
}

fn gen_handler(
    out: &mut String,
    machine: &StateMachine,
    state: &State,
    path: &str,
    lang: &Lang,
    options: &GenOptions,
) {
    let name = &machine.name;
    if options.comments {
        let _ = writeln!(out, "/* state: {path} */");
    }
    let _ = writeln!(
        out,
        "{} {}({name} * const me, {} const * const e) {{",
        lang.qstate,
        handler(name, path),
        lang.qevt
    );
    let _ = writeln!(out, "    {} status_;", lang.qstate);
    let _ = writeln!(out, "    switch (e->sig) {{");

    let _ = writeln!(out, "        case Q_ENTRY_SIG: {{");
    for action in &state.entry {
        let _ = writeln!(out, "            {};", action.trim_end_matches(';'));
    }
    let _ = writeln!(out, "            status_ = Q_HANDLED();");
    let _ = writeln!(out, "            break;");
    let _ = writeln!(out, "        }}");

    let _ = writeln!(out, "        case Q_EXIT_SIG: {{");
    for action in &state.exit {
        let _ = writeln!(out, "            {};", action.trim_end_matches(';'));
    }
    let _ = writeln!(out, "            status_ = Q_HANDLED();");
    let _ = writeln!(out, "            break;");
    let _ = writeln!(out, "        }}");

    if let Some(initial) = &state.initial {
        let _ = writeln!(out, "        case Q_INIT_SIG: {{");
        let _ = writeln!(
            out,
            "            status_ = Q_TRAN(&{});",
            handler(name, &initial.target)
        );
        let _ = writeln!(out, "            break;");
        let _ = writeln!(out, "        }}");
    }

    // One case arm per event; guard variants share the arm.
    let mut emitted: Vec<&str> = Vec::new();
    for transition in &state.transitions {
        if emitted.contains(&transition.event.as_str()) {
            continue;
        }
        emitted.push(&transition.event);
        let group: Vec<&Transition> = state
            .transitions
            .iter()
            .filter(|t| t.event == transition.event)
            .collect();
        gen_event_arm(out, name, &transition.event, &group);
    }

    let parent = match path.rsplit_once('.') {
        Some((prefix, _)) => format!("&{}", handler(name, prefix)),
        None => lang.top.to_string(),
    };
    let _ = writeln!(out, "        default: {{");
    let _ = writeln!(out, "            status_ = Q_SUPER({parent});");
    let _ = writeln!(out, "            break;");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "    return status_;");
    let _ = writeln!(out, "}}");
}

fn gen_event_arm(out: &mut String, machine: &str, event: &str, group: &[&Transition]) {
    let _ = writeln!(out, "        case {}: {{", signal(event));
    // Guarded transitions form the if/else-if chain in declaration order;
    // the unguarded one, wherever declared, is the trailing else.
    let guarded: Vec<&&Transition> = group.iter().filter(|t| t.guard.is_some()).collect();
    let fallback = group.iter().find(|t| t.guard.is_none());
    if guarded.is_empty() {
        gen_effect(out, machine, group[0], "            ");
    } else {
        for (index, transition) in guarded.iter().enumerate() {
            let keyword = if index == 0 { "if" } else { "else if" };
            let guard = transition.guard.as_deref().unwrap_or_default();
            let _ = writeln!(out, "            {keyword} ({guard}) {{");
            gen_effect(out, machine, transition, "                ");
            let _ = writeln!(out, "            }}");
        }
        let _ = writeln!(out, "            else {{");
        match fallback {
            Some(transition) => gen_effect(out, machine, transition, "                "),
            None => {
                let _ = writeln!(out, "                status_ = Q_UNHANDLED();");
            }
        }
        let _ = writeln!(out, "            }}");
    }
    let _ = writeln!(out, "            break;");
    let _ = writeln!(out, "        }}");
}

fn gen_effect(out: &mut String, machine: &str, transition: &Transition, indent: &str) {
    if let Some(action) = &transition.action {
        let _ = writeln!(out, "{indent}{};", action.trim_end_matches(';'));
    }
    if transition.internal {
        let _ = writeln!(out, "{indent}status_ = Q_HANDLED();");
    } else {
        let _ = writeln!(
            out,
            "{indent}status_ = Q_TRAN(&{});",
            handler(machine, &transition.target)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{DataMember, EventDecl, StateMachine};
    use crate::resolve::resolve;
    use crate::validate::{has_errors, validate};

    fn blinky() -> StateMachine {
        let mut machine = StateMachine::new("Blinky");
        let mut off = State::new("Off");
        off.entry.push("BSP_ledOff()".to_string());
        off.transitions.push(Transition::new("TIMEOUT", "On"));
        let mut on = State::new("On");
        on.entry.push("BSP_ledOn()".to_string());
        on.transitions.push(Transition::new("TIMEOUT", "Off"));
        machine.states.push(off);
        machine.states.push(on);
        machine.initial = Some("Off".to_string());
        machine.events.push(EventDecl {
            name: "TIMEOUT".to_string(),
            signal: None,
            doc: Some("periodic blink tick".to_string()),
        });
        machine.data.push(DataMember {
            name: "timer".to_string(),
            ty: "QTimeEvt".to_string(),
            doc: None,
        });
        resolve(&mut machine);
        machine
    }

    #[test]
    fn blinky_end_to_end() {
        let machine = blinky();
        assert!(!has_errors(&validate(&machine)));
        let code = generate(&machine, &GenOptions::default());
        // Exactly two state handlers besides the initial pseudostate.
        assert_eq!(code.source.matches("switch (e->sig)").count(), 2);
        for arm in ["case Q_ENTRY_SIG:", "case Q_EXIT_SIG:", "case TIMEOUT_SIG:"] {
            assert_eq!(code.source.matches(arm).count(), 2, "{arm}");
        }
        assert!(code.source.contains("QState Blinky_Off"));
        assert!(code.source.contains("QState Blinky_On"));
        let off = &code.source[code.source.find("QState Blinky_Off").unwrap()
            ..code.source.find("QState Blinky_On").unwrap()];
        assert!(off.contains("Q_TRAN(&Blinky_On)"));
        assert!(off.contains("Q_SUPER(&QHsm_top)"));
        assert!(code.header.contains("TIMEOUT_SIG = Q_USER_SIG"));
        assert!(code.header.contains("QActive super;"));
        assert!(code.header.contains("QTimeEvt timer;"));
        assert!(code.source.contains("return Q_TRAN(&Blinky_Off);"));
    }

    #[test]
    fn generation_is_deterministic() {
        let machine = blinky();
        let options = GenOptions::default();
        assert_eq!(generate(&machine, &options), generate(&machine, &options));
    }

    #[test]
    fn composite_emits_init_and_delegation() {
        let mut machine = blinky();
        let on = machine.states.iter_mut().find(|s| s.name == "On").unwrap();
        on.children.push(State::new("Dim"));
        on.children.push(State::new("Bright"));
        resolve(&mut machine);
        let code = generate(&machine, &GenOptions::default());
        assert!(code.source.contains("case Q_INIT_SIG:"));
        assert!(code.source.contains("Q_TRAN(&Blinky_On_Dim)"));
        let dim = &code.source[code.source.find("QState Blinky_On_Dim").unwrap()..];
        assert!(dim.contains("Q_SUPER(&Blinky_On)"));
    }

    #[test]
    fn guards_and_internal_transitions() {
        let mut machine = blinky();
        let mut guarded = Transition::new("BUTTON", "On");
        guarded.guard = Some("me->armed != 0".to_string());
        guarded.action = Some("BSP_beep()".to_string());
        machine.states[0].transitions.push(guarded);
        let mut internal = Transition::new("POLL", "Off");
        internal.internal = true;
        internal.action = Some("BSP_sample()".to_string());
        machine.states[0].transitions.push(internal);
        resolve(&mut machine);
        let code = generate(&machine, &GenOptions::default());
        assert!(code.source.contains("if (me->armed != 0) {"));
        assert!(code.source.contains("BSP_beep();"));
        assert!(code.source.contains("status_ = Q_UNHANDLED();"));
        let poll = &code.source[code.source.find("case POLL_SIG:").unwrap()..];
        let arm = &poll[..poll.find("break;").unwrap()];
        assert!(arm.contains("BSP_sample();"));
        assert!(arm.contains("Q_HANDLED()"));
        assert!(!arm.contains("Q_TRAN"));
    }

    // An unguarded transition declared before a guarded one on the same
    // event must still come out as the trailing else of the arm.
    #[test]
    fn unguarded_branch_trails_guarded_ones() {
        let mut machine = blinky();
        machine.states[0]
            .transitions
            .push(Transition::new("BUTTON", "On"));
        let mut guarded = Transition::new("BUTTON", "Off");
        guarded.guard = Some("me->armed != 0".to_string());
        machine.states[0].transitions.push(guarded);
        resolve(&mut machine);
        assert!(!has_errors(&validate(&machine)));
        let code = generate(&machine, &GenOptions::default());
        let arm = &code.source[code.source.find("case BUTTON_SIG:").unwrap()..];
        let arm = &arm[..arm.find("break;").unwrap()];
        let guard_at = arm.find("if (me->armed != 0) {").unwrap();
        let else_at = arm.find("else {").unwrap();
        assert!(guard_at < else_at, "{arm}");
        assert!(arm[else_at..].contains("Q_TRAN(&Blinky_On)"));
        assert!(!arm.contains("Q_UNHANDLED"), "{arm}");
    }

    #[test]
    fn cpp_flavor() {
        let machine = blinky();
        let options = GenOptions {
            lang: TargetLang::Cpp,
            comments: false,
        };
        let code = generate(&machine, &options);
        assert!(code.header.contains("#include \"qpcpp.hpp\""));
        assert!(code.header.contains("QP::QActive super;"));
        assert!(code.source.contains("Q_SUPER(&QP::QHsm::top)"));
        assert!(!code.source.contains("/* state:"));
    }

    #[test]
    fn comments_flag() {
        let machine = blinky();
        let with = generate(
            &machine,
            &GenOptions {
                lang: TargetLang::C,
                comments: true,
            },
        );
        assert!(with.source.contains("/* state: Off */"));
        assert!(with.header.contains("/* periodic blink tick */"));
    }

    // The generator does not re-validate: an unresolved target is emitted
    // verbatim and the output is broken C. Garbage in, garbage out.
    #[test]
    fn unresolved_model_produces_broken_output() {
        let mut machine = blinky();
        machine.states[0]
            .transitions
            .push(Transition::new("GO", "Nowhere"));
        let code = generate(&machine, &GenOptions::default());
        assert!(code.source.contains("Q_TRAN(&Blinky_Nowhere)"));
        assert!(!code.header.contains("Blinky_Nowhere("));
    }
}
