use anyhow::Result;
use hsmc_core::machine::MachineKind;
use hsmc_core::validate::{has_errors, validate};
use hsmc_uml::{preprocess, MetaFormat, Parser};
use std::fs;

#[test]
fn heater_parses_and_resolves() -> Result<()> {
    let source = fs::read_to_string("./tests/assets/heater.uml")?;
    let parser = Parser::parse_full(&source)?;
    assert_eq!(parser.meta_format, MetaFormat::LineScanned);
    let mut machine = parser.into_machine();
    assert_eq!(machine.name, "Heater");
    assert_eq!(machine.kind, MachineKind::Active);
    assert_eq!(machine.priority, Some(2));
    assert_eq!(machine.stack_size, Some(256));
    assert_eq!(machine.events.len(), 2);
    assert_eq!(machine.data.len(), 2);

    hsmc_core::resolve::resolve(&mut machine);
    let warmup = machine.find_path("Heating.Warmup").unwrap();
    assert_eq!(warmup.transitions[0].target, "Heating.Hold");
    assert_eq!(warmup.transitions[0].guard.as_deref(), Some("at_setpoint()"));
    let hold = machine.find_path("Heating.Hold").unwrap();
    assert!(hold.transitions[0].internal);

    let diagnostics = validate(&machine);
    assert!(!has_errors(&diagnostics), "{diagnostics:?}");
    Ok(())
}

#[test]
fn heater_preprocesses_cleanly() -> Result<()> {
    let source = fs::read_to_string("./tests/assets/heater.uml")?;
    let (diagram, meta) = preprocess(&source);
    assert!(!diagram.contains("@meta"));
    assert!(!diagram.contains("regulate()"));
    assert!(diagram.contains("Warmup --> Hold : TIMEOUT ..."));
    assert_eq!(meta.entry_actions["Heating"], vec!["heater_on();"]);
    assert_eq!(
        meta.internal_transitions["Heating.Hold"],
        vec!["TIMEOUT / regulate()"]
    );
    Ok(())
}
