//! Front end for the annotated state-diagram dialect compiled by `hsmc`.
//!
//! Two independent passes share the same input text:
//!
//! - [`preprocess`] rewrites it into renderer-safe diagram text plus a
//!   [`DiagramMeta`] side channel, for the preview path;
//! - [`Parser`] builds the [`hsmc_core::StateMachine`] model from the
//!   original annotated source, for resolution, validation and code
//!   generation.

mod parser;
mod preprocess;

use anyhow::Context;
use std::path::Path;

pub use hsmc_core;
use hsmc_core::StateMachine;
pub use parser::{MetaFormat, ParseError, Parser};
pub use preprocess::{preprocess, DiagramMeta, HistoryKind, HistoryState};

/// Reads a diagram file, parses it and resolves the model.
///
/// The machine name falls back to the file stem when the source declares
/// none. The returned model is resolved but not validated.
pub fn load(path: &Path) -> anyhow::Result<StateMachine> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read `{}`", path.display()))?;
    let mut machine = Parser::parse(&source)
        .with_context(|| format!("failed to parse `{}`", path.display()))?;
    if machine.name.is_empty() {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            machine.name = stem.to_string();
        }
    }
    hsmc_core::resolve::resolve(&mut machine);
    Ok(machine)
}
