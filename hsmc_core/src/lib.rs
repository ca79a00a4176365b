//! Semantic core of the `hsmc` state-diagram compiler: the hierarchical
//! state-machine model, scope resolution, static validation, and QP-style
//! code generation.
//!
//! The front end (the `hsmc_uml` crate) builds a [`StateMachine`] from
//! annotated diagram text; this crate turns it into diagnostics and
//! generated code.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod codegen;
pub mod machine;
pub mod resolve;
pub mod validate;

pub use machine::{DataMember, EventDecl, MachineKind, State, StateMachine, Transition};
pub use validate::{Diagnostic, Severity};
