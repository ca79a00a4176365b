//! `hsmc` compiles annotated, text-based hierarchical state diagrams into
//! two artifacts:
//!
//! - a renderer-safe diagram plus a metadata side channel, for previewing
//!   with a standard state-diagram renderer;
//! - generated C or C++ scaffolding implementing the diagram as a
//!   run-to-completion hierarchical state machine in the QP style, with
//!   entry/exit actions, guarded transitions and superstate delegation.
//!
//! The pipeline is preprocessing, structural parsing, hierarchical scope
//! resolution, static validation, and code generation; see the
//! `hsmc_uml` and `hsmc_core` crates for the stages themselves.

pub mod cli;

pub use hsmc_uml;
pub use hsmc_uml::hsmc_core;
