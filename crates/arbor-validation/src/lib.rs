//! # arbor-validation
//!
//! The completion gate: the check an Arbor agent must pass before it may
//! enter COMPLETE.
//!
//! This crate provides:
//! - [`CompletionGate`], the oracle trait the engine consults
//! - [`CommandGate`], which shells out to compile, lint, test and security
//!   commands and parses `file:line` locations from their output
//! - [`StaticGate`], a fixed answer for dry runs and `--no-gate`

mod command;
mod gate;

pub use command::CommandGate;
pub use gate::{CompletionGate, GateDecision, StaticGate, ValidationIssue};
