//! # arbor-core
//!
//! Core types for the Arbor recursive agent orchestration engine.
//!
//! An Arbor run starts from a single natural-language vision handed to a root
//! agent. Agents move forward through a fixed set of phases and may summon
//! specialized children, which run one at a time under a carved-out share of
//! their parent's budget.
//!
//! ## Core Paradigm
//!
//! - Nodes live in an arena keyed by [`AgentId`]; relations are ids, never pointers
//! - Phases only move forward: EXPLORE, PLAN, FOUND, SUMMON, COMPLETE
//! - Money is fixed-point ([`Usd`]), never floating point
//! - A node's status never reopens once terminal

pub mod config;
mod error;
pub mod fail_open;
mod money;
mod tree;
mod types;

pub use error::{ArborError, Result};
pub use money::Usd;
pub use tree::{AgentTree, SortKey, SpawnRequest, StatusFilter, StatusQuery, TreeStatus};
pub use types::*;
