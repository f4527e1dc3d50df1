// src/engine/mod.rs

//! Target orchestration.
//!
//! This module ties together:
//! - the target catalog (blocks by id, in declaration order)
//! - the run tracker that gates concurrent invocations of one target
//! - the executor that resolves `needs` / `run_targets` / `next` and feeds
//!   script lines through the preprocessor
//! - the line runner that executes one literal line and reacts to its
//!   output
//!
//! Scope variables are owned per invocation: every target started from a
//! block gets its own copy of the block's scope.

pub mod catalog;
pub mod executor;
mod lines;
pub mod watchman;

pub use catalog::TargetCatalog;
pub use executor::{ExecutorBuilder, ExecutorSettings, TargetExecutor};
pub use watchman::{RunGuard, RunRecord, Watchman};

/// Per-invocation scope variables.
pub use crate::vars::ScopeVars as Scope;
