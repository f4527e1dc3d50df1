// src/config/mod.rs

//! Configuration loading and validation for targetflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate references, option values and the `needs` graph (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    Action, ConfigFile, ConfigSection, Listener, RawConfigFile, Requirement, TargetDefinition,
    TaskOptions, Trigger,
};
