//! Shared variable stores used by the executor and the preprocessor.
//!
//! - [`placeholders`] holds the `${name}` substitution map.
//! - [`data_maps`] holds named JSON documents for `#@foreach` and friends.
//!
//! Both are process-wide and not scoped to a target.

pub mod data_maps;
pub mod placeholders;

use std::collections::BTreeMap;

pub use data_maps::DataMapStore;
pub use placeholders::PlaceholderStore;

/// Per-invocation scope variables. Each target invocation owns its copy.
pub type ScopeVars = BTreeMap<String, String>;
