// src/engine/catalog.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::model::{ConfigFile, TargetDefinition};
use crate::types::TargetId;

/// Target blocks keyed by id, in declaration order.
///
/// Several `[[task]]` blocks may share one id; all of them belong to the
/// same target and are evaluated in the order they were declared. Blocks are
/// shared (`Arc`) so that concurrent invocations never copy scripts.
#[derive(Debug, Clone, Default)]
pub struct TargetCatalog {
    blocks: HashMap<TargetId, Vec<Arc<TargetDefinition>>>,
    /// Ids in order of first declaration.
    order: Vec<TargetId>,
}

impl TargetCatalog {
    /// Build a catalog from a validated [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::from_definitions(cfg.task.iter().cloned())
    }

    pub fn from_definitions<I>(definitions: I) -> Self
    where
        I: IntoIterator<Item = TargetDefinition>,
    {
        let mut catalog = Self::default();
        for def in definitions {
            if !catalog.blocks.contains_key(&def.id) {
                catalog.order.push(def.id.clone());
            }
            catalog
                .blocks
                .entry(def.id.clone())
                .or_default()
                .push(Arc::new(def));
        }
        catalog
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blocks.contains_key(id)
    }

    /// All blocks declared for `id`; empty if the target does not exist.
    pub fn blocks_of(&self, id: &str) -> Vec<Arc<TargetDefinition>> {
        self.blocks.get(id).cloned().unwrap_or_default()
    }

    /// Target ids in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Union of `needs` over every block of `id`, first occurrence wins.
    pub fn needs_of(&self, id: &str) -> Vec<TargetId> {
        let mut acc: Vec<TargetId> = Vec::new();
        for block in self.blocks.get(id).into_iter().flatten() {
            for need in block.needs.iter() {
                if !acc.contains(need) {
                    acc.push(need.clone());
                }
            }
        }
        acc
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(id: &str, needs: &[&str]) -> TargetDefinition {
        TargetDefinition {
            id: id.to_string(),
            needs: needs.iter().map(|s| s.to_string()).collect(),
            ..TargetDefinition::default()
        }
    }

    #[test]
    fn blocks_sharing_an_id_stay_in_declaration_order() {
        let catalog = TargetCatalog::from_definitions([
            def("build", &["fmt"]),
            def("fmt", &[]),
            def("build", &["lint", "fmt"]),
        ]);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["build", "fmt"]);

        let blocks = catalog.blocks_of("build");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].needs, vec!["lint".to_string(), "fmt".to_string()]);
        assert_eq!(
            catalog.needs_of("build"),
            vec!["fmt".to_string(), "lint".to_string()]
        );
    }

    #[test]
    fn unknown_id_has_no_blocks() {
        let catalog = TargetCatalog::from_definitions([def("a", &[])]);
        assert!(!catalog.contains("b"));
        assert!(catalog.blocks_of("b").is_empty());
    }
}
