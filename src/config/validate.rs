// src/config/validate.rs

use std::collections::BTreeSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, TargetflowError};
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::TargetflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_options(cfg)?;
    validate_references(cfg)?;
    validate_needs_graph(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(TargetflowError::ConfigError(
            "config must contain at least one [[task]] block".to_string(),
        ));
    }
    if let Some(pos) = cfg.task.iter().position(|t| t.id.trim().is_empty()) {
        return Err(TargetflowError::ConfigError(format!(
            "[[task]] block #{} has an empty id",
            pos + 1
        )));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.shell.trim().is_empty() {
        return Err(TargetflowError::ConfigError(
            "[config].shell must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_options(cfg: &RawConfigFile) -> Result<()> {
    for task in cfg.task.iter() {
        if let Some(ref timeout) = task.options.idle_timeout {
            parse_duration(timeout).map_err(|e| {
                TargetflowError::ConfigError(format!(
                    "target '{}' has invalid idle_timeout '{}': {}",
                    task.id, timeout, e
                ))
            })?;
        }
        if task.options.main_params.is_some() && task.options.main_cmd.is_none() {
            return Err(TargetflowError::ConfigError(format!(
                "target '{}' sets main_params without main_cmd",
                task.id
            )));
        }
    }
    Ok(())
}

fn validate_references(cfg: &RawConfigFile) -> Result<()> {
    let known: BTreeSet<&str> = cfg.task.iter().map(|t| t.id.as_str()).collect();

    for task in cfg.task.iter() {
        let refs = [
            ("needs", &task.needs),
            ("next", &task.next),
            ("run_targets", &task.run_targets),
        ];
        for (field, ids) in refs {
            for id in ids.iter() {
                if !known.contains(id.as_str()) {
                    return Err(TargetflowError::ConfigError(format!(
                        "target '{}' has unknown target '{}' in `{}`",
                        task.id, id, field
                    )));
                }
            }
        }

        if task.needs.iter().any(|n| n == &task.id) {
            return Err(TargetflowError::ConfigError(format!(
                "target '{}' cannot need itself",
                task.id
            )));
        }

        for listener in task.listener.iter() {
            if let Some(ref target) = listener.action.target {
                if !known.contains(target.as_str()) {
                    return Err(TargetflowError::ConfigError(format!(
                        "target '{}' has a listener for unknown target '{}'",
                        task.id, target
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_needs_graph(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: need -> target. A needs cycle would make "run the need
    // first" meaningless.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for task in cfg.task.iter() {
        graph.add_node(task.id.as_str());
    }

    for task in cfg.task.iter() {
        for need in task.needs.iter() {
            graph.add_edge(need.as_str(), task.id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(TargetflowError::NeedsCycle(format!(
                "cycle detected in `needs` involving target '{}'",
                node
            )))
        }
    }
}
