// src/exec/registry.rs

//! Keep-alive terminals shared across the script lines of one target.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::terminal::Terminal;
use crate::types::TargetId;

/// At most one live terminal per target id.
#[derive(Debug, Default)]
pub struct TaskRunnerRegistry {
    runners: Mutex<HashMap<TargetId, Arc<Mutex<Terminal>>>>,
}

impl TaskRunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live terminal for `id`, spawning a new one if there is
    /// none or the previous one has exited.
    pub async fn get_runner_for_task(
        &self,
        id: &str,
        shell: &str,
        cwd: &Path,
        idle_timeout: Option<Duration>,
    ) -> Result<Arc<Mutex<Terminal>>> {
        let mut runners = self.runners.lock().await;
        if let Some(existing) = runners.get(id) {
            if terminal_is_active(existing) {
                return Ok(existing.clone());
            }
            debug!(target_id = %id, "previous terminal is gone; replacing it");
        }

        let terminal = Terminal::spawn(shell, cwd, idle_timeout).await?;
        info!(target_id = %id, pid = ?terminal.pid(), "started keep-alive terminal");
        let terminal = Arc::new(Mutex::new(terminal));
        runners.insert(id.to_string(), terminal.clone());
        Ok(terminal)
    }

    pub async fn task_runner_is_active(&self, id: &str) -> bool {
        let runners = self.runners.lock().await;
        runners.get(id).is_some_and(terminal_is_active)
    }

    /// Stop every terminal; returns how many were registered.
    pub async fn stop_all_task_runner(&self) -> usize {
        let drained: Vec<(TargetId, Arc<Mutex<Terminal>>)> =
            self.runners.lock().await.drain().collect();
        let count = drained.len();
        for (id, terminal) in drained {
            debug!(target_id = %id, "stopping keep-alive terminal");
            terminal.lock().await.stop().await;
        }
        count
    }
}

/// A terminal currently locked by a running command counts as active.
fn terminal_is_active(terminal: &Arc<Mutex<Terminal>>) -> bool {
    match terminal.try_lock() {
        Ok(mut guard) => guard.is_active(),
        Err(_) => true,
    }
}
