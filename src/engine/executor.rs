// src/engine/executor.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::model::{ConfigFile, ConfigSection, TargetDefinition};
use crate::errors::{Result, TargetflowError};
use crate::exec::{CommandBackend, ShellBackend, TaskRunnerRegistry, Terminal};
use crate::output::Output;
use crate::preprocess::{CollectOnly, Preprocessor};
use crate::requirements::check_requirements;
use crate::types::{TargetExit, TargetId};
use crate::vars::{DataMapStore, PlaceholderStore, ScopeVars};

use super::catalog::TargetCatalog;
use super::lines::LineRunner;
use super::watchman::Watchman;

/// Engine-wide execution settings (from `[config]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub allow_multi_run: bool,
    pub shell: String,
    pub shell_args: Vec<String>,
}

impl From<&ConfigSection> for ExecutorSettings {
    fn from(cfg: &ConfigSection) -> Self {
        Self {
            allow_multi_run: cfg.allow_multi_run,
            shell: cfg.shell.clone(),
            shell_args: cfg.shell_args.clone(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&ConfigSection::default())
    }
}

/// What an invocation hands down to the targets it starts.
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    pub scope: ScopeVars,
    pub cwd: PathBuf,
    /// Targets on the current call chain, outermost first.
    pub ancestors: Vec<TargetId>,
}

impl Invocation {
    fn child(&self, id: &str, scope: ScopeVars, cwd: PathBuf) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(id.to_string());
        Self {
            scope,
            cwd,
            ancestors,
        }
    }
}

/// How an invocation passes the run tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// Refused while running, unless multi-run is allowed.
    Exclusive,
    /// Refused once the target has started at all. Used for needs.
    Once,
}

/// Builder for [`TargetExecutor`]; every collaborator has a default.
pub struct ExecutorBuilder {
    catalog: TargetCatalog,
    settings: ExecutorSettings,
    placeholders: Option<Arc<PlaceholderStore>>,
    data: Option<Arc<DataMapStore>>,
    output: Output,
    backend: Option<Arc<dyn CommandBackend>>,
    watchman: Option<Arc<Watchman>>,
    base_dir: Option<PathBuf>,
}

impl ExecutorBuilder {
    pub fn settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn allow_multi_run(mut self, allow: bool) -> Self {
        self.settings.allow_multi_run = allow;
        self
    }

    pub fn placeholders(mut self, store: Arc<PlaceholderStore>) -> Self {
        self.placeholders = Some(store);
        self
    }

    pub fn data_maps(mut self, store: Arc<DataMapStore>) -> Self {
        self.data = Some(store);
        self
    }

    pub fn output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CommandBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn watchman(mut self, watchman: Arc<Watchman>) -> Self {
        self.watchman = Some(watchman);
        self
    }

    /// Directory relative `working_dir` values resolve against.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> TargetExecutor {
        let base_dir = self
            .base_dir
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        TargetExecutor {
            core: Arc::new(ExecutorCore {
                catalog: self.catalog,
                settings: self.settings,
                placeholders: self.placeholders.unwrap_or_default(),
                data: self.data.unwrap_or_default(),
                output: self.output,
                backend: self.backend.unwrap_or_else(|| Arc::new(ShellBackend)),
                watchman: self.watchman.unwrap_or_default(),
                runners: TaskRunnerRegistry::new(),
                base_dir,
            }),
        }
    }
}

struct ExecutorCore {
    catalog: TargetCatalog,
    settings: ExecutorSettings,
    placeholders: Arc<PlaceholderStore>,
    data: Arc<DataMapStore>,
    output: Output,
    backend: Arc<dyn CommandBackend>,
    watchman: Arc<Watchman>,
    runners: TaskRunnerRegistry,
    base_dir: PathBuf,
}

/// Top-level orchestrator: resolves and runs targets.
///
/// Cheap to clone; clones share the catalog, the stores, the run tracker and
/// the keep-alive terminals.
#[derive(Clone)]
pub struct TargetExecutor {
    core: Arc<ExecutorCore>,
}

impl fmt::Debug for TargetExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetExecutor")
            .field("targets", &self.core.catalog.len())
            .field("settings", &self.core.settings)
            .field("base_dir", &self.core.base_dir)
            .finish_non_exhaustive()
    }
}

impl TargetExecutor {
    pub fn builder(catalog: TargetCatalog) -> ExecutorBuilder {
        ExecutorBuilder {
            catalog,
            settings: ExecutorSettings::default(),
            placeholders: None,
            data: None,
            output: Output::new(),
            backend: None,
            watchman: None,
            base_dir: None,
        }
    }

    /// Builder seeded from a validated config: catalog, settings, and stores
    /// filled from `[variables]` and `[data.<name>]`.
    pub fn from_config(cfg: &ConfigFile) -> Result<ExecutorBuilder> {
        let placeholders = PlaceholderStore::with_values(cfg.variables.clone());
        let data = DataMapStore::new();
        for (name, value) in cfg.data.iter() {
            let json = serde_json::to_value(value)?;
            data.insert(name.clone(), json);
        }
        Ok(Self::builder(TargetCatalog::from_config(cfg))
            .settings(ExecutorSettings::from(&cfg.config))
            .placeholders(Arc::new(placeholders))
            .data_maps(Arc::new(data)))
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.core.settings
    }

    pub fn placeholders(&self) -> &Arc<PlaceholderStore> {
        &self.core.placeholders
    }

    pub fn data_maps(&self) -> &Arc<DataMapStore> {
        &self.core.data
    }

    pub fn output(&self) -> &Output {
        &self.core.output
    }

    pub fn watchman(&self) -> &Arc<Watchman> {
        &self.core.watchman
    }

    pub fn catalog(&self) -> &TargetCatalog {
        &self.core.catalog
    }

    pub(crate) fn backend(&self) -> &Arc<dyn CommandBackend> {
        &self.core.backend
    }

    pub(crate) fn runners(&self) -> &TaskRunnerRegistry {
        &self.core.runners
    }

    /// Run `id` with a fresh scope.
    pub async fn run_target(&self, id: &str, run_async: bool) -> TargetExit {
        self.run_target_with_scope(id, ScopeVars::new(), run_async)
            .await
    }

    /// Run `id` with `scope` as its initial scope variables.
    ///
    /// With `run_async`, needs that have not run yet start concurrently;
    /// otherwise one after another in declaration order.
    pub async fn run_target_with_scope(
        &self,
        id: &str,
        scope: ScopeVars,
        run_async: bool,
    ) -> TargetExit {
        let inv = Invocation {
            scope,
            cwd: self.core.base_dir.clone(),
            ancestors: Vec::new(),
        };
        self.invoke(id.to_string(), inv, run_async).await
    }

    /// All blocks declared for `id`.
    pub fn get_task(&self, id: &str) -> Option<Vec<TargetDefinition>> {
        let blocks = self.core.catalog.blocks_of(id);
        if blocks.is_empty() {
            return None;
        }
        Some(blocks.iter().map(|b| b.as_ref().clone()).collect())
    }

    /// Literal lines `id` would run, without running anything.
    ///
    /// Directives that only touch the stores (`#@set`, `#@import-json`, ...)
    /// are applied; command captures yield no output.
    pub async fn expand_target(&self, id: &str) -> Result<Vec<String>> {
        let blocks = self.core.catalog.blocks_of(id);
        if blocks.is_empty() {
            return Err(TargetflowError::TargetNotFound(id.to_string()));
        }
        let top = Invocation {
            scope: ScopeVars::new(),
            cwd: self.core.base_dir.clone(),
            ancestors: Vec::new(),
        };

        let mut lines = Vec::new();
        for block in blocks.iter() {
            let (scope, cwd) = self.block_context(block, &top);
            let check = check_requirements(&block.requires, &self.core.placeholders, &scope, &cwd);
            if !check.passed {
                debug!(target_id = %id, reason = %check.reason, "dry-run: block skipped");
                continue;
            }
            let preprocessor = Preprocessor::new(
                id,
                &self.core.placeholders,
                &self.core.data,
                &self.core.output,
                &scope,
                &cwd,
            );
            let expansion = preprocessor.expand(block.script.clone(), &CollectOnly).await;
            lines.extend(expansion.lines);
        }
        Ok(lines)
    }

    /// The keep-alive terminal of `id`, started on demand with the options
    /// of its first `keep_alive` block (or its first block).
    pub async fn get_runner_for_task(&self, id: &str) -> Result<Arc<Mutex<Terminal>>> {
        let blocks = self.core.catalog.blocks_of(id);
        let block = blocks
            .iter()
            .find(|b| b.options.keep_alive)
            .or_else(|| blocks.first())
            .ok_or_else(|| TargetflowError::TargetNotFound(id.to_string()))?;

        let top = Invocation {
            scope: ScopeVars::new(),
            cwd: self.core.base_dir.clone(),
            ancestors: Vec::new(),
        };
        let (_, cwd) = self.block_context(block, &top);
        let program = block
            .options
            .main_cmd
            .clone()
            .unwrap_or_else(|| self.core.settings.shell.clone());
        self.core
            .runners
            .get_runner_for_task(id, &program, &cwd, block.options.idle_timeout())
            .await
    }

    pub async fn task_runner_is_active(&self, id: &str) -> bool {
        self.core.runners.task_runner_is_active(id).await
    }

    /// Stop every keep-alive terminal; returns how many there were.
    pub async fn stop_all_task_runner(&self) -> usize {
        let count = self.core.runners.stop_all_task_runner().await;
        if count > 0 {
            info!(count, "stopped keep-alive task runners");
        }
        count
    }

    pub(crate) fn invoke(
        &self,
        id: TargetId,
        inv: Invocation,
        run_async: bool,
    ) -> BoxFuture<'static, TargetExit> {
        self.invoke_gated(id, inv, run_async, Gate::Exclusive)
    }

    fn invoke_gated(
        &self,
        id: TargetId,
        inv: Invocation,
        run_async: bool,
        gate: Gate,
    ) -> BoxFuture<'static, TargetExit> {
        let this = self.clone();
        Box::pin(async move { this.invoke_target(&id, &inv, run_async, gate).await })
    }

    async fn invoke_target(
        &self,
        id: &str,
        inv: &Invocation,
        run_async: bool,
        gate: Gate,
    ) -> TargetExit {
        let output = &self.core.output;
        let blocks = self.core.catalog.blocks_of(id);
        if blocks.is_empty() {
            warn!(target_id = %id, "no such target");
            output.error(id, format!("no target named '{id}'"), None);
            return TargetExit::ByNoTargetExists;
        }

        let watchman = &self.core.watchman;
        let guard = match gate {
            Gate::Exclusive => watchman.try_begin(id, self.core.settings.allow_multi_run),
            Gate::Once => watchman.try_begin_once(id),
        };
        let Some(guard) = guard else {
            if gate == Gate::Once {
                debug!(target_id = %id, "need already started elsewhere");
                return TargetExit::AlreadyRunning;
            }
            info!(target_id = %id, "target already running; skipped");
            output.info(id, "already running");
            return TargetExit::AlreadyRunning;
        };

        info!(target_id = %id, blocks = blocks.len(), run_async, "running target");
        let mut last = None;
        for (index, block) in blocks.iter().enumerate() {
            let exit = self.run_block(id, block, inv, run_async).await;
            debug!(target_id = %id, block = index, %exit, "block finished");
            if exit != TargetExit::ByRequirement {
                last = Some(exit);
            }
        }
        drop(guard);

        let exit = last.unwrap_or(TargetExit::ByNothingToDo);
        if exit == TargetExit::ByNothingToDo {
            output.info(id, "nothing to do: every block was skipped");
        }
        info!(target_id = %id, %exit, "target finished");
        exit
    }

    /// Scope and working directory of `block` when started from `inv`.
    fn block_context(&self, block: &TargetDefinition, inv: &Invocation) -> (ScopeVars, PathBuf) {
        let placeholders = &self.core.placeholders;
        let mut scope = inv.scope.clone();
        for (key, value) in block.variables.iter() {
            let value = placeholders.resolve_in_string(value, &scope);
            scope.insert(key.clone(), value);
        }
        let cwd = match block.options.working_dir.as_deref() {
            Some(dir) => inv.cwd.join(placeholders.resolve_in_string(dir, &scope)),
            None => inv.cwd.clone(),
        };
        (scope, cwd)
    }

    async fn run_block(
        &self,
        id: &str,
        block: &Arc<TargetDefinition>,
        inv: &Invocation,
        run_async: bool,
    ) -> TargetExit {
        let output = &self.core.output;
        let (scope, cwd) = self.block_context(block, inv);

        let check = check_requirements(&block.requires, &self.core.placeholders, &scope, &cwd);
        if !check.passed {
            info!(target_id = %id, reason = %check.reason, "block skipped by requirement");
            output.info(id, format!("skipped: {}", check.reason));
            return TargetExit::ByRequirement;
        }

        if !cwd.is_dir() {
            error!(target_id = %id, cwd = %cwd.display(), "working directory does not exist");
            output.error(
                id,
                "working directory does not exist",
                Some(cwd.display().to_string()),
            );
            return TargetExit::CmdError;
        }

        let child = inv.child(id, scope.clone(), cwd.clone());

        self.resolve_needs(id, &block.needs, &child, run_async).await;

        let companions = self.spawn_group(&block.run_targets, &child, run_async, Gate::Exclusive);
        let exit = self.run_script(id, block, &scope, &cwd, &child).await;
        join_group(id, "run_targets", companions).await;

        if exit == TargetExit::CmdError {
            if !block.next.is_empty() {
                info!(target_id = %id, "block failed; not starting next targets");
            }
            return exit;
        }
        let followers = self.spawn_group(&block.next, &child, run_async, Gate::Exclusive);
        join_group(id, "next", followers).await;
        exit
    }

    async fn run_script(
        &self,
        id: &str,
        block: &TargetDefinition,
        scope: &ScopeVars,
        cwd: &Path,
        child: &Invocation,
    ) -> TargetExit {
        let now_listeners: Vec<_> = block.listener.iter().filter(|l| l.trigger.now).collect();
        if block.script.is_empty() && now_listeners.is_empty() {
            debug!(target_id = %id, "block has no script");
            return TargetExit::NoCode;
        }

        let runner = LineRunner {
            executor: self,
            target: id,
            block,
            scope,
            cwd,
            child,
            use_terminal: true,
            scan_listeners: true,
        };

        for listener in now_listeners.iter() {
            self.core.output.info(id, "listener matched: now");
            if runner.fire(listener).await {
                return TargetExit::ByStopReason;
            }
        }
        if block.script.is_empty() {
            return TargetExit::Ok;
        }

        let preprocessor = Preprocessor::new(
            id,
            &self.core.placeholders,
            &self.core.data,
            &self.core.output,
            scope,
            cwd,
        );
        let expansion = preprocessor.expand(block.script.clone(), &runner).await;
        debug!(
            target_id = %id,
            lines = expansion.lines.len(),
            aborted = expansion.aborted,
            "script done"
        );
        match expansion.last_code {
            TargetExit::NoCode if !now_listeners.is_empty() => TargetExit::Ok,
            code => code,
        }
    }

    /// Run every need at most once across the whole executor. A need that
    /// another invocation started first is waited for until it is idle.
    async fn resolve_needs(&self, id: &str, needs: &[TargetId], child: &Invocation, run_async: bool) {
        let mut unique: Vec<TargetId> = Vec::new();
        for need in needs.iter() {
            if !unique.contains(need) {
                unique.push(need.clone());
            }
        }

        if run_async {
            let handles = self.spawn_group(&unique, child, true, Gate::Once);
            let exits = join_group(id, "needs", handles).await;
            for (need, exit) in unique.iter().zip(exits) {
                debug!(target_id = %id, need = %need, %exit, "need resolved");
                if exit == TargetExit::AlreadyRunning {
                    self.await_need(id, need, child).await;
                }
            }
            return;
        }

        // The gate is taken at invocation time, so a need started by an
        // earlier need is not run again.
        for need in unique.iter() {
            let exit = self
                .invoke_gated(need.clone(), child.clone(), false, Gate::Once)
                .await;
            debug!(target_id = %id, need = %need, %exit, "need resolved");
            if exit == TargetExit::AlreadyRunning {
                self.await_need(id, need, child).await;
            }
        }
    }

    async fn await_need(&self, id: &str, need: &str, child: &Invocation) {
        // Waiting on a target further up our own call chain would never end.
        if child.ancestors.iter().any(|a| a == need) {
            debug!(target_id = %id, need, "need is on the call chain; not waiting");
            return;
        }
        if self.core.watchman.is_running(need) {
            debug!(target_id = %id, need, "waiting for running need");
            self.core.watchman.wait_idle(need).await;
        }
    }

    fn spawn_group(
        &self,
        ids: &[TargetId],
        child: &Invocation,
        run_async: bool,
        gate: Gate,
    ) -> Vec<(TargetId, JoinHandle<TargetExit>)> {
        ids.iter()
            .map(|other| {
                let fut = self.invoke_gated(other.clone(), child.clone(), run_async, gate);
                (other.clone(), tokio::spawn(fut))
            })
            .collect()
    }
}

/// Await a group of spawned targets. A panicked target counts as
/// `CmdError` and does not affect its siblings.
async fn join_group(
    id: &str,
    kind: &'static str,
    handles: Vec<(TargetId, JoinHandle<TargetExit>)>,
) -> Vec<TargetExit> {
    if handles.is_empty() {
        return Vec::new();
    }
    let (ids, futures): (Vec<TargetId>, Vec<JoinHandle<TargetExit>>) = handles.into_iter().unzip();
    join_all(futures)
        .await
        .into_iter()
        .zip(ids)
        .map(|(result, other)| match result {
            Ok(exit) => {
                debug!(target_id = %id, kind, other = %other, %exit, "spawned target done");
                exit
            }
            Err(e) => {
                error!(target_id = %id, kind, other = %other, error = %e, "spawned target failed");
                TargetExit::CmdError
            }
        })
        .collect()
}
