use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{parse_duration, TargetId};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// allow_multi_run = false
///
/// [variables]
/// project = "demo"
///
/// [data.services]
/// items = ["api", "worker"]
///
/// [[task]]
/// id = "build"
/// needs = ["prepare"]
/// script = ["echo building ${project}"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Engine behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Initial placeholder values from `[variables]`.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Initial data maps from `[data.<name>]`.
    #[serde(default)]
    pub data: BTreeMap<String, toml::Value>,

    /// All target blocks from `[[task]]`, in declaration order.
    ///
    /// Several blocks may share one `id`.
    #[serde(default)]
    pub task: Vec<TargetDefinition>,
}

/// Validated configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)`, which runs
/// the checks in [`crate::config::validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub variables: BTreeMap<String, String>,
    pub data: BTreeMap<String, toml::Value>,
    pub task: Vec<TargetDefinition>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            variables: raw.variables,
            data: raw.data,
            task: raw.task,
        }
    }

    /// All blocks declared for `id`, in declaration order.
    pub fn blocks_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a TargetDefinition> + 'a {
        self.task.iter().filter(move |t| t.id == id)
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Whether a target may be started while it is already running.
    #[serde(default)]
    pub allow_multi_run: bool,

    /// Interpreter used for script lines when a block does not override it.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Arguments placed between the interpreter and the script line.
    #[serde(default = "default_shell_args")]
    pub shell_args: Vec<String>,
}

fn default_shell() -> String {
    if cfg!(windows) {
        "cmd".to_string()
    } else {
        "sh".to_string()
    }
}

fn default_shell_args() -> Vec<String> {
    if cfg!(windows) {
        vec!["/C".to_string()]
    } else {
        vec!["-c".to_string()]
    }
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            allow_multi_run: false,
            shell: default_shell(),
            shell_args: default_shell_args(),
        }
    }
}

/// One `[[task]]` block.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TargetDefinition {
    /// Target id; shared by all blocks of the same target.
    pub id: TargetId,

    /// Script lines, macro directives included.
    #[serde(default)]
    pub script: Vec<String>,

    /// Gate deciding whether this block runs at all.
    #[serde(default)]
    pub requires: Requirement,

    #[serde(default)]
    pub options: TaskOptions,

    /// Output listeners evaluated against every output line.
    #[serde(default)]
    pub listener: Vec<Listener>,

    /// Targets that must have run (at most once) before the script.
    #[serde(default)]
    pub needs: Vec<TargetId>,

    /// Targets started after the block and its `run_targets` are done.
    #[serde(default)]
    pub next: Vec<TargetId>,

    /// Targets started together with the script and awaited after it.
    #[serde(default)]
    pub run_targets: Vec<TargetId>,

    /// Output rules that halt the rest of the block.
    #[serde(default)]
    pub stop_reasons: Trigger,

    /// Scope variables seeded for each invocation of this block.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// `requires` predicate set of a block.
///
/// Patterns in `environment` and `variables` use the operator syntax
/// described in [`crate::requirements::matches_pattern`].
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Requirement {
    /// Operating system name as reported by `std::env::consts::OS`.
    #[serde(default)]
    pub system: Option<String>,

    #[serde(default)]
    pub exists: Vec<String>,

    #[serde(default)]
    pub not_exists: Vec<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// Per-block execution options.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskOptions {
    /// Working directory for the block (placeholders allowed).
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Interpreter override, e.g. `"bash"`.
    #[serde(default)]
    pub main_cmd: Option<String>,

    /// Arguments for `main_cmd`; only used together with it.
    #[serde(default)]
    pub main_params: Option<Vec<String>>,

    /// Keep running the block when a line exits non-zero.
    #[serde(default)]
    pub ignore_cmd_error: bool,

    /// Emit each command before it runs.
    #[serde(default)]
    pub display_cmd: bool,

    /// Do not forward output lines to the sinks (triggers still see them).
    #[serde(default)]
    pub hide_output: bool,

    /// Emit neither commands nor output.
    #[serde(default)]
    pub invisible: bool,

    /// Run all lines of the block in one long-lived shell.
    #[serde(default)]
    pub keep_alive: bool,

    /// Idle timeout of the keep-alive shell, e.g. `"30s"`.
    #[serde(default)]
    pub idle_timeout: Option<String>,
}

impl TaskOptions {
    /// Parsed `idle_timeout`; invalid values are rejected at load time.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.as_deref().and_then(|s| parse_duration(s).ok())
    }
}

/// Reaction to a line of process output.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Listener {
    #[serde(default)]
    pub trigger: Trigger,

    #[serde(default)]
    pub action: Action,
}

/// Matching rule shared by listeners and stop reasons.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Trigger {
    /// Matches unconditionally.
    #[serde(default)]
    pub now: bool,

    /// Matches when the command reported an error.
    #[serde(default)]
    pub on_error: bool,

    /// Matches output lines shorter than this (0 disables).
    #[serde(default)]
    pub on_out_count_less: usize,

    /// Matches output lines longer than this (0 disables).
    #[serde(default)]
    pub on_out_count_more: usize,

    /// Matches output lines containing any of these substrings.
    #[serde(default)]
    pub on_out_contains: Vec<String>,
}

impl Trigger {
    /// True if no rule is configured, so nothing can ever match.
    pub fn is_empty(&self) -> bool {
        !self.now
            && !self.on_error
            && self.on_out_count_less == 0
            && self.on_out_count_more == 0
            && self.on_out_contains.iter().all(|s| s.is_empty())
    }
}

/// What a matched listener does.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Action {
    /// Target invoked synchronously.
    #[serde(default)]
    pub target: Option<TargetId>,

    /// Inline script lines run in the current scope.
    #[serde(default)]
    pub script: Vec<String>,

    /// Kill the running process and stop the block.
    #[serde(default)]
    pub stop: bool,
}
