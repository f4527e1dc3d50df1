#![allow(dead_code)]

use targetflow::config::{
    Action, ConfigFile, ConfigSection, Listener, RawConfigFile, TargetDefinition, Trigger,
};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                ..RawConfigFile::default()
            },
        }
    }

    pub fn with_target(mut self, target: TargetDefinition) -> Self {
        self.config.task.push(target);
        self
    }

    pub fn with_variable(mut self, name: &str, value: &str) -> Self {
        self.config
            .variables
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn allow_multi_run(mut self, allow: bool) -> Self {
        self.config.config.allow_multi_run = allow;
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }

    /// The raw config, for tests that expect validation to fail.
    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one `TargetDefinition` block.
pub struct TargetBuilder {
    target: TargetDefinition,
}

impl TargetBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            target: TargetDefinition {
                id: id.to_string(),
                ..TargetDefinition::default()
            },
        }
    }

    pub fn line(mut self, line: &str) -> Self {
        self.target.script.push(line.to_string());
        self
    }

    pub fn lines(mut self, lines: &[&str]) -> Self {
        self.target
            .script
            .extend(lines.iter().map(|l| l.to_string()));
        self
    }

    pub fn needs(mut self, id: &str) -> Self {
        self.target.needs.push(id.to_string());
        self
    }

    pub fn next(mut self, id: &str) -> Self {
        self.target.next.push(id.to_string());
        self
    }

    pub fn run_target(mut self, id: &str) -> Self {
        self.target.run_targets.push(id.to_string());
        self
    }

    pub fn listener(mut self, listener: Listener) -> Self {
        self.target.listener.push(listener);
        self
    }

    pub fn stop_on_contains(mut self, needle: &str) -> Self {
        self.target
            .stop_reasons
            .on_out_contains
            .push(needle.to_string());
        self
    }

    pub fn stop_on_error(mut self) -> Self {
        self.target.stop_reasons.on_error = true;
        self
    }

    pub fn requires_exists(mut self, path: &str) -> Self {
        self.target.requires.exists.push(path.to_string());
        self
    }

    pub fn requires_not_exists(mut self, path: &str) -> Self {
        self.target.requires.not_exists.push(path.to_string());
        self
    }

    pub fn requires_variable(mut self, name: &str, pattern: &str) -> Self {
        self.target
            .requires
            .variables
            .insert(name.to_string(), pattern.to_string());
        self
    }

    pub fn requires_system(mut self, os: &str) -> Self {
        self.target.requires.system = Some(os.to_string());
        self
    }

    pub fn working_dir(mut self, dir: &str) -> Self {
        self.target.options.working_dir = Some(dir.to_string());
        self
    }

    pub fn ignore_cmd_error(mut self) -> Self {
        self.target.options.ignore_cmd_error = true;
        self
    }

    pub fn display_cmd(mut self) -> Self {
        self.target.options.display_cmd = true;
        self
    }

    pub fn hide_output(mut self) -> Self {
        self.target.options.hide_output = true;
        self
    }

    pub fn keep_alive(mut self) -> Self {
        self.target.options.keep_alive = true;
        self
    }

    pub fn variable(mut self, name: &str, value: &str) -> Self {
        self.target
            .variables
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> TargetDefinition {
        self.target
    }
}

/// Builder for `Listener`.
pub struct ListenerBuilder {
    listener: Listener,
}

impl ListenerBuilder {
    fn with_trigger(trigger: Trigger) -> Self {
        Self {
            listener: Listener {
                trigger,
                action: Action::default(),
            },
        }
    }

    pub fn now() -> Self {
        Self::with_trigger(Trigger {
            now: true,
            ..Trigger::default()
        })
    }

    pub fn on_contains(needle: &str) -> Self {
        Self::with_trigger(Trigger {
            on_out_contains: vec![needle.to_string()],
            ..Trigger::default()
        })
    }

    pub fn on_error() -> Self {
        Self::with_trigger(Trigger {
            on_error: true,
            ..Trigger::default()
        })
    }

    pub fn run_target(mut self, id: &str) -> Self {
        self.listener.action.target = Some(id.to_string());
        self
    }

    pub fn line(mut self, line: &str) -> Self {
        self.listener.action.script.push(line.to_string());
        self
    }

    pub fn stop(mut self) -> Self {
        self.listener.action.stop = true;
        self
    }

    pub fn build(self) -> Listener {
        self.listener
    }
}
