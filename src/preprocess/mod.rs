// src/preprocess/mod.rs

//! Line-oriented macro preprocessor.
//!
//! Script lines starting with `#@` are directives; everything else is a
//! literal line handed to a [`LineHandler`] as soon as it is reached. The
//! preprocessor therefore executes while it expands: a `#@set` earlier in a
//! script is visible to the lines after it.
//!
//! Regions:
//! - `#@if-equals` / `#@if-not-equals` / `#@if-os` / `#@if-not-os` open a
//!   conditional evaluated once when it opens. Conditionals do not nest.
//! - `#@foreach key path` captures the following lines as a template until
//!   its `#@end`, then expands the template once per element of the JSON
//!   value at `path` in data map `key`. Each instance goes through the full
//!   preprocessor again, so directives inside a loop body work.
//!
//! Malformed directives are reported on the output sink and skipped; they
//! never end the expansion.
//!
//! - [`directive`] parses single directive lines.

pub mod directive;

use std::path::Path;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::output::Output;
use crate::requirements::os_matches;
use crate::types::TargetExit;
use crate::vars::{DataMapStore, PlaceholderStore, ScopeVars};

pub use directive::{Directive, MARKER};

/// Token replaced by the element value in a foreach body.
pub const LINE_TOKEN: &str = "__LINE__";
/// Token replaced by the element key (object key or array index).
pub const KEY_TOKEN: &str = "__KEY__";

/// Result of executing one literal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineVerdict {
    pub code: TargetExit,
    /// Stop the expansion; no further line or directive is processed.
    pub abort: bool,
}

impl LineVerdict {
    pub fn proceed(code: TargetExit) -> Self {
        Self { code, abort: false }
    }

    pub fn abort(code: TargetExit) -> Self {
        Self { code, abort: true }
    }
}

/// Executes what the preprocessor produces.
pub trait LineHandler: Send + Sync {
    /// Run one literal line.
    fn execute<'a>(&'a self, line: &'a str) -> BoxFuture<'a, LineVerdict>;

    /// Run a command for `#@var` / `#@import-json-exec` and return its
    /// output lines.
    fn capture<'a>(&'a self, command: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;
}

/// Handler that runs nothing; used to list the lines a script expands to.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectOnly;

impl LineHandler for CollectOnly {
    fn execute<'a>(&'a self, _line: &'a str) -> BoxFuture<'a, LineVerdict> {
        Box::pin(async { LineVerdict::proceed(TargetExit::Ok) })
    }

    fn capture<'a>(&'a self, _command: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// Outcome of [`Preprocessor::expand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub aborted: bool,
    /// Code of the last executed line, `NoCode` if none ran.
    pub last_code: TargetExit,
    /// Every literal line reached, in execution order.
    pub lines: Vec<String>,
}

impl Default for Expansion {
    fn default() -> Self {
        Self {
            aborted: false,
            last_code: TargetExit::NoCode,
            lines: Vec::new(),
        }
    }
}

impl Expansion {
    fn absorb(&mut self, other: Expansion) {
        if !other.lines.is_empty() {
            self.last_code = other.last_code;
        }
        self.lines.extend(other.lines);
        self.aborted |= other.aborted;
    }
}

enum Region {
    None,
    Conditional {
        active: bool,
    },
    Foreach {
        key: String,
        path: String,
        body: Vec<String>,
        /// Regions opened inside the body that are still open.
        depth: usize,
    },
}

/// Expands script lines for one target invocation.
pub struct Preprocessor<'a> {
    target: &'a str,
    placeholders: &'a PlaceholderStore,
    data: &'a DataMapStore,
    output: &'a Output,
    scope: &'a ScopeVars,
    cwd: &'a Path,
}

impl<'a> Preprocessor<'a> {
    pub fn new(
        target: &'a str,
        placeholders: &'a PlaceholderStore,
        data: &'a DataMapStore,
        output: &'a Output,
        scope: &'a ScopeVars,
        cwd: &'a Path,
    ) -> Self {
        Self {
            target,
            placeholders,
            data,
            output,
            scope,
            cwd,
        }
    }

    pub fn expand<'b>(
        &'b self,
        lines: Vec<String>,
        handler: &'b dyn LineHandler,
    ) -> BoxFuture<'b, Expansion> {
        Box::pin(async move {
            let mut out = Expansion::default();
            let mut region = Region::None;

            for raw in lines {
                if let Region::Foreach { body, depth, .. } = &mut region {
                    if !capture_body_line(raw, body, depth) {
                        continue;
                    }
                    if let Region::Foreach { key, path, body, .. } =
                        std::mem::replace(&mut region, Region::None)
                    {
                        out.absorb(self.run_foreach(&key, &path, body, handler).await);
                        if out.aborted {
                            return out;
                        }
                    }
                    continue;
                }

                let line = self.placeholders.resolve_in_string(&raw, self.scope);
                let inactive = matches!(region, Region::Conditional { active: false });

                let parsed = match directive::parse(&line) {
                    None => {
                        if inactive {
                            continue;
                        }
                        out.lines.push(line.clone());
                        let verdict = handler.execute(&line).await;
                        out.last_code = verdict.code;
                        if verdict.abort {
                            out.aborted = true;
                            return out;
                        }
                        continue;
                    }
                    Some(parsed) => parsed,
                };

                let directive = match parsed {
                    Ok(d) => d,
                    Err(message) => {
                        if !inactive {
                            self.report(message, &line);
                        }
                        continue;
                    }
                };

                match directive {
                    Directive::End => {
                        if matches!(region, Region::None) {
                            self.report("'#@end' without an open region", &line);
                        }
                        region = Region::None;
                    }
                    d if d.opens_region() => {
                        if matches!(region, Region::Conditional { .. }) {
                            if !inactive {
                                self.report("regions cannot be opened inside a conditional", &line);
                            }
                            continue;
                        }
                        region = match d {
                            Directive::Foreach { key, path } => Region::Foreach {
                                key,
                                path,
                                body: Vec::new(),
                                depth: 0,
                            },
                            other => Region::Conditional {
                                active: condition_holds(&other),
                            },
                        };
                    }
                    _ if inactive => {}
                    Directive::Item { .. } => {
                        self.report("'#@-' is only valid inside '#@foreach'", &line);
                    }
                    other => self.apply(other, &line, handler).await,
                }
            }

            match region {
                Region::None => {}
                Region::Conditional { .. } => self.report("unclosed conditional", "#@end"),
                Region::Foreach { key, .. } => {
                    self.report(format!("unclosed '#@foreach {key}'"), "#@end")
                }
            }
            out
        })
    }

    async fn run_foreach(
        &self,
        key: &str,
        path: &str,
        body: Vec<String>,
        handler: &dyn LineHandler,
    ) -> Expansion {
        let mut out = Expansion::default();
        let Some(value) = self.data.get_by_path(key, path) else {
            self.report(
                format!("no data at '{path}' in map '{key}'"),
                &format!("#@foreach {key} {path}"),
            );
            return out;
        };

        let elements: Vec<(String, String)> = match value {
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| (k, element_text(v)))
                .collect(),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), element_text(v)))
                .collect(),
            other => {
                self.report(
                    format!("'{path}' in map '{key}' is not iterable: {other}"),
                    &format!("#@foreach {key} {path}"),
                );
                return out;
            }
        };

        debug!(target_id = %self.target, map = %key, path = %path, count = elements.len(), "expanding foreach");
        for (elem_key, elem_value) in elements {
            let instance: Vec<String> = body
                .iter()
                .map(|l| l.replace(LINE_TOKEN, &elem_value).replace(KEY_TOKEN, &elem_key))
                .collect();
            out.absorb(self.expand(instance, handler).await);
            if out.aborted {
                break;
            }
        }
        out
    }

    async fn apply(&self, directive: Directive, line: &str, handler: &dyn LineHandler) {
        debug!(target_id = %self.target, ?directive, "applying directive");
        let result: std::result::Result<(), String> = match directive {
            Directive::Set { name, value } => {
                self.placeholders.set(name, value);
                Ok(())
            }
            Directive::Add { name, value } => {
                if self.placeholders.append_or_fail(&name, &value) {
                    Ok(())
                } else {
                    Err(format!("cannot add to undefined variable '{name}'"))
                }
            }
            Directive::SetInMap { map, path, value } => self
                .data
                .set_by_path(&map, &path, &value)
                .map_err(|e| e.to_string()),
            Directive::ImportJson { key, json } => {
                self.data.add_from_json(&key, &json).map_err(|e| e.to_string())
            }
            Directive::ImportJsonExec { key, command } => match handler.capture(&command).await {
                Ok(lines) => self
                    .data
                    .add_from_json(&key, &lines.join("\n"))
                    .map_err(|e| e.to_string()),
                Err(e) => Err(format!("running '{command}': {e}")),
            },
            Directive::ExportToJson { map, var } => match self.data.as_json(&map) {
                Some(json) => {
                    self.placeholders.set(var, json);
                    Ok(())
                }
                None => Err(format!("no data map '{map}'")),
            },
            Directive::ExportToYaml { map, var } => match self.data.as_yaml(&map) {
                Some(yaml) => {
                    self.placeholders.set(var, yaml);
                    Ok(())
                }
                None => Err(format!("no data map '{map}'")),
            },
            Directive::VarToFile { var, path } => match self.placeholders.get(&var) {
                Some(content) => {
                    let file = self.cwd.join(&path);
                    tokio::fs::write(&file, content)
                        .await
                        .map_err(|e| format!("writing '{}': {e}", file.display()))
                }
                None => Err(format!("undefined variable '{var}'")),
            },
            Directive::Var { name, command } => match handler.capture(&command).await {
                Ok(lines) => {
                    self.placeholders.set(name, lines.join("\n"));
                    Ok(())
                }
                Err(e) => Err(format!("running '{command}': {e}")),
            },
            // Region directives never reach here.
            other => Err(format!("unexpected directive {other:?}")),
        };

        if let Err(message) = result {
            self.report(message, line);
        }
    }

    fn report(&self, message: impl Into<String>, line: &str) {
        self.output
            .error(self.target, message, Some(line.to_string()));
    }
}

/// Capture one raw line into an open foreach body.
///
/// Returns `true` when the line is the `#@end` closing the foreach itself.
fn capture_body_line(raw: String, body: &mut Vec<String>, depth: &mut usize) -> bool {
    match directive::parse(&raw) {
        Some(Ok(Directive::End)) if *depth == 0 => return true,
        Some(Ok(Directive::End)) => *depth -= 1,
        Some(Ok(Directive::Item { text })) if *depth == 0 => {
            body.push(text);
            return false;
        }
        Some(Ok(d)) if d.opens_region() => *depth += 1,
        _ => {}
    }
    body.push(raw);
    false
}

fn condition_holds(directive: &Directive) -> bool {
    match directive {
        Directive::IfEquals { left, right } => left == right,
        Directive::IfNotEquals { left, right } => left != right,
        Directive::IfOs { name } => os_matches(name),
        Directive::IfNotOs { name } => !os_matches(name),
        _ => false,
    }
}

fn element_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::output::{OutputMessage, OutputSink};

    #[derive(Default)]
    struct Recorder {
        executed: Mutex<Vec<String>>,
        captured: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
        capture_output: Vec<String>,
    }

    impl LineHandler for Recorder {
        fn execute<'a>(&'a self, line: &'a str) -> BoxFuture<'a, LineVerdict> {
            Box::pin(async move {
                self.executed.lock().unwrap().push(line.to_string());
                match self.fail_on {
                    Some(bad) if line.contains(bad) => LineVerdict::abort(TargetExit::ByStopReason),
                    _ => LineVerdict::proceed(TargetExit::Ok),
                }
            })
        }

        fn capture<'a>(&'a self, command: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
            Box::pin(async move {
                self.captured.lock().unwrap().push(command.to_string());
                Ok(self.capture_output.clone())
            })
        }
    }

    #[derive(Default)]
    struct Errors(Mutex<Vec<String>>);

    impl OutputSink for Errors {
        fn handle(&self, msg: &OutputMessage) {
            if let OutputMessage::Error { message, .. } = msg {
                self.0.lock().unwrap().push(message.clone());
            }
        }
    }

    struct Fixture {
        placeholders: PlaceholderStore,
        data: DataMapStore,
        errors: Arc<Errors>,
        output: Output,
        scope: ScopeVars,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let errors = Arc::new(Errors::default());
            Self {
                placeholders: PlaceholderStore::new(),
                data: DataMapStore::new(),
                output: Output::new().with_sink(errors.clone()),
                errors,
                scope: ScopeVars::new(),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn preprocessor(&self) -> Preprocessor<'_> {
            Preprocessor::new(
                "t",
                &self.placeholders,
                &self.data,
                &self.output,
                &self.scope,
                self.dir.path(),
            )
        }

        fn errors(&self) -> Vec<String> {
            self.errors.0.lock().unwrap().clone()
        }
    }

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn foreach_over_array_expands_in_order() {
        let fx = Fixture::new();
        fx.data
            .add_from_json("data", r#"{"items": ["a", "b", 3]}"#)
            .unwrap();
        let handler = Recorder::default();

        let out = fx
            .preprocessor()
            .expand(
                lines(&["#@foreach data items", "#@- got __LINE__", "#@end"]),
                &handler,
            )
            .await;

        assert_eq!(out.lines, lines(&["got a", "got b", "got 3"]));
        assert_eq!(*handler.executed.lock().unwrap(), out.lines);
        assert_eq!(out.last_code, TargetExit::Ok);
        assert!(!out.aborted);
        assert!(fx.errors().is_empty());
    }

    #[tokio::test]
    async fn foreach_over_object_uses_keys_and_nested_directives() {
        let fx = Fixture::new();
        fx.data
            .add_from_json("ports", r#"{"api": 8080, "web": 3000}"#)
            .unwrap();
        let handler = Recorder::default();

        let out = fx
            .preprocessor()
            .expand(
                lines(&[
                    "#@foreach ports",
                    "#@- #@if-equals __KEY__ web",
                    "#@- echo __KEY__=__LINE__",
                    "#@- #@end",
                    "#@end",
                ]),
                &handler,
            )
            .await;

        assert_eq!(out.lines, lines(&["echo web=3000"]));
        assert!(fx.errors().is_empty());
    }

    #[tokio::test]
    async fn conditional_is_evaluated_once_at_open_time() {
        let fx = Fixture::new();
        fx.placeholders.set("mode", "dev");
        let handler = Recorder::default();

        let out = fx
            .preprocessor()
            .expand(
                lines(&[
                    "#@if-equals ${mode} dev",
                    "#@set mode prod",
                    "echo still dev branch ${mode}",
                    "#@end",
                    "#@if-not-equals ${mode} prod",
                    "echo never",
                    "#@end",
                ]),
                &handler,
            )
            .await;

        assert_eq!(out.lines, lines(&["echo still dev branch prod"]));
    }

    #[tokio::test]
    async fn inactive_conditional_skips_directives() {
        let fx = Fixture::new();
        let handler = Recorder::default();
        fx.preprocessor()
            .expand(
                lines(&["#@if-os no-such-os", "#@set touched yes", "#@end"]),
                &handler,
            )
            .await;
        assert_eq!(fx.placeholders.get("touched"), None);
    }

    #[tokio::test]
    async fn abort_stops_remaining_lines() {
        let fx = Fixture::new();
        let handler = Recorder {
            fail_on: Some("B"),
            ..Recorder::default()
        };

        let out = fx
            .preprocessor()
            .expand(lines(&["echo A", "echo B", "echo C"]), &handler)
            .await;

        assert!(out.aborted);
        assert_eq!(out.last_code, TargetExit::ByStopReason);
        assert_eq!(out.lines, lines(&["echo A", "echo B"]));
    }

    #[tokio::test]
    async fn variable_directives() {
        let fx = Fixture::new();
        let handler = Recorder {
            capture_output: lines(&["one", "two"]),
            ..Recorder::default()
        };

        fx.preprocessor()
            .expand(
                lines(&[
                    "#@set greeting hello",
                    "#@add greeting -world",
                    "#@add missing x",
                    "#@var listing ls -1",
                    "#@set-in-map cfg server.port 8080",
                    "#@export-to-json cfg cfg_json",
                    "#@var-to-file greeting out.txt",
                ]),
                &handler,
            )
            .await;

        assert_eq!(fx.placeholders.get("greeting").as_deref(), Some("hello-world"));
        assert_eq!(fx.placeholders.get("listing").as_deref(), Some("one\ntwo"));
        assert_eq!(
            fx.placeholders.get("cfg_json").as_deref(),
            Some(r#"{"server":{"port":8080}}"#)
        );
        assert_eq!(
            std::fs::read_to_string(fx.dir.path().join("out.txt")).unwrap(),
            "hello-world"
        );
        assert_eq!(*handler.captured.lock().unwrap(), lines(&["ls -1"]));

        let errors = fx.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("missing"));
    }

    #[tokio::test]
    async fn import_json_exec_parses_captured_output() {
        let fx = Fixture::new();
        let handler = Recorder {
            capture_output: lines(&["[\"x\",", "\"y\"]"]),
            ..Recorder::default()
        };

        let out = fx
            .preprocessor()
            .expand(
                lines(&[
                    "#@import-json-exec list cat list.json",
                    "#@foreach list",
                    "echo __KEY__:__LINE__",
                    "#@end",
                ]),
                &handler,
            )
            .await;

        assert_eq!(out.lines, lines(&["echo 0:x", "echo 1:y"]));
    }

    #[tokio::test]
    async fn malformed_directives_are_reported_and_skipped() {
        let fx = Fixture::new();
        let handler = Recorder::default();

        let out = fx
            .preprocessor()
            .expand(
                lines(&[
                    "#@bogus",
                    "#@- outside",
                    "#@end",
                    "echo ok",
                    "#@if-os linux",
                    "#@if-os windows",
                    "#@end",
                    "#@foreach nothing here",
                ]),
                &handler,
            )
            .await;

        assert_eq!(out.lines, lines(&["echo ok"]));
        assert!(!out.aborted);
        let errors = fx.errors();
        assert!(errors.iter().any(|e| e.contains("bogus")));
        assert!(errors.iter().any(|e| e.contains("#@-")));
        assert!(errors.iter().any(|e| e.contains("without an open region")));
        assert!(errors.iter().any(|e| e.contains("unclosed")));
    }

    #[tokio::test]
    async fn collect_only_runs_nothing() {
        let fx = Fixture::new();
        let out = fx
            .preprocessor()
            .expand(lines(&["echo a", "echo b"]), &CollectOnly)
            .await;
        assert_eq!(out.lines, lines(&["echo a", "echo b"]));
    }
}
