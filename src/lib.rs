// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod output;
pub mod preprocess;
pub mod proctree;
pub mod requirements;
pub mod types;
pub mod vars;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::engine::TargetExecutor;
use crate::output::{ConsoleSink, LogSink, Output};
use crate::types::TargetExit;

/// Exit status used when the run is interrupted with Ctrl-C.
const INTERRUPTED: i32 = 130;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - placeholder / data-map stores seeded from the config
/// - output sinks (tracing log + console)
/// - the target executor
/// - Ctrl-C handling
///
/// Returns the process exit status: 1 if any requested target failed.
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    let output = Output::new()
        .with_sink(Arc::new(LogSink))
        .with_sink(Arc::new(ConsoleSink));

    let mut builder = TargetExecutor::from_config(&cfg)?
        .output(output)
        .base_dir(config_root_dir(&config_path));
    if args.allow_multi_run {
        builder = builder.allow_multi_run(true);
    }
    let executor = builder.build();

    if args.dry_run {
        print_dry_run(&executor, &args.targets).await?;
        return Ok(0);
    }

    let run_all = run_targets(&executor, &args.targets, args.run_async);
    tokio::select! {
        code = run_all => {
            executor.stop_all_task_runner().await;
            Ok(code)
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Ctrl-C received; stopping task runners"),
                Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
            }
            executor.stop_all_task_runner().await;
            Ok(INTERRUPTED)
        }
    }
}

async fn run_targets(executor: &TargetExecutor, targets: &[String], run_async: bool) -> i32 {
    let mut failed = false;
    for target in targets.iter() {
        let exit = executor.run_target(target, run_async).await;
        info!(target_id = %target, %exit, code = exit.code(), "target done");
        if exit.is_failure() {
            failed = true;
        }
        if exit == TargetExit::ByNoTargetExists {
            eprintln!("targetflow: no target named '{target}'");
        }
    }
    if failed { 1 } else { 0 }
}

/// Directory that relative `working_dir` values resolve against.
///
/// - If the config path has a non-empty parent (e.g. "ci/Targetflow.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Targetflow.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Print the literal lines each target expands to.
async fn print_dry_run(executor: &TargetExecutor, targets: &[String]) -> Result<()> {
    println!("targetflow dry-run");
    println!(
        "  config.allow_multi_run = {}",
        executor.settings().allow_multi_run
    );
    println!(
        "  config.shell = {} {}",
        executor.settings().shell,
        executor.settings().shell_args.join(" ")
    );
    println!();

    for target in targets.iter() {
        let lines = executor.expand_target(target).await?;
        println!("{target}:");
        let needs = executor.catalog().needs_of(target);
        if !needs.is_empty() {
            println!("  needs: {needs:?}");
        }
        for line in lines.iter() {
            println!("  {line}");
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
