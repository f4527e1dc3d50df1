// tests/requirements_gate.rs

mod common;
use crate::common::{harness, ConfigFileBuilder, ScriptedBackend, TargetBuilder};

use std::error::Error;

use targetflow::types::TargetExit;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn unmet_requirement_runs_nothing() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .requires_variable("mode", "=prod")
                .line("echo deploying")
                .build(),
        )
        .build();
    let h = harness(&cfg, ScriptedBackend::new());

    let exit = h.executor.run_target("T", false).await;

    assert_eq!(exit, TargetExit::ByNothingToDo);
    assert!(!exit.is_failure());
    assert!(h.backend.invocations().is_empty());
    assert!(h.sink.infos_of("T").iter().any(|i| i.starts_with("skipped")));
    Ok(())
}

#[tokio::test]
async fn skipped_block_does_not_hide_runnable_siblings() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .requires_system("no-such-os")
                .line("echo skipped")
                .build(),
        )
        .with_target(TargetBuilder::new("T").line("echo ran").build())
        .build();
    let h = harness(&cfg, ScriptedBackend::new());

    assert_eq!(h.executor.run_target("T", false).await, TargetExit::Ok);
    assert_eq!(h.backend.commands(), vec!["echo ran"]);
    Ok(())
}

#[tokio::test]
async fn working_dir_scopes_paths_and_commands() -> TestResult {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("marker"), "")?;
    let dir_str = dir.path().to_string_lossy().to_string();

    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .working_dir(&dir_str)
                .requires_exists("marker")
                .requires_not_exists("absent")
                .line("echo inside")
                .build(),
        )
        .build();
    let h = harness(&cfg, ScriptedBackend::new());

    assert_eq!(h.executor.run_target("T", false).await, TargetExit::Ok);
    let invocations = h.backend.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].cwd, dir.path());
    Ok(())
}

#[tokio::test]
async fn missing_working_dir_is_a_command_error() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .working_dir("/definitely/not/a/real/dir")
                .line("echo never")
                .build(),
        )
        .build();
    let h = harness(&cfg, ScriptedBackend::new());

    assert_eq!(h.executor.run_target("T", false).await, TargetExit::CmdError);
    assert!(h.backend.invocations().is_empty());
    assert!(h
        .sink
        .errors()
        .iter()
        .any(|e| e.contains("working directory")));
    Ok(())
}
