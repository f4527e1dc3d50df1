// tests/stop_reasons.rs

mod common;
use crate::common::{harness, ConfigFileBuilder, ScriptedBackend, TargetBuilder};

use std::error::Error;

use targetflow::types::TargetExit;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn stop_reason_halts_remaining_lines() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .stop_on_contains("FATAL")
                .lines(&["echo one", "emit", "echo three"])
                .build(),
        )
        .build();
    let backend = ScriptedBackend::new().respond("emit", &["all good", "FATAL here", "ignored"], 0);
    let h = harness(&cfg, backend);

    let exit = h.executor.run_target("T", false).await;

    assert_eq!(exit, TargetExit::ByStopReason);
    assert_eq!(h.backend.commands(), vec!["echo one", "emit"]);
    assert_eq!(h.sink.lines_of("T"), vec!["one", "all good", "FATAL here"]);
    assert!(h.sink.infos_of("T").iter().any(|i| i.contains("FATAL")));
    assert_eq!(
        h.executor.placeholders().get("RUN.T.LOG.HIT").as_deref(),
        Some("found 'FATAL'")
    );
    Ok(())
}

#[tokio::test]
async fn command_error_ends_the_block_but_not_sibling_blocks() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(TargetBuilder::new("T").lines(&["bad", "echo after"]).build())
        .with_target(TargetBuilder::new("T").line("echo second").build())
        .build();
    let backend = ScriptedBackend::new().respond("bad", &[], 2);
    let h = harness(&cfg, backend);

    let exit = h.executor.run_target("T", false).await;

    assert_eq!(exit, TargetExit::Ok);
    assert_eq!(h.backend.commands(), vec!["bad", "echo second"]);
    assert!(h.sink.errors().iter().any(|e| e.contains("command failed")));
    Ok(())
}

#[tokio::test]
async fn command_error_is_the_exit_of_a_single_block() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(TargetBuilder::new("T").lines(&["bad", "echo after"]).build())
        .build();
    let h = harness(&cfg, ScriptedBackend::new().respond("bad", &[], 2));

    let exit = h.executor.run_target("T", false).await;

    assert_eq!(exit, TargetExit::CmdError);
    assert!(exit.is_failure());
    assert_eq!(h.backend.count("after"), 0);
    Ok(())
}

#[tokio::test]
async fn ignored_errors_continue() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .ignore_cmd_error()
                .lines(&["bad", "echo after"])
                .build(),
        )
        .build();
    let h = harness(&cfg, ScriptedBackend::new().respond("bad", &[], 1));

    assert_eq!(h.executor.run_target("T", false).await, TargetExit::Ok);
    assert_eq!(h.backend.count("after"), 1);
    Ok(())
}

#[tokio::test]
async fn ignored_errors_still_honor_stop_on_error() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .ignore_cmd_error()
                .stop_on_error()
                .lines(&["bad", "echo after"])
                .build(),
        )
        .build();
    let h = harness(&cfg, ScriptedBackend::new().respond("bad", &[], 1));

    assert_eq!(h.executor.run_target("T", false).await, TargetExit::ByStopReason);
    assert_eq!(h.backend.count("after"), 0);
    Ok(())
}

#[tokio::test]
async fn spawn_failure_is_a_command_error() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .lines(&["missing-binary --flag", "echo after"])
                .build(),
        )
        .build();
    let h = harness(&cfg, ScriptedBackend::new().fail_to_start("missing-binary"));

    assert_eq!(h.executor.run_target("T", false).await, TargetExit::CmdError);
    assert!(h
        .sink
        .errors()
        .iter()
        .any(|e| e.contains("failed to start command")));
    assert_eq!(h.backend.count("after"), 0);
    Ok(())
}
