// tests/listeners.rs

mod common;
use crate::common::{
    harness, with_timeout, ConfigFileBuilder, ListenerBuilder, ScriptedBackend, TargetBuilder,
};

use std::error::Error;

use targetflow::types::TargetExit;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn trigger_target_runs_synchronously_inside_the_scan() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(TargetBuilder::new("H").line("echo handler").build())
        .with_target(
            TargetBuilder::new("T")
                .listener(ListenerBuilder::on_contains("READY").run_target("H").build())
                .lines(&["watch", "echo after"])
                .build(),
        )
        .build();
    let backend = ScriptedBackend::new().respond("watch", &["starting", "READY", "more"], 0);
    let h = harness(&cfg, backend);

    let exit = with_timeout(h.executor.run_target("T", false)).await;

    assert_eq!(exit, TargetExit::Ok);
    assert_eq!(h.backend.commands(), vec!["watch", "echo handler", "echo after"]);
    assert_eq!(h.sink.lines_of("T"), vec!["starting", "READY", "more", "after"]);
    assert_eq!(h.sink.lines_of("H"), vec!["handler"]);
    Ok(())
}

#[tokio::test]
async fn inline_listener_script_sees_the_matching_line() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .listener(
                    ListenerBuilder::on_contains("port=")
                        .line("echo saw ${RUN.T.LOG.LAST}")
                        .build(),
                )
                .line("serve")
                .build(),
        )
        .build();
    let backend = ScriptedBackend::new().respond("serve", &["port=8080"], 0);
    let h = harness(&cfg, backend);

    assert_eq!(h.executor.run_target("T", false).await, TargetExit::Ok);
    assert_eq!(h.backend.commands(), vec!["serve", "echo saw port=8080"]);
    Ok(())
}

#[tokio::test]
async fn stopping_listener_ends_the_block() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .listener(ListenerBuilder::on_contains("boom").stop().build())
                .lines(&["run", "echo never"])
                .build(),
        )
        .build();
    let backend = ScriptedBackend::new().respond("run", &["boom", "tail"], 0);
    let h = harness(&cfg, backend);

    assert_eq!(h.executor.run_target("T", false).await, TargetExit::ByStopReason);
    assert_eq!(h.backend.count("never"), 0);
    assert_eq!(h.sink.lines_of("T"), vec!["boom"]);
    Ok(())
}

#[tokio::test]
async fn now_listener_fires_before_the_script() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .listener(ListenerBuilder::now().line("echo early").build())
                .line("echo main")
                .build(),
        )
        .build();
    let h = harness(&cfg, ScriptedBackend::new());

    assert_eq!(h.executor.run_target("T", false).await, TargetExit::Ok);
    assert_eq!(h.backend.commands(), vec!["echo early", "echo main"]);
    Ok(())
}

#[tokio::test]
async fn now_listener_alone_is_enough_to_run() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(TargetBuilder::new("H").line("echo handler").build())
        .with_target(
            TargetBuilder::new("T")
                .listener(ListenerBuilder::now().run_target("H").build())
                .build(),
        )
        .build();
    let h = harness(&cfg, ScriptedBackend::new());

    assert_eq!(h.executor.run_target("T", false).await, TargetExit::Ok);
    assert_eq!(h.backend.commands(), vec!["echo handler"]);
    Ok(())
}

#[tokio::test]
async fn error_listener_runs_cleanup_on_failure() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(TargetBuilder::new("cleanup").line("echo cleaning").build())
        .with_target(
            TargetBuilder::new("T")
                .listener(ListenerBuilder::on_error().run_target("cleanup").build())
                .line("bad")
                .build(),
        )
        .build();
    let h = harness(&cfg, ScriptedBackend::new().respond("bad", &[], 3));

    assert_eq!(h.executor.run_target("T", false).await, TargetExit::CmdError);
    assert_eq!(h.backend.commands(), vec!["bad", "echo cleaning"]);
    Ok(())
}

#[tokio::test]
async fn inline_listener_script_does_not_retrigger_itself() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_target(
            TargetBuilder::new("T")
                .listener(ListenerBuilder::on_contains("ping").line("echo ping again").build())
                .line("serve")
                .build(),
        )
        .build();
    let backend = ScriptedBackend::new().respond("serve", &["ping"], 0);
    let h = harness(&cfg, backend);

    let exit = with_timeout(h.executor.run_target("T", false)).await;

    assert_eq!(exit, TargetExit::Ok);
    assert_eq!(h.backend.commands(), vec!["serve", "echo ping again"]);
    Ok(())
}
