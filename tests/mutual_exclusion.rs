// tests/mutual_exclusion.rs

mod common;
use crate::common::{harness, with_timeout, ConfigFileBuilder, ScriptedBackend, TargetBuilder};

use std::error::Error;
use std::time::Duration;

use targetflow::types::TargetExit;

type TestResult = Result<(), Box<dyn Error>>;

fn slow_target(allow_multi_run: bool) -> targetflow::config::ConfigFile {
    ConfigFileBuilder::new()
        .allow_multi_run(allow_multi_run)
        .with_target(TargetBuilder::new("X").line("slow-x").build())
        .build()
}

#[tokio::test]
async fn second_concurrent_run_is_refused() -> TestResult {
    let backend = ScriptedBackend::new().slow("slow-x", Duration::from_millis(150));
    let h = harness(&slow_target(false), backend);

    let (first, second) = with_timeout(async {
        tokio::join!(
            h.executor.run_target("X", false),
            h.executor.run_target("X", false)
        )
    })
    .await;

    let mut exits = vec![first, second];
    exits.sort_by_key(|e| e.code());
    assert_eq!(exits, vec![TargetExit::Ok, TargetExit::AlreadyRunning]);
    assert_eq!(h.backend.count("slow-x"), 1);
    assert_eq!(h.executor.watchman().counts("X"), (1, 1));
    assert!(!h.executor.watchman().is_running("X"));
    Ok(())
}

#[tokio::test]
async fn multi_run_allows_overlapping_runs() -> TestResult {
    let backend = ScriptedBackend::new().slow("slow-x", Duration::from_millis(100));
    let h = harness(&slow_target(true), backend);

    let (first, second) = with_timeout(async {
        tokio::join!(
            h.executor.run_target("X", false),
            h.executor.run_target("X", false)
        )
    })
    .await;

    assert_eq!(first, TargetExit::Ok);
    assert_eq!(second, TargetExit::Ok);
    assert_eq!(h.backend.count("slow-x"), 2);
    assert_eq!(h.executor.watchman().counts("X"), (2, 2));
    Ok(())
}

#[tokio::test]
async fn sequential_runs_are_not_blocked() -> TestResult {
    let h = harness(&slow_target(false), ScriptedBackend::new());

    assert_eq!(h.executor.run_target("X", false).await, TargetExit::Ok);
    assert_eq!(h.executor.run_target("X", false).await, TargetExit::Ok);
    assert_eq!(h.executor.watchman().counts("X"), (2, 2));
    Ok(())
}
