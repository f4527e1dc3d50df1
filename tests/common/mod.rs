#![allow(dead_code)]

use std::sync::Arc;

use targetflow::config::ConfigFile;
use targetflow::engine::TargetExecutor;
use targetflow::output::Output;

pub use targetflow_test_utils::{
    init_tracing, with_timeout, ConfigFileBuilder, ListenerBuilder, RecordingSink,
    ScriptedBackend, TargetBuilder,
};

/// An executor wired to a scripted backend and a recording sink.
pub struct Harness {
    pub executor: TargetExecutor,
    pub backend: Arc<ScriptedBackend>,
    pub sink: Arc<RecordingSink>,
}

pub fn harness(cfg: &ConfigFile, backend: ScriptedBackend) -> Harness {
    init_tracing();
    let backend = Arc::new(backend);
    let sink = Arc::new(RecordingSink::new());
    let executor = TargetExecutor::from_config(cfg)
        .expect("stores from config")
        .backend(backend.clone())
        .output(Output::new().with_sink(sink.clone()))
        .base_dir(std::env::temp_dir())
        .build();
    Harness {
        executor,
        backend,
        sink,
    }
}

/// Path of a file under `demos/`.
pub fn demo_path(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join(name)
}
