//! Process tree discovery and ordered shutdown.
//!
//! A [`ProcessTreeWatcher`] is created for one root pid. Every
//! [`ProcessTreeWatcher::update`] re-reads the OS process table and rebuilds
//! the [`ProcessTreeNode`] tree from scratch; process trees change under
//! us, so nothing is patched in place.
//!
//! Shutdown is post-order: every descendant is signalled and waited on
//! before its parent receives anything. Each process goes through the
//! [`SignalPlan`] until it is gone.
//!
//! - [`table`] reads the platform process table.
//! - [`signal`] sends signals and probes liveness.

pub mod signal;
pub mod table;

use std::collections::HashSet;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

pub use signal::{is_alive, send_signal, SignalPlan, SignalStep, StopSignal};
pub use table::{ProcessEntry, ProcessTable};

const LIVENESS_POLL: Duration = Duration::from_millis(10);

/// One process and its descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTreeNode {
    pub pid: u32,
    pub cmdline: String,
    pub threads: Vec<u32>,
    pub child_pids: Vec<u32>,
    pub children: Vec<ProcessTreeNode>,
}

impl ProcessTreeNode {
    /// Build the tree rooted at `pid` from a table snapshot.
    ///
    /// Returns `None` if `pid` is not a live process.
    pub fn from_table(pid: u32, table: &ProcessTable) -> Option<Self> {
        let mut visited = HashSet::new();
        Self::build(pid, table, &mut visited)
    }

    fn build(pid: u32, table: &ProcessTable, visited: &mut HashSet<u32>) -> Option<Self> {
        // pid reuse can make ppid links loop; never visit a pid twice.
        if !visited.insert(pid) || !table.is_live(pid) {
            return None;
        }
        let entry = table.get(pid)?;
        let children: Vec<ProcessTreeNode> = table
            .children_of(pid)
            .into_iter()
            .filter_map(|child| Self::build(child, table, visited))
            .collect();
        Some(Self {
            pid,
            cmdline: entry.cmdline.clone(),
            threads: entry.threads.clone(),
            child_pids: children.iter().map(|c| c.pid).collect(),
            children,
        })
    }

    /// All descendant pids, depth-first, parents before children.
    pub fn all_child_pids(&self) -> Vec<u32> {
        let mut acc = Vec::new();
        self.walk(&mut |node, depth| {
            if depth > 0 {
                acc.push(node.pid);
            }
            true
        });
        acc
    }

    /// Depth-first walk. The callback gets each node and its depth (root is
    /// 0) and returns whether to continue. Returns `false` if stopped early.
    pub fn walk(&self, f: &mut dyn FnMut(&ProcessTreeNode, usize) -> bool) -> bool {
        self.walk_at(0, f)
    }

    fn walk_at(&self, depth: usize, f: &mut dyn FnMut(&ProcessTreeNode, usize) -> bool) -> bool {
        if !f(self, depth) {
            return false;
        }
        for child in self.children.iter() {
            if !child.walk_at(depth + 1, f) {
                return false;
            }
        }
        true
    }

    /// Pids in shutdown order: children before parents, root last.
    pub fn post_order(&self) -> Vec<u32> {
        let mut acc = Vec::new();
        self.post_order_into(&mut acc);
        acc
    }

    fn post_order_into(&self, acc: &mut Vec<u32>) {
        for child in self.children.iter() {
            child.post_order_into(acc);
        }
        acc.push(self.pid);
    }
}

/// What a shutdown did, in the order it did it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub signaled: Vec<(u32, StopSignal)>,
    /// Processes still alive after the whole plan ran.
    pub survivors: Vec<u32>,
}

impl StopReport {
    /// Pids in the order they first received a signal.
    pub fn first_signal_order(&self) -> Vec<u32> {
        let mut seen = HashSet::new();
        self.signaled
            .iter()
            .filter(|(pid, _)| seen.insert(*pid))
            .map(|(pid, _)| *pid)
            .collect()
    }

    fn merge(&mut self, other: StopReport) {
        self.signaled.extend(other.signaled);
        self.survivors.extend(other.survivors);
    }
}

/// Watches the process tree under one root pid.
#[derive(Debug, Clone)]
pub struct ProcessTreeWatcher {
    root_pid: u32,
    tree: Option<ProcessTreeNode>,
}

impl ProcessTreeWatcher {
    /// Create a watcher and take the first snapshot.
    pub fn new(root_pid: u32) -> Self {
        let mut watcher = Self {
            root_pid,
            tree: None,
        };
        watcher.update();
        watcher
    }

    /// Re-read the process table and rebuild the tree.
    ///
    /// Returns whether the root is still running.
    pub fn update(&mut self) -> bool {
        self.tree = match ProcessTable::read() {
            Ok(table) => ProcessTreeNode::from_table(self.root_pid, &table),
            Err(e) => {
                warn!(pid = self.root_pid, error = %e, "failed to read process table");
                None
            }
        };
        self.tree.is_some()
    }

    pub fn pid(&self) -> u32 {
        self.root_pid
    }

    /// Liveness straight from the OS, not from the last snapshot.
    pub fn is_running(&self) -> bool {
        is_alive(self.root_pid)
    }

    pub fn tree(&self) -> Option<&ProcessTreeNode> {
        self.tree.as_ref()
    }

    pub fn cmdline(&self) -> Option<&str> {
        self.tree.as_ref().map(|t| t.cmdline.as_str())
    }

    pub fn threads(&self) -> &[u32] {
        self.tree.as_ref().map(|t| t.threads.as_slice()).unwrap_or(&[])
    }

    pub fn child_pids(&self) -> &[u32] {
        self.tree
            .as_ref()
            .map(|t| t.child_pids.as_slice())
            .unwrap_or(&[])
    }

    pub fn all_child_pids(&self) -> Vec<u32> {
        self.tree
            .as_ref()
            .map(|t| t.all_child_pids())
            .unwrap_or_default()
    }

    pub fn walk(&self, f: &mut dyn FnMut(&ProcessTreeNode, usize) -> bool) -> bool {
        match self.tree.as_ref() {
            Some(tree) => tree.walk(f),
            None => true,
        }
    }

    /// Post-order pids of the last snapshot.
    pub fn shutdown_order(&self) -> Vec<u32> {
        self.tree
            .as_ref()
            .map(|t| t.post_order())
            .unwrap_or_default()
    }

    /// Stop every descendant of the root, leaving the root itself alone.
    pub async fn stop_childs(&mut self, plan: &SignalPlan) -> StopReport {
        self.update();
        let mut report = StopReport::default();
        if let Some(tree) = self.tree.clone() {
            for child in tree.children.iter() {
                report.merge(stop_subtree(child.clone(), plan.clone()).await);
            }
        }
        self.update();
        report
    }

    /// Stop the whole tree, root last.
    pub async fn stop(&mut self, plan: &SignalPlan) -> StopReport {
        self.update();
        let report = match self.tree.clone() {
            Some(tree) => stop_subtree(tree, plan.clone()).await,
            None => StopReport::default(),
        };
        self.update();
        report
    }
}

fn stop_subtree(node: ProcessTreeNode, plan: SignalPlan) -> BoxFuture<'static, StopReport> {
    Box::pin(async move {
        let mut report = StopReport::default();
        for child in node.children.iter() {
            report.merge(stop_subtree(child.clone(), plan.clone()).await);
        }
        report.merge(stop_process(node.pid, &plan).await);
        report
    })
}

async fn stop_process(pid: u32, plan: &SignalPlan) -> StopReport {
    let mut report = StopReport::default();
    for step in plan.steps.iter() {
        if !is_alive(pid) {
            return report;
        }
        debug!(pid, signal = %step.signal, "signalling process");
        if let Err(e) = send_signal(pid, step.signal) {
            warn!(pid, signal = %step.signal, error = %e, "failed to signal process");
        }
        report.signaled.push((pid, step.signal));

        let deadline = Instant::now() + step.wait;
        while Instant::now() < deadline {
            if !is_alive(pid) {
                return report;
            }
            sleep(LIVENESS_POLL.min(step.wait)).await;
        }
    }
    if is_alive(pid) {
        warn!(pid, "process survived the whole signal plan");
        report.survivors.push(pid);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, ppid: u32) -> ProcessEntry {
        ProcessEntry {
            pid,
            ppid,
            cmdline: format!("cmd-{pid}"),
            threads: Vec::new(),
            zombie: false,
        }
    }

    fn sample_table() -> ProcessTable {
        // 1 -> {2 -> {4}, 3}
        ProcessTable::from_entries([entry(1, 0), entry(2, 1), entry(3, 1), entry(4, 2), entry(9, 7)])
    }

    #[test]
    fn builds_nested_tree() {
        let tree = ProcessTreeNode::from_table(1, &sample_table()).unwrap();
        assert_eq!(tree.child_pids, vec![2, 3]);
        assert_eq!(tree.children[0].child_pids, vec![4]);
        assert_eq!(tree.all_child_pids(), vec![2, 4, 3]);
    }

    #[test]
    fn post_order_puts_children_first() {
        let tree = ProcessTreeNode::from_table(1, &sample_table()).unwrap();
        assert_eq!(tree.post_order(), vec![4, 2, 3, 1]);
    }

    #[test]
    fn walk_stops_early() {
        let tree = ProcessTreeNode::from_table(1, &sample_table()).unwrap();
        let mut seen = Vec::new();
        let completed = tree.walk(&mut |node, _depth| {
            seen.push(node.pid);
            node.pid != 4
        });
        assert!(!completed);
        assert_eq!(seen, vec![1, 2, 4]);
    }

    #[test]
    fn ppid_loops_do_not_recurse_forever() {
        let table = ProcessTable::from_entries([entry(5, 6), entry(6, 5)]);
        let tree = ProcessTreeNode::from_table(5, &table).unwrap();
        assert_eq!(tree.all_child_pids(), vec![6]);
    }

    #[test]
    fn missing_root_has_no_tree() {
        assert!(ProcessTreeNode::from_table(42, &sample_table()).is_none());
    }

    #[test]
    fn first_signal_order_dedups() {
        let report = StopReport {
            signaled: vec![
                (4, StopSignal::Interrupt),
                (4, StopSignal::Kill),
                (1, StopSignal::Interrupt),
            ],
            survivors: Vec::new(),
        };
        assert_eq!(report.first_signal_order(), vec![4, 1]);
    }
}
