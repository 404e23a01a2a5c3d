#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use sombra_counts::counts::{
    CountKey, CountsOptions, CountsSink, CountsTracker, CountsUpdater, DEFAULT_VERSION_TAG,
};
use sombra_counts::primitives::io::{FileSystem, OsFileSystem};
use sombra_counts::types::{LabelId, TypeId};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sombra_counts=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

/// Small labelled graph whose events are replayed into a counts sink.
#[derive(Default, Clone)]
pub struct GraphModel {
    nodes: Vec<Vec<LabelId>>,
    relationships: Vec<(usize, TypeId, usize)>,
}

impl GraphModel {
    pub fn node(&mut self, labels: &[u32]) -> usize {
        self.nodes.push(labels.iter().copied().map(LabelId).collect());
        self.nodes.len() - 1
    }

    pub fn relationship(&mut self, start: usize, rel_type: u32, end: usize) {
        self.relationships.push((start, TypeId(rel_type), end));
    }

    pub fn replay<S: CountsSink>(&self, updater: &mut CountsUpdater<S>) {
        for labels in &self.nodes {
            updater.node_created(labels).expect("node event");
        }
        for (start, rel_type, end) in &self.relationships {
            updater
                .relationship_created(&self.nodes[*start], *rel_type, &self.nodes[*end])
                .expect("relationship event");
        }
    }

    pub fn apply_to(&self, tracker: &CountsTracker) {
        self.replay(&mut CountsUpdater::new(tracker));
    }

    pub fn expected(&self) -> BTreeMap<CountKey, i64> {
        let mut updater = CountsUpdater::new(BTreeMap::new());
        self.replay(&mut updater);
        updater.into_inner()
    }
}

/// Four nodes over labels 0..=3 joined by four type-1 relationships.
pub fn base_graph() -> GraphModel {
    let mut graph = GraphModel::default();
    let n0 = graph.node(&[0, 1]);
    let n1 = graph.node(&[0, 3]);
    let n2 = graph.node(&[2, 3]);
    let n3 = graph.node(&[2]);
    graph.relationship(n0, 1, n2);
    graph.relationship(n1, 1, n3);
    graph.relationship(n1, 1, n2);
    graph.relationship(n0, 1, n3);
    graph
}

/// Introduces label 4 and relationship type 2, both unseen by [`base_graph`].
pub fn delta_graph() -> GraphModel {
    let mut graph = GraphModel::default();
    let n1 = graph.node(&[1]);
    let n2 = graph.node(&[1, 4]);
    graph.relationship(n1, 1, n2);
    graph.relationship(n2, 2, n1);
    graph
}

pub fn merge(into: &mut BTreeMap<CountKey, i64>, other: &BTreeMap<CountKey, i64>) {
    for (key, value) in other {
        *into.entry(*key).or_insert(0) += value;
    }
}

pub fn assert_counts(tracker: &CountsTracker, expected: &BTreeMap<CountKey, i64>) {
    for (key, value) in expected {
        assert_eq!(tracker.get(key).expect("get"), *value, "count for {key}");
    }
}

pub fn os_fs() -> Arc<dyn FileSystem> {
    OsFileSystem::shared()
}

pub fn bootstrap(dir: &Path) -> PathBuf {
    init_tracing();
    let base = dir.join("counts.db");
    CountsTracker::create_empty_store(&os_fs(), &base, DEFAULT_VERSION_TAG).expect("bootstrap");
    base
}

pub fn fast_options() -> CountsOptions {
    CountsOptions::new().sync_writes(false)
}

pub fn open(base: &Path) -> CountsTracker {
    CountsTracker::open_with_options(os_fs(), base, fast_options()).expect("open tracker")
}
