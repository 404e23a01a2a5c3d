//! Translates graph mutations into count deltas.
//!
//! For every node the updater maintains the per-label counts and the
//! all-nodes count. For every relationship it maintains the per-type and
//! all-types counts, plus the endpoint-label counts where exactly one
//! endpoint label is bound: `(start)-[type]->(*)` and `(*)-[type]->(end)`,
//! each also with the type left open.

use std::collections::BTreeMap;

use crate::types::{LabelId, Result, TypeId};

use super::key::CountKey;
use super::register::checked_sum;
use super::tracker::CountsTracker;

/// Destination for count deltas.
pub trait CountsSink {
    /// Adds `delta` to the count for `key`.
    fn add(&mut self, key: CountKey, delta: i64) -> Result<()>;
}

impl CountsSink for &CountsTracker {
    fn add(&mut self, key: CountKey, delta: i64) -> Result<()> {
        self.apply(key, delta)
    }
}

impl CountsSink for BTreeMap<CountKey, i64> {
    fn add(&mut self, key: CountKey, delta: i64) -> Result<()> {
        let slot = self.entry(key).or_insert(0);
        *slot = checked_sum(&key, *slot, delta)?;
        Ok(())
    }
}

/// Relationships of one type attached to a node, used when its labels change.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeDegree {
    /// Relationship type.
    pub rel_type: TypeId,
    /// Relationships of this type starting at the node.
    pub outgoing: i64,
    /// Relationships of this type ending at the node.
    pub incoming: i64,
}

/// Feeds graph events into a [`CountsSink`].
#[derive(Debug)]
pub struct CountsUpdater<S> {
    sink: S,
}

impl<S: CountsSink> CountsUpdater<S> {
    /// Wraps `sink`.
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Returns the wrapped sink.
    pub fn into_inner(self) -> S {
        self.sink
    }

    /// Borrows the wrapped sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// A node carrying `labels` was created.
    pub fn node_created(&mut self, labels: &[LabelId]) -> Result<()> {
        self.node(labels, 1)
    }

    /// A node carrying `labels` was deleted.
    pub fn node_deleted(&mut self, labels: &[LabelId]) -> Result<()> {
        self.node(labels, -1)
    }

    fn node(&mut self, labels: &[LabelId], delta: i64) -> Result<()> {
        self.sink.add(CountKey::all_nodes(), delta)?;
        for label in labels {
            self.sink.add(CountKey::node_label(*label), delta)?;
        }
        Ok(())
    }

    /// Labels were added to or removed from an existing node.
    ///
    /// `degrees` lists the relationships attached to the node so the
    /// endpoint-label counts follow the label change.
    pub fn node_labels_changed(
        &mut self,
        added: &[LabelId],
        removed: &[LabelId],
        degrees: &[NodeDegree],
    ) -> Result<()> {
        for (labels, sign) in [(added, 1i64), (removed, -1i64)] {
            for label in labels {
                self.sink.add(CountKey::node_label(*label), sign)?;
                let label = Some(*label);
                for degree in degrees {
                    for rel_type in [Some(degree.rel_type), None] {
                        if degree.outgoing != 0 {
                            self.sink.add(
                                CountKey::relationship(label, rel_type, None),
                                sign * degree.outgoing,
                            )?;
                        }
                        if degree.incoming != 0 {
                            self.sink.add(
                                CountKey::relationship(None, rel_type, label),
                                sign * degree.incoming,
                            )?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// A relationship was created between nodes carrying the given labels.
    pub fn relationship_created(
        &mut self,
        start_labels: &[LabelId],
        rel_type: TypeId,
        end_labels: &[LabelId],
    ) -> Result<()> {
        self.relationship(start_labels, rel_type, end_labels, 1)
    }

    /// A relationship was deleted.
    pub fn relationship_deleted(
        &mut self,
        start_labels: &[LabelId],
        rel_type: TypeId,
        end_labels: &[LabelId],
    ) -> Result<()> {
        self.relationship(start_labels, rel_type, end_labels, -1)
    }

    fn relationship(
        &mut self,
        start_labels: &[LabelId],
        rel_type: TypeId,
        end_labels: &[LabelId],
        delta: i64,
    ) -> Result<()> {
        self.sink.add(CountKey::relationship_type(rel_type), delta)?;
        self.sink.add(CountKey::all_relationships(), delta)?;
        for ty in [Some(rel_type), None] {
            for start in start_labels {
                self.sink
                    .add(CountKey::relationship(Some(*start), ty, None), delta)?;
            }
            for end in end_labels {
                self.sink
                    .add(CountKey::relationship(None, ty, Some(*end)), delta)?;
            }
        }
        Ok(())
    }
}
