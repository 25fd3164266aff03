//! Per-label self/total aggregation
//!
//! Walks a recorder's tree post-order and folds every node into one entry
//! per distinct label. A label used at several tree positions (recursion,
//! repeated call sites) collapses into a single entry:
//!
//! - `self` is the label's own measure, nested scopes excluded;
//! - `total` is the label's measure including every scope nested under it.
//!
//! For any tree, `total(root) == Σ self(node)` when the combine operation is
//! addition, since totals telescope over the tree.

use std::collections::HashMap;
use std::ops::Add;

use serde::Serialize;

use crate::error::Result;
use crate::labels::LabelScheme;
use crate::recorder::Recorder;

/// Aggregated values for one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry<M> {
    /// Measure recorded while the label was active, nested scopes excluded.
    #[serde(rename = "self")]
    pub self_value: M,
    /// Measure including all scopes nested under the label.
    #[serde(rename = "total")]
    pub total_value: M,
}

/// Per-label report, keyed by the resolved (external) label form.
#[derive(Debug, Clone)]
pub struct Report<K, M> {
    pub entries: HashMap<K, ReportEntry<M>>,
}

impl<K, M> Report<K, M>
where
    K: Eq + std::hash::Hash,
{
    /// Entry for a label, if it appeared in the tree.
    pub fn get<Q>(&self, label: &Q) -> Option<&ReportEntry<M>>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + std::hash::Hash + ?Sized,
    {
        self.entries.get(label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the report as a JSON array of
    /// `{"label": .., "self": .., "total": ..}` rows.
    ///
    /// Rows are sorted by label so the output is stable across runs.
    pub fn to_json(&self) -> Result<String>
    where
        K: Serialize + Ord,
        M: Serialize,
    {
        #[derive(Serialize)]
        struct Row<'a, K, M> {
            label: &'a K,
            #[serde(rename = "self")]
            self_value: &'a M,
            #[serde(rename = "total")]
            total_value: &'a M,
        }

        let mut rows: Vec<Row<'_, K, M>> = self
            .entries
            .iter()
            .map(|(label, entry)| Row {
                label,
                self_value: &entry.self_value,
                total_value: &entry.total_value,
            })
            .collect();
        rows.sort_by(|a, b| a.label.cmp(b.label));

        Ok(serde_json::to_string_pretty(&rows)?)
    }
}

/// Builds a per-label report using a caller-supplied combine operation.
///
/// The operation must be associative and commutative in effect (e.g.
/// addition, max); it is used both to fold child totals into a node's total
/// and to merge same-label entries.
///
/// The recorder's re-entrancy flag is held for the duration of the walk.
pub fn build_report<S, M, Op>(recorder: &mut Recorder<S, M>, combine: Op) -> Report<S::Resolved, M>
where
    S: LabelScheme,
    M: Clone,
    Op: Fn(M, M) -> M,
{
    let root = recorder.root();
    recorder.set_busy(true);
    let mut report = Report {
        entries: HashMap::new(),
    };
    fold_node(recorder, root, &combine, &mut report);
    recorder.set_busy(false);
    report
}

/// Builds a per-label report with `+` as the combine operation.
pub fn build_report_summed<S, M>(recorder: &mut Recorder<S, M>) -> Report<S::Resolved, M>
where
    S: LabelScheme,
    M: Clone + Add<Output = M>,
{
    build_report(recorder, |a, b| a + b)
}

/// Post-order fold: returns the node's total and records its label entry.
fn fold_node<S, M, Op>(
    recorder: &Recorder<S, M>,
    id: usize,
    combine: &Op,
    report: &mut Report<S::Resolved, M>,
) -> M
where
    S: LabelScheme,
    M: Clone,
    Op: Fn(M, M) -> M,
{
    let own = recorder.node_measure(id).clone();
    let mut total = own.clone();
    for &child in recorder.node_children(id) {
        total = combine(total, fold_node(recorder, child, combine, report));
    }

    let label = recorder.labels().resolve(recorder.node_label(id));
    match report.entries.entry(label) {
        std::collections::hash_map::Entry::Occupied(mut entry) => {
            let entry = entry.get_mut();
            entry.self_value = combine(entry.self_value.clone(), own);
            entry.total_value = combine(entry.total_value.clone(), total.clone());
        }
        std::collections::hash_map::Entry::Vacant(slot) => {
            slot.insert(ReportEntry {
                self_value: own,
                total_value: total.clone(),
            });
        }
    }

    total
}
