//! Scope tree recorder
//!
//! The recorder owns a rooted tree of scope nodes, one per distinct call
//! position, and tracks the "current" node as the application enters and
//! leaves labeled scopes. Each node carries an opaque measure the recorder
//! never interprets; measurement sources (clock deltas, allocation deltas)
//! deposit values through [`cnt_mut`](Recorder::cnt_mut).
//!
//! One recorder instance is owned by exactly one thread. There is no locking
//! and no shared mutable state between recorders; cross-thread aggregation is
//! done offline on the emitted reports.
//!
//! The tree is arena-backed: nodes live in a `Vec` and refer to each other by
//! index, so parent back-references need no shared ownership.

use std::ops::{Deref, DerefMut};

use crate::error::{Error, Result};
use crate::labels::{InternedLabels, LabelScheme, PlainLabels};

/// Index of the root node in the arena.
const ROOT: usize = 0;

/// Counter access contract for components that are not interested in labels.
///
/// This is the hook through which external measurement sources feed the
/// current scope. Consumers that may be triggered by the recorder's own
/// bookkeeping (notably the heap overlay) must skip counting while
/// [`recorder_internal_running`](CounterAccess::recorder_internal_running)
/// is true.
pub trait CounterAccess<M> {
    /// Reads the counter of the current scope.
    fn cnt(&self) -> &M;

    /// Writes the counter of the current scope.
    fn cnt_mut(&mut self) -> &mut M;

    /// True while the recorder is performing internal bookkeeping.
    fn recorder_internal_running(&self) -> bool;
}

/// One scope node in the arena.
#[derive(Debug, Clone)]
struct Node<L, M> {
    label: L,
    measure: M,
    parent: Option<usize>,
    /// Child arena indices, first-seen order. No two children of one node
    /// carry labels that compare equal under the scheme.
    children: Vec<usize>,
}

/// Per-thread scope tree recorder.
///
/// Generic over the label scheme `S` (plain or interned labels) and the
/// measure type `M` (elapsed time, heap bytes, plain integers, ...).
///
/// # Example
///
/// ```
/// use medir::recorder::Recorder;
///
/// let mut rec = Recorder::interned(0u64, "root", 0).unwrap();
/// rec.begin_scope("parse").unwrap();
/// *rec.cnt_mut() += 42;
/// rec.end_scope().unwrap();
/// assert!(rec.at_root());
/// ```
pub struct Recorder<S: LabelScheme, M> {
    labels: S,
    nodes: Vec<Node<S::Stored, M>>,
    current: usize,
    default_measure: M,
    /// Re-entrancy flag: true while the recorder mutates the tree or the
    /// interner, so counter sources do not mistake that bookkeeping for
    /// application events. Intra-thread only, not a concurrency primitive.
    busy: bool,
}

impl<S: LabelScheme, M: Clone> Recorder<S, M> {
    /// Creates a recorder with an explicit label scheme.
    ///
    /// `default_measure` initializes every newly created node; the root is
    /// created immediately with `root_label` and `root_measure`.
    pub fn new(
        mut labels: S,
        default_measure: M,
        root_label: &S::Query,
        root_measure: M,
    ) -> Result<Self> {
        let stored = labels.save(root_label)?;
        Ok(Recorder {
            labels,
            nodes: vec![Node {
                label: stored,
                measure: root_measure,
                parent: None,
                children: Vec::new(),
            }],
            current: ROOT,
            default_measure,
            busy: false,
        })
    }

    /// Enters the scope `label`.
    ///
    /// If the current node already has a child whose label compares equal,
    /// the recorder moves to it; otherwise a new child initialized with the
    /// default measure is appended. The child list is scanned linearly:
    /// branching factor per call site is small in practice, and this avoids
    /// per-node hash-map overhead.
    pub fn begin_scope(&mut self, label: &S::Query) -> Result<()> {
        self.busy = true;
        let result = self.begin_scope_inner(label);
        self.busy = false;
        result
    }

    fn begin_scope_inner(&mut self, label: &S::Query) -> Result<()> {
        let mut found = None;
        for &child in &self.nodes[self.current].children {
            if self.labels.matches(self.nodes[child].label, label) {
                found = Some(child);
                break;
            }
        }

        let next = match found {
            Some(id) => id,
            None => {
                let stored = self.labels.save(label)?;
                // Reserve before mutating so a failed growth leaves the
                // tree unchanged.
                self.nodes.try_reserve(1)?;
                self.nodes[self.current].children.try_reserve(1)?;

                let id = self.nodes.len();
                self.nodes.push(Node {
                    label: stored,
                    measure: self.default_measure.clone(),
                    parent: Some(self.current),
                    children: Vec::new(),
                });
                self.nodes[self.current].children.push(id);
                id
            }
        };

        self.current = next;
        Ok(())
    }

    /// Leaves the current scope, moving back to its parent.
    ///
    /// # Errors
    ///
    /// [`Error::StackUnderflow`] if the recorder is already at the root.
    pub fn end_scope(&mut self) -> Result<()> {
        self.busy = true;
        let result = match self.nodes[self.current].parent {
            Some(parent) => {
                self.current = parent;
                Ok(())
            }
            None => Err(Error::StackUnderflow),
        };
        self.busy = false;
        result
    }

    /// Leaves the current scope, first checking that its label matches
    /// `label`. A caller-supplied consistency check for begin/end pairs.
    ///
    /// # Errors
    ///
    /// [`Error::LabelMismatch`] if the current label differs,
    /// [`Error::StackUnderflow`] if the recorder is at the root. On either
    /// error the current position is unchanged.
    pub fn end_scope_labeled(&mut self, label: &S::Query) -> Result<()> {
        self.busy = true;
        let result = if self.nodes[self.current].parent.is_none() {
            Err(Error::StackUnderflow)
        } else if !self.labels.matches(self.nodes[self.current].label, label) {
            Err(Error::LabelMismatch)
        } else {
            // Checked above that a parent exists.
            self.current = self.nodes[self.current].parent.unwrap_or(ROOT);
            Ok(())
        };
        self.busy = false;
        result
    }

    /// Enters `label` and returns a guard that ends the scope exactly once
    /// when dropped, on every exit path including early return and unwind.
    pub fn scope(&mut self, label: &S::Query) -> Result<ScopeGuard<'_, S, M>> {
        self.begin_scope(label)?;
        Ok(ScopeGuard { recorder: self })
    }

    /// Reads the counter of the current scope.
    pub fn cnt(&self) -> &M {
        &self.nodes[self.current].measure
    }

    /// Writes the counter of the current scope. This is the hook through
    /// which measurement sources deposit values; the recorder never
    /// interprets the measure itself.
    pub fn cnt_mut(&mut self) -> &mut M {
        &mut self.nodes[self.current].measure
    }

    /// True while the recorder is performing internal bookkeeping.
    pub fn recorder_internal_running(&self) -> bool {
        self.busy
    }

    /// True if the current position is the root.
    pub fn at_root(&self) -> bool {
        self.current == ROOT
    }

    /// Nesting depth of the current position; 0 at the root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut at = self.current;
        while let Some(parent) = self.nodes[at].parent {
            depth += 1;
            at = parent;
        }
        depth
    }

    /// Total number of nodes in the tree, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The label scheme, e.g. for resolving interned offsets.
    pub fn labels(&self) -> &S {
        &self.labels
    }

    // -- tree access for the report emitters ---------------------------------

    pub(crate) fn root(&self) -> usize {
        ROOT
    }

    pub(crate) fn node_label(&self, id: usize) -> S::Stored {
        self.nodes[id].label
    }

    pub(crate) fn node_measure(&self, id: usize) -> &M {
        &self.nodes[id].measure
    }

    pub(crate) fn node_parent(&self, id: usize) -> Option<usize> {
        self.nodes[id].parent
    }

    pub(crate) fn node_children(&self, id: usize) -> &[usize] {
        &self.nodes[id].children
    }

    pub(crate) fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }
}

impl<L, M> Recorder<PlainLabels<L>, M>
where
    L: Copy + Eq + std::hash::Hash,
    M: Clone,
{
    /// Creates a recorder over plain labels (enums, integers, addresses).
    pub fn plain(default_measure: M, root_label: L, root_measure: M) -> Result<Self> {
        Self::new(PlainLabels::new(), default_measure, &root_label, root_measure)
    }
}

impl<M: Clone> Recorder<InternedLabels, M> {
    /// Creates a recorder over interned string labels.
    pub fn interned(default_measure: M, root_label: &str, root_measure: M) -> Result<Self> {
        Self::new(InternedLabels::new(), default_measure, root_label, root_measure)
    }
}

impl<S: LabelScheme, M: Clone> CounterAccess<M> for Recorder<S, M> {
    fn cnt(&self) -> &M {
        Recorder::cnt(self)
    }

    fn cnt_mut(&mut self) -> &mut M {
        Recorder::cnt_mut(self)
    }

    fn recorder_internal_running(&self) -> bool {
        Recorder::recorder_internal_running(self)
    }
}

/// RAII wrapper pairing one `begin_scope` with exactly one `end_scope`.
///
/// Created by [`Recorder::scope`]. Dereferences to the recorder so the
/// current counter stays accessible inside the scope.
pub struct ScopeGuard<'a, S: LabelScheme, M: Clone> {
    recorder: &'a mut Recorder<S, M>,
}

impl<S: LabelScheme, M: Clone> Deref for ScopeGuard<'_, S, M> {
    type Target = Recorder<S, M>;

    fn deref(&self) -> &Self::Target {
        self.recorder
    }
}

impl<S: LabelScheme, M: Clone> DerefMut for ScopeGuard<'_, S, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.recorder
    }
}

impl<S: LabelScheme, M: Clone> Drop for ScopeGuard<'_, S, M> {
    fn drop(&mut self) {
        // The guard was constructed after a successful begin_scope, so the
        // recorder cannot be at the root here.
        let _ = self.recorder.end_scope();
    }
}
