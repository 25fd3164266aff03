//! Label schemes: how scope labels are saved, matched and resolved
//!
//! The recorder never compares labels itself; it delegates to a
//! [`LabelScheme`]. Plain labels (enums, integers, pointers) are stored on
//! tree nodes as-is and compared with `==`. String labels go through the
//! interning table so each distinct content is stored once and nodes carry
//! only a compact offset.

use std::hash::Hash;
use std::marker::PhantomData;

use crate::error::Result;
use crate::interner::LabelInterner;

/// Conversion and comparison contract between the label forms.
///
/// - `Query` is what the application passes to `begin_scope`/`end_scope`
///   (possibly unsized, e.g. `str`).
/// - `Stored` is the compact per-node form (a `Copy` value).
/// - `Resolved` is the owned external form used as report keys and for
///   rendering.
///
/// Matching a stored label against a query must be structural: an interned
/// offset is dereferenced back to its content and compared byte-for-byte,
/// never by raw offset, because queries arrive as content that may not have
/// been interned yet.
pub trait LabelScheme {
    /// Label form supplied at scope boundaries.
    type Query: ?Sized;
    /// Compact form stored on tree nodes.
    type Stored: Copy;
    /// Owned form used as report keys and for rendering.
    type Resolved: Clone + Eq + Hash;

    /// Converts a query into the stored form, recording it if needed.
    fn save(&mut self, query: &Self::Query) -> Result<Self::Stored>;

    /// True if the stored label denotes the same label as the query.
    fn matches(&self, stored: Self::Stored, query: &Self::Query) -> bool;

    /// Converts a stored label back to its external form.
    fn resolve(&self, stored: Self::Stored) -> Self::Resolved;
}

/// Scheme for labels that need no interning: enums, integers, addresses.
///
/// The label value itself is stored on the node and compared with `==`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainLabels<L> {
    _marker: PhantomData<L>,
}

impl<L> PlainLabels<L> {
    pub fn new() -> Self {
        PlainLabels {
            _marker: PhantomData,
        }
    }
}

impl<L> LabelScheme for PlainLabels<L>
where
    L: Copy + Eq + Hash,
{
    type Query = L;
    type Stored = L;
    type Resolved = L;

    fn save(&mut self, query: &L) -> Result<L> {
        Ok(*query)
    }

    fn matches(&self, stored: L, query: &L) -> bool {
        stored == *query
    }

    fn resolve(&self, stored: L) -> L {
        stored
    }
}

/// Scheme for `&str` labels backed by the interning table.
///
/// Nodes store a `u32` offset into the interner buffer; matching
/// dereferences the offset and compares content.
#[derive(Debug, Default, Clone)]
pub struct InternedLabels {
    db: LabelInterner,
}

impl InternedLabels {
    pub fn new() -> Self {
        InternedLabels {
            db: LabelInterner::new(),
        }
    }

    /// Uses an existing interner, e.g. one pre-seeded with known labels.
    pub fn with_interner(db: LabelInterner) -> Self {
        InternedLabels { db }
    }

    /// Read access to the backing interner.
    pub fn interner(&self) -> &LabelInterner {
        &self.db
    }
}

impl LabelScheme for InternedLabels {
    type Query = str;
    type Stored = u32;
    type Resolved = String;

    fn save(&mut self, query: &str) -> Result<u32> {
        self.db.push_back(query)
    }

    fn matches(&self, stored: u32, query: &str) -> bool {
        // The query must be compared in its stored (NUL-truncated) form, or
        // a label with an interior NUL would never match its own entry.
        self.db.content_eq(stored, query)
    }

    fn resolve(&self, stored: u32) -> String {
        self.db.get(stored).to_owned()
    }
}
