//! Collapsed-stack text output
//!
//! Renders a recorder's scope tree in the line format consumed by flamegraph
//! visualizers: one line per tree node, interior nodes included, of the form
//!
//! ```text
//! label_0;label_1;...;label_k <measure>\n
//! ```
//!
//! where `label_0` is the root and `label_k` the node itself. Label and
//! measure rendering are caller-supplied, so the same walk serves elapsed
//! time, heap bytes, or any other measure.

use std::fmt::Display;
use std::io::{self, Write};

use crate::labels::LabelScheme;
use crate::recorder::Recorder;

/// Writes the whole tree as collapsed stacks using caller-supplied
/// formatters for labels and measures.
///
/// The recorder's re-entrancy flag is held for the duration of the walk so
/// that allocations made while formatting are not counted as application
/// events.
///
/// # Example
///
/// ```
/// use std::io::Write;
///
/// use medir::collapsed::write_collapsed_stacks;
/// use medir::recorder::Recorder;
///
/// let mut rec = Recorder::interned(0u64, "root", 1).unwrap();
/// rec.begin_scope("f1").unwrap();
/// *rec.cnt_mut() = 2;
/// rec.end_scope().unwrap();
///
/// let mut out = Vec::new();
/// write_collapsed_stacks(
///     &mut rec,
///     &mut out,
///     |w, label| write!(w, "{label}"),
///     |w, measure| write!(w, "{measure}"),
/// )
/// .unwrap();
/// assert_eq!(String::from_utf8(out).unwrap(), "root 1\nroot;f1 2\n");
/// ```
pub fn write_collapsed_stacks<S, M, W, FL, FM>(
    recorder: &mut Recorder<S, M>,
    out: &mut W,
    mut label_fmt: FL,
    mut measure_fmt: FM,
) -> io::Result<()>
where
    S: LabelScheme,
    M: Clone,
    W: Write,
    FL: FnMut(&mut W, &S::Resolved) -> io::Result<()>,
    FM: FnMut(&mut W, &M) -> io::Result<()>,
{
    let root = recorder.root();
    recorder.set_busy(true);
    let result = emit_node(recorder, root, out, &mut label_fmt, &mut measure_fmt);
    recorder.set_busy(false);
    result
}

/// Convenience form for label and measure types that implement `Display`.
pub fn write_collapsed_stacks_display<S, M, W>(
    recorder: &mut Recorder<S, M>,
    out: &mut W,
) -> io::Result<()>
where
    S: LabelScheme,
    S::Resolved: Display,
    M: Clone + Display,
    W: Write,
{
    write_collapsed_stacks(
        recorder,
        out,
        |w, label| write!(w, "{label}"),
        |w, measure| write!(w, "{measure}"),
    )
}

/// Pre-order emission: this node's line, then its children in first-seen
/// order.
fn emit_node<S, M, W, FL, FM>(
    recorder: &Recorder<S, M>,
    id: usize,
    out: &mut W,
    label_fmt: &mut FL,
    measure_fmt: &mut FM,
) -> io::Result<()>
where
    S: LabelScheme,
    M: Clone,
    W: Write,
    FL: FnMut(&mut W, &S::Resolved) -> io::Result<()>,
    FM: FnMut(&mut W, &M) -> io::Result<()>,
{
    emit_stack(recorder, id, out, label_fmt)?;
    out.write_all(b" ")?;
    measure_fmt(out, recorder.node_measure(id))?;
    out.write_all(b"\n")?;

    for &child in recorder.node_children(id) {
        emit_node(recorder, child, out, label_fmt, measure_fmt)?;
    }
    Ok(())
}

/// Emits the ancestor chain from the root down to `id`, `;`-separated.
fn emit_stack<S, M, W, FL>(
    recorder: &Recorder<S, M>,
    id: usize,
    out: &mut W,
    label_fmt: &mut FL,
) -> io::Result<()>
where
    S: LabelScheme,
    M: Clone,
    W: Write,
    FL: FnMut(&mut W, &S::Resolved) -> io::Result<()>,
{
    if let Some(parent) = recorder.node_parent(id) {
        emit_stack(recorder, parent, out, label_fmt)?;
        out.write_all(b";")?;
    }
    label_fmt(out, &recorder.labels().resolve(recorder.node_label(id)))
}
