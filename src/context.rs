//! Per-thread recorder context
//!
//! An explicit thread-local slot holding the thread's heap-profiled
//! recorder, lazily initialized on first use so construction order across
//! independent compilation units is never relied upon. This is the hookup
//! the heap overlay uses to reach "whichever recorder is current on this
//! thread".
//!
//! There is deliberately no cross-thread sharing here: each thread owns its
//! recorder outright, and aggregation across threads happens offline on the
//! emitted reports.

use std::cell::RefCell;

use crate::error::Result;
use crate::heap::HeapUsage;
use crate::labels::InternedLabels;
use crate::recorder::Recorder;

/// Recorder type held by the thread-local context.
pub type HeapRecorder = Recorder<InternedLabels, HeapUsage>;

/// Root label used when the context is initialized lazily.
const DEFAULT_ROOT_LABEL: &str = "root";

thread_local! {
    static CONTEXT: RefCell<Option<HeapRecorder>> = const { RefCell::new(None) };
}

/// Initializes this thread's recorder with an explicit root label.
///
/// A no-op if the context is already initialized (e.g. lazily through
/// [`with`]).
pub fn init(root_label: &str) -> Result<()> {
    CONTEXT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            tracing::debug!(root_label, "initializing thread heap recorder");
            *slot = Some(Recorder::interned(
                HeapUsage::default(),
                root_label,
                HeapUsage::default(),
            )?);
        }
        Ok(())
    })
}

/// Runs `f` against this thread's recorder, initializing it with the
/// default root label on first use.
///
/// Returns `None` when the recorder is unavailable: initialization failed,
/// or the context is already borrowed further up the stack (a re-entrant
/// call through an allocation hook). Skipping the access in that case keeps
/// the hook path from double-counting or deadlocking on the slot.
pub fn with<R>(f: impl FnOnce(&mut HeapRecorder) -> R) -> Option<R> {
    CONTEXT.with(|slot| {
        let mut slot = slot.try_borrow_mut().ok()?;
        if slot.is_none() {
            *slot = Some(
                Recorder::interned(
                    HeapUsage::default(),
                    DEFAULT_ROOT_LABEL,
                    HeapUsage::default(),
                )
                .ok()?,
            );
        }
        slot.as_mut().map(f)
    })
}

/// Removes and returns this thread's recorder, typically at thread teardown
/// to emit its report. Subsequent [`with`] calls re-initialize lazily.
pub fn take() -> Option<HeapRecorder> {
    CONTEXT.with(|slot| {
        let taken = slot.borrow_mut().take();
        if taken.is_some() {
            tracing::debug!("detached thread heap recorder");
        }
        taken
    })
}
