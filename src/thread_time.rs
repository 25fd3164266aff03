//! Per-thread CPU time measurement
//!
//! Wraps the platform's per-thread CPU clock (`CLOCK_THREAD_CPUTIME_ID`)
//! and provides [`TimeValue`], a measure that accumulates the CPU time a
//! scope was the *current* scope: nested scopes bank their own time, so a
//! node's measure is its self time and the usual self/total report applies.
//!
//! Unix only: the clock is read through `nix`.

#![cfg(unix)]

use std::ops::Add;
use std::time::Duration;

use nix::time::{clock_gettime, ClockId};

use crate::error::Result;
use crate::labels::{InternedLabels, LabelScheme};
use crate::recorder::Recorder;

/// Reads the calling thread's CPU clock.
///
/// Returns zero if the clock is unavailable, mirroring a stopped clock
/// rather than failing instrumentation.
pub fn thread_cpu_now() -> Duration {
    clock_gettime(ClockId::CLOCK_THREAD_CPUTIME_ID)
        .map(|ts| Duration::new(ts.tv_sec().unsigned_abs(), ts.tv_nsec() as u32))
        .unwrap_or_default()
}

/// Accumulated thread CPU time for one scope.
///
/// Carries the accumulated duration plus the clock reading at which the
/// scope last became current; [`TimeScope`] banks the elapsed difference at
/// every scope transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeValue {
    accumulated: Duration,
    resumed_at: Duration,
}

impl TimeValue {
    /// A zero value stamped with the current clock reading.
    pub fn now() -> Self {
        TimeValue {
            accumulated: Duration::ZERO,
            resumed_at: thread_cpu_now(),
        }
    }

    /// The CPU time banked so far.
    pub fn duration(&self) -> Duration {
        self.accumulated
    }

    /// The banked time in whole microseconds, the unit typically fed to
    /// flamegraph renderers.
    pub fn as_micros(&self) -> u128 {
        self.accumulated.as_micros()
    }

    /// Adds the time elapsed since the scope last became current.
    fn bank(&mut self, now: Duration) {
        self.accumulated += now.saturating_sub(self.resumed_at);
    }

    /// Marks the scope as current from `now` on.
    fn resume(&mut self, now: Duration) {
        self.resumed_at = now;
    }
}

impl Add for TimeValue {
    type Output = TimeValue;

    fn add(self, rhs: TimeValue) -> TimeValue {
        TimeValue {
            accumulated: self.accumulated + rhs.accumulated,
            resumed_at: self.resumed_at,
        }
    }
}

/// Creates a time-measuring recorder over interned labels, with the root
/// stamped at the current clock reading.
pub fn time_recorder(root_label: &str) -> Result<Recorder<InternedLabels, TimeValue>> {
    Recorder::interned(TimeValue::default(), root_label, TimeValue::now())
}

/// RAII wrapper measuring the thread CPU time spent inside a scope.
///
/// On enter it banks the elapsed time into the enclosing scope, opens the
/// new scope, and stamps it; on drop it banks the scope's own time, closes
/// it, and restamps the enclosing scope. Use with a recorder whose root
/// measure was stamped (see [`time_recorder`]).
pub struct TimeScope<'a, S: LabelScheme> {
    recorder: &'a mut Recorder<S, TimeValue>,
}

impl<'a, S: LabelScheme> TimeScope<'a, S> {
    pub fn enter(
        recorder: &'a mut Recorder<S, TimeValue>,
        label: &S::Query,
    ) -> Result<Self> {
        let now = thread_cpu_now();
        recorder.cnt_mut().bank(now);
        recorder.begin_scope(label)?;
        let now = thread_cpu_now();
        recorder.cnt_mut().resume(now);
        Ok(TimeScope { recorder })
    }

    /// The recorder, e.g. for nesting further scopes.
    pub fn recorder(&mut self) -> &mut Recorder<S, TimeValue> {
        self.recorder
    }
}

impl<S: LabelScheme> Drop for TimeScope<'_, S> {
    fn drop(&mut self) {
        let now = thread_cpu_now();
        self.recorder.cnt_mut().bank(now);
        // Entered successfully, so the recorder cannot be at the root.
        let _ = self.recorder.end_scope();
        let now = thread_cpu_now();
        self.recorder.cnt_mut().resume(now);
    }
}
