//! Medir - in-process scope profiler with flamegraph-compatible reporting
//!
//! This library builds a per-thread call/scope tree annotated with an
//! arbitrary numeric measure (elapsed thread CPU time, live heap bytes, any
//! accumulator) and renders it as collapsed-stack text or a per-label
//! self/total report. The application marks scope boundaries itself, which
//! makes the profiler usable where sampling profilers are not: production
//! builds, embedded targets, environments without a profiling syscall
//! surface.
//!
//! Scope labels may be plain values (enums, integers, addresses) or interned
//! strings; an opt-in heap overlay attributes allocation traffic to the
//! current scope.

pub mod collapsed;
pub mod context;
pub mod error;
pub mod heap;
pub mod interner;
pub mod labels;
pub mod recorder;
pub mod report;
pub mod thread_time;
