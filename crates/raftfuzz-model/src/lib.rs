//! Schedule and event-trace value types for raftfuzz.
//!
//! This crate holds the two data structures the rest of the fuzzer moves
//! around:
//!
//! 1. **[`Trace`]** — a planned schedule: one [`Choice`] per scheduling
//!    decision (message delivery, crash, client request).
//! 2. **[`EventTrace`]** — the observed behaviour: the ordered sequence of
//!    [`Event`]s the interceptor recorded while the schedule ran.
//!
//! Both are plain values with structural copy semantics: cloning a trace and
//! mutating the clone never affects the original. There is no identity;
//! equality is structural.

pub mod choice;
pub mod event;
pub mod stats;

pub use choice::{Choice, Trace};
pub use event::{Event, EventTrace};
pub use stats::Stats;
