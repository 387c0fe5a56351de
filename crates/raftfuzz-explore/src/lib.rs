//! Coverage-guided fuzz loop for Raft replica binaries.
//!
//! This crate ties the rest of raftfuzz together:
//!
//! 1. The [`fuzzer`] drives iterations: it generates or dequeues a schedule,
//!    brings a replica cluster up behind the interceptor, replays the
//!    schedule step by step, and tears everything down.
//! 2. The [`guider`] ships the observed event trace to an external model
//!    checker ([`checker`]) and measures how many abstract states,
//!    transitions, and (optionally) source lines the iteration discovered.
//! 3. When an iteration discovers something, the [`mutator`]s derive
//!    descendant schedules that are queued for later iterations.
//!
//! There is no correctness oracle: coverage growth is the only signal. All
//! schedule generation and mutation is deterministic given the CLI seed.

pub mod checker;
pub mod fuzzer;
pub mod guider;
pub mod mutator;
pub mod source_coverage;

pub use checker::{CheckerClient, CheckerError, CheckerState};
pub use fuzzer::{FuzzError, Fuzzer, FuzzerConfig, FuzzerKind, MutationMode};
pub use guider::{CheckReport, Guider, StateGuider, TraceGuider};
pub use source_coverage::SourceCoverageConfig;
pub use mutator::{
    CombinedMutator, Mutator, SwapCrashNodeMutator, SwapMaxMessagesMutator, SwapNodeMutator,
};
