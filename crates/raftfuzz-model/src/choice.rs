//! Scheduling choices — what happens at each step of an iteration.
//!
//! A [`Trace`] is the fuzzer's test input: an ordered list of [`Choice`]s
//! consumed one step at a time by the driver. Schedules carry exactly one
//! `DeliverEdge` per step; crashes and client requests are sparse overlays
//! keyed by step.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Choice {
    /// Deliver up to `max_messages` queued messages from `from` to `to`.
    DeliverEdge {
        /// Step index in `[0, horizon)`.
        step: usize,
        /// Sending node id in `[1, num_nodes]`.
        from: u32,
        /// Receiving node id in `[1, num_nodes]`.
        to: u32,
        /// How many buffered messages to release at most.
        max_messages: usize,
    },

    /// Stop and immediately restart `node`.
    Crash {
        /// Step index in `[0, horizon)`.
        step: usize,
        /// Node id in `[1, num_nodes]`.
        node: u32,
    },

    /// Issue one client write.
    ClientRequest {
        /// Step index in `[0, horizon)`.
        step: usize,
        /// Operation label (currently always "write").
        op: String,
    },
}

impl Choice {
    /// The step this choice fires at.
    pub fn step(&self) -> usize {
        match self {
            Choice::DeliverEdge { step, .. }
            | Choice::Crash { step, .. }
            | Choice::ClientRequest { step, .. } => *step,
        }
    }

    /// Whether this is a `DeliverEdge` choice.
    pub fn is_deliver(&self) -> bool {
        matches!(self, Choice::DeliverEdge { .. })
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Choice::DeliverEdge {
                step,
                from,
                to,
                max_messages,
            } => write!(f, "deliver(step={step}, {from}->{to}, max={max_messages})"),
            Choice::Crash { step, node } => write!(f, "crash(step={step}, node={node})"),
            Choice::ClientRequest { step, op } => write!(f, "client-request(step={step}, op={op})"),
        }
    }
}

/// An ordered sequence of choices — one fuzzer input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    choices: Vec<Choice>,
}

impl Trace {
    /// Create an empty schedule.
    pub fn new() -> Self {
        Self {
            choices: Vec::new(),
        }
    }

    /// Append a choice.
    pub fn add(&mut self, choice: Choice) {
        self.choices.push(choice);
    }

    /// All choices in insertion order.
    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    /// Mutable access for the mutation engine.
    pub fn choices_mut(&mut self) -> &mut [Choice] {
        &mut self.choices
    }

    /// Number of choices.
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    /// Whether the schedule holds no choices.
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Iterate over choices in order.
    pub fn iter(&self) -> impl Iterator<Item = &Choice> {
        self.choices.iter()
    }
}
