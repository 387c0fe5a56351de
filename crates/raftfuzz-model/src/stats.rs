//! Per-run statistics, serialized between iterations.

use serde::{Deserialize, Serialize};

/// Cumulative fuzzing statistics.
///
/// The coverage arrays grow by one entry per iteration and record the
/// cardinality of the guider's sets after that iteration. The trace counters
/// record how the executed schedule was obtained.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stats {
    /// `|seen_states|` after each iteration.
    pub coverages: Vec<usize>,
    /// `|state_transitions|` after each iteration.
    pub transition_coverages: Vec<usize>,
    /// `|covered_source_lines|` after each iteration.
    pub line_coverages: Vec<usize>,
    /// Iterations that ran a freshly-generated random schedule.
    pub random_traces: usize,
    /// Iterations that ran a schedule taken from the mutation queue.
    pub mutated_traces: usize,
}

impl Stats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of iterations recorded so far.
    pub fn iterations(&self) -> usize {
        self.coverages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_empty() {
        let stats = Stats::new();
        assert_eq!(stats.iterations(), 0);
        assert_eq!(stats.random_traces, 0);
        assert_eq!(stats.mutated_traces, 0);
    }

    #[test]
    fn serde_round_trip() {
        let stats = Stats {
            coverages: vec![3, 5, 5],
            transition_coverages: vec![2, 4, 6],
            line_coverages: vec![0, 0, 0],
            random_traces: 2,
            mutated_traces: 1,
        };

        let json = serde_json::to_string_pretty(&stats).unwrap();
        let back: Stats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
