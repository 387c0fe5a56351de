//! Guiders — turn an observed event trace into a coverage verdict.
//!
//! A guider owns the monotone coverage sets (abstract states, state
//! transitions, covered source lines) and answers one question per
//! iteration: did this trace discover anything new, and how much? The
//! answer drives descendant production in the fuzz loop.

use crate::checker::{normalize_repr, CheckerClient, CheckerState};
use crate::source_coverage::{self, SourceCoverageConfig as XmlConfig};
use log::{debug, warn};
use raftfuzz_model::{EventTrace, Trace};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

pub use crate::source_coverage::SourceCoverageConfig;

/// What one `check` discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckReport {
    /// Whether the iteration deserves descendants at all.
    pub is_new: bool,
    /// Abstract states never seen before.
    pub new_states: usize,
    /// State transitions never seen before.
    pub new_transitions: usize,
    /// `(file, line)` pairs never covered before.
    pub new_lines: usize,
}

/// State-coverage guider: coverage is the set of abstract states the model
/// checker reports for the trace.
pub struct StateGuider {
    checker: CheckerClient,
    seen_states: HashSet<i64>,
    transitions: HashMap<i64, HashSet<i64>>,
    covered_lines: HashMap<String, HashSet<u32>>,
    record_dir: PathBuf,
    source_coverage: Option<XmlConfig>,
}

impl StateGuider {
    /// `checker_addr` is `host:port`; promising traces are recorded under
    /// `record_dir`.
    pub fn new(checker_addr: &str, record_dir: impl Into<PathBuf>) -> Self {
        Self {
            checker: CheckerClient::new(checker_addr),
            seen_states: HashSet::new(),
            transitions: HashMap::new(),
            covered_lines: HashMap::new(),
            record_dir: record_dir.into(),
            source_coverage: None,
        }
    }

    /// Enable code-coverage feedback via an external report generator.
    pub fn with_source_coverage(mut self, config: XmlConfig) -> Self {
        self.source_coverage = Some(config);
        self
    }

    /// Ship the trace to the checker and update every coverage set.
    ///
    /// An unreachable checker is not an error here: the report comes back
    /// all-zero and the iteration still counts.
    pub async fn check(
        &mut self,
        name: &str,
        schedule: &Trace,
        events: &EventTrace,
        record: bool,
    ) -> CheckReport {
        let states = match self.checker.send_trace(events).await {
            Ok(states) => states,
            Err(err) => {
                warn!("model checker unavailable: {err}");
                return CheckReport::default();
            }
        };

        if record {
            self.record_trace(name, schedule, events, &states);
        }

        let mut report = CheckReport::default();
        for state in &states {
            if self.seen_states.insert(state.key) {
                report.new_states += 1;
            }
        }
        for pair in states.windows(2) {
            if self
                .transitions
                .entry(pair[0].key)
                .or_default()
                .insert(pair[1].key)
            {
                report.new_transitions += 1;
            }
        }

        if self.source_coverage.is_some() {
            report.new_lines = self.collect_source_coverage().await;
        }

        report.is_new = report.new_states > 0;
        report
    }

    /// `|seen_states|`.
    pub fn state_coverage(&self) -> usize {
        self.seen_states.len()
    }

    /// Total distinct `(previous, successor)` pairs.
    pub fn transition_coverage(&self) -> usize {
        self.transitions.values().map(HashSet::len).sum()
    }

    /// Total distinct covered `(file, line)` pairs.
    pub fn line_coverage(&self) -> usize {
        self.covered_lines.values().map(HashSet::len).sum()
    }

    /// Clear the state set.
    ///
    /// Transitions and source-line coverage deliberately survive a reset;
    /// only state coverage is rewound.
    pub fn reset(&mut self) {
        self.seen_states.clear();
    }

    /// Regenerate the agent's XML report and fold it into `covered_lines`.
    async fn collect_source_coverage(&mut self) -> usize {
        let Some(config) = &self.source_coverage else {
            return 0;
        };
        let Some((program, args)) = config.report_command.split_first() else {
            return 0;
        };

        match tokio::process::Command::new(program).args(args).status().await {
            Ok(status) if status.success() => {}
            Ok(status) => {
                warn!("coverage report generator exited with {status}");
                return 0;
            }
            Err(err) => {
                warn!("failed to run coverage report generator: {err}");
                return 0;
            }
        }

        let xml = match std::fs::read_to_string(&config.xml_path) {
            Ok(xml) => xml,
            Err(err) => {
                warn!("failed to read coverage report: {err}");
                return 0;
            }
        };
        match source_coverage::parse_report(&xml) {
            Ok(report) => source_coverage::update_coverage(&report, &mut self.covered_lines),
            Err(err) => {
                warn!("failed to parse coverage report: {err}");
                0
            }
        }
    }

    /// Persist `{trace, event_trace, state_trace}` for replay and debugging.
    fn record_trace(
        &self,
        name: &str,
        schedule: &Trace,
        events: &EventTrace,
        states: &[CheckerState],
    ) {
        let state_trace: Vec<CheckerState> = states
            .iter()
            .map(|s| CheckerState {
                key: s.key,
                repr: normalize_repr(&s.repr),
            })
            .collect();
        let record = json!({
            "trace": schedule,
            "event_trace": events,
            "state_trace": state_trace,
        });

        let path = self.record_dir.join(format!("{name}.json"));
        let data = match serde_json::to_vec_pretty(&record) {
            Ok(data) => data,
            Err(err) => {
                debug!("failed to serialize recorded trace: {err}");
                return;
            }
        };
        if let Err(err) = std::fs::write(&path, data) {
            debug!("failed to record trace to {}: {err}", path.display());
        }
    }
}

/// One event in the per-node linked-list view of a trace.
#[derive(Serialize)]
struct EventNode {
    name: String,
    params: serde_json::Map<String, serde_json::Value>,
    node: String,
    prev: String,
}

/// SHA-256 over the normalised per-node linked-list form of the trace.
///
/// Each event is chained to the previous event observed on the same node;
/// the trace hash is the hash of the id-keyed map of all chained events, so
/// two traces collide exactly when every node saw the same event sequence.
fn node_trace_hash(events: &EventTrace) -> String {
    let mut nodes: BTreeMap<String, EventNode> = BTreeMap::new();
    let mut last_on_node: HashMap<String, String> = HashMap::new();

    for event in events.iter() {
        let prev = last_on_node.get(&event.node).cloned().unwrap_or_default();
        let entry = EventNode {
            name: event.name.clone(),
            params: event.params.clone(),
            node: event.node.clone(),
            prev,
        };
        let encoded = serde_json::to_vec(&entry).unwrap_or_default();
        let id = hex::encode(Sha256::digest(&encoded));
        last_on_node.insert(event.node.clone(), id.clone());
        nodes.insert(id, entry);
    }

    let encoded = serde_json::to_vec(&nodes).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}

/// Trace-coverage guider: composes the state guider and additionally treats
/// a never-before-seen normalised trace as new coverage.
pub struct TraceGuider {
    inner: StateGuider,
    seen_traces: HashSet<String>,
}

impl TraceGuider {
    pub fn new(checker_addr: &str, record_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: StateGuider::new(checker_addr, record_dir),
            seen_traces: HashSet::new(),
        }
    }

    pub async fn check(
        &mut self,
        name: &str,
        schedule: &Trace,
        events: &EventTrace,
        record: bool,
    ) -> CheckReport {
        // Keep the state sets warm for the coverage statistics.
        let _ = self.inner.check(name, schedule, events, record).await;

        let fresh = self.seen_traces.insert(node_trace_hash(events));
        CheckReport {
            is_new: fresh,
            new_states: usize::from(fresh),
            new_transitions: 0,
            new_lines: 0,
        }
    }

    pub fn state_coverage(&self) -> usize {
        self.inner.state_coverage()
    }

    pub fn transition_coverage(&self) -> usize {
        self.inner.transition_coverage()
    }

    pub fn line_coverage(&self) -> usize {
        self.inner.line_coverage()
    }

    pub fn reset(&mut self) {
        self.seen_traces.clear();
        self.inner.reset();
    }
}

/// The guider the driver runs with.
pub enum Guider {
    State(StateGuider),
    Trace(TraceGuider),
}

impl Guider {
    pub async fn check(
        &mut self,
        name: &str,
        schedule: &Trace,
        events: &EventTrace,
        record: bool,
    ) -> CheckReport {
        match self {
            Guider::State(g) => g.check(name, schedule, events, record).await,
            Guider::Trace(g) => g.check(name, schedule, events, record).await,
        }
    }

    pub fn state_coverage(&self) -> usize {
        match self {
            Guider::State(g) => g.state_coverage(),
            Guider::Trace(g) => g.state_coverage(),
        }
    }

    pub fn transition_coverage(&self) -> usize {
        match self {
            Guider::State(g) => g.transition_coverage(),
            Guider::Trace(g) => g.transition_coverage(),
        }
    }

    pub fn line_coverage(&self) -> usize {
        match self {
            Guider::State(g) => g.line_coverage(),
            Guider::Trace(g) => g.line_coverage(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Guider::State(g) => g.reset(),
            Guider::Trace(g) => g.reset(),
        }
    }
}
