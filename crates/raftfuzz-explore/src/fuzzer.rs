//! The fuzz loop: seed, execute, observe, mutate, repeat.

use crate::guider::{Guider, StateGuider, TraceGuider};
use crate::mutator::{CombinedMutator, Mutator};
use crate::source_coverage::SourceCoverageConfig;
use log::{debug, error, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use raftfuzz_cluster::{Cluster, ClusterConfig};
use raftfuzz_intercept::{InterceptError, Interceptor};
use raftfuzz_model::{Choice, Event, Stats, Trace};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Cap on the score before it multiplies into descendant count.
const MAX_SCORE: usize = 20;
/// How often `stats.json` is rewritten.
const STATS_FLUSH_INTERVAL: usize = 5;

/// Errors that abort the whole fuzzing run.
///
/// Per-iteration failures (replicas that will not start, an unreachable
/// checker, filesystem hiccups while recording) are logged and absorbed;
/// only configuration-level problems surface here.
#[derive(Debug, Error)]
pub enum FuzzError {
    #[error(transparent)]
    Intercept(#[from] InterceptError),

    #[error(transparent)]
    Cluster(#[from] raftfuzz_cluster::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Which fuzzer variant runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzerKind {
    /// Fresh random schedule every iteration; no queue, no mutation.
    Random,
    /// Coverage-guided on model-checker states.
    StateGuided,
    /// Coverage-guided on normalised trace hashes.
    TraceGuided,
}

/// Which coverage metric drives descendant production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMode {
    StateCoverage,
    TransitionCoverage,
    CodeAndStateCoverage,
}

/// Immutable configuration for one fuzzing run.
#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    pub horizon: usize,
    pub iterations: usize,
    pub num_nodes: u32,
    /// Interceptor listen port (0 picks an ephemeral port).
    pub network_port: u16,
    /// Root of all per-iteration working directories; wiped at start.
    pub base_work_dir: PathBuf,
    pub mutations_per_trace: usize,
    pub seed_population: usize,
    pub num_requests: usize,
    pub num_crashes: usize,
    /// Exclusive cap on per-step message release counts.
    pub max_messages: usize,
    pub reseed_frequency: usize,
    pub seed: u64,
    pub kind: FuzzerKind,
    pub mutation_mode: MutationMode,
    /// Pause after cluster bring-up before the first step.
    pub settle_delay: Duration,
    /// Pause between schedule steps, letting replicas react.
    pub step_delay: Duration,
    /// Model checker endpoint, `host:port`.
    pub checker_addr: String,
    /// Cluster template; work dir, cluster id, and scheduler port are
    /// overridden per iteration.
    pub cluster: ClusterConfig,
    /// Code-coverage feedback, when an external agent is attached.
    pub source_coverage: Option<SourceCoverageConfig>,
}

/// The fuzz driver.
pub struct Fuzzer {
    config: FuzzerConfig,
    network: Interceptor,
    queue: VecDeque<Trace>,
    stats: Stats,
    rng: ChaCha8Rng,
    guider: Guider,
    mutator: CombinedMutator,
}

impl Fuzzer {
    pub fn new(config: FuzzerConfig) -> Result<Self, FuzzError> {
        if config.base_work_dir.exists() {
            std::fs::remove_dir_all(&config.base_work_dir)?;
        }
        std::fs::create_dir_all(&config.base_work_dir)?;

        let network = Interceptor::new(config.network_port);
        let guider = match config.kind {
            FuzzerKind::TraceGuided => Guider::Trace(TraceGuider::new(
                &config.checker_addr,
                &config.base_work_dir,
            )),
            _ => {
                let mut guider = StateGuider::new(&config.checker_addr, &config.base_work_dir);
                if let Some(source) = config.source_coverage.clone() {
                    guider = guider.with_source_coverage(source);
                }
                Guider::State(guider)
            }
        };
        let mutator =
            CombinedMutator::standard(config.num_nodes, config.max_messages, config.seed);
        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        Ok(Self {
            config,
            network,
            queue: VecDeque::new(),
            stats: Stats::new(),
            rng,
            guider,
            mutator,
        })
    }

    /// Schedules currently waiting in the mutation queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Statistics collected so far.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Run the configured number of iterations.
    pub async fn run(&mut self) -> Result<(), FuzzError> {
        info!(
            "fuzzing for {} iterations, horizon {}, {} nodes",
            self.config.iterations, self.config.horizon, self.config.num_nodes
        );

        for iter in 0..self.config.iterations {
            if iter % 10 == 0 {
                info!("iteration {iter}");
            }

            if self.config.kind != FuzzerKind::Random
                && iter % self.config.reseed_frequency == 0
            {
                debug!("reseeding queue with {} schedules", self.config.seed_population);
                self.queue.clear();
                for _ in 0..self.config.seed_population {
                    let seed = self.generate_random();
                    self.queue.push_back(seed);
                }
            }

            self.run_iteration(iter).await?;

            if iter % STATS_FLUSH_INTERVAL == 0 {
                self.write_stats();
            }
        }

        self.write_stats();
        self.network.shutdown().await;
        Ok(())
    }

    async fn run_iteration(&mut self, iter: usize) -> Result<(), FuzzError> {
        // Fresh working directory for this iteration.
        let work_dir = self.config.base_work_dir.join(iter.to_string());
        if work_dir.exists() {
            std::fs::remove_dir_all(&work_dir)?;
        }
        std::fs::create_dir_all(&work_dir)?;

        self.network.start().await?;

        let mut cluster_config = self.config.cluster.clone();
        cluster_config.cluster_id = iter;
        cluster_config.work_dir = work_dir.join("cluster");
        cluster_config.scheduler_port = self.network.port();
        let mut cluster = Cluster::new(cluster_config)?;
        cluster.start_all();

        let (schedule, mutated) = self.next_schedule();

        // Project the schedule into per-step arrays plus sparse overlays.
        let horizon = self.config.horizon;
        let mut from = vec![0u32; horizon];
        let mut to = vec![0u32; horizon];
        let mut max_messages = vec![0usize; horizon];
        let mut crashes: HashMap<usize, u32> = HashMap::new();
        let mut client_requests: HashMap<usize, String> = HashMap::new();
        for choice in schedule.iter() {
            match choice {
                Choice::DeliverEdge {
                    step,
                    from: f,
                    to: t,
                    max_messages: m,
                } => {
                    from[*step] = *f;
                    to[*step] = *t;
                    max_messages[*step] = *m;
                }
                Choice::Crash { step, node } => {
                    crashes.insert(*step, *node);
                }
                Choice::ClientRequest { step, op } => {
                    client_requests.insert(*step, op.clone());
                }
            }
        }

        if !self.network.wait_for_nodes(self.config.num_nodes as usize).await {
            warn!("iteration {iter}: not all nodes registered in time");
        }
        sleep(self.config.settle_delay).await;
        debug!("iteration {iter}: setup complete");

        let mut request_count: u64 = 0;
        for step in 0..horizon {
            if let Some(&node) = crashes.get(&step) {
                if let Some(replica) = cluster.node_mut(node) {
                    debug!("crashing node {node} at step {step}");
                    if let Err(err) = replica.stop().await {
                        error!("failed to stop node {node}: {err}");
                    }
                    self.network.add_event(Event::remove(node));
                    if let Err(err) = replica.start() {
                        error!("failed to restart node {node}: {err}");
                    }
                    self.network.add_event(Event::add(node));
                }
            }

            self.network.schedule(
                &from[step].to_string(),
                &to[step].to_string(),
                max_messages[step],
            );

            if let Some(op) = client_requests.get(&step) {
                debug!("sending client request {op}");
                cluster.send_request().await;
                self.network.add_client_request(request_count);
                request_count += 1;
            }

            sleep(self.config.step_delay).await;
        }

        // Tear down and harvest the observation.
        let logs = cluster.collect_logs();
        cluster.destroy().await;
        if let Err(err) = std::fs::write(work_dir.join("logs.log"), logs) {
            debug!("failed to save iteration logs: {err}");
        }
        let event_trace = self.network.event_trace();
        self.network.reset();

        let report = self
            .guider
            .check(&iter.to_string(), &schedule, &event_trace, true)
            .await;

        let mutate = match self.config.mutation_mode {
            MutationMode::StateCoverage => report.is_new,
            MutationMode::TransitionCoverage => report.new_transitions > 0,
            MutationMode::CodeAndStateCoverage => report.new_lines > 0 || report.new_states > 0,
        };
        if mutate && self.config.kind != FuzzerKind::Random {
            let score = match self.config.mutation_mode {
                MutationMode::StateCoverage => report.new_states,
                MutationMode::TransitionCoverage => report.new_transitions,
                MutationMode::CodeAndStateCoverage => report.new_lines + report.new_states,
            };
            let descendants = score.min(MAX_SCORE) * self.config.mutations_per_trace;
            debug!("iteration {iter}: producing {descendants} descendants");
            for _ in 0..descendants {
                if let Some(descendant) = self.mutator.mutate(&schedule, &event_trace) {
                    self.queue.push_back(descendant);
                }
            }
        }

        if mutated {
            self.stats.mutated_traces += 1;
        } else {
            self.stats.random_traces += 1;
        }
        self.stats.coverages.push(self.guider.state_coverage());
        self.stats
            .transition_coverages
            .push(self.guider.transition_coverage());
        self.stats.line_coverages.push(self.guider.line_coverage());
        Ok(())
    }

    /// Dequeue the next schedule, falling back to a fresh random one.
    fn next_schedule(&mut self) -> (Trace, bool) {
        if self.config.kind == FuzzerKind::Random {
            return (self.generate_random(), false);
        }
        match self.queue.pop_front() {
            Some(schedule) => (schedule, true),
            None => (self.generate_random(), false),
        }
    }

    /// One random schedule: a `DeliverEdge` per step, plus `num_crashes`
    /// crashes and `num_requests` client requests at distinct steps.
    pub fn generate_random(&mut self) -> Trace {
        let mut trace = Trace::new();
        for step in 0..self.config.horizon {
            trace.add(Choice::DeliverEdge {
                step,
                from: self.rng.gen_range(1..=self.config.num_nodes),
                to: self.rng.gen_range(1..=self.config.num_nodes),
                max_messages: self.rng.gen_range(0..self.config.max_messages),
            });
        }

        for step in self.sample_steps(self.config.num_crashes) {
            trace.add(Choice::Crash {
                step,
                node: self.rng.gen_range(1..=self.config.num_nodes),
            });
        }
        for step in self.sample_steps(self.config.num_requests) {
            trace.add(Choice::ClientRequest {
                step,
                op: "write".to_string(),
            });
        }
        trace
    }

    /// `count` distinct steps, sampled without replacement (Fisher–Yates).
    fn sample_steps(&mut self, count: usize) -> Vec<usize> {
        let mut steps: Vec<usize> = (0..self.config.horizon).collect();
        let count = count.min(steps.len());
        for i in 0..count {
            let j = self.rng.gen_range(i..steps.len());
            steps.swap(i, j);
        }
        steps.truncate(count);
        steps
    }

    /// Atomically rewrite `stats.json`; a failed write skips this tick.
    fn write_stats(&self) {
        let path = self.config.base_work_dir.join("stats.json");
        let tmp = self.config.base_work_dir.join("stats.json.tmp");
        let data = match serde_json::to_vec_pretty(&self.stats) {
            Ok(data) => data,
            Err(err) => {
                debug!("failed to serialize stats: {err}");
                return;
            }
        };
        if let Err(err) = std::fs::write(&tmp, data).and_then(|()| std::fs::rename(&tmp, &path)) {
            debug!("failed to write stats.json: {err}");
        }
    }
}
