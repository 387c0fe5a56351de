//! CLI binary for the raftfuzz fuzzing loop.
//!
//! # Usage
//!
//! ```bash
//! # Fuzz with a given RNG seed
//! raftfuzz 42
//!
//! # Shorter guided run against a local checker
//! raftfuzz 42 --iterations 50 --horizon 100 --checker-addr localhost:2023
//!
//! # Pure random baseline
//! raftfuzz 42 --kind random
//! ```
//!
//! Setting `RAFTFUZZ_COVERAGE_EXEC` to the coverage agent's output file
//! attaches the agent to every replica JVM and switches feedback to
//! code+state coverage.

use clap::{Parser, ValueEnum};
use raftfuzz_cluster::{coverage_agent_options, ClusterConfig, ReplicaFlavor};
use raftfuzz_explore::fuzzer::{Fuzzer, FuzzerConfig, FuzzerKind, MutationMode};
use raftfuzz_explore::SourceCoverageConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Env var pointing at the coverage agent's `.exec` output file. Presence
/// toggles code-coverage feedback.
const COVERAGE_EXEC_ENV: &str = "RAFTFUZZ_COVERAGE_EXEC";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    /// Fresh random schedules, no feedback.
    Random,
    /// State-coverage guided (the default).
    Modelfuzz,
    /// Trace-hash guided.
    Trace,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MutationModeArg {
    State,
    Transition,
    CodeState,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FlavorArg {
    Xraft,
    Ratis,
}

#[derive(Parser)]
#[command(name = "raftfuzz")]
#[command(about = "Coverage-guided fuzzer for Raft replica binaries")]
#[command(version)]
struct Cli {
    /// RNG seed for schedule generation and mutation.
    seed: u64,

    /// Scheduling steps per iteration.
    #[arg(long, default_value_t = 200)]
    horizon: usize,

    /// Total fuzzing iterations.
    #[arg(long, default_value_t = 1000)]
    iterations: usize,

    /// Replica count.
    #[arg(long, default_value_t = 3)]
    nodes: u32,

    /// Fuzzer variant.
    #[arg(long, value_enum, default_value = "modelfuzz")]
    kind: KindArg,

    /// Which coverage metric drives mutation.
    #[arg(long, value_enum, default_value = "state")]
    mutation_mode: MutationModeArg,

    /// Replica implementation under test.
    #[arg(long, value_enum, default_value = "xraft")]
    flavor: FlavorArg,

    /// Interceptor listen port.
    #[arg(long, default_value_t = 7074)]
    network_port: u16,

    /// Model checker endpoint (host:port).
    #[arg(long, default_value = "localhost:2023")]
    checker_addr: String,

    /// Replica server binary (xraft launcher script or ratis jar).
    #[arg(long, default_value = "replicas/xraft-kvstore/bin/xraft-kvstore")]
    server_path: PathBuf,

    /// Client binary for write requests.
    #[arg(long, default_value = "replicas/xraft-kvstore/bin/xraft-kvstore-cli")]
    client_path: PathBuf,

    /// Root output directory.
    #[arg(long, default_value = "output")]
    output: PathBuf,

    /// `-Dlog4j.configuration=...` JVM option for ratis replicas.
    #[arg(long)]
    log4j_config: Option<String>,

    #[arg(long, default_value_t = 5)]
    mutations_per_trace: usize,

    #[arg(long, default_value_t = 20)]
    seed_population: usize,

    #[arg(long, default_value_t = 20)]
    num_requests: usize,

    #[arg(long, default_value_t = 5)]
    num_crashes: usize,

    /// Exclusive cap on per-step message release counts.
    #[arg(long, default_value_t = 20)]
    max_messages: usize,

    #[arg(long, default_value_t = 250)]
    reseed_frequency: usize,

    /// Pause after cluster bring-up, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    settle_delay_ms: u64,

    /// Pause between schedule steps, in milliseconds.
    #[arg(long, default_value_t = 30)]
    step_delay_ms: u64,

    #[arg(long, default_value_t = 2330)]
    base_group_port: u16,

    #[arg(long, default_value_t = 3330)]
    base_service_port: u16,

    #[arg(long, default_value_t = 7100)]
    base_interceptor_port: u16,

    /// Coverage agent jar injected into replica JVMs.
    #[arg(long, default_value = "jacocoagent.jar")]
    coverage_agent: PathBuf,

    /// CLI jar that regenerates the coverage XML report.
    #[arg(long, default_value = "jacococli.jar")]
    coverage_cli: PathBuf,

    /// `--classfiles` arguments for the report generator.
    #[arg(long)]
    coverage_classfiles: Vec<PathBuf>,

    /// `--sourcefiles` arguments for the report generator.
    #[arg(long)]
    coverage_sourcefiles: Vec<PathBuf>,
}

impl Cli {
    fn into_config(self) -> FuzzerConfig {
        let kind = match self.kind {
            KindArg::Random => FuzzerKind::Random,
            KindArg::Modelfuzz => FuzzerKind::StateGuided,
            KindArg::Trace => FuzzerKind::TraceGuided,
        };

        // Presence of the agent output path switches on code-coverage
        // feedback and wires the agent into every replica JVM.
        let coverage_exec = std::env::var_os(COVERAGE_EXEC_ENV).map(PathBuf::from);
        let mutation_mode = if coverage_exec.is_some() {
            MutationMode::CodeAndStateCoverage
        } else {
            match self.mutation_mode {
                MutationModeArg::State => MutationMode::StateCoverage,
                MutationModeArg::Transition => MutationMode::TransitionCoverage,
                MutationModeArg::CodeState => MutationMode::CodeAndStateCoverage,
            }
        };

        let java_tool_options = coverage_exec
            .as_ref()
            .map(|exec| coverage_agent_options(&self.coverage_agent, exec));

        let source_coverage = coverage_exec.as_ref().map(|exec| {
            let xml_path = self.output.join("coverage.xml");
            let mut report_command = vec![
                "java".to_string(),
                "-jar".to_string(),
                self.coverage_cli.display().to_string(),
                "report".to_string(),
                exec.display().to_string(),
            ];
            for classfiles in &self.coverage_classfiles {
                report_command.push("--classfiles".to_string());
                report_command.push(classfiles.display().to_string());
            }
            for sourcefiles in &self.coverage_sourcefiles {
                report_command.push("--sourcefiles".to_string());
                report_command.push(sourcefiles.display().to_string());
            }
            report_command.push("--xml".to_string());
            report_command.push(xml_path.display().to_string());
            SourceCoverageConfig {
                report_command,
                xml_path,
            }
        });

        let cluster = ClusterConfig {
            flavor: match self.flavor {
                FlavorArg::Xraft => ReplicaFlavor::Xraft,
                FlavorArg::Ratis => ReplicaFlavor::Ratis,
            },
            cluster_id: 0,
            num_nodes: self.nodes,
            server_path: self.server_path,
            client_path: self.client_path,
            log4j_config: self.log4j_config,
            base_group_port: self.base_group_port,
            base_service_port: self.base_service_port,
            base_interceptor_port: self.base_interceptor_port,
            scheduler_port: self.network_port,
            work_dir: self.output.join("cluster"),
            java_tool_options,
        };

        FuzzerConfig {
            horizon: self.horizon,
            iterations: self.iterations,
            num_nodes: self.nodes,
            network_port: self.network_port,
            base_work_dir: self.output,
            mutations_per_trace: self.mutations_per_trace,
            seed_population: self.seed_population,
            num_requests: self.num_requests,
            num_crashes: self.num_crashes,
            max_messages: self.max_messages,
            reseed_frequency: self.reseed_frequency,
            seed: self.seed,
            kind,
            mutation_mode,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            step_delay: Duration::from_millis(self.step_delay_ms),
            checker_addr: self.checker_addr,
            cluster,
            source_coverage,
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.into_config();

    let mut fuzzer = match Fuzzer::new(config) {
        Ok(fuzzer) => fuzzer,
        Err(err) => {
            eprintln!("Error: failed to set up fuzzer: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = fuzzer.run().await {
        eprintln!("Error: fuzzing run failed: {err}");
        std::process::exit(1);
    }

    let stats = fuzzer.stats();
    println!("Iterations:        {}", stats.iterations());
    println!("Random traces:     {}", stats.random_traces);
    println!("Mutated traces:    {}", stats.mutated_traces);
    println!(
        "State coverage:    {}",
        stats.coverages.last().copied().unwrap_or(0)
    );
    println!(
        "Transitions:       {}",
        stats.transition_coverages.last().copied().unwrap_or(0)
    );
}
