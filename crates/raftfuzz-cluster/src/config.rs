//! Cluster and per-node configuration, including flavour-specific argv
//! construction.

use std::path::PathBuf;
use std::time::Duration;

/// Fixed group id the ratis counter example expects on its command line.
const RATIS_GROUP_ID: &str = "02511d47-d67c-49a3-9011-abb3109a44c1";

/// Which replica implementation the cluster runs.
///
/// The flavour decides only how argument vectors are built and how patient
/// `stop()` is; the rest of the supervision code is flavour-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaFlavor {
    /// The xraft kvstore, driven through its launcher script.
    Xraft,
    /// The ratis counter example, driven through `java -cp`.
    Ratis,
}

impl ReplicaFlavor {
    /// How long `stop()` waits after SIGTERM before escalating to SIGKILL.
    ///
    /// The xraft launcher forks a JVM that takes a while to unwind; ratis
    /// never handles SIGTERM usefully, so it gets almost no grace.
    pub fn stop_grace(&self) -> Duration {
        match self {
            ReplicaFlavor::Xraft => Duration::from_secs(20),
            ReplicaFlavor::Ratis => Duration::from_millis(50),
        }
    }
}

/// Immutable configuration for one cluster instance.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub flavor: ReplicaFlavor,
    /// Monotone id distinguishing iterations (forwarded to ratis replicas).
    pub cluster_id: usize,
    pub num_nodes: u32,
    /// Replica server binary (xraft launcher script or ratis jar).
    pub server_path: PathBuf,
    /// Client binary used for one-shot writes.
    pub client_path: PathBuf,
    /// Optional `-Dlog4j.configuration=...` option for ratis JVMs.
    pub log4j_config: Option<String>,
    /// Node `i` talks Raft on `base_group_port + i`.
    pub base_group_port: u16,
    /// Node `i` serves clients on `base_service_port + i`.
    pub base_service_port: u16,
    /// Node `i` reports events on `base_interceptor_port + i`.
    pub base_interceptor_port: u16,
    /// The interceptor's listen port; replicas send messages here.
    pub scheduler_port: u16,
    /// Root working directory; each node gets a subdirectory.
    pub work_dir: PathBuf,
    /// `JAVA_TOOL_OPTIONS` value injecting the coverage agent, if enabled.
    pub java_tool_options: Option<String>,
}

impl ClusterConfig {
    /// Build the configuration for one node.
    pub fn node_config(&self, id: u32) -> NodeConfig {
        NodeConfig {
            id,
            flavor: self.flavor,
            cluster_id: self.cluster_id,
            num_nodes: self.num_nodes,
            group_port: self.base_group_port + id as u16,
            service_port: self.base_service_port + id as u16,
            interceptor_port: self.base_interceptor_port + id as u16,
            scheduler_port: self.scheduler_port,
            base_group_port: self.base_group_port,
            work_dir: self.work_dir.join(id.to_string()),
            server_path: self.server_path.clone(),
            log4j_config: self.log4j_config.clone(),
            java_tool_options: self.java_tool_options.clone(),
        }
    }

    /// `localhost:port` peer list, ratis style.
    pub fn peer_addresses(&self) -> String {
        (1..=self.num_nodes)
            .map(|i| format!("localhost:{}", self.base_group_port + i as u16))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Everything needed to spawn one replica process.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: u32,
    pub flavor: ReplicaFlavor,
    pub cluster_id: usize,
    pub num_nodes: u32,
    pub group_port: u16,
    pub service_port: u16,
    pub interceptor_port: u16,
    pub scheduler_port: u16,
    pub base_group_port: u16,
    pub work_dir: PathBuf,
    pub server_path: PathBuf,
    pub log4j_config: Option<String>,
    pub java_tool_options: Option<String>,
}

impl NodeConfig {
    /// The program and argument vector that launches this replica.
    pub fn argv(&self) -> (String, Vec<String>) {
        match self.flavor {
            ReplicaFlavor::Xraft => {
                let mut args = vec![
                    self.server_path.display().to_string(),
                    "-m".to_string(),
                    "group-member".to_string(),
                    "-i".to_string(),
                    self.id.to_string(),
                    "-p2".to_string(),
                    self.service_port.to_string(),
                    "-ip".to_string(),
                    self.interceptor_port.to_string(),
                    "-sp".to_string(),
                    self.scheduler_port.to_string(),
                    "-d".to_string(),
                    self.work_dir.display().to_string(),
                    "-gc".to_string(),
                ];
                for i in 1..=self.num_nodes {
                    args.push(format!(
                        "{i},localhost,{}",
                        self.base_group_port + i as u16
                    ));
                }
                ("bash".to_string(), args)
            }
            ReplicaFlavor::Ratis => {
                let mut args = Vec::new();
                if let Some(log4j) = &self.log4j_config {
                    args.push(log4j.clone());
                }
                args.extend([
                    "-cp".to_string(),
                    self.server_path.display().to_string(),
                    "org.apache.ratis.examples.counter.server.CounterServer".to_string(),
                    self.cluster_id.to_string(),
                    self.scheduler_port.to_string(),
                    self.interceptor_port.to_string(),
                    self.id.to_string(),
                    self.peer_addresses(),
                    RATIS_GROUP_ID.to_string(),
                    "0".to_string(),
                ]);
                ("java".to_string(), args)
            }
        }
    }

    fn peer_addresses(&self) -> String {
        (1..=self.num_nodes)
            .map(|i| format!("localhost:{}", self.base_group_port + i as u16))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// The value replica JVMs get in `JAVA_TOOL_OPTIONS` when code coverage is on.
pub fn coverage_agent_options(agent_jar: &std::path::Path, dest_file: &std::path::Path) -> String {
    format!(
        "-javaagent:{}=output=file,destfile={},append=true,dumponexit=true",
        agent_jar.display(),
        dest_file.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(flavor: ReplicaFlavor) -> ClusterConfig {
        ClusterConfig {
            flavor,
            cluster_id: 7,
            num_nodes: 3,
            server_path: PathBuf::from("/opt/replica/server"),
            client_path: PathBuf::from("/opt/replica/client"),
            log4j_config: Some("-Dlog4j.configuration=file:log4j.properties".to_string()),
            base_group_port: 2400,
            base_service_port: 3400,
            base_interceptor_port: 7100,
            scheduler_port: 7074,
            work_dir: PathBuf::from("/tmp/raftfuzz/cluster"),
            java_tool_options: None,
        }
    }

    #[test]
    fn node_config_ports_offset_by_id() {
        let cfg = config(ReplicaFlavor::Xraft);
        let node = cfg.node_config(2);
        assert_eq!(node.group_port, 2402);
        assert_eq!(node.service_port, 3402);
        assert_eq!(node.interceptor_port, 7102);
        assert_eq!(node.scheduler_port, 7074);
        assert_eq!(node.work_dir, PathBuf::from("/tmp/raftfuzz/cluster/2"));
    }

    #[test]
    fn xraft_argv() {
        let cfg = config(ReplicaFlavor::Xraft);
        let (program, args) = cfg.node_config(1).argv();
        assert_eq!(program, "bash");
        assert_eq!(args[0], "/opt/replica/server");
        assert!(args.contains(&"-sp".to_string()));
        assert!(args.contains(&"7074".to_string()));
        // Group config lists every member after -gc.
        let gc = args.iter().position(|a| a == "-gc").unwrap();
        assert_eq!(&args[gc + 1..], &[
            "1,localhost,2401".to_string(),
            "2,localhost,2402".to_string(),
            "3,localhost,2403".to_string(),
        ]);
    }

    #[test]
    fn ratis_argv() {
        let cfg = config(ReplicaFlavor::Ratis);
        let (program, args) = cfg.node_config(2).argv();
        assert_eq!(program, "java");
        assert_eq!(args[0], "-Dlog4j.configuration=file:log4j.properties");
        assert_eq!(args[1], "-cp");
        assert_eq!(args[2], "/opt/replica/server");
        assert_eq!(args[3], "org.apache.ratis.examples.counter.server.CounterServer");
        assert_eq!(args[4], "7");
        assert_eq!(args[7], "2");
        assert_eq!(args[8], "localhost:2401,localhost:2402,localhost:2403");
        assert_eq!(args[9], RATIS_GROUP_ID);
    }

    #[test]
    fn stop_grace_per_flavor() {
        assert_eq!(ReplicaFlavor::Xraft.stop_grace(), Duration::from_secs(20));
        assert!(ReplicaFlavor::Ratis.stop_grace() < Duration::from_secs(1));
    }

    #[test]
    fn coverage_agent_options_format() {
        let opts = coverage_agent_options(
            std::path::Path::new("/opt/agent.jar"),
            std::path::Path::new("/tmp/cov.exec"),
        );
        assert_eq!(
            opts,
            "-javaagent:/opt/agent.jar=output=file,destfile=/tmp/cov.exec,append=true,dumponexit=true"
        );
    }
}
