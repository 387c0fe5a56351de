//! A full replica cluster: N supervised nodes plus a write client.

use crate::client::ClusterClient;
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::node::ReplicaNode;
use log::{debug, error};
use std::collections::BTreeMap;

/// One iteration's worth of replicas.
pub struct Cluster {
    config: ClusterConfig,
    nodes: BTreeMap<u32, ReplicaNode>,
    client: ClusterClient,
}

impl Cluster {
    /// Build the cluster: per-node configs, fresh working directories, and
    /// the write client. Nothing is spawned yet.
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        for id in 1..=config.num_nodes {
            let node_config = config.node_config(id);
            if node_config.work_dir.exists() {
                std::fs::remove_dir_all(&node_config.work_dir)?;
            }
            std::fs::create_dir_all(&node_config.work_dir)?;
            nodes.insert(id, ReplicaNode::new(node_config));
        }

        let client = ClusterClient::new(&config);
        Ok(Self {
            config,
            nodes,
            client,
        })
    }

    /// Cluster configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Start every node. Per-node failures are logged, not fatal: a replica
    /// that will not come up is part of what is being fuzzed.
    pub fn start_all(&mut self) {
        for (id, node) in &mut self.nodes {
            if let Err(err) = node.start() {
                error!("failed to start node {id}: {err}");
            }
        }
    }

    /// The node with the given id, for crash scheduling.
    pub fn node_mut(&mut self, id: u32) -> Option<&mut ReplicaNode> {
        self.nodes.get_mut(&id)
    }

    /// Number of nodes currently attached to a live child.
    pub fn running_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_running()).count()
    }

    /// Collected per-node logs in a single banner-separated string.
    pub fn collect_logs(&self) -> String {
        let mut lines = Vec::new();
        for (id, node) in &self.nodes {
            let (stdout, stderr) = node.get_logs();
            lines.push(format!("Logs for node: {id}\n"));
            lines.push("----- Stdout -----".to_string());
            lines.push(stdout);
            lines.push("----- Stderr -----".to_string());
            lines.push(stderr);
            lines.push("\n\n".to_string());
        }
        lines.join("\n")
    }

    /// Issue one client write (bounded to 2 s internally).
    pub async fn send_request(&self) {
        self.client.send_request().await;
    }

    /// Stop every node and remove its working directory.
    pub async fn destroy(&mut self) {
        for (id, node) in &mut self.nodes {
            if node.is_running() {
                if let Err(err) = node.stop().await {
                    error!("failed to stop node {id}: {err}");
                }
            }
            if let Err(err) = node.cleanup() {
                debug!("failed to clean up node {id}: {err}");
            }
        }
    }
}
