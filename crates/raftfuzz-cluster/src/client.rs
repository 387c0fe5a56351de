//! One-shot client writes against the cluster.

use crate::config::{ClusterConfig, ReplicaFlavor};
use log::debug;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Hard deadline on one client invocation.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Issues client writes by running the flavour's client binary.
///
/// Each call is a fresh subprocess in its own process group; if it has not
/// returned within 2 s the whole group is SIGKILLed. Failures are swallowed:
/// a write that never lands is still a legitimate fuzzing outcome.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    flavor: ReplicaFlavor,
    program: String,
    args: Vec<String>,
    java_tool_options: Option<String>,
}

impl ClusterClient {
    pub fn new(config: &ClusterConfig) -> Self {
        let (program, args) = match config.flavor {
            ReplicaFlavor::Xraft => {
                let mut args = vec![
                    config.client_path.display().to_string(),
                    "-gc".to_string(),
                ];
                for i in 1..=config.num_nodes {
                    args.push(format!(
                        "{i},localhost,{}",
                        config.base_service_port + i as u16
                    ));
                }
                args.push("-ic".to_string());
                args.push("kvstore-set x 1".to_string());
                ("bash".to_string(), args)
            }
            ReplicaFlavor::Ratis => {
                let mut args = Vec::new();
                if let Some(log4j) = &config.log4j_config {
                    args.push(log4j.clone());
                }
                args.extend([
                    "-cp".to_string(),
                    config.client_path.display().to_string(),
                    "org.apache.ratis.examples.counter.client.CounterClient".to_string(),
                    "1".to_string(),
                    config.peer_addresses(),
                ]);
                ("java".to_string(), args)
            }
        };

        Self {
            flavor: config.flavor,
            program,
            args,
            java_tool_options: config.java_tool_options.clone(),
        }
    }

    /// The flavour this client talks to.
    pub fn flavor(&self) -> ReplicaFlavor {
        self.flavor
    }

    /// Issue one write, waiting at most 2 s before killing the client.
    pub async fn send_request(&self) {
        debug!("sending client request: {} {}", self.program, self.args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        if let Some(opts) = &self.java_tool_options {
            cmd.env("JAVA_TOOL_OPTIONS", opts);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                debug!("client spawn failed: {err}");
                return;
            }
        };
        let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));

        if timeout(CLIENT_TIMEOUT, child.wait()).await.is_err() {
            debug!("client request timed out, killing process group");
            if let Some(pgid) = pgid {
                let _ = killpg(pgid, Signal::SIGKILL);
            }
            let _ = child.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(flavor: ReplicaFlavor) -> ClusterConfig {
        ClusterConfig {
            flavor,
            cluster_id: 0,
            num_nodes: 3,
            server_path: PathBuf::from("/opt/replica/server"),
            client_path: PathBuf::from("/opt/replica/client"),
            log4j_config: None,
            base_group_port: 2400,
            base_service_port: 3400,
            base_interceptor_port: 7100,
            scheduler_port: 7074,
            work_dir: PathBuf::from("/tmp/raftfuzz"),
            java_tool_options: None,
        }
    }

    #[test]
    fn xraft_client_argv() {
        let client = ClusterClient::new(&config(ReplicaFlavor::Xraft));
        assert_eq!(client.program, "bash");
        assert_eq!(client.args[0], "/opt/replica/client");
        assert_eq!(client.args[1], "-gc");
        assert!(client.args.contains(&"2,localhost,3402".to_string()));
        assert!(client.args.contains(&"kvstore-set x 1".to_string()));
    }

    #[test]
    fn ratis_client_argv() {
        let client = ClusterClient::new(&config(ReplicaFlavor::Ratis));
        assert_eq!(client.program, "java");
        assert_eq!(client.args[0], "-cp");
        assert_eq!(
            client.args[2],
            "org.apache.ratis.examples.counter.client.CounterClient"
        );
        assert_eq!(client.args[4], "localhost:2401,localhost:2402,localhost:2403");
    }

    #[tokio::test]
    async fn send_request_swallows_client_failure() {
        let mut cfg = config(ReplicaFlavor::Xraft);
        cfg.client_path = PathBuf::from("/nonexistent/client");
        let client = ClusterClient::new(&cfg);

        // bash exits non-zero on a missing script; nothing propagates.
        client.send_request().await;
    }
}
