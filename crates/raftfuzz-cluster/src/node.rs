//! Supervision of one replica process.

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use log::debug;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// Cap on each captured output stream, to bound memory under a chatty child.
const LOG_BUFFER_CAP: usize = 8 * 1024 * 1024;

type LogBuffer = Arc<Mutex<String>>;

/// One supervised replica child process.
///
/// The child runs in its own process group so that signals sent to the
/// negated PID reach JVMs forked by launcher scripts. stdout and stderr are
/// drained into in-memory buffers by background tasks.
pub struct ReplicaNode {
    config: NodeConfig,
    child: Option<Child>,
    pgid: Option<Pid>,
    stdout: LogBuffer,
    stderr: LogBuffer,
}

impl ReplicaNode {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            child: None,
            pgid: None,
            stdout: Arc::new(Mutex::new(String::new())),
            stderr: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Node id.
    pub fn id(&self) -> u32 {
        self.config.id
    }

    /// Whether a child process is currently attached.
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Spawn the replica. Callable again after [`ReplicaNode::stop`].
    pub fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Err(Error::AlreadyRunning(self.config.id));
        }

        let (program, args) = self.config.argv();
        debug!("starting node {}: {program} {}", self.config.id, args.join(" "));

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(opts) = &self.config.java_tool_options {
            cmd.env("JAVA_TOOL_OPTIONS", opts);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(self.config.id, e))?;

        self.pgid = child.id().map(|pid| Pid::from_raw(pid as i32));
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, self.stdout.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, self.stderr.clone());
        }
        self.child = Some(child);
        Ok(())
    }

    /// Stop the replica's process group.
    ///
    /// Sends SIGTERM, waits up to the flavour's grace period, then escalates
    /// to SIGKILL. After this returns the child is gone; calling `stop` again
    /// without an intervening `start` is an error.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Err(Error::NotRunning(self.config.id));
        };
        let pgid = self.pgid.take();
        debug!("stopping node {}", self.config.id);

        if let Some(pgid) = pgid {
            if let Err(err) = killpg(pgid, Signal::SIGTERM) {
                debug!("SIGTERM to node {} failed ({err}), sending SIGKILL", self.config.id);
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        }

        match timeout(self.config.flavor.stop_grace(), child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                debug!("node {} still running, sending SIGKILL", self.config.id);
                if let Some(pgid) = pgid {
                    let _ = killpg(pgid, Signal::SIGKILL);
                }
                let _ = child.wait().await;
                Err(Error::StopTimeout(self.config.id))
            }
        }
    }

    /// Captured (stdout, stderr) so far.
    pub fn get_logs(&self) -> (String, String) {
        (
            self.stdout.lock().unwrap().clone(),
            self.stderr.lock().unwrap().clone(),
        )
    }

    /// Remove the node's working directory.
    pub fn cleanup(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.config.work_dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Drain one child stream into a bounded in-memory buffer.
fn spawn_reader(mut reader: impl AsyncReadExt + Unpin + Send + 'static, sink: LogBuffer) {
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let mut buf = sink.lock().unwrap();
                    if buf.len() < LOG_BUFFER_CAP {
                        buf.push_str(&String::from_utf8_lossy(&chunk[..n]));
                    }
                }
                Err(err) => {
                    debug!("child output read failed: {err}");
                    break;
                }
            }
        }
    });
}
