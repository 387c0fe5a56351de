//! The interceptor HTTP server and its driver-facing handle.

use crate::message::Message;
use crate::state::InterceptState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use log::{debug, warn};
use raftfuzz_model::{Event, EventTrace};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

/// How long a replica cluster gets to register all nodes.
const WAIT_FOR_NODES_TIMEOUT: Duration = Duration::from_secs(2);
/// Poll granularity while waiting for registrations.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Drain budget for graceful server shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);
/// Ceiling on every outbound delivery timeout.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from interceptor lifecycle operations.
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("failed to bind interceptor listener: {0}")]
    Bind(#[from] std::io::Error),
}

type SharedState = Arc<Mutex<InterceptState>>;

/// Driver-facing handle for the interceptor.
///
/// Owns the shared state and the HTTP server task. The server is started
/// once and kept running across iterations; [`Interceptor::reset`] wipes
/// per-iteration state.
pub struct Interceptor {
    state: SharedState,
    port: u16,
    bound_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_task: Option<JoinHandle<()>>,
}

impl Interceptor {
    /// Create an interceptor that will listen on `127.0.0.1:port`.
    ///
    /// Port 0 picks an ephemeral port, reported by [`Interceptor::port`]
    /// after [`Interceptor::start`].
    pub fn new(port: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(InterceptState::new())),
            port,
            bound_addr: None,
            shutdown_tx: None,
            serve_task: None,
        }
    }

    /// Start the HTTP server. Idempotent: a second call is a no-op.
    pub async fn start(&mut self) -> Result<(), InterceptError> {
        if self.serve_task.is_some() {
            return Ok(());
        }

        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        self.bound_addr = Some(bound);

        let app = router(self.state.clone());
        let (tx, rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(tx);
        self.serve_task = Some(tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!("interceptor server exited with error: {err}");
            }
        }));

        debug!("interceptor listening on {bound}");
        Ok(())
    }

    /// Stop the HTTP server, draining in-flight requests for up to 2 s.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.serve_task.take() {
            if timeout(SHUTDOWN_DRAIN, task).await.is_err() {
                warn!("interceptor did not drain in time");
            }
        }
        self.bound_addr = None;
    }

    /// The port the server is listening on.
    pub fn port(&self) -> u16 {
        self.bound_addr.map_or(self.port, |a| a.port())
    }

    /// Release up to `max_messages` buffered messages from `from` to `to`.
    ///
    /// `DeliverMessage` events are appended to the trace in mailbox order
    /// before this returns; the HTTP posts to the destination replica are
    /// fire-and-forget and best-effort. Returns the number of messages
    /// released.
    pub fn schedule(&self, from: &str, to: &str, max_messages: usize) -> usize {
        let (messages, addr) = {
            let mut state = self.state.lock().unwrap();
            state.drain(from, to, max_messages)
        };

        let Some(addr) = addr else {
            return 0;
        };

        // Fresh client per call, keep-alives disabled.
        let delivery = reqwest::Client::builder()
            .connect_timeout(DELIVERY_TIMEOUT)
            .timeout(DELIVERY_TIMEOUT)
            .pool_max_idle_per_host(0)
            .build();
        let delivered = messages.len();
        let Ok(delivery) = delivery else {
            debug!("failed to build delivery client, dropping {delivered} messages");
            return delivered;
        };

        for msg in messages {
            let client = delivery.clone();
            let url = format!("http://{addr}/schedule_{from}");
            tokio::spawn(async move {
                match client.post(&url).json(&msg).send().await {
                    Ok(resp) => {
                        // Drain and discard the body.
                        let _ = resp.bytes().await;
                    }
                    Err(err) => debug!("delivery to {url} failed: {err}"),
                }
            });
        }
        delivered
    }

    /// Block until `expected` replicas have registered, up to 2 s.
    pub async fn wait_for_nodes(&self, expected: usize) -> bool {
        let deadline = Instant::now() + WAIT_FOR_NODES_TIMEOUT;
        loop {
            if self.state.lock().unwrap().node_count() == expected {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Append a driver-originated event (crash `Remove`/`Add`).
    pub fn add_event(&self, event: Event) {
        self.state.lock().unwrap().add_event(event);
    }

    /// Note a client request issued by the driver.
    pub fn add_client_request(&self, request: u64) {
        self.state.lock().unwrap().add_client_request(request);
    }

    /// Snapshot of the events observed so far this iteration.
    pub fn event_trace(&self) -> EventTrace {
        self.state.lock().unwrap().event_trace()
    }

    /// Buffered message count on one edge (diagnostics and tests).
    pub fn mailbox_len(&self, from: &str, to: &str) -> usize {
        self.state.lock().unwrap().mailbox_len(from, to)
    }

    /// Wipe all per-iteration state; the server keeps running.
    pub fn reset(&self) {
        self.state.lock().unwrap().reset();
    }
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/replica", post(handle_replica))
        .route("/message", post(handle_message))
        .route("/event", post(handle_event))
        .with_state(state)
}

fn ok() -> Response {
    Json(json!({"message": "ok"})).into_response()
}

fn bad_request(reason: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": reason}))).into_response()
}

/// `POST /replica` — replica self-registration `{id, addr}`.
///
/// Payloads missing either field are acknowledged without effect; a replica
/// under fuzzing is allowed to be sloppy.
async fn handle_replica(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let (Some(id), Some(addr)) = (
        body.get("id").and_then(Value::as_str),
        body.get("addr").and_then(Value::as_str),
    ) else {
        return ok();
    };

    debug!("replica registered: {id} at {addr}");
    state
        .lock()
        .unwrap()
        .register(id.to_string(), addr.to_string());
    ok()
}

/// `POST /message` — intercepted peer traffic `{from, to, type, data}`.
async fn handle_message(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let mut msg: Message = match serde_json::from_value(body) {
        Ok(msg) => msg,
        Err(err) => {
            debug!("unparsable message payload: {err}");
            return bad_request("failed to unmarshal request");
        }
    };
    if let Err(err) = msg.parse_data() {
        debug!("unparsable message data: {err}");
        return bad_request("failed to unmarshal request");
    }

    state.lock().unwrap().push_message(msg);
    ok()
}

/// `POST /event` — replica-reported protocol event `{node, type, ...}`.
async fn handle_event(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let Some(object) = body.as_object() else {
        return bad_request("failed to unmarshal request");
    };
    let (Some(node), Some(kind)) = (
        object.get("node").and_then(Value::as_str),
        object.get("type").and_then(Value::as_str),
    ) else {
        return ok();
    };

    debug!("event from node {node}: {kind}");
    state.lock().unwrap().record_event(kind, node, object);
    ok()
}
