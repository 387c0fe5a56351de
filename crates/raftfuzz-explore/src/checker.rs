//! Client for the external model-checking server.
//!
//! The checker maps an event trace to the sequence of abstract protocol
//! states the trace visits. It is an opaque collaborator reachable at
//! `host:port`: the client POSTs the trace as a JSON array of events to
//! `/execute` and parses back an array of `{key, repr}` states.

use raftfuzz_model::EventTrace;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// One abstract protocol state as reported by the checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerState {
    /// 64-bit fingerprint of the state.
    pub key: i64,
    /// The checker's textual rendering of the state.
    pub repr: String,
}

/// Errors from the model-checker RPC.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("model checker request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// HTTP client for one checker endpoint.
pub struct CheckerClient {
    endpoint: String,
    client: reqwest::Client,
}

impl CheckerClient {
    /// `addr` is `host:port`.
    pub fn new(addr: &str) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: format!("http://{addr}/execute"),
            client,
        }
    }

    /// Ship a trace, get the visited state sequence back.
    pub async fn send_trace(&self, trace: &EventTrace) -> Result<Vec<CheckerState>, CheckerError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(trace)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

/// Normalise a checker state repr for recording.
///
/// The checker renders states as multi-line TLA conjunctions; flatten them
/// into one comma-separated line with plain brackets.
pub fn normalize_repr(repr: &str) -> String {
    repr.replace('\n', ",")
        .replace("/\\", "")
        .replace(">>", "]")
        .replace("<<", "[")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use raftfuzz_model::Event;

    async fn stub_checker(states: Vec<CheckerState>) -> String {
        let app = Router::new().route(
            "/execute",
            post(move |Json(trace): Json<serde_json::Value>| {
                let states = states.clone();
                async move {
                    // The payload must be a JSON array of events.
                    assert!(trace.is_array());
                    Json(states)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn send_trace_round_trip() {
        let states = vec![
            CheckerState {
                key: 100,
                repr: "s0".to_string(),
            },
            CheckerState {
                key: 101,
                repr: "s1".to_string(),
            },
        ];
        let addr = stub_checker(states.clone()).await;
        let client = CheckerClient::new(&addr);

        let mut trace = EventTrace::new();
        trace.add(Event::add(1));

        let got = client.send_trace(&trace).await.unwrap();
        assert_eq!(got, states);
    }

    #[tokio::test]
    async fn unreachable_checker_is_an_error() {
        let client = CheckerClient::new("127.0.0.1:1");
        let trace = EventTrace::new();
        assert!(client.send_trace(&trace).await.is_err());
    }

    #[test]
    fn normalize_repr_flattens_tla_output() {
        let raw = "/\\ state = <<1, 2>>\n/\\ term = 3";
        assert_eq!(normalize_repr(raw), " state = [1, 2], term = 3");
    }
}
