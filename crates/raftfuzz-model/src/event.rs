//! Observed events — what the interceptor saw during one iteration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A single observed event.
///
/// `name` is one of the canonical model-level event names (`SendMessage`,
/// `DeliverMessage`, `BecomeLeader`, `Timeout`, `UpdateSnapshot`,
/// `ClientRequest`, `Add`, `Remove`); `params` is a per-name key/value bag.
/// The `node` the event was observed on is kept for per-node trace hashing
/// but is not part of the wire representation sent to the model checker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(skip)]
    pub node: String,
    pub params: Map<String, Value>,
}

impl Event {
    /// Create an event with an explicit params bag.
    pub fn new(name: impl Into<String>, node: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            node: node.into(),
            params,
        }
    }

    /// The `Remove` event the driver emits when it crashes a node.
    pub fn remove(node: u32) -> Self {
        let mut params = Map::new();
        params.insert("i".to_string(), Value::from(node));
        Self::new("Remove", node.to_string(), params)
    }

    /// The `Add` event the driver emits when it restarts a crashed node.
    pub fn add(node: u32) -> Self {
        let mut params = Map::new();
        params.insert("i".to_string(), Value::from(node));
        Self::new("Add", node.to_string(), params)
    }

    /// A `ClientRequest` event attributed to the current leader.
    pub fn client_request(leader: u32, request: u64) -> Self {
        let mut params = Map::new();
        params.insert("leader".to_string(), Value::from(leader));
        params.insert("request".to_string(), Value::from(request));
        Self::new("ClientRequest", String::new(), params)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.node.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.node)
        }
    }
}

/// Append-only ordered sequence of events.
///
/// The total order equals insertion order; this is the primary observation
/// input to coverage. Serializes as a plain JSON array of events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTrace {
    events: Vec<Event>,
}

impl EventTrace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event.
    pub fn add(&mut self, event: Event) {
        self.events.push(event);
    }

    /// All events in observation order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of events observed.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether any events were observed.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate over events in order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}
