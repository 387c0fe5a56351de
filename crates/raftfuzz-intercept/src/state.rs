//! Shared interceptor state, guarded by one mutex.
//!
//! Everything the HTTP handlers and the driver touch concurrently lives in
//! this struct: mailboxes, the node registry, the event trace, the pending
//! client-request queue, the current leader, and the request-number map.
//! Critical sections are O(1) or bounded by one mailbox; nothing here blocks
//! or performs I/O.

use crate::message::Message;
use crate::translate::{self, RequestNumbers};
use raftfuzz_model::{Event, EventTrace};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};

/// Interceptor state behind the coarse lock.
#[derive(Debug, Default)]
pub struct InterceptState {
    /// Per directed edge `(from, to)`: FIFO of buffered messages.
    mailboxes: HashMap<(String, String), VecDeque<Message>>,
    /// Node id → callback address, populated by replica self-registration.
    nodes: HashMap<String, String>,
    /// Everything observed this iteration, in observation order.
    events: EventTrace,
    /// Client requests issued before any leader was observed.
    pending_requests: Vec<u64>,
    /// Current leader, set by `BecomeLeader`, cleared on reset.
    leader: Option<u32>,
    /// Canonical numbering of observed request payloads.
    request_numbers: RequestNumbers,
}

impl InterceptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a replica's callback address.
    pub fn register(&mut self, id: String, addr: String) {
        self.nodes.insert(id, addr);
    }

    /// Number of registered replicas.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Append an intercepted message to its edge mailbox.
    pub fn push_message(&mut self, msg: Message) {
        let key = (msg.from.clone(), msg.to.clone());
        self.mailboxes.entry(key).or_default().push_back(msg);
    }

    /// Buffered message count on one edge.
    pub fn mailbox_len(&self, from: &str, to: &str) -> usize {
        self.mailboxes
            .get(&(from.to_string(), to.to_string()))
            .map_or(0, VecDeque::len)
    }

    /// Record a replica-reported event, translated to model params.
    ///
    /// `BecomeLeader` additionally publishes the leader and flushes any
    /// queued client requests, in queue order, right after the leader event.
    pub fn record_event(&mut self, kind: &str, node: &str, body: &Map<String, Value>) {
        let params = translate::event_params(kind, body);
        self.events.add(Event::new(kind, node, params));

        if kind == "BecomeLeader" {
            let leader = body
                .get("node")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            self.leader = Some(leader);
            for request in std::mem::take(&mut self.pending_requests) {
                self.events.add(Event::client_request(leader, request));
            }
        }
    }

    /// Append a driver-originated event (crash `Remove`/`Add`).
    pub fn add_event(&mut self, event: Event) {
        self.events.add(event);
    }

    /// Note a client request; queued until a leader is known.
    pub fn add_client_request(&mut self, request: u64) {
        match self.leader {
            Some(leader) => self.events.add(Event::client_request(leader, request)),
            None => self.pending_requests.push(request),
        }
    }

    /// Drain up to `max_messages` head messages from `mailboxes[(from, to)]`.
    ///
    /// When `to` is registered, one `DeliverMessage` event per drained
    /// message is appended in drain order and the messages are returned with
    /// the destination address for asynchronous delivery. When `to` is
    /// unknown the drained messages are discarded and no events are emitted.
    pub fn drain(
        &mut self,
        from: &str,
        to: &str,
        max_messages: usize,
    ) -> (Vec<Message>, Option<String>) {
        let key = (from.to_string(), to.to_string());
        let mut drained = Vec::new();
        if let Some(mailbox) = self.mailboxes.get_mut(&key) {
            while drained.len() < max_messages {
                match mailbox.pop_front() {
                    Some(msg) => drained.push(msg),
                    None => break,
                }
            }
        }

        let addr = self.nodes.get(to).cloned();
        if addr.is_none() {
            return (Vec::new(), None);
        }

        for msg in &drained {
            let params = translate::message_event_params(msg, &mut self.request_numbers);
            self.events
                .add(Event::new("DeliverMessage", msg.to.clone(), params));
        }
        (drained, addr)
    }

    /// Snapshot of the event trace observed so far.
    pub fn event_trace(&self) -> EventTrace {
        self.events.clone()
    }

    /// Clear all per-iteration state. The HTTP server stays up.
    pub fn reset(&mut self) {
        self.mailboxes.clear();
        self.nodes.clear();
        self.events = EventTrace::new();
        self.pending_requests.clear();
        self.leader = None;
        self.request_numbers.clear();
    }

    #[cfg(test)]
    pub(crate) fn leader(&self) -> Option<u32> {
        self.leader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: &str, to: &str, data: &str) -> Message {
        let mut m = Message {
            from: from.to_string(),
            to: to.to_string(),
            kind: "request_vote_request".to_string(),
            data: data.to_string(),
            parsed: Map::new(),
        };
        m.parse_data().unwrap();
        m
    }

    fn vote(from: &str, to: &str, term: i64) -> Message {
        msg(from, to, &format!(r#"{{"term": {term}, "last_log_term": 0, "last_log_idx": 0}}"#))
    }

    #[test]
    fn register_and_count() {
        let mut state = InterceptState::new();
        assert_eq!(state.node_count(), 0);
        state.register("1".to_string(), "localhost:9001".to_string());
        state.register("2".to_string(), "localhost:9002".to_string());
        state.register("1".to_string(), "localhost:9099".to_string());
        assert_eq!(state.node_count(), 2);
    }

    #[test]
    fn drain_respects_fifo_and_max() {
        let mut state = InterceptState::new();
        state.register("2".to_string(), "localhost:9002".to_string());
        state.push_message(vote("1", "2", 1));
        state.push_message(vote("1", "2", 2));
        state.push_message(vote("1", "2", 3));

        let (drained, addr) = state.drain("1", "2", 2);
        assert_eq!(drained.len(), 2);
        assert_eq!(addr.as_deref(), Some("localhost:9002"));
        assert_eq!(state.mailbox_len("1", "2"), 1);

        // Events appended in mailbox order.
        let events = state.event_trace();
        assert_eq!(events.len(), 2);
        assert_eq!(events.events()[0].name, "DeliverMessage");
        assert_eq!(events.events()[0].params["term"], 1);
        assert_eq!(events.events()[1].params["term"], 2);
    }

    #[test]
    fn drain_zero_is_a_no_op() {
        let mut state = InterceptState::new();
        state.register("2".to_string(), "localhost:9002".to_string());
        state.push_message(vote("1", "2", 1));

        let (drained, _) = state.drain("1", "2", 0);
        assert!(drained.is_empty());
        assert_eq!(state.mailbox_len("1", "2"), 1);
        assert!(state.event_trace().is_empty());
    }

    #[test]
    fn drain_to_unregistered_node_emits_nothing() {
        let mut state = InterceptState::new();
        state.push_message(vote("1", "2", 1));

        let (drained, addr) = state.drain("1", "2", 5);
        assert!(drained.is_empty());
        assert!(addr.is_none());
        assert!(state.event_trace().is_empty());
    }

    #[test]
    fn client_requests_queue_until_leader() {
        let mut state = InterceptState::new();
        state.add_client_request(0);
        state.add_client_request(1);
        assert!(state.event_trace().is_empty());

        let body: Map<String, Value> =
            serde_json::from_str(r#"{"node": "1", "term": 2.0}"#).unwrap();
        state.record_event("BecomeLeader", "1", &body);

        let events = state.event_trace();
        assert_eq!(events.len(), 3);
        assert_eq!(events.events()[0].name, "BecomeLeader");
        assert_eq!(events.events()[1].name, "ClientRequest");
        assert_eq!(events.events()[1].params["request"], 0);
        assert_eq!(events.events()[1].params["leader"], 1);
        assert_eq!(events.events()[2].params["request"], 1);
        assert_eq!(state.leader(), Some(1));

        // Later requests are attributed immediately.
        state.add_client_request(2);
        assert_eq!(state.event_trace().len(), 4);
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = InterceptState::new();
        state.register("1".to_string(), "localhost:9001".to_string());
        state.register("2".to_string(), "localhost:9001".to_string());
        state.push_message(vote("1", "2", 1));
        state.add_client_request(0);
        let body: Map<String, Value> =
            serde_json::from_str(r#"{"node": "1", "term": 1}"#).unwrap();
        state.record_event("BecomeLeader", "1", &body);

        state.reset();
        assert_eq!(state.node_count(), 0);
        assert_eq!(state.mailbox_len("1", "2"), 0);
        assert!(state.event_trace().is_empty());
        assert_eq!(state.leader(), None);

        // Request numbering restarts from zero.
        let mut m = msg("1", "2", r#"{"term": 1}"#);
        m.kind = "append_entries_request".to_string();
        m.data = r#"{"term": 1, "prev_log_term": 0, "leader_commit": 0, "entries": [{"term": 1, "data": "fresh"}]}"#.to_string();
        m.parse_data().unwrap();
        state.register("2".to_string(), "localhost:9001".to_string());
        state.push_message(m);
        let _ = state.drain("1", "2", 1);
        let events = state.event_trace();
        assert_eq!(events.events()[0].params["entries"][0]["data"], "0");
    }
}
