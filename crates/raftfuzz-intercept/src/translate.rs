//! Translation from raw replica payloads to model-level event params.
//!
//! The model checker expects events in a fixed vocabulary. Two tables live
//! here: one for replica-reported protocol events (`BecomeLeader`, `Timeout`,
//! `UpdateSnapshot`, everything else passed through) and one that maps the
//! four Raft wire message kinds onto `DeliverMessage` params.

use crate::message::Message;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Canonicalises observed request payloads to small sequential numbers.
///
/// Entry data strings are opaque replica payloads; the model only cares about
/// their identity, so each distinct non-empty string is assigned the next
/// integer. The assignment is a bijection onto `[0, counter)`.
#[derive(Debug, Default)]
pub struct RequestNumbers {
    map: HashMap<String, u64>,
    counter: u64,
}

impl RequestNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number for `data`, assigning the next one on first sight.
    pub fn number_for(&mut self, data: &str) -> u64 {
        if let Some(&n) = self.map.get(data) {
            return n;
        }
        let n = self.counter;
        self.map.insert(data.to_string(), n);
        self.counter += 1;
        n
    }

    /// Distinct payloads seen so far.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.counter = 0;
    }
}

/// Read a JSON value as an integer, accepting numbers and numeric strings.
fn as_int(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_else(|| n.as_f64().unwrap_or(0.0) as i64),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Params for a replica-reported protocol event.
///
/// Known event names get their canonical integer params; unknown names pass
/// the payload through verbatim.
pub fn event_params(kind: &str, body: &Map<String, Value>) -> Map<String, Value> {
    let mut params = Map::new();
    match kind {
        "BecomeLeader" => {
            params.insert("node".to_string(), json!(as_int(body.get("node"))));
            params.insert("term".to_string(), json!(as_int(body.get("term"))));
        }
        "Timeout" => {
            params.insert("node".to_string(), json!(as_int(body.get("node"))));
        }
        "UpdateSnapshot" => {
            params.insert("node".to_string(), json!(as_int(body.get("node"))));
            params.insert(
                "snapshot_index".to_string(),
                json!(as_int(body.get("snapshot_index"))),
            );
        }
        _ => {
            params = body.clone();
        }
    }
    params
}

/// Params for a `DeliverMessage` event derived from a buffered message.
///
/// Field renames per Raft message kind:
///
/// | wire kind                 | `type`       | `reject`            |
/// |---------------------------|--------------|---------------------|
/// | `append_entries_request`  | `MsgApp`     | `false`             |
/// | `append_entries_response` | `MsgAppResp` | `success == 0`      |
/// | `request_vote_request`    | `MsgVote`    | `false`             |
/// | `request_vote_response`   | `MsgVoteResp`| `vote_granted == 0` |
///
/// Entries with empty `data` are dropped; entry payloads are canonicalised
/// through `numbers`.
pub fn message_event_params(msg: &Message, numbers: &mut RequestNumbers) -> Map<String, Value> {
    let parsed = &msg.parsed;
    let mut params = Map::new();
    params.insert("term".to_string(), json!(as_int(parsed.get("term"))));
    params.insert("from".to_string(), json!(msg.from.parse::<i64>().unwrap_or(0)));
    params.insert("to".to_string(), json!(msg.to.parse::<i64>().unwrap_or(0)));

    match msg.kind.as_str() {
        "append_entries_request" => {
            params.insert("type".to_string(), json!("MsgApp"));
            params.insert(
                "log_term".to_string(),
                json!(as_int(parsed.get("prev_log_term"))),
            );

            let mut entries = Vec::new();
            if let Some(Value::Array(raw)) = parsed.get("entries") {
                for item in raw {
                    let Some(obj) = item.as_object() else { continue };
                    let Some(data) = obj.get("data").and_then(Value::as_str) else {
                        continue;
                    };
                    if data.is_empty() {
                        continue;
                    }
                    let Some(term) = obj.get("term") else { continue };
                    entries.push(json!({
                        "term": as_int(Some(term)),
                        "data": numbers.number_for(data).to_string(),
                    }));
                }
            }
            params.insert("entries".to_string(), Value::Array(entries));
            params.insert("index".to_string(), json!(as_int(parsed.get("prev_log_idx"))));
            params.insert(
                "commit".to_string(),
                json!(as_int(parsed.get("leader_commit"))),
            );
            params.insert("reject".to_string(), json!(false));
        }
        "append_entries_response" => {
            params.insert("type".to_string(), json!("MsgAppResp"));
            params.insert("log_term".to_string(), json!(0));
            params.insert("entries".to_string(), json!([]));
            params.insert("index".to_string(), json!(as_int(parsed.get("current_idx"))));
            params.insert("commit".to_string(), json!(0));
            params.insert(
                "reject".to_string(),
                json!(as_int(parsed.get("success")) == 0),
            );
        }
        "request_vote_request" => {
            params.insert("type".to_string(), json!("MsgVote"));
            params.insert(
                "log_term".to_string(),
                json!(as_int(parsed.get("last_log_term"))),
            );
            params.insert("entries".to_string(), json!([]));
            params.insert("index".to_string(), json!(as_int(parsed.get("last_log_idx"))));
            params.insert("commit".to_string(), json!(0));
            params.insert("reject".to_string(), json!(false));
        }
        "request_vote_response" => {
            params.insert("type".to_string(), json!("MsgVoteResp"));
            params.insert("log_term".to_string(), json!(0));
            params.insert("entries".to_string(), json!([]));
            params.insert("index".to_string(), json!(0));
            params.insert("commit".to_string(), json!(0));
            params.insert(
                "reject".to_string(),
                json!(as_int(parsed.get("vote_granted")) == 0),
            );
        }
        other => {
            log::debug!("unknown message kind {other}, passing through header only");
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(kind: &str, data: &str) -> Message {
        let mut msg = Message {
            from: "1".to_string(),
            to: "2".to_string(),
            kind: kind.to_string(),
            data: data.to_string(),
            parsed: Map::new(),
        };
        msg.parse_data().unwrap();
        msg
    }

    #[test]
    fn request_numbers_bijection() {
        let mut numbers = RequestNumbers::new();
        assert_eq!(numbers.number_for("a"), 0);
        assert_eq!(numbers.number_for("b"), 1);
        assert_eq!(numbers.number_for("a"), 0);
        assert_eq!(numbers.number_for("c"), 2);
        assert_eq!(numbers.len(), 3);
    }

    #[test]
    fn become_leader_params() {
        let body: Map<String, Value> =
            serde_json::from_str(r#"{"node": "2", "type": "BecomeLeader", "term": 3}"#).unwrap();
        let params = event_params("BecomeLeader", &body);
        assert_eq!(params["node"], 2);
        assert_eq!(params["term"], 3);
    }

    #[test]
    fn timeout_params() {
        let body: Map<String, Value> =
            serde_json::from_str(r#"{"node": "1", "type": "Timeout"}"#).unwrap();
        let params = event_params("Timeout", &body);
        assert_eq!(params["node"], 1);
        assert!(params.get("type").is_none());
    }

    #[test]
    fn update_snapshot_params() {
        let body: Map<String, Value> =
            serde_json::from_str(r#"{"node": "3", "snapshot_index": 17}"#).unwrap();
        let params = event_params("UpdateSnapshot", &body);
        assert_eq!(params["node"], 3);
        assert_eq!(params["snapshot_index"], 17);
    }

    #[test]
    fn unknown_event_passes_through() {
        let body: Map<String, Value> =
            serde_json::from_str(r#"{"node": "1", "custom": true}"#).unwrap();
        let params = event_params("ShrinkLog", &body);
        assert_eq!(params, body);
    }

    #[test]
    fn append_entries_request_mapping() {
        let mut numbers = RequestNumbers::new();
        let msg = message(
            "append_entries_request",
            r#"{
                "term": 4,
                "prev_log_term": 3,
                "prev_log_idx": 9,
                "leader_commit": 8,
                "entries": [
                    {"term": 4, "data": "set x 1"},
                    {"term": 4, "data": ""},
                    {"term": 4, "data": "set y 2"}
                ]
            }"#,
        );

        let params = message_event_params(&msg, &mut numbers);
        assert_eq!(params["type"], "MsgApp");
        assert_eq!(params["term"], 4);
        assert_eq!(params["from"], 1);
        assert_eq!(params["to"], 2);
        assert_eq!(params["log_term"], 3);
        assert_eq!(params["index"], 9);
        assert_eq!(params["commit"], 8);
        assert_eq!(params["reject"], false);

        // Empty-data entry dropped; payloads canonicalised in order.
        let entries = params["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["data"], "0");
        assert_eq!(entries[1]["data"], "1");
    }

    #[test]
    fn append_entries_response_reject_from_success() {
        let mut numbers = RequestNumbers::new();
        let ok = message(
            "append_entries_response",
            r#"{"term": 2, "success": 1, "current_idx": 5}"#,
        );
        let params = message_event_params(&ok, &mut numbers);
        assert_eq!(params["type"], "MsgAppResp");
        assert_eq!(params["reject"], false);
        assert_eq!(params["index"], 5);

        let rejected = message(
            "append_entries_response",
            r#"{"term": 2, "success": 0, "current_idx": 5}"#,
        );
        let params = message_event_params(&rejected, &mut numbers);
        assert_eq!(params["reject"], true);
    }

    #[test]
    fn vote_request_mapping() {
        let mut numbers = RequestNumbers::new();
        let msg = message(
            "request_vote_request",
            r#"{"term": 5, "last_log_term": 4, "last_log_idx": 12}"#,
        );
        let params = message_event_params(&msg, &mut numbers);
        assert_eq!(params["type"], "MsgVote");
        assert_eq!(params["log_term"], 4);
        assert_eq!(params["index"], 12);
        assert_eq!(params["reject"], false);
    }

    #[test]
    fn vote_response_reject_from_vote_granted() {
        let mut numbers = RequestNumbers::new();
        let denied = message("request_vote_response", r#"{"term": 5, "vote_granted": 0}"#);
        let params = message_event_params(&denied, &mut numbers);
        assert_eq!(params["type"], "MsgVoteResp");
        assert_eq!(params["reject"], true);

        let granted = message("request_vote_response", r#"{"term": 5, "vote_granted": 1}"#);
        let params = message_event_params(&granted, &mut numbers);
        assert_eq!(params["reject"], false);
    }

    #[test]
    fn missing_prev_log_idx_defaults_to_zero() {
        let mut numbers = RequestNumbers::new();
        let msg = message(
            "append_entries_request",
            r#"{"term": 1, "prev_log_term": 0, "leader_commit": 0, "entries": []}"#,
        );
        let params = message_event_params(&msg, &mut numbers);
        assert_eq!(params["index"], 0);
    }
}
