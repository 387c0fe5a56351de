//! Wire representation of an intercepted replica message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A replica-to-replica message buffered in a mailbox.
///
/// `data` is the JSON-encoded Raft message exactly as the replica sent it;
/// `parsed` is its decoded form, kept alongside so the event translation
/// never has to re-parse. Only the original four wire fields are serialized
/// when the message is forwarded to its destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    #[serde(skip)]
    pub parsed: Map<String, Value>,
}

impl Message {
    /// Decode `data` into `parsed`.
    ///
    /// Fails if the payload is not a JSON object.
    pub fn parse_data(&mut self) -> Result<(), serde_json::Error> {
        self.parsed = serde_json::from_str(&self.data)?;
        Ok(())
    }
}
