//! Network interceptor for raftfuzz.
//!
//! Replica processes are configured to send all peer-to-peer traffic here
//! instead of to each other. The interceptor terminates that traffic, holds
//! messages in per-edge mailboxes, and releases them only when the fuzz
//! driver's schedule says so. Along the way it normalises everything it sees
//! into a model-level [`EventTrace`](raftfuzz_model::EventTrace) that the
//! guider ships to the model checker.
//!
//! Three inbound routes are exposed to replicas:
//!
//! - `POST /replica` — self-registration `{id, addr}`
//! - `POST /message` — intercepted peer message `{from, to, type, data}`
//! - `POST /event` — protocol event `{node, type, ...}`
//!
//! All shared state lives behind one mutex ([`state::InterceptState`]);
//! handlers and the driver-facing [`Interceptor`] operations take it for the
//! minimum necessary span and never perform I/O while holding it.

pub mod message;
pub mod server;
pub mod state;
pub mod translate;

pub use message::Message;
pub use server::{InterceptError, Interceptor};
pub use state::InterceptState;
