//! Tool-invocation bridge: event-stream client, handshake, retry and serialization.
//!
//! Leaf-first: [`sse`] reads the stream, [`channel`] writes commands,
//! [`correlator`] pairs responses with requests, [`session`] drives one
//! attempt, [`retry`] repeats transient failures, [`queue`] keeps calls
//! one-at-a-time, and [`client`] ties it together.

pub mod backoff;
pub mod channel;
pub mod client;
pub mod correlator;
pub mod events;
pub mod queue;
pub mod retry;
pub mod rpc;
pub mod session;
pub mod sse;

pub use backoff::Backoff;
pub use client::BridgeClient;
pub use correlator::Correlator;
pub use events::{BridgeEvent, BridgeEventReceiver, BridgeEventSender};
pub use queue::CallQueue;
pub use retry::{with_retry, RetryPolicy};
pub use session::{run_attempt, Phase, SessionAttempt, ToolCall};
pub use sse::{SseParser, StreamConnection, StreamEvent, StreamItem, StreamState};
