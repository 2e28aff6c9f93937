//! toolbridge - client for a streaming tool-invocation backend
//!
//! Opens a server-sent events session, performs the versioned handshake
//! (polling until the backend's command channel is wired), issues one tool
//! call, and tears the session down. Calls are serialized and transient
//! failures retried from a clean slate.
//!
//! The CLI front end is in `main.rs`.

pub mod bridge;
pub mod config;
pub mod error;
pub mod paths;

pub use bridge::BridgeClient;
pub use config::{BridgeConfig, CredentialStore};
pub use error::{BridgeError, BridgeResult, ErrorKind};
