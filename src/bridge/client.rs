//! Public entry point: invoke a tool or list tools.
//!
//! Each call waits its turn in the [`CallQueue`], then runs one or more
//! fresh session attempts under the [`RetryPolicy`]. The credential is read
//! once per attempt, so a [`BridgeClient::set_credential`] takes effect from
//! the next attempt on, retries included.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, instrument};

use super::events::{BridgeEvent, BridgeEventReceiver, BridgeEventSender};
use super::queue::CallQueue;
use super::retry::{with_retry, RetryPolicy};
use super::session::{run_attempt, ToolCall};
use crate::config::{BridgeConfig, CredentialStore};
use crate::error::BridgeResult;

/// Serialized, retrying tool-invocation client.
#[derive(Clone)]
pub struct BridgeClient {
    config: Arc<BridgeConfig>,
    http: reqwest::Client,
    credential: CredentialStore,
    queue: CallQueue,
    events: BridgeEventSender,
}

impl BridgeClient {
    /// Create a client, seeding the credential from `config.api_key`.
    pub fn new(config: BridgeConfig) -> Self {
        let credential = CredentialStore::new(config.api_key.clone().unwrap_or_default());
        Self::with_credential_store(config, credential)
    }

    /// Create a client sharing an externally owned credential slot.
    pub fn with_credential_store(config: BridgeConfig, credential: CredentialStore) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
            credential,
            queue: CallQueue::new(),
            events: BridgeEventSender::default(),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> BridgeEventReceiver {
        self.events.subscribe()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Replace the bearer credential for future attempts.
    pub fn set_credential(&self, credential: impl Into<String>) {
        self.credential.set(credential);
        info!("bridge credential replaced");
        self.events.send(BridgeEvent::CredentialChanged);
    }

    /// Invoke a named tool and return its extracted payload.
    #[instrument(name = "bridge.invoke", skip(self, arguments))]
    pub async fn invoke(&self, tool: &str, arguments: Value) -> BridgeResult<Value> {
        self.execute(ToolCall::invoke(tool, arguments)).await
    }

    /// Capability discovery: the backend's tool list.
    #[instrument(name = "bridge.list_tools", skip(self))]
    pub async fn list_tools(&self) -> BridgeResult<Value> {
        self.execute(ToolCall::ListTools).await
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.max_attempts,
            Duration::from_millis(self.config.retry_base_delay_ms),
        )
    }

    async fn execute(&self, call: ToolCall) -> BridgeResult<Value> {
        let policy = self.retry_policy();
        self.queue
            .run(|| {
                with_retry(policy, &self.events, |attempt| {
                    run_attempt(
                        self.config.clone(),
                        self.http.clone(),
                        self.credential.get(),
                        &call,
                        attempt,
                        self.events.clone(),
                    )
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_seeded_from_config() {
        let client = BridgeClient::new(BridgeConfig {
            api_key: Some("k1".to_string()),
            ..BridgeConfig::default()
        });
        assert_eq!(client.credential.get(), "k1");
    }

    #[test]
    fn test_set_credential_emits_event() {
        let store = CredentialStore::new("old");
        let client = BridgeClient::with_credential_store(BridgeConfig::default(), store.clone());
        let mut rx = client.subscribe();

        client.set_credential("new");
        assert_eq!(store.get(), "new");
        assert_eq!(rx.try_recv(), Some(BridgeEvent::CredentialChanged));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let client = BridgeClient::new(BridgeConfig {
            max_attempts: 4,
            retry_base_delay_ms: 100,
            ..BridgeConfig::default()
        });
        let policy = client.retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_unreachable_backend_exhausts_retries() {
        let client = BridgeClient::new(BridgeConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            max_attempts: 2,
            retry_base_delay_ms: 10,
            ..BridgeConfig::default()
        });
        let mut rx = client.subscribe();

        let err = client.list_tools().await.unwrap_err();
        assert!(err.is_transient());

        let events = rx.drain();
        let connects = events
            .iter()
            .filter(|e| matches!(e, BridgeEvent::Connecting { .. }))
            .count();
        let retries = events
            .iter()
            .filter(|e| matches!(e, BridgeEvent::Retrying { .. }))
            .count();
        assert_eq!(connects, 2);
        assert_eq!(retries, 1);
    }
}
