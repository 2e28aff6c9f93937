//! Request/response correlation over an event stream.
//!
//! Outgoing requests are registered under their id *before* the write goes
//! out, so a response that overtakes the POST acknowledgement still finds
//! its waiter. Removal from the pending map is the single arbiter between a
//! response and a timeout: whoever removes the entry wins.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::rpc::RpcResponse;
use crate::error::{BridgeError, BridgeResult};

type PendingMap = DashMap<u64, oneshot::Sender<RpcResponse>>;

/// Pending-request table for one session attempt.
#[derive(Clone)]
pub struct Correlator {
    pending: Arc<PendingMap>,
    timeout: Duration,
}

/// Unregisters its id if the waiting future is dropped early.
struct Registration {
    pending: Arc<PendingMap>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl Correlator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Register `id`, perform `write`, then wait for the matching response.
    ///
    /// The timeout is armed at registration, so it bounds the write and the
    /// wait together. A failed write unregisters and returns its error at once.
    pub async fn send<F>(&self, id: u64, write: F) -> BridgeResult<RpcResponse>
    where
        F: Future<Output = BridgeResult<()>>,
    {
        let (tx, mut rx) = oneshot::channel();
        if self.pending.insert(id, tx).is_some() {
            warn!(id, "request id reused while still pending");
        }
        let _registration = Registration {
            pending: self.pending.clone(),
            id,
        };
        let deadline = Instant::now() + self.timeout;

        match timeout_at(deadline, write).await {
            Ok(written) => written?,
            Err(_) => return self.expire(id, &mut rx),
        }

        match timeout_at(deadline, &mut rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BridgeError::other(format!(
                "response channel closed for request {}",
                id
            ))),
            Err(_) => self.expire(id, &mut rx),
        }
    }

    fn expire(
        &self,
        id: u64,
        rx: &mut oneshot::Receiver<RpcResponse>,
    ) -> BridgeResult<RpcResponse> {
        if self.pending.remove(&id).is_none() {
            // A response removed the entry as the timer fired; it wins.
            if let Ok(response) = rx.try_recv() {
                return Ok(response);
            }
        }
        Err(BridgeError::timeout(format!(
            "timeout waiting for response to {}",
            id
        )))
    }

    /// Hand a response frame to its waiter.
    ///
    /// Returns false when no request is pending under that id; such frames
    /// are dropped.
    pub fn resolve(&self, response: RpcResponse) -> bool {
        let Some(id) = response.request_id() else {
            return false;
        };
        match self.pending.remove(&id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => {
                debug!(id, "dropping unmatched response");
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    async fn wait_until_pending(correlator: &Correlator, count: usize) {
        while correlator.pending_count() < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_resolves_out_of_order() {
        let correlator = Correlator::new(Duration::from_secs(5));

        let mut handles = Vec::new();
        for id in 1..=5u64 {
            let c = correlator.clone();
            handles.push(tokio::spawn(async move {
                c.send(id, async { Ok(()) }).await
            }));
        }
        wait_until_pending(&correlator, 5).await;

        // Unmatched frames interleaved with real ones
        assert!(!correlator.resolve(RpcResponse::success(42, json!("stray"))));
        for id in [3u64, 1, 5, 2, 4] {
            assert!(correlator.resolve(RpcResponse::success(id, json!({ "n": id }))));
            assert!(!correlator.resolve(RpcResponse::success(id, json!("again"))));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let response = handle.await.unwrap().unwrap();
            let id = i as u64 + 1;
            assert_eq!(response.request_id(), Some(id));
            assert_eq!(response.result, Some(json!({ "n": id })));
        }
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_response_during_write() {
        let correlator = Correlator::new(Duration::from_secs(5));
        let c = correlator.clone();

        // The "server" answers before the write returns
        let response = correlator
            .send(1, async move {
                assert!(c.resolve(RpcResponse::success(1, json!("fast"))));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(response.result, Some(json!("fast")));
    }

    #[tokio::test]
    async fn test_write_failure_unregisters() {
        let correlator = Correlator::new(Duration::from_secs(5));
        let err = correlator
            .send(1, async { Err(BridgeError::not_ready("HTTP 400")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportNotReady);
        assert!(!correlator.is_pending(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response_is_dropped() {
        let correlator = Correlator::new(Duration::from_secs(30));
        let err = correlator.send(7, async { Ok(()) }).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "timeout waiting for response to 7");

        assert!(!correlator.resolve(RpcResponse::success(7, json!("late"))));
        assert_eq!(correlator.pending_count(), 0);
    }

    fn assert_within_budget(elapsed: Duration) {
        assert!(elapsed >= Duration::from_secs(30), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(30_010), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_covers_hung_write() {
        let correlator = Correlator::new(Duration::from_secs(30));
        let started = Instant::now();

        let err = correlator
            .send(3, std::future::pending::<BridgeResult<()>>())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "timeout waiting for response to 3");
        assert_within_budget(started.elapsed());
        assert!(!correlator.is_pending(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_write_shares_one_budget() {
        let correlator = Correlator::new(Duration::from_secs(30));
        let started = Instant::now();

        // 20s spent writing leaves 10s for the response
        let err = correlator
            .send(4, async {
                tokio::time::sleep(Duration::from_secs(20)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_within_budget(started.elapsed());
    }

    #[tokio::test]
    async fn test_dropped_waiter_unregisters() {
        let correlator = Correlator::new(Duration::from_secs(30));
        let c = correlator.clone();
        let handle = tokio::spawn(async move { c.send(1, async { Ok(()) }).await });
        wait_until_pending(&correlator, 1).await;

        handle.abort();
        let _ = handle.await;
        assert!(!correlator.is_pending(1));
    }

    #[test]
    fn test_resolve_without_id() {
        let correlator = Correlator::new(Duration::from_secs(1));
        let response = RpcResponse {
            id: serde_json::Value::Null,
            result: Some(json!({})),
            error: None,
        };
        assert!(!correlator.resolve(response));
    }
}
