//! Whole-session retry.
//!
//! A failed attempt is retried from scratch only when its error is tagged
//! transient. Attempt `n` (0-based) that fails waits `base × (n + 1)` before
//! the next one: 3s, 6s, ... with the default base.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::events::{BridgeEvent, BridgeEventSender};
use crate::error::{BridgeError, BridgeResult};

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the failed attempt with 0-based index `attempt_index`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        self.base_delay.saturating_mul(attempt_index.saturating_add(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(3))
    }
}

/// Run `attempt` until it succeeds, fails non-transiently, or attempts run out.
///
/// `attempt` receives the 1-based attempt number and must build everything it
/// needs afresh; nothing is carried between calls. The last error is returned
/// unchanged.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    events: &BridgeEventSender,
    mut attempt: F,
) -> BridgeResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = BridgeResult<T>>,
{
    let mut index = 0u32;
    loop {
        let error: BridgeError = match attempt(index + 1).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let remaining = policy.max_attempts.saturating_sub(index + 1);
        if !error.is_transient() || remaining == 0 {
            return Err(error);
        }

        let delay = policy.delay_for(index);
        warn!(
            attempt = index + 1,
            remaining,
            delay_ms = delay.as_millis() as u64,
            kind = %error.kind(),
            error = %error,
            "session failed, retrying"
        );
        events.send(BridgeEvent::Retrying {
            attempt: index + 1,
            delay_ms: delay.as_millis() as u64,
            error: error.to_string(),
        });

        tokio::time::sleep(delay).await;
        index += 1;
    }
}
