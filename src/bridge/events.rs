//! Bridge lifecycle events for status broadcasting.
//!
//! Uses `tokio::sync::broadcast` for multiple subscribers (logs, status
//! displays, tests). Events are cheap to clone and carry enough context for
//! display.

use tokio::sync::broadcast;

use super::session::Phase;

/// Bridge lifecycle event for subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Session attempt opening its event stream.
    Connecting {
        /// Tool being invoked (`tools/list` for discovery)
        tool: String,
        /// 1-based attempt number within the retry wrapper
        attempt: u32,
        /// Stream URL
        url: String,
    },

    /// Endpoint announcement received.
    EndpointAnnounced {
        /// Resolved command endpoint
        endpoint: String,
    },

    /// Initialize was rejected because the command channel is not wired yet.
    NotReady {
        /// Initialize attempt number within the readiness loop
        attempt: u32,
        /// Delay before the next initialize attempt
        delay_ms: u64,
        /// Error from the rejected attempt
        error: String,
    },

    /// Handshake complete.
    Initialized,

    /// Issuing the one request of this session.
    Calling {
        tool: String,
    },

    /// Session attempt settled. Emitted exactly once per attempt.
    Settled {
        /// Phase reached when settlement happened
        phase: Phase,
        /// Whether the attempt produced a value
        ok: bool,
        /// Whether settlement was what closed the stream
        stream_closed: bool,
    },

    /// Whole-session retry scheduled.
    Retrying {
        /// Attempt that just failed (1-based)
        attempt: u32,
        /// Delay before the next attempt in milliseconds
        delay_ms: u64,
        /// Error message from failed attempt
        error: String,
    },

    /// Bearer credential replaced.
    CredentialChanged,
}

impl BridgeEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeEvent::Connecting { .. } => "connecting",
            BridgeEvent::EndpointAnnounced { .. } => "endpoint_announced",
            BridgeEvent::NotReady { .. } => "not_ready",
            BridgeEvent::Initialized => "initialized",
            BridgeEvent::Calling { .. } => "calling",
            BridgeEvent::Settled { .. } => "settled",
            BridgeEvent::Retrying { .. } => "retrying",
            BridgeEvent::CredentialChanged => "credential_changed",
        }
    }
}

/// Broadcast sender for bridge events.
///
/// Clone this to share between components that emit events.
/// Sending to zero receivers silently succeeds.
#[derive(Clone)]
pub struct BridgeEventSender {
    tx: broadcast::Sender<BridgeEvent>,
}

impl BridgeEventSender {
    /// Create a new event sender with the specified buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send an event to all subscribers.
    pub fn send(&self, event: BridgeEvent) {
        let _ = self.tx.send(event);
    }

    /// Create a new subscriber to receive events.
    pub fn subscribe(&self) -> BridgeEventReceiver {
        BridgeEventReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for BridgeEventSender {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Receiver for bridge events.
///
/// A receiver that falls behind misses events but never blocks the sender.
pub struct BridgeEventReceiver {
    rx: broadcast::Receiver<BridgeEvent>,
}

impl BridgeEventReceiver {
    /// Receive the next event, waiting asynchronously.
    ///
    /// Returns `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Option<BridgeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<BridgeEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(BridgeEvent::Initialized.kind(), "initialized");
        assert_eq!(
            BridgeEvent::Settled {
                phase: Phase::Initializing,
                ok: false,
                stream_closed: true
            }
            .kind(),
            "settled"
        );
        assert_eq!(BridgeEvent::CredentialChanged.kind(), "credential_changed");
    }

    #[test]
    fn test_sender_no_receivers() {
        let sender = BridgeEventSender::new(16);
        sender.send(BridgeEvent::CredentialChanged);
    }

    #[test]
    fn test_multiple_subscribers() {
        let sender = BridgeEventSender::new(16);
        let mut rx1 = sender.subscribe();
        let mut rx2 = sender.subscribe();

        sender.send(BridgeEvent::Calling {
            tool: "get_campaigns".to_string(),
        });

        assert_eq!(tokio_test::block_on(rx1.recv()).unwrap().kind(), "calling");
        assert_eq!(tokio_test::block_on(rx2.recv()).unwrap().kind(), "calling");
    }

    #[test]
    fn test_recv_after_sender_dropped() {
        let sender = BridgeEventSender::new(4);
        let mut receiver = sender.subscribe();
        sender.send(BridgeEvent::Initialized);
        drop(sender);

        assert_eq!(tokio_test::block_on(receiver.recv()), Some(BridgeEvent::Initialized));
        assert_eq!(tokio_test::block_on(receiver.recv()), None);
    }

    #[test]
    fn test_lagged_receiver_skips() {
        let sender = BridgeEventSender::new(2);
        let mut receiver = sender.subscribe();
        for attempt in 1..=5 {
            sender.send(BridgeEvent::Retrying {
                attempt,
                delay_ms: 0,
                error: String::new(),
            });
        }
        let events = receiver.drain();
        assert_eq!(events.len(), 2);
        assert!(receiver.try_recv().is_none());
    }
}
