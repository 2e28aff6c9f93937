//! One end-to-end tool invocation over one event stream.
//!
//! ```text
//! Connecting ──endpoint──▶ Initializing ──ready──▶ Calling ──result──▶ Done
//!      └──────────────┴──────────────────┴── any failure ──▶ settled with error
//! ```
//!
//! Every exit path goes through [`SessionAttempt::settle`], which closes the
//! stream, stops the response dispatcher and drops the attempt deadline.
//! Nothing from an attempt survives into the next one.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant, Sleep};
use tracing::{debug, info, instrument, warn};

use super::backoff::Backoff;
use super::channel::{resolve_endpoint, CommandChannel};
use super::correlator::Correlator;
use super::events::{BridgeEvent, BridgeEventSender};
use super::rpc::{self, RpcMessage, RpcResponse};
use super::sse::{StreamConnection, StreamItem};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult, ErrorKind};

/// Session phase. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Connecting,
    Initializing,
    Calling,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Connecting => "connecting",
            Phase::Initializing => "initializing",
            Phase::Calling => "calling",
            Phase::Done => "done",
        }
    }
}

/// The single request a session issues once initialized.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    /// Capability discovery (`tools/list`)
    ListTools,
    /// Named tool invocation (`tools/call`)
    Invoke { name: String, arguments: Value },
}

impl ToolCall {
    pub fn invoke(name: impl Into<String>, arguments: Value) -> Self {
        ToolCall::Invoke {
            name: name.into(),
            arguments,
        }
    }

    /// Tool name for logs and events.
    pub fn label(&self) -> &str {
        match self {
            ToolCall::ListTools => rpc::METHOD_TOOLS_LIST,
            ToolCall::Invoke { name, .. } => name,
        }
    }

    fn request(&self) -> (&'static str, Value) {
        match self {
            ToolCall::ListTools => (rpc::METHOD_TOOLS_LIST, json!({})),
            ToolCall::Invoke { name, arguments } => (
                rpc::METHOD_TOOLS_CALL,
                rpc::tool_call_params(name, arguments.clone()),
            ),
        }
    }
}

/// Run one complete session attempt.
///
/// `credential` is the snapshot taken for this attempt; it is used for the
/// stream and every write.
#[instrument(
    name = "bridge.session",
    skip_all,
    fields(tool = %call.label(), attempt = attempt, session = %uuid::Uuid::new_v4())
)]
pub async fn run_attempt(
    config: Arc<BridgeConfig>,
    http: reqwest::Client,
    credential: String,
    call: &ToolCall,
    attempt: u32,
    events: BridgeEventSender,
) -> BridgeResult<Value> {
    SessionAttempt::new(config, http, credential, attempt, events)
        .run(call)
        .await
}

/// State owned by a single attempt.
pub struct SessionAttempt {
    exchange: Exchange,
    /// Attempt-wide deadline; `None` once settled.
    deadline: Option<Pin<Box<Sleep>>>,
    settled: bool,
}

impl SessionAttempt {
    pub fn new(
        config: Arc<BridgeConfig>,
        http: reqwest::Client,
        credential: String,
        attempt: u32,
        events: BridgeEventSender,
    ) -> Self {
        let mut headers = Vec::new();
        if !credential.is_empty() {
            headers.push(("Authorization".to_string(), format!("Bearer {}", credential)));
        }

        let stream = StreamConnection::new(config.stream_url(), headers);
        let correlator = Correlator::new(config.request_timeout());
        let deadline = Box::pin(sleep(config.session_timeout()));

        Self {
            exchange: Exchange {
                config,
                http,
                credential,
                events,
                attempt,
                phase: Phase::Connecting,
                stream,
                correlator,
                dispatcher: None,
                next_id: 1,
            },
            deadline: Some(deadline),
            settled: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.exchange.phase
    }

    /// Drive the attempt to completion, racing it against the attempt deadline.
    pub async fn run(mut self, call: &ToolCall) -> BridgeResult<Value> {
        let session_timeout = self.exchange.config.session_timeout_ms;
        let outcome = match self.deadline.as_mut() {
            Some(deadline) => tokio::select! {
                result = self.exchange.drive(call) => result,
                _ = deadline => Err(BridgeError::timeout(format!(
                    "session timeout after {}ms",
                    session_timeout
                ))),
            },
            None => Err(BridgeError::other("session attempt already settled")),
        };
        self.settle(outcome)
    }

    /// Release the stream, the dispatcher and the deadline, once.
    fn settle(&mut self, outcome: BridgeResult<Value>) -> BridgeResult<Value> {
        if self.settled {
            return outcome;
        }
        self.settled = true;
        self.deadline = None;
        let stream_closed = self.exchange.teardown();

        let phase = self.exchange.phase;
        match &outcome {
            Ok(_) => info!(phase = phase.as_str(), "session settled"),
            Err(e) => info!(phase = phase.as_str(), kind = %e.kind(), error = %e, "session failed"),
        }
        self.exchange.events.send(BridgeEvent::Settled {
            phase,
            ok: outcome.is_ok(),
            stream_closed,
        });

        outcome
    }
}

impl Drop for SessionAttempt {
    fn drop(&mut self) {
        // Abandoned mid-flight by the caller
        if !self.settled {
            self.settled = true;
            self.deadline = None;
            self.exchange.teardown();
        }
    }
}

/// Everything the phases touch. Split from the deadline so both can be
/// borrowed inside one `select!`.
struct Exchange {
    config: Arc<BridgeConfig>,
    http: reqwest::Client,
    credential: String,
    events: BridgeEventSender,
    attempt: u32,
    phase: Phase,
    stream: StreamConnection,
    correlator: Correlator,
    dispatcher: Option<JoinHandle<()>>,
    next_id: u64,
}

impl Exchange {
    async fn drive(&mut self, call: &ToolCall) -> BridgeResult<Value> {
        let (endpoint, rx) = self.connect(call).await?;
        let channel = CommandChannel::new(self.http.clone(), endpoint, self.credential.clone());
        self.dispatcher = Some(tokio::spawn(dispatch(rx, self.correlator.clone())));

        self.advance(Phase::Initializing);
        self.initialize(&channel).await?;

        self.advance(Phase::Calling);
        let response = self.call(&channel, call).await?;

        self.advance(Phase::Done);
        Ok(rpc::extract_payload(&response))
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(next > self.phase, "phase regressed");
        debug!(from = self.phase.as_str(), to = next.as_str(), "phase");
        self.phase = next;
    }

    /// Open the stream and wait for the endpoint announcement.
    ///
    /// Any transport error here is fatal for the attempt.
    async fn connect(
        &mut self,
        call: &ToolCall,
    ) -> BridgeResult<(String, mpsc::UnboundedReceiver<StreamItem>)> {
        self.events.send(BridgeEvent::Connecting {
            tool: call.label().to_string(),
            attempt: self.attempt,
            url: self.stream.url().to_string(),
        });

        let mut rx = self.stream.open(&self.http).await?;

        loop {
            match rx.recv().await {
                Some(StreamItem::Event(event)) if event.event == self.config.endpoint_event => {
                    let endpoint = resolve_endpoint(self.stream.url(), &event.data)?;
                    info!(endpoint = %endpoint, "endpoint announced");
                    self.events.send(BridgeEvent::EndpointAnnounced {
                        endpoint: endpoint.clone(),
                    });
                    return Ok((endpoint, rx));
                }
                Some(StreamItem::Event(event)) => {
                    debug!(event = %event.event, "ignoring frame before endpoint announcement");
                }
                Some(StreamItem::Error(e)) => return Err(e),
                None => {
                    return Err(BridgeError::connection(
                        "stream closed before endpoint announcement",
                    ))
                }
            }
        }
    }

    /// Versioned handshake with readiness polling.
    async fn initialize(&mut self, channel: &CommandChannel) -> BridgeResult<()> {
        let deadline = Instant::now() + self.config.init_deadline();
        let mut backoff = Backoff::with_config(
            Duration::from_millis(self.config.init_backoff_base_ms),
            self.config.init_backoff_factor,
            Duration::from_millis(self.config.init_backoff_max_ms),
        );
        let params = rpc::initialize_params(&self.config.protocol_version, &self.config.client_name);
        let mut last_error: Option<BridgeError> = None;

        loop {
            let id = self.next_id;
            let outcome = timeout_at(
                deadline,
                self.request(channel, rpc::METHOD_INITIALIZE, params.clone()),
            )
            .await;

            let error = match outcome {
                Ok(Ok(response)) => {
                    response.into_result()?;
                    break;
                }
                Ok(Err(e)) if e.kind() == ErrorKind::TransportNotReady => e,
                Ok(Err(e)) => return Err(e),
                // Silence is only a readiness problem once the backend has said so
                Err(_) => match last_error {
                    Some(last) => return Err(self.never_ready(last)),
                    None => {
                        return Err(BridgeError::timeout(format!(
                            "timeout waiting for response to {}",
                            id
                        )))
                    }
                },
            };

            let delay = backoff.next_delay();
            let attempt = backoff.attempt();
            warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "transport not ready");
            self.events.send(BridgeEvent::NotReady {
                attempt,
                delay_ms: delay.as_millis() as u64,
                error: error.to_string(),
            });

            if timeout_at(deadline, sleep(delay)).await.is_err() {
                return Err(self.never_ready(error));
            }
            last_error = Some(error);
        }

        let initialized = RpcMessage::notification(rpc::METHOD_INITIALIZED, json!({}));
        if let Err(e) = channel.post(&initialized).await {
            debug!(error = %e, "initialized notification failed, continuing");
        }

        sleep(self.config.post_init_pause()).await;
        info!(attempts = backoff.attempt() + 1, "session initialized");
        self.events.send(BridgeEvent::Initialized);
        Ok(())
    }

    fn never_ready(&self, last_error: BridgeError) -> BridgeError {
        BridgeError::not_ready(format!(
            "transport never became ready within {}ms: {}",
            self.config.init_deadline_ms, last_error
        ))
    }

    async fn call(&mut self, channel: &CommandChannel, call: &ToolCall) -> BridgeResult<RpcResponse> {
        let (method, params) = call.request();
        info!(method, "calling");
        self.events.send(BridgeEvent::Calling {
            tool: call.label().to_string(),
        });
        self.request(channel, method, params).await?.into_result()
    }

    async fn request(
        &mut self,
        channel: &CommandChannel,
        method: &str,
        params: Value,
    ) -> BridgeResult<RpcResponse> {
        let id = self.next_id;
        self.next_id += 1;
        let message = RpcMessage::request(id, method, params);
        self.correlator.send(id, channel.post(&message)).await
    }

    /// Close the stream and stop the dispatcher. Returns whether the stream was
    /// still open.
    fn teardown(&mut self) -> bool {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        self.stream.close()
    }
}

/// Route response frames to their waiters until the stream goes away.
///
/// Transport errors past the connecting phase are only logged; the pending
/// request's own timeout decides the attempt's fate.
async fn dispatch(mut rx: mpsc::UnboundedReceiver<StreamItem>, correlator: Correlator) {
    while let Some(item) = rx.recv().await {
        match item {
            StreamItem::Event(event) => match rpc::parse_response(&event.data) {
                Some(response) => {
                    correlator.resolve(response);
                }
                None => debug!(event = %event.event, "ignoring non-response frame"),
            },
            StreamItem::Error(e) => warn!(error = %e, "event stream failed after connect"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert!(Phase::Connecting < Phase::Initializing);
        assert!(Phase::Initializing < Phase::Calling);
        assert!(Phase::Calling < Phase::Done);
        assert_eq!(Phase::Done.as_str(), "done");
    }

    #[test]
    fn test_tool_call_request() {
        let (method, params) = ToolCall::ListTools.request();
        assert_eq!(method, "tools/list");
        assert_eq!(params, json!({}));

        let call = ToolCall::invoke("get_campaigns", json!({"limit": 5}));
        assert_eq!(call.label(), "get_campaigns");
        let (method, params) = call.request();
        assert_eq!(method, "tools/call");
        assert_eq!(params, json!({"name": "get_campaigns", "arguments": {"limit": 5}}));
    }

    #[tokio::test]
    async fn test_refused_connection_settles_once() {
        let config = Arc::new(BridgeConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..BridgeConfig::default()
        });
        let events = BridgeEventSender::default();
        let mut rx = events.subscribe();

        let err = run_attempt(
            config,
            reqwest::Client::new(),
            "key".to_string(),
            &ToolCall::ListTools,
            1,
            events,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);

        let settled: Vec<_> = rx
            .drain()
            .into_iter()
            .filter(|e| matches!(e, BridgeEvent::Settled { .. }))
            .collect();
        assert_eq!(
            settled,
            vec![BridgeEvent::Settled {
                phase: Phase::Connecting,
                ok: false,
                stream_closed: true,
            }]
        );
    }
}
