//! Minimal server-sent events client.
//!
//! [`SseParser`] turns arbitrarily split byte chunks into [`StreamEvent`]s.
//! [`StreamConnection`] owns one long-lived GET and forwards parsed events
//! (and late transport errors) over an unbounded channel. No retry happens
//! here; reconnect policy belongs to the session and retry layers.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};

/// Event name used when a frame has no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// One frame delivered by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub event: String,
    pub data: String,
}

impl StreamEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Incremental frame parser.
///
/// Bytes are buffered until a newline arrives, so chunk boundaries may fall
/// anywhere, including inside a multi-byte character.
#[derive(Debug)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: String,
    data: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            event: DEFAULT_EVENT.to_string(),
            data: None,
        }
    }

    /// Feed a chunk, returning every frame it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = text.strip_suffix('\r').unwrap_or(&text);

            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            let data = self.data.take();
            let event = std::mem::replace(&mut self.event, DEFAULT_EVENT.to_string());
            return data.map(|data| StreamEvent { event, data });
        }

        if let Some(value) = line.strip_prefix("event:") {
            self.event = field_value(value).to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            // Single-line payload framing: last data line wins
            self.data = Some(field_value(value).to_string());
        }
        // Comments (`:`), `id:`, `retry:` and unknown fields are ignored
        None
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn field_value(raw: &str) -> &str {
    raw.strip_prefix(' ').unwrap_or(raw)
}

/// What the reader task forwards to the connection's owner.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(StreamEvent),
    /// Socket error or premature end of stream. Always the last item.
    Error(BridgeError),
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Open,
    Closed,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Connecting => "connecting",
            StreamState::Open => "open",
            StreamState::Closed => "closed",
        }
    }
}

/// One long-lived event-stream GET.
///
/// Closing is idempotent and also happens on drop, which aborts the reader
/// task and releases the socket.
pub struct StreamConnection {
    url: String,
    headers: Vec<(String, String)>,
    state: StreamState,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl StreamConnection {
    /// Create a connection in the `Connecting` state without touching the network.
    pub fn new(url: impl Into<String>, headers: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            headers,
            state: StreamState::Connecting,
            cancel: CancellationToken::new(),
            reader: None,
        }
    }

    /// Open a stream and start reading.
    pub async fn connect(
        http: &reqwest::Client,
        url: impl Into<String>,
        headers: Vec<(String, String)>,
    ) -> BridgeResult<(Self, mpsc::UnboundedReceiver<StreamItem>)> {
        let mut conn = Self::new(url, headers);
        let rx = conn.open(http).await?;
        Ok((conn, rx))
    }

    /// Issue the GET and spawn the reader task.
    ///
    /// Fails with `ConnectionFailed` if the request errors or the status is
    /// not a success.
    pub async fn open(
        &mut self,
        http: &reqwest::Client,
    ) -> BridgeResult<mpsc::UnboundedReceiver<StreamItem>> {
        if self.state != StreamState::Connecting {
            return Err(BridgeError::connection(format!(
                "stream {} is {}",
                self.url,
                self.state.as_str()
            )));
        }

        let mut request = http
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::connection(format!("stream connection failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::connection(format!(
                "stream connection failed: HTTP {}: {}",
                status, body
            )));
        }

        debug!(url = %self.url, "event stream open");
        self.state = StreamState::Open;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.clone();
        let url = self.url.clone();
        self.reader = Some(tokio::spawn(read_stream(response, tx, cancel, url)));

        Ok(rx)
    }

    /// Close the stream. Returns true only for the call that actually closed it.
    pub fn close(&mut self) -> bool {
        if self.state == StreamState::Closed {
            return false;
        }
        self.state = StreamState::Closed;
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        debug!(url = %self.url, "event stream closed");
        true
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_stream(
    response: reqwest::Response,
    tx: mpsc::UnboundedSender<StreamItem>,
    cancel: CancellationToken,
    url: String,
) {
    let mut parser = SseParser::new();
    let mut body = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for event in parser.feed(&bytes) {
                    debug!(event = %event.event, bytes = event.data.len(), "frame");
                    if tx.send(StreamItem::Event(event)).is_err() {
                        // Nobody listening any more
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!(url = %url, error = %e, "event stream error");
                let _ = tx.send(StreamItem::Error(BridgeError::connection(format!(
                    "stream error: {}",
                    e
                ))));
                return;
            }
            None => {
                debug!(url = %url, "event stream ended");
                let _ = tx.send(StreamItem::Error(BridgeError::connection(
                    "stream ended unexpectedly",
                )));
                return;
            }
        }
    }
}
