//! Command channel: JSON-RPC messages POSTed to the announced endpoint.
//!
//! Responses never come back on the POST itself. The POST only has to be
//! accepted; the answer arrives later as a stream frame.

use reqwest::{StatusCode, Url};
use tracing::debug;

use super::rpc::RpcMessage;
use crate::error::{BridgeError, BridgeResult};

/// Marker the backend puts in the body when the session's channel is not wired yet.
const NOT_READY_MARKER: &str = "no transport found";

/// Resolve an endpoint announcement against the stream URL's origin.
pub fn resolve_endpoint(stream_url: &str, announced: &str) -> BridgeResult<String> {
    let base = Url::parse(stream_url)
        .map_err(|e| BridgeError::other(format!("invalid stream url {}: {}", stream_url, e)))?;
    let endpoint = base.join(announced.trim()).map_err(|e| {
        BridgeError::other(format!("invalid endpoint announcement {:?}: {}", announced, e))
    })?;
    Ok(endpoint.to_string())
}

/// Writer for one session's command endpoint.
#[derive(Clone)]
pub struct CommandChannel {
    http: reqwest::Client,
    endpoint: String,
    credential: String,
}

impl CommandChannel {
    pub fn new(http: reqwest::Client, endpoint: String, credential: String) -> Self {
        Self {
            http,
            endpoint,
            credential,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST a message and check the acknowledgement status.
    pub async fn post(&self, message: &RpcMessage) -> BridgeResult<()> {
        debug!(method = %message.method, id = ?message.id, "posting");

        let mut request = self.http.post(&self.endpoint).json(message);
        if !self.credential.is_empty() {
            request = request.bearer_auth(&self.credential);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::connection(format!("POST {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        if is_accepted(status, message.is_notification()) {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_rejection(status, &body))
    }
}

/// 202 for requests; notifications may also get 204. Some servers answer 200.
fn is_accepted(status: StatusCode, notification: bool) -> bool {
    match status {
        StatusCode::OK | StatusCode::ACCEPTED => true,
        StatusCode::NO_CONTENT => notification,
        _ => false,
    }
}

fn classify_rejection(status: StatusCode, body: &str) -> BridgeError {
    let message = format!("unexpected status {}: {}", status.as_u16(), body);
    if status == StatusCode::BAD_REQUEST || body.to_ascii_lowercase().contains(NOT_READY_MARKER) {
        BridgeError::not_ready(message)
    } else {
        BridgeError::other(message)
    }
}
