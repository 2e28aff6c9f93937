//! Bridge configuration

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Bridge configuration, loaded from TOML with every field defaulted
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Backend origin, e.g. `https://tools.example.com`
    pub base_url: String,
    /// Streaming entry point, resolved against `base_url`
    pub sse_path: String,
    /// Event name of the endpoint announcement frame
    pub endpoint_event: String,
    /// Protocol version sent in the initialize request
    pub protocol_version: String,
    /// Client name sent in the initialize request
    pub client_name: String,
    /// Bearer credential (overridden by `TOOLBRIDGE_API_KEY`)
    pub api_key: Option<String>,
    /// Per-request response timeout
    pub request_timeout_ms: u64,
    /// Whole-attempt deadline
    pub session_timeout_ms: u64,
    /// Budget for the initialize readiness loop
    pub init_deadline_ms: u64,
    pub init_backoff_base_ms: u64,
    pub init_backoff_factor: f64,
    pub init_backoff_max_ms: u64,
    /// Pause after the initialized notification
    pub post_init_pause_ms: u64,
    /// Whole-session attempts per call
    pub max_attempts: u32,
    /// Retry delay unit; attempt `n` waits `n + 1` units
    pub retry_base_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            sse_path: "/sse".to_string(),
            endpoint_event: "endpoint".to_string(),
            protocol_version: "2024-11-05".to_string(),
            client_name: env!("CARGO_PKG_NAME").to_string(),
            api_key: None,
            request_timeout_ms: 30_000,
            session_timeout_ms: 60_000,
            init_deadline_ms: 20_000,
            init_backoff_base_ms: 500,
            init_backoff_factor: 1.5,
            init_backoff_max_ms: 3_000,
            post_init_pause_ms: 500,
            max_attempts: 3,
            retry_base_delay_ms: 3_000,
        }
    }
}

impl BridgeConfig {
    /// Load config from a TOML file, then apply env overrides.
    ///
    /// A missing file yields defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: BridgeConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            tracing::info!("loaded bridge config from {}", path.display());
            config
        } else {
            tracing::warn!("bridge config not found at {}, using defaults", path.display());
            Self::default()
        };

        Ok(config.with_env_overrides())
    }

    /// Apply `TOOLBRIDGE_URL` and `TOOLBRIDGE_API_KEY`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("TOOLBRIDGE_URL") {
            self.base_url = url;
        }
        if let Ok(key) = std::env::var("TOOLBRIDGE_API_KEY") {
            self.api_key = Some(key);
        }
        self
    }

    /// Full URL of the streaming entry point
    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.sse_path.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn init_deadline(&self) -> Duration {
        Duration::from_millis(self.init_deadline_ms)
    }

    pub fn post_init_pause(&self) -> Duration {
        Duration::from_millis(self.post_init_pause_ms)
    }
}

/// Replaceable bearer credential shared between the client and its reconfigure hook.
///
/// Session attempts take a snapshot with [`CredentialStore::get`] when they
/// connect; a later [`CredentialStore::set`] only affects attempts started
/// after it.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    inner: Arc<RwLock<String>>,
}

impl CredentialStore {
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credential.into())),
        }
    }

    /// Snapshot the current credential
    pub fn get(&self) -> String {
        self.inner
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Replace the credential for future attempts
    pub fn set(&self, credential: impl Into<String>) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = credential.into();
        }
    }
}
