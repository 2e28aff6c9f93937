//! Config path resolution for toolbridge
//!
//! Follows XDG Base Directory Specification with 12-factor env var overrides.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `TOOLBRIDGE_CONFIG` | Config file path | `~/.config/toolbridge/config.toml` |
//! | `TOOLBRIDGE_URL` | Backend base URL | from config file |
//! | `TOOLBRIDGE_API_KEY` | Bearer credential | from config file |

use std::path::PathBuf;

/// Get the XDG config directory for toolbridge
///
/// Priority: `XDG_CONFIG_HOME` > `~/.config`
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("toolbridge");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config/toolbridge");
    }

    // Last resort: current directory
    PathBuf::from(".")
}

/// Get the config file path
///
/// Priority: `TOOLBRIDGE_CONFIG` env var > `config_dir()/config.toml`
pub fn config_path() -> PathBuf {
    std::env::var("TOOLBRIDGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir().join("config.toml"))
}

/// Log resolved paths for discoverability
pub fn log_paths() {
    use tracing::info;
    info!("config directory: {}", config_dir().display());
    info!("config file: {}", config_path().display());
}
