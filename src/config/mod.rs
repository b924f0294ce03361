// SPDX-License-Identifier: MIT
//! Daemon configuration.
//!
//! Priority (highest to lowest): CLI flags / env vars, then
//! `{data_dir}/config.toml`, then built-in defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4310;
const DEFAULT_TASK_API_URL: &str = "http://127.0.0.1:4000/api";
const DEFAULT_OUTBOX_CAPACITY: usize = 128;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// WebSocket server port (default: 4310).
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,collabd=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json" (structured for log aggregators).
    log_format: Option<String>,
    /// Base URL of the hosting CRUD API used for task lookups.
    task_api_url: Option<String>,
    /// Bearer token sent on task lookups. Omit when the API trusts loopback.
    task_api_token: Option<String>,
    /// Per-connection outbound queue capacity (default: 128). A full queue
    /// drops events for that connection rather than blocking the hub.
    outbox_capacity: Option<usize>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── CollabConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CollabConfig {
    pub port: u16,
    pub bind_address: String,
    pub data_dir: PathBuf,
    pub log: String,
    /// "pretty" | "json".
    pub log_format: String,
    /// Hosting CRUD API base URL (COLLABD_TASK_API_URL env var).
    pub task_api_url: String,
    /// Bearer token for the task API (COLLABD_TASK_API_TOKEN env var).
    pub task_api_token: Option<String>,
    pub outbox_capacity: usize,
}

impl CollabConfig {
    /// Build config from CLI/env args + optional TOML file.
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // TOML is the lowest-priority override layer.
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(std::env::var("COLLABD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let log_format = std::env::var("COLLABD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let task_api_url = std::env::var("COLLABD_TASK_API_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.task_api_url)
            .unwrap_or_else(|| DEFAULT_TASK_API_URL.to_string());

        let task_api_token = std::env::var("COLLABD_TASK_API_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.task_api_token);

        let outbox_capacity = toml.outbox_capacity.unwrap_or(DEFAULT_OUTBOX_CAPACITY).max(1);

        Self {
            port,
            bind_address,
            data_dir,
            log,
            log_format,
            task_api_url,
            task_api_token,
            outbox_capacity,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("collabd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/collabd or ~/.local/share/collabd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("collabd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("collabd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("collabd");
        }
    }
    // Fallback
    PathBuf::from(".collabd")
}
