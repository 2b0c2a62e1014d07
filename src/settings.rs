// src/settings.rs
//
// TOML configuration for the telemetry gateway.
//
// Loaded once at startup; a missing or unparseable file is fatal. All
// fields carry defaults so a minimal config only needs the catalog path.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::TelemError;

/// Ingest mode: replayed CSV rows or live hex packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    Csv,
    Live,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    /// Path to the CAN message definition JSON.
    pub catalog_path: String,
    #[serde(default = "default_mode")]
    pub mode: IngestMode,
    /// Minimum interval between broadcast messages, in milliseconds.
    /// Zero or negative disables throttling.
    #[serde(default = "default_throttle_interval_ms")]
    pub throttle_interval_ms: i64,
    #[serde(default)]
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    /// Directory for timestamped log files. Empty disables file logging.
    #[serde(default)]
    pub log_dir: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port for the raw telemetry ingest WebSocket (/telemetry).
    #[serde(default = "default_ingest_port")]
    pub ingest_port: u16,
    /// Port for the live subscriber WebSocket (/ws).
    #[serde(default = "default_live_port")]
    pub live_port: u16,
}

/// PostgreSQL connection configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub sslmode: Option<String>,
}

impl DatabaseSettings {
    /// Build connection string for tokio-postgres
    pub fn to_connection_string(&self) -> String {
        let mut parts = vec![
            format!("host={}", self.host),
            format!("port={}", self.port),
            format!("dbname={}", self.database),
            format!("user={}", self.username),
        ];

        if let Some(ref pw) = self.password {
            parts.push(format!("password={}", pw));
        }

        if let Some(ref ssl) = self.sslmode {
            parts.push(format!("sslmode={}", ssl));
        }

        parts.join(" ")
    }
}

fn default_mode() -> IngestMode {
    IngestMode::Live
}
fn default_throttle_interval_ms() -> i64 {
    100
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_ingest_port() -> u16 {
    9091
}
fn default_live_port() -> u16 {
    9094
}
fn default_db_port() -> u16 {
    5432
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            ingest_port: default_ingest_port(),
            live_port: default_live_port(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file. Missing file or bad syntax is fatal.
    pub fn load(path: &Path) -> Result<Self, TelemError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TelemError::config(format!("read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| TelemError::config(format!("parse {}: {}", path.display(), e)))
    }
}

// ============================================================================
// Tests
// ============================================================================
