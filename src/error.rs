// src/error.rs
//
// Typed error for the telemetry pipeline.
//
// One enum covers the whole crate: codec failures are per-signal and
// non-fatal, catalog/config failures are fatal at startup, sink and
// connection failures are absorbed by the caller.

use std::fmt;

/// Error type for telemetry operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemError {
    /// A single signal could not be decoded (out of bounds, bad geometry).
    /// Never fatal to the surrounding frame.
    Codec { signal: String, reason: String },
    /// The signal catalog could not be loaded or parsed. Fatal at startup.
    Catalog(String),
    /// Configuration file missing or invalid. Fatal at startup.
    Config(String),
    /// A persistence insert failed. Logged and absorbed per record.
    Sink(String),
    /// A transport connection failed.
    Connection { peer: String, reason: String },
}

impl TelemError {
    pub fn codec(signal: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Codec {
            signal: signal.into(),
            reason: reason.into(),
        }
    }

    pub fn catalog(reason: impl Into<String>) -> Self {
        Self::Catalog(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    pub fn sink(reason: impl Into<String>) -> Self {
        Self::Sink(reason.into())
    }

    pub fn connection(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            peer: peer.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TelemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec { signal, reason } => write!(f, "[codec] {}: {}", signal, reason),
            Self::Catalog(reason) => write!(f, "[catalog] {}", reason),
            Self::Config(reason) => write!(f, "[config] {}", reason),
            Self::Sink(reason) => write!(f, "[sink] {}", reason),
            Self::Connection { peer, reason } => write!(f, "[connection] {}: {}", peer, reason),
        }
    }
}

impl std::error::Error for TelemError {}
