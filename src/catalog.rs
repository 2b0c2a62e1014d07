// src/catalog.rs
//
// CAN message catalog: frame id → message definition (signal list, length).
//
// Loaded once at startup from a JSON definition file and shared read-only
// across all decode paths for the process lifetime. Duplicate frame ids
// overwrite earlier entries in load order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::TelemError;

/// Byte order of a signal within the frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

/// Descriptor of one signal packed into a bit sub-range of a frame payload.
/// Bit positions are absolute from the start of the message byte buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalDef {
    pub name: String,
    /// Start bit offset from the beginning of the payload.
    pub start: u32,
    /// Bit length of the raw value.
    pub length: u32,
    pub byte_order: ByteOrder,
    pub is_signed: bool,
    pub is_float: bool,
    /// Linear scale: physical = raw * factor + offset.
    pub factor: f64,
    pub offset: f64,
}

/// Definition of one CAN message: frame id, payload length, ordered signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDef {
    pub frame_id: u32,
    /// Payload length in bytes.
    pub length: usize,
    pub signals: Vec<SignalDef>,
}

/// The load-once message catalog.
pub struct Catalog {
    /// All messages in definition-file order (the simulated sender
    /// round-robins over this).
    messages: Vec<MessageDef>,
    by_id: HashMap<u32, MessageDef>,
}

impl Catalog {
    /// Load the catalog from a JSON definition file.
    /// Any read or parse failure is fatal; no partial catalog is accepted.
    pub fn load(path: &Path) -> Result<Self, TelemError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| TelemError::catalog(format!("read {}: {}", path.display(), e)))?;
        Self::from_json(&data)
    }

    /// Parse catalog JSON: an ordered list of message definitions.
    pub fn from_json(data: &str) -> Result<Self, TelemError> {
        let messages: Vec<MessageDef> = serde_json::from_str(data)
            .map_err(|e| TelemError::catalog(format!("parse definitions: {}", e)))?;

        let mut by_id = HashMap::with_capacity(messages.len());
        for msg in &messages {
            // Later entries win on duplicate frame ids
            by_id.insert(msg.frame_id, msg.clone());
        }

        Ok(Self { messages, by_id })
    }

    pub fn get(&self, frame_id: u32) -> Option<&MessageDef> {
        self.by_id.get(&frame_id)
    }

    pub fn messages(&self) -> &[MessageDef] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
