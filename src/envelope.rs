// src/envelope.rs
//
// Outbound telemetry envelope: the generic `{type, payload, time}` wrapper
// every published record travels in.
//
// Encoded as MessagePack maps (schema-less, field names carried in the
// stream) so subscribers can decode without generated schemas. The hub
// treats the encoded bytes as opaque.

use serde::{Deserialize, Serialize};

use crate::records::Record;

/// Fixed envelope time format: `YYYY-MM-DD HH:MM:SS.mmm`, local time.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    pub time: String,
}

impl Envelope {
    /// Wrap a record for publication, stamping its capture time.
    pub fn from_record(record: &Record) -> Self {
        Self {
            kind: record.kind().to_string(),
            payload: record.payload(),
            time: record.timestamp().format(TIME_FORMAT).to_string(),
        }
    }

    /// Encode to the binary wire form. Field names are written into the
    /// stream (`to_vec_named`), the schema-less contract subscribers rely on.
    pub fn encode(&self) -> Option<Vec<u8>> {
        rmp_serde::to_vec_named(self).ok()
    }

    /// Decode from the binary wire form.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        rmp_serde::from_slice(bytes).ok()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::PackVoltage;
    use chrono::{DateTime, Local};

    #[test]
    fn test_envelope_roundtrip() {
        let record = Record::PackVoltage(PackVoltage {
            timestamp: Local::now(),
            voltage: 398.25,
        });
        let envelope = Envelope::from_record(&record);
        let bytes = envelope.encode().unwrap();
        let back = Envelope::decode(&bytes).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.kind, "pack_voltage");
        assert_eq!(back.payload["voltage"], 398.25);
    }

    #[test]
    fn test_time_format_is_millisecond_local() {
        let ts: DateTime<Local> = Local::now();
        let rendered = ts.format(TIME_FORMAT).to_string();
        // YYYY-MM-DD HH:MM:SS.mmm
        assert_eq!(rendered.len(), 23);
        assert_eq!(&rendered[4..5], "-");
        assert_eq!(&rendered[10..11], " ");
        assert_eq!(&rendered[19..20], ".");
    }
}
