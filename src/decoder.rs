// src/decoder.rs
//
// Frame-level decoding and wire parsing.
//
// Turns raw payload bytes into a DecodedFrame (signal name to rendered
// text) using the message catalog, and parses the two inbound wire formats:
// live hex packets and replayed CSV rows. Malformed input is skipped, never
// an error; frames outside the catalog are expected noise.

use std::collections::HashMap;

use crate::catalog::{Catalog, MessageDef};
use crate::codec::decode_signal;

/// Decoded frame: signal name → textual physical value. Integral values
/// render as plain integers, non-integral with six decimals; a signal that
/// failed to decode is present with an empty string.
pub type DecodedFrame = HashMap<String, String>;

/// One raw frame as it travels from an ingest connection to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub frame_id: u32,
    pub data: Vec<u8>,
}

/// Decode every signal of a message from raw payload bytes.
///
/// Short buffers are padded with trailing zero bytes up to the declared
/// message length; over-length buffers are decoded as-is. A per-signal
/// failure yields an empty string for that signal only.
pub fn decode_frame(data: &[u8], msg: &MessageDef) -> DecodedFrame {
    let mut padded;
    let data = if data.len() < msg.length {
        padded = data.to_vec();
        padded.resize(msg.length, 0);
        &padded[..]
    } else {
        data
    };

    let mut decoded = HashMap::with_capacity(msg.signals.len());
    for signal in &msg.signals {
        let text = match decode_signal(data, signal, msg.length) {
            Ok(value) => value.render(),
            Err(_) => String::new(),
        };
        decoded.insert(signal.name.clone(), text);
    }
    decoded
}

// ============================================================================
// Wire Parsing
// ============================================================================

/// Parse a live CAN packet: space-separated two-digit hex octets, the first
/// four being the big-endian frame id. Returns None on malformed hex or a
/// packet too short to carry an id.
pub fn parse_live_packet(packet: &str) -> Option<RawFrame> {
    let mut bytes = Vec::new();
    for part in packet.split_whitespace() {
        bytes.push(u8::from_str_radix(part, 16).ok()?);
    }
    if bytes.len() < 4 {
        return None;
    }
    let frame_id = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    Some(RawFrame {
        frame_id,
        data: bytes[4..].to_vec(),
    })
}

/// Parse one historical CSV row.
///
/// Column 2 (0-indexed) is the decimal frame id; payload bytes are two-digit
/// hex fields starting at column 5, one per byte of the message's declared
/// length. Blank byte fields read as zero. Rows that are empty, too short,
/// carry a non-numeric id, or reference an unknown frame id are skipped.
pub fn parse_csv_row(line: &str, catalog: &Catalog) -> Option<RawFrame> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.iter().all(|f| f.trim().is_empty()) {
        return None;
    }
    if fields.len() < 3 {
        return None;
    }

    let frame_id: u32 = fields[2].trim().parse().ok()?;
    let msg = catalog.get(frame_id)?;
    if fields.len() < 5 + msg.length {
        return None;
    }

    let mut data = vec![0u8; msg.length];
    for (i, field) in fields[5..5 + msg.length].iter().enumerate() {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        // Unparseable byte fields read as zero, matching the blank case
        if let Ok(b) = u8::from_str_radix(field, 16) {
            data[i] = b;
        }
    }

    Some(RawFrame { frame_id, data })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ByteOrder, SignalDef};

    fn test_message() -> MessageDef {
        MessageDef {
            frame_id: 50,
            length: 4,
            signals: vec![
                SignalDef {
                    name: "A".to_string(),
                    start: 0,
                    length: 16,
                    byte_order: ByteOrder::LittleEndian,
                    is_signed: false,
                    is_float: false,
                    factor: 0.001,
                    offset: 0.0,
                },
                SignalDef {
                    name: "B".to_string(),
                    start: 16,
                    length: 16,
                    byte_order: ByteOrder::LittleEndian,
                    is_signed: false,
                    is_float: false,
                    factor: 1.0,
                    offset: 0.0,
                },
            ],
        }
    }

    #[test]
    fn test_decode_frame_pads_short_input() {
        let msg = test_message();
        // Only the first signal's bytes supplied; B decodes from padding
        let decoded = decode_frame(&[0xBC, 0x98], &msg);
        assert_eq!(decoded["A"], "39.100000");
        assert_eq!(decoded["B"], "0");
    }

    #[test]
    fn test_decode_frame_bad_signal_is_empty_string() {
        let mut msg = test_message();
        msg.signals.push(SignalDef {
            name: "OutOfRange".to_string(),
            start: 30,
            length: 16,
            byte_order: ByteOrder::LittleEndian,
            is_signed: false,
            is_float: false,
            factor: 1.0,
            offset: 0.0,
        });
        let decoded = decode_frame(&[0, 0, 0x05, 0x00], &msg);
        assert_eq!(decoded["OutOfRange"], "");
        // Remaining signals still decode
        assert_eq!(decoded["B"], "5");
    }

    #[test]
    fn test_parse_live_packet() {
        let frame = parse_live_packet("00 00 00 32 01 02 03").unwrap();
        assert_eq!(frame.frame_id, 0x32);
        assert_eq!(frame.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_live_packet_rejects_bad_input() {
        assert!(parse_live_packet("").is_none());
        assert!(parse_live_packet("00 00 ZZ 32").is_none());
        assert!(parse_live_packet("00 00 32").is_none()); // no payload, id incomplete
    }

    #[test]
    fn test_parse_csv_row() {
        let catalog = Catalog::from_json(
            r#"[{"frameId": 50, "length": 4, "signals": []}]"#,
        )
        .unwrap();
        let frame = parse_csv_row("0,0,50,x,y,0A,,FF,10", &catalog).unwrap();
        assert_eq!(frame.frame_id, 50);
        assert_eq!(frame.data, vec![0x0A, 0x00, 0xFF, 0x10]);
    }

    #[test]
    fn test_parse_csv_row_skips_malformed() {
        let catalog = Catalog::from_json(
            r#"[{"frameId": 50, "length": 4, "signals": []}]"#,
        )
        .unwrap();
        // All-empty row
        assert!(parse_csv_row(",,,", &catalog).is_none());
        // Too few columns
        assert!(parse_csv_row("0,1", &catalog).is_none());
        // Non-numeric frame id
        assert!(parse_csv_row("0,0,abc,x,y,0A,0B,0C,0D", &catalog).is_none());
        // Unknown frame id
        assert!(parse_csv_row("0,0,99,x,y,0A,0B,0C,0D", &catalog).is_none());
        // Row shorter than 5 + length
        assert!(parse_csv_row("0,0,50,x,y,0A,0B", &catalog).is_none());
    }
}
