// src/codec.rs
//
// Bit-level CAN signal codec: pack/unpack of one signal value into/out of a
// frame payload buffer. Pure bit math, no I/O.
//
// Decode supports three paths: IEEE-754 float signals (32/64 bit), a fast
// path for whole-byte-aligned little-endian integers, and a general
// bit-by-bit path for any alignment. Encode is the inverse packing used by
// the simulated sender; bits are OR-ed into the buffer, so callers must
// start from a zeroed payload per message.

use crate::catalog::{ByteOrder, SignalDef};
use crate::error::TelemError;

// ============================================================================
// Signal Values
// ============================================================================

/// A decoded physical value. Signed signals decode to the integer channel,
/// everything else to the float channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalValue {
    Integer(i64),
    Float(f64),
}

impl SignalValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Integer(i) => i as f64,
            Self::Float(v) => v,
        }
    }

    /// Render the physical value as text: integral values as plain integers,
    /// non-integral as fixed six-decimal. This textual form is the contract
    /// between the frame decoder and the record constructors downstream.
    pub fn render(&self) -> String {
        match *self {
            Self::Integer(i) => i.to_string(),
            Self::Float(v) => {
                if v.is_finite() && v == (v as i64) as f64 {
                    (v as i64).to_string()
                } else {
                    format!("{:.6}", v)
                }
            }
        }
    }
}

// ============================================================================
// Decode
// ============================================================================

/// Decode a single signal from raw frame data.
///
/// `msg_length` is the declared payload length of the owning message in
/// bytes; a signal extending past it is a per-signal error, never fatal to
/// the frame.
pub fn decode_signal(
    data: &[u8],
    signal: &SignalDef,
    msg_length: usize,
) -> Result<SignalValue, TelemError> {
    let bit_start = signal.start as usize;
    let bit_end = bit_start + signal.length as usize;
    if bit_end > msg_length * 8 {
        return Err(TelemError::codec(&signal.name, "signal out of bounds"));
    }

    if signal.is_float {
        return decode_float(data, signal, bit_start);
    }

    // Fast path: whole-byte-aligned little-endian integers.
    if signal.byte_order == ByteOrder::LittleEndian
        && signal.length % 8 == 0
        && bit_start % 8 == 0
    {
        let num_bytes = (signal.length / 8) as usize;
        let start_byte = bit_start / 8;
        let end_byte = start_byte + num_bytes;
        if end_byte > data.len() {
            return Err(TelemError::codec(&signal.name, "signal out of bounds"));
        }
        let mut raw: u64 = 0;
        for (i, b) in data[start_byte..end_byte].iter().enumerate() {
            raw |= (*b as u64) << (8 * i);
        }
        let phys = raw as f64 * signal.factor + signal.offset;
        // Sign handling here operates on the final physical value, not the
        // raw bits. The general path below sign-extends the raw value
        // instead. Kept asymmetric on purpose; see DESIGN.md.
        if signal.is_signed {
            return Ok(SignalValue::Integer(phys as i64));
        }
        return Ok(SignalValue::Float(phys));
    }

    // General path: bit-by-bit extraction, LSB first.
    if bit_end > data.len() * 8 {
        return Err(TelemError::codec(&signal.name, "data too short"));
    }
    let mut raw: u64 = 0;
    for i in bit_start..bit_end {
        let bit = (data[i / 8] >> (i % 8)) & 1;
        raw |= (bit as u64) << (i - bit_start);
    }

    let phys = if signal.is_signed {
        sign_extend(raw, signal.length) as f64 * signal.factor + signal.offset
    } else {
        raw as f64 * signal.factor + signal.offset
    };
    if signal.is_signed {
        Ok(SignalValue::Integer(phys as i64))
    } else {
        Ok(SignalValue::Float(phys))
    }
}

/// Decode an IEEE-754 float signal. The raw byte range is normalised to
/// little-endian (big-endian signals are byte-swapped first), then
/// reinterpreted as f32/f64 and linearly transformed.
fn decode_float(
    data: &[u8],
    signal: &SignalDef,
    bit_start: usize,
) -> Result<SignalValue, TelemError> {
    if signal.length != 32 && signal.length != 64 {
        return Err(TelemError::codec(
            &signal.name,
            format!("unsupported float length {}", signal.length),
        ));
    }
    let byte_start = bit_start / 8;
    let byte_end = (bit_start + signal.length as usize) / 8;
    if byte_end > data.len() {
        return Err(TelemError::codec(&signal.name, "data too short"));
    }

    let mut float_bytes = data[byte_start..byte_end].to_vec();
    if signal.byte_order == ByteOrder::BigEndian {
        float_bytes.reverse();
    }

    let physical = if signal.length == 32 {
        let bits = u32::from_le_bytes([float_bytes[0], float_bytes[1], float_bytes[2], float_bytes[3]]);
        f32::from_bits(bits) as f64 * signal.factor + signal.offset
    } else {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&float_bytes);
        f64::from_bits(u64::from_le_bytes(buf)) * signal.factor + signal.offset
    };
    Ok(SignalValue::Float(physical))
}

/// Two's-complement sign extension of a `length`-bit raw value.
fn sign_extend(raw: u64, length: u32) -> i64 {
    if length >= 64 {
        return raw as i64;
    }
    if raw >> (length - 1) & 1 == 1 {
        raw as i64 - (1i64 << length)
    } else {
        raw as i64
    }
}

// ============================================================================
// Encode
// ============================================================================

/// Convert a physical value into the raw bit pattern `encode_raw` packs.
/// Float signals carry the IEEE-754 bit pattern (f32 unless the signal is
/// 64 bits wide); integer signals carry the two's-complement value.
pub fn raw_from_physical(signal: &SignalDef, physical: f64) -> u64 {
    if signal.is_float {
        if signal.length == 64 {
            physical.to_bits()
        } else {
            (physical as f32).to_bits() as u64
        }
    } else {
        (physical as i64) as u64
    }
}

/// Pack the low `signal.length` bits of `value` into the buffer starting at
/// `signal.start`, honouring the declared byte order. Bits are OR-ed in; the
/// buffer is never cleared here.
pub fn encode_raw(data: &mut [u8], signal: &SignalDef, value: u64) {
    match signal.byte_order {
        ByteOrder::LittleEndian => pack_bits_little_endian(data, signal.start, signal.length, value),
        ByteOrder::BigEndian => pack_bits_big_endian(data, signal.start, signal.length, value),
    }
}

/// Little-endian packing: each pass fills one target byte from its low end
/// upward, consuming the value LSB first.
fn pack_bits_little_endian(data: &mut [u8], start_bit: u32, length: u32, value: u64) {
    let mut bits_remaining = length;
    let mut current_bit = start_bit;
    while bits_remaining > 0 {
        let byte_index = (current_bit / 8) as usize;
        let bit_offset = current_bit % 8;
        let available_bits = 8 - bit_offset;
        let bits_to_write = available_bits.min(bits_remaining);
        let mask = (1u64 << bits_to_write) - 1;
        let shifted = (value >> (length - bits_remaining)) & mask;
        data[byte_index] |= (shifted << bit_offset) as u8;
        current_bit += bits_to_write;
        bits_remaining -= bits_to_write;
    }
}

/// Big-endian packing: each pass fills one target byte from its high end
/// downward, consuming the value LSB first.
fn pack_bits_big_endian(data: &mut [u8], start_bit: u32, length: u32, value: u64) {
    let mut bits_remaining = length;
    let mut current_bit = start_bit;
    while bits_remaining > 0 {
        let byte_index = (current_bit / 8) as usize;
        let bit_offset = current_bit % 8;
        let available_bits = 8 - bit_offset;
        let bits_to_write = available_bits.min(bits_remaining);
        let mask = (1u64 << bits_to_write) - 1;
        let shifted = (value >> (length - bits_remaining)) & mask;
        let shift = available_bits as i32 - bits_to_write as i32 - bit_offset as i32;
        if shift >= 0 {
            data[byte_index] |= (shifted << shift) as u8;
        }
        current_bit += bits_to_write;
        bits_remaining -= bits_to_write;
    }
}

// ============================================================================
// Tests
// ============================================================================
