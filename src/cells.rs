// src/cells.rs
//
// Cell-voltage assembly: eight consecutive frame ids (banks 1–8) each carry
// a sub-range of the 128 cell voltages. The aggregator accumulates them into
// one snapshot and flushes when the terminal bank arrives.
//
// The aggregate is shared mutable state with no lock of its own: it is
// confined to the single pipeline task that owns the Dispatcher (see
// dispatch.rs). Do not touch it from any other task.

use chrono::Local;

use crate::decoder::DecodedFrame;
use crate::records::{float_field, CellSnapshot};

/// First frame id of the cell-voltage sequence (bank 1).
pub const CELL_BASE_FRAME_ID: u32 = 50;
/// Terminal frame id of the sequence (bank 8).
pub const CELL_LAST_FRAME_ID: u32 = 57;
/// Number of physical cells in a full snapshot.
pub const CELL_COUNT: usize = 128;

/// Returns true for frame ids belonging to the cell-voltage sequence.
pub fn is_cell_frame(frame_id: u32) -> bool {
    (CELL_BASE_FRAME_ID..=CELL_LAST_FRAME_ID).contains(&frame_id)
}

/// In-progress accumulator for one cell-voltage snapshot.
#[derive(Debug, Default)]
pub struct CellAggregator {
    current: Option<[f64; CELL_COUNT]>,
}

impl CellAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one contributing frame. Fields named `Cell<N>` with N in
    /// [1,128] write slot N; everything else is ignored. When the terminal
    /// frame id is seen the finished snapshot is returned (stamped with the
    /// current capture time) and internal state is cleared so the next
    /// sequence starts from an empty aggregate.
    pub fn apply(&mut self, frame_id: u32, decoded: &DecodedFrame) -> Option<CellSnapshot> {
        let cells = self.current.get_or_insert([0.0; CELL_COUNT]);

        for name in decoded.keys() {
            if let Some(idx) = cell_index(name) {
                cells[idx - 1] = float_field(decoded, name);
            }
        }

        if frame_id == CELL_LAST_FRAME_ID {
            return self.take();
        }
        None
    }

    /// Flush whatever partial aggregate exists, for orderly shutdown.
    pub fn flush_remaining(&mut self) -> Option<CellSnapshot> {
        self.take()
    }

    fn take(&mut self) -> Option<CellSnapshot> {
        self.current.take().map(|cells| CellSnapshot {
            timestamp: Local::now(),
            cells,
        })
    }
}

/// Parse a `Cell<N>` field name; returns N when it is in [1,128].
fn cell_index(name: &str) -> Option<usize> {
    let idx: usize = name.strip_prefix("Cell")?.parse().ok()?;
    if (1..=CELL_COUNT).contains(&idx) {
        Some(idx)
    } else {
        None
    }
}

/// Remap a decoded cell-bank frame to global `Cell<N>` field names.
///
/// Bank `frame_id` covers slots `(frame_id − 50) × signals_per_frame + 1`
/// onward, in the message definition's signal order.
pub fn remap_cell_fields(
    frame_id: u32,
    signal_names: &[String],
    decoded: &DecodedFrame,
) -> DecodedFrame {
    let offset = (frame_id - CELL_BASE_FRAME_ID) as usize * signal_names.len();
    let mut adjusted = DecodedFrame::with_capacity(signal_names.len());
    for (i, name) in signal_names.iter().enumerate() {
        if let Some(val) = decoded.get(name) {
            adjusted.insert(format!("Cell{}", offset + i + 1), val.clone());
        }
    }
    adjusted
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Build the remapped frame for one bank: 16 cells per frame.
    fn bank_frame(frame_id: u32) -> DecodedFrame {
        let offset = (frame_id - CELL_BASE_FRAME_ID) as usize * 16;
        let mut decoded = DecodedFrame::new();
        for i in 1..=16 {
            decoded.insert(
                format!("Cell{}", offset + i),
                format!("{:.6}", (offset + i) as f64 / 1000.0),
            );
        }
        decoded
    }

    #[test]
    fn test_full_sequence_produces_one_snapshot() {
        let mut agg = CellAggregator::new();
        for frame_id in CELL_BASE_FRAME_ID..CELL_LAST_FRAME_ID {
            assert!(agg.apply(frame_id, &bank_frame(frame_id)).is_none());
        }
        let snapshot = agg
            .apply(CELL_LAST_FRAME_ID, &bank_frame(CELL_LAST_FRAME_ID))
            .expect("terminal frame flushes");

        // All 128 slots populated
        for (i, v) in snapshot.cells.iter().enumerate() {
            assert!((v - (i + 1) as f64 / 1000.0).abs() < 1e-9, "slot {}", i + 1);
        }

        // State cleared: a second sequence starts from an empty aggregate
        let partial = agg.apply(CELL_BASE_FRAME_ID, &bank_frame(CELL_BASE_FRAME_ID));
        assert!(partial.is_none());
        let snapshot2 = agg.flush_remaining().unwrap();
        assert!(snapshot2.cells[0] > 0.0);
        assert_eq!(snapshot2.cells[16], 0.0); // bank 2 never arrived
    }

    #[test]
    fn test_flush_remaining_on_empty_is_none() {
        let mut agg = CellAggregator::new();
        assert!(agg.flush_remaining().is_none());
    }

    #[test]
    fn test_ignores_non_cell_and_out_of_range_fields() {
        let mut agg = CellAggregator::new();
        let mut decoded = DecodedFrame::new();
        decoded.insert("Cell1".to_string(), "3.500000".to_string());
        decoded.insert("Cell129".to_string(), "9.000000".to_string());
        decoded.insert("Voltage".to_string(), "4.000000".to_string());
        agg.apply(CELL_BASE_FRAME_ID, &decoded);

        let snapshot = agg.flush_remaining().unwrap();
        assert_eq!(snapshot.cells[0], 3.5);
        assert!(snapshot.cells[1..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_remap_cell_fields_offsets_by_bank() {
        let names: Vec<String> = (1..=4).map(|i| format!("Cell{}", i)).collect();
        let mut decoded = DecodedFrame::new();
        for name in &names {
            decoded.insert(name.clone(), "1.000000".to_string());
        }
        // Bank 3 (frame 52) with 4 signals per frame covers slots 9–12
        let adjusted = remap_cell_fields(52, &names, &decoded);
        assert_eq!(adjusted.len(), 4);
        assert!(adjusted.contains_key("Cell9"));
        assert!(adjusted.contains_key("Cell12"));
    }
}
