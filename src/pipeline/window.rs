//! Window planning for long audio.

use serde::{Deserialize, Serialize};

/// One slice of the input processed by a single inference call.
///
/// Windows sit on a fixed grid of `window` seconds. Every window after the
/// first reaches `overlap` seconds back into its predecessor, so a word cut
/// at the grid boundary is heard whole by at least one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Zero-based position in temporal order.
    pub index: usize,
    /// Where the audio slice starts, overlap included.
    pub start: f64,
    /// Where this window's grid cell starts.
    pub grid_start: f64,
    /// Where the slice and the grid cell end.
    pub end: f64,
}

impl Window {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// One-based number used in log and error messages.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Splits `total` seconds into `ceil(total / window)` windows. The last one
/// may be shorter.
pub fn plan_windows(total: f64, window: f64, overlap: f64) -> Vec<Window> {
    if total <= 0.0 || window <= 0.0 {
        return Vec::new();
    }
    let overlap = overlap.clamp(0.0, window);
    let count = (total / window).ceil() as usize;

    (0..count)
        .map(|index| {
            let grid_start = index as f64 * window;
            let start = if index == 0 {
                0.0
            } else {
                (grid_start - overlap).max(0.0)
            };
            Window {
                index,
                start,
                grid_start,
                end: (grid_start + window).min(total),
            }
        })
        .collect()
}
