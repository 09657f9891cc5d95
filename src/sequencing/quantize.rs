/// Musical snap grid derived from a tempo and a per-bar subdivision count.
///
/// A bar is four beats long (`60 / tempo * 4` seconds) and carries `note`
/// evenly spaced grid points starting at the bar boundary. Snapping picks
/// between three candidates: the nearest grid point inside the event's
/// bar, the start of that bar, and the start of the next bar, whichever
/// quantized absolute time lands closest to the input. Bar boundaries are
/// candidate snap points in their own right, so this is deliberately not
/// plain nearest-grid-point rounding: a time late in the bar can snap
/// forward across the bar line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizeGrid {
    tempo: u32,
    note: u32,
}

impl QuantizeGrid {
    /// Grid at `tempo` beats per minute with `note` subdivisions per bar.
    pub fn new(tempo: u32, note: u32) -> Self {
        Self { tempo, note }
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn note(&self) -> u32 {
        self.note
    }

    /// Length of one four-beat bar in seconds.
    pub fn bar_length(&self) -> f64 {
        60.0 / self.tempo as f64 * 4.0
    }

    /// Snap `time` (seconds) to the grid.
    ///
    /// Degenerate grids (zero tempo or zero subdivisions) leave the time
    /// untouched rather than dividing by zero.
    pub fn snap(&self, time: f64) -> f64 {
        if self.tempo == 0 || self.note == 0 {
            return time;
        }
        let bar_length = self.bar_length();
        let step = bar_length / self.note as f64;

        // Reduce to a bar count plus a bar-relative residual. The strict
        // comparison means a time exactly on a bar line keeps a full-bar
        // residual, which the three-way choice below resolves back to the
        // same boundary.
        let mut residual = time;
        let mut bars = 0u64;
        while residual > bar_length {
            residual -= bar_length;
            bars += 1;
        }

        // Nearest grid point within the bar; the earliest point wins ties.
        let mut closest = 0.0;
        let mut best_diff = f64::INFINITY;
        for i in 0..self.note {
            let point = i as f64 * step;
            let diff = (point - residual).abs();
            if diff < best_diff {
                best_diff = diff;
                closest = point;
            }
        }

        let bar_start = bars as f64 * bar_length;
        let next_bar = (bars + 1) as f64 * bar_length;
        let on_grid = bar_start + closest;

        if (on_grid - time).abs() < (bar_start - time).abs() {
            if (on_grid - time).abs() < (next_bar - time).abs() {
                on_grid
            } else {
                next_bar
            }
        } else if (bar_start - time).abs() < (next_bar - time).abs() {
            bar_start
        } else {
            next_bar
        }
    }
}
