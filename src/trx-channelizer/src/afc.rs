// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

/// Largest correction accepted in one update (Hz).
pub const MAX_AFC_STEP_HZ: f64 = 50.0;
const AFC_RETAIN: f64 = 0.9;
const AFC_WEIGHT: f64 = 0.1;

/// Accumulates decoder frequency-error estimates into a smoothed
/// tuning correction.
#[derive(Debug, Clone, Default)]
pub struct AfcController {
    accumulated_hz: f64,
}

impl AfcController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulated_hz(&self) -> f64 {
        self.accumulated_hz
    }

    /// Fold one error estimate in and return the new correction.
    ///
    /// Non-finite estimates are ignored.
    pub fn apply_correction(&mut self, hz: f64) -> f64 {
        if !hz.is_finite() {
            return self.accumulated_hz;
        }
        let step = hz.clamp(-MAX_AFC_STEP_HZ, MAX_AFC_STEP_HZ);
        self.accumulated_hz = self.accumulated_hz * AFC_RETAIN + step * AFC_WEIGHT;
        self.accumulated_hz
    }

    /// Mixer offset for a channel, corrected by the accumulated error.
    pub fn corrected_offset_hz(&self, channel_hz: i64, center_hz: i64) -> f64 {
        (channel_hz - center_hz) as f64 - self.accumulated_hz
    }

    pub fn reset(&mut self) {
        self.accumulated_hz = 0.0;
    }
}
