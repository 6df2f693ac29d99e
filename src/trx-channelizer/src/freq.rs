// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Raster arithmetic and human-readable frequencies.

/// Largest raster point `<= hz`. `step` must be positive.
pub fn snap_down(hz: i64, step: i64) -> i64 {
    hz.div_euclid(step) * step
}

/// Smallest raster point `>= hz`. `step` must be positive.
pub fn snap_up(hz: i64, step: i64) -> i64 {
    let down = snap_down(hz, step);
    if down == hz {
        hz
    } else {
        down + step
    }
}

fn fixed(value: f64, min_decimals: usize, max_decimals: usize) -> String {
    let mut s = format!("{:.*}", max_decimals, value);
    if let Some(dot) = s.find('.') {
        let keep = dot + 1 + min_decimals;
        while s.len() > keep && s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

/// Format a frequency for logs and channel names, e.g. `390.9625 MHz`,
/// `12.5 kHz`, `0 Hz`.
pub fn format_hz(hz: i64) -> String {
    if hz <= 0 {
        "0 Hz".to_string()
    } else if hz >= 1_000_000 {
        format!("{} MHz", fixed(hz as f64 / 1e6, 3, 6))
    } else if hz >= 1_000 {
        format!("{} kHz", fixed(hz as f64 / 1e3, 0, 3))
    } else {
        format!("{} Hz", hz)
    }
}
