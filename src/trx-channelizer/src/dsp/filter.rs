// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::PI;

/// Smallest tap count produced by [`design_lowpass`].
pub const MIN_TAPS: usize = 63;
/// Largest tap count produced by [`design_lowpass`].
pub const MAX_TAPS: usize = 255;

/// Number of taps needed for a given normalised transition width.
///
/// Grows as the transition narrows (`ceil(4 / transition)`), clamped to
/// `[MIN_TAPS, MAX_TAPS]` and forced odd so the filter has a centre tap.
pub fn tap_count(transition_norm: f64) -> usize {
    let width = transition_norm.max(1e-6);
    let wanted = (4.0 / width).ceil();
    let mut taps = if wanted.is_finite() {
        (wanted as usize).clamp(MIN_TAPS, MAX_TAPS)
    } else {
        MAX_TAPS
    };
    if taps % 2 == 0 {
        taps += 1;
    }
    taps
}

/// Design a windowed-sinc (Hamming) low-pass FIR.
///
/// `cutoff_norm` and `transition_norm` are fractions of the input rate,
/// both in `(0, 0.5)`. The returned taps sum to 1.0 (unity DC gain).
pub fn design_lowpass(cutoff_norm: f64, transition_norm: f64) -> Vec<f32> {
    let taps = tap_count(transition_norm);
    let m = (taps / 2) as isize;
    let span = (taps - 1) as f64;

    let mut coeffs = Vec::with_capacity(taps);
    let mut sum = 0.0_f64;
    for i in 0..taps {
        let k = i as isize - m;
        let sinc = if k == 0 {
            2.0 * cutoff_norm
        } else {
            let x = k as f64;
            (2.0 * PI * cutoff_norm * x).sin() / (PI * x)
        };
        let window = 0.54 - 0.46 * (2.0 * PI * i as f64 / span).cos();
        let value = sinc * window;
        sum += value;
        coeffs.push(value);
    }

    // Normalise in f64 so the f32 taps still sum to 1 within rounding.
    let inv = if sum.abs() > 1e-12 { 1.0 / sum } else { 1.0 };
    coeffs.into_iter().map(|c| (c * inv) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taps_sum_to_unity() {
        for &(cutoff, transition) in &[
            (0.0075, 0.0025),
            (0.1, 0.05),
            (0.25, 0.1),
            (0.45, 0.049),
            (0.01, 0.4),
            (0.3, 0.0001),
        ] {
            let taps = design_lowpass(cutoff, transition);
            let sum: f64 = taps.iter().map(|&t| t as f64).sum();
            assert!(
                (sum - 1.0).abs() < 1e-6,
                "cutoff={} transition={} sum={}",
                cutoff,
                transition,
                sum
            );
        }
    }

    #[test]
    fn tap_count_is_odd_and_bounded() {
        let mut transition = 1e-5;
        while transition < 0.5 {
            let n = tap_count(transition);
            assert_eq!(n % 2, 1, "even tap count for transition {}", transition);
            assert!((MIN_TAPS..=MAX_TAPS).contains(&n), "{} out of range", n);
            transition *= 1.37;
        }
        assert_eq!(tap_count(0.499), MIN_TAPS);
        assert_eq!(tap_count(1e-4), MAX_TAPS);
        // ceil(4 / 0.04) = 100 -> forced odd.
        assert_eq!(tap_count(0.04), 101);
    }

    #[test]
    fn design_is_symmetric() {
        let taps = design_lowpass(0.1, 0.03);
        let n = taps.len();
        for i in 0..n / 2 {
            assert!((taps[i] - taps[n - 1 - i]).abs() < 1e-7);
        }
        let centre = taps[n / 2];
        assert!(taps.iter().all(|&t| t <= centre));
    }

    #[test]
    fn dc_passes_and_high_frequency_is_rejected() {
        let taps = design_lowpass(0.05, 0.02);
        // Response at Nyquist: alternating-sign sum.
        let nyquist: f64 = taps
            .iter()
            .enumerate()
            .map(|(i, &t)| if i % 2 == 0 { t as f64 } else { -(t as f64) })
            .sum();
        assert!(nyquist.abs() < 3e-3, "nyquist leakage {}", nyquist);
    }
}
