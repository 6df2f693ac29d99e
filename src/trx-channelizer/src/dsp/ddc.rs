// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::{PI, TAU};

use num_complex::Complex;

use super::filter::design_lowpass;

/// Fixed output rate of every channel (Hz).
pub const CHANNEL_SAMPLE_RATE: f64 = 72_000.0;

/// Intermediate rate the integer decimator aims for before resampling.
const MID_RATE_TARGET_HZ: f64 = 200_000.0;
const MAX_DECIMATION: usize = 32;
/// Channel filter for a 25 kHz wide target signal.
const CHANNEL_CUTOFF_HZ: f64 = 15_000.0;
const CHANNEL_TRANSITION_HZ: f64 = 5_000.0;
/// Normalised frequencies handed to the designer stay below Nyquist.
const MAX_NORM_FREQ: f64 = 0.49;

/// Wrap a phase into `(-PI, PI]`.
fn wrap_phase(phase: f64) -> f64 {
    if phase > PI {
        phase - TAU
    } else if phase <= -PI {
        phase + TAU
    } else {
        phase
    }
}

/// Per-channel digital downconverter: NCO mixer, FIR low-pass with integer
/// decimation, then linear-interpolation resampling to a fixed output rate.
pub struct ChannelDownconverter {
    target_rate: f64,
    input_rate: f64,
    offset_hz: f64,
    mixer_phase: f64,
    mixer_phase_inc: f64,
    taps: Vec<f32>,
    /// Circular FIR delay line, one slot per tap.
    delay: Vec<Complex<f32>>,
    delay_pos: usize,
    decim_factor: usize,
    decim_counter: usize,
    /// Interpolation weight of the next output between `last` and the
    /// upcoming mid-rate sample. Always in `[0, 1)`.
    resample_phase: f64,
    /// Whole mid-rate samples to pass before the next output.
    resample_skip: u64,
    last: Complex<f32>,
    scratch_mid: Vec<Complex<f32>>,
}

impl ChannelDownconverter {
    pub fn new(target_rate: f64) -> Self {
        Self {
            target_rate: target_rate.max(1.0),
            input_rate: 0.0,
            offset_hz: 0.0,
            mixer_phase: 0.0,
            mixer_phase_inc: 0.0,
            taps: Vec::new(),
            delay: Vec::new(),
            delay_pos: 0,
            decim_factor: 1,
            decim_counter: 0,
            resample_phase: 0.0,
            resample_skip: 0,
            last: Complex::new(0.0, 0.0),
            scratch_mid: Vec::new(),
        }
    }

    /// Retune for a new input rate and frequency offset. Resets all
    /// filter, decimator and resampler state.
    ///
    /// A non-finite or non-positive rate leaves the converter unconfigured;
    /// `process` then produces nothing.
    pub fn configure(&mut self, input_rate: f64, offset_hz: f64) {
        self.mixer_phase = 0.0;
        self.decim_counter = 0;
        self.delay_pos = 0;
        self.resample_phase = 0.0;
        self.resample_skip = 0;
        self.last = Complex::new(0.0, 0.0);

        if !input_rate.is_finite() || input_rate <= 0.0 {
            self.input_rate = 0.0;
            self.offset_hz = 0.0;
            self.mixer_phase_inc = 0.0;
            self.taps.clear();
            self.delay.clear();
            return;
        }

        self.input_rate = input_rate;
        self.offset_hz = offset_hz;
        self.mixer_phase_inc = -TAU * offset_hz / input_rate;

        let decim = (input_rate / MID_RATE_TARGET_HZ).floor();
        self.decim_factor = if decim.is_finite() && decim >= 1.0 {
            (decim as usize).min(MAX_DECIMATION)
        } else {
            1
        };

        let cutoff = (CHANNEL_CUTOFF_HZ / input_rate).min(MAX_NORM_FREQ);
        let transition = (CHANNEL_TRANSITION_HZ / input_rate).min(MAX_NORM_FREQ);
        self.taps = design_lowpass(cutoff, transition);
        self.delay.clear();
        self.delay.resize(self.taps.len(), Complex::new(0.0, 0.0));
    }

    pub fn is_configured(&self) -> bool {
        !self.taps.is_empty()
    }

    pub fn target_rate(&self) -> f64 {
        self.target_rate
    }

    pub fn input_rate(&self) -> f64 {
        self.input_rate
    }

    pub fn offset_hz(&self) -> f64 {
        self.offset_hz
    }

    pub fn decimation(&self) -> usize {
        self.decim_factor
    }

    pub fn tap_count(&self) -> usize {
        self.taps.len()
    }

    pub fn mixer_phase(&self) -> f64 {
        self.mixer_phase
    }

    pub fn resample_phase(&self) -> f64 {
        self.resample_phase
    }

    fn mid_rate(&self) -> f64 {
        self.input_rate / self.decim_factor as f64
    }

    /// Upper bound on the samples `process` can emit for `input_len` inputs.
    pub fn output_capacity_for(&self, input_len: usize) -> usize {
        if !self.is_configured() {
            return 0;
        }
        let max_mid = input_len / self.decim_factor + 1;
        let ratio = self.mid_rate() / self.target_rate;
        (max_mid as f64 / ratio).ceil() as usize + 2
    }

    /// Downconvert `input` into `output`, returning the number of samples
    /// written. Never writes past `output.len()`. Returns 0 when fewer than
    /// two mid-rate samples were produced.
    pub fn process(&mut self, input: &[Complex<f32>], output: &mut [Complex<f32>]) -> usize {
        if input.is_empty() || output.is_empty() || !self.is_configured() {
            return 0;
        }

        // Stop filtering once the resampler could fill `output`, so no
        // input is consumed without reaching an output sample.
        let ratio = self.mid_rate() / self.target_rate;
        let fill_mid = (output.len() as f64 * ratio).ceil() as usize;
        let max_mid = fill_mid
            .saturating_add(self.resample_skip as usize)
            .saturating_add(2)
            .min(input.len());
        self.scratch_mid.clear();
        if self.scratch_mid.capacity() < max_mid {
            self.scratch_mid
                .reserve(max_mid - self.scratch_mid.capacity());
        }

        let n_taps = self.taps.len();
        for &sample in input {
            let (sin, cos) = self.mixer_phase.sin_cos();
            self.mixer_phase = wrap_phase(self.mixer_phase + self.mixer_phase_inc);

            let re = sample.re as f64;
            let im = sample.im as f64;
            self.delay[self.delay_pos] =
                Complex::new((re * cos - im * sin) as f32, (re * sin + im * cos) as f32);
            self.delay_pos += 1;
            if self.delay_pos >= n_taps {
                self.delay_pos = 0;
            }

            let fire = self.decim_counter == 0;
            self.decim_counter += 1;
            if self.decim_counter >= self.decim_factor {
                self.decim_counter = 0;
            }
            if !fire {
                continue;
            }

            // Newest sample meets taps[0].
            let mut acc_re = 0.0_f64;
            let mut acc_im = 0.0_f64;
            let mut idx = self.delay_pos;
            for &tap in &self.taps {
                idx = if idx == 0 { n_taps - 1 } else { idx - 1 };
                let d = self.delay[idx];
                acc_re += d.re as f64 * tap as f64;
                acc_im += d.im as f64 * tap as f64;
            }
            self.scratch_mid
                .push(Complex::new(acc_re as f32, acc_im as f32));
            if self.scratch_mid.len() >= max_mid {
                break;
            }
        }

        if self.scratch_mid.len() < 2 {
            return 0;
        }

        let mut produced = 0usize;
        for &current in &self.scratch_mid {
            if produced >= output.len() {
                break;
            }
            if self.resample_skip == 0 {
                while produced < output.len() {
                    let a = self.resample_phase as f32;
                    output[produced] = self.last + (current - self.last) * a;
                    produced += 1;
                    let next = self.resample_phase + ratio;
                    let whole = next.floor();
                    self.resample_skip = whole as u64;
                    self.resample_phase = next - whole;
                    if self.resample_skip > 0 {
                        break;
                    }
                }
                if self.resample_skip == 0 {
                    // Output full while still between `last` and `current`.
                    break;
                }
            }
            self.resample_skip -= 1;
            self.last = current;
        }

        produced
    }
}
