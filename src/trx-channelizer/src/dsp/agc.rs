// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

use crate::config::AgcConfig;

/// Block RMS below this is treated as silence and leaves the gain alone.
const RMS_FLOOR: f32 = 1e-12;
const MIN_GAIN: f32 = 1e-6;
const MAX_GAIN: f32 = 1e6;

/// Block-rate complex AGC that levels a channel to a target RMS.
///
/// The gain follows `target_rms / block_rms` with asymmetric smoothing:
/// `attack` when the signal got louder (gain must drop), `decay` when it
/// got quieter.
#[derive(Debug, Clone)]
pub struct AgcStage {
    enabled: bool,
    target_rms: f32,
    attack: f32,
    decay: f32,
    gain: f32,
}

impl AgcStage {
    pub fn new(config: &AgcConfig) -> Self {
        let mut agc = Self {
            enabled: true,
            target_rms: 0.25,
            attack: 0.02,
            decay: 0.002,
            gain: 1.0,
        };
        agc.apply_config(config);
        agc
    }

    /// Take new parameters; the current gain is kept.
    pub fn apply_config(&mut self, config: &AgcConfig) {
        self.enabled = config.enabled;
        self.target_rms = config.target_rms.max(RMS_FLOOR);
        self.attack = config.attack.clamp(1e-6, 1.0);
        self.decay = config.decay.clamp(1e-6, 1.0);
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn process(&mut self, buf: &mut [Complex<f32>]) {
        if !self.enabled || buf.is_empty() {
            return;
        }

        let energy: f64 = buf.iter().map(|s| s.norm_sqr() as f64).sum();
        let rms = (energy / buf.len() as f64).sqrt() as f32;
        if rms <= RMS_FLOOR {
            return;
        }

        let desired = self.target_rms / rms;
        let coeff = if desired < self.gain {
            self.attack
        } else {
            self.decay
        };
        self.gain += (desired - self.gain) * coeff;
        self.gain = self.gain.clamp(MIN_GAIN, MAX_GAIN);

        let gain = self.gain;
        for sample in buf.iter_mut() {
            *sample *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(amplitude: f32, len: usize) -> Vec<Complex<f32>> {
        (0..len)
            .map(|i| {
                let ph = i as f32 * 0.1;
                Complex::new(amplitude * ph.cos(), amplitude * ph.sin())
            })
            .collect()
    }

    fn rms(buf: &[Complex<f32>]) -> f32 {
        (buf.iter().map(|s| s.norm_sqr()).sum::<f32>() / buf.len() as f32).sqrt()
    }

    #[test]
    fn converges_to_target_rms() {
        let mut agc = AgcStage::new(&AgcConfig::default());
        let mut last = Vec::new();
        for _ in 0..5_000 {
            let mut buf = block(0.05, 256);
            agc.process(&mut buf);
            assert!(agc.gain() > 0.0);
            last = buf;
        }
        let out = rms(&last);
        assert!((out - 0.25).abs() < 0.01, "output rms {}", out);
    }

    #[test]
    fn loud_signal_pulls_gain_down_faster_than_quiet_raises_it() {
        let config = AgcConfig::default();

        let mut loud = AgcStage::new(&config);
        let mut buf = block(2.5, 128);
        loud.process(&mut buf);
        let drop = 1.0 - loud.gain();

        let mut quiet = AgcStage::new(&config);
        let mut buf = block(0.025, 128);
        quiet.process(&mut buf);
        let rise = quiet.gain() - 1.0;

        // desired 0.1 vs 10.0: attack step 0.018, decay step 0.018
        assert!(drop > 0.0 && rise > 0.0);
        assert!((drop - 0.9 * 0.02).abs() < 1e-4);
        assert!((rise - 9.0 * 0.002).abs() < 1e-4);
    }

    #[test]
    fn silence_and_disabled_leave_samples_untouched() {
        let mut agc = AgcStage::new(&AgcConfig::default());
        let mut silent = vec![Complex::new(0.0_f32, 0.0); 64];
        agc.process(&mut silent);
        assert_eq!(agc.gain(), 1.0);
        assert!(silent.iter().all(|s| s.norm() == 0.0));

        let mut agc = AgcStage::new(&AgcConfig {
            enabled: false,
            ..AgcConfig::default()
        });
        let mut buf = block(0.5, 64);
        let before = buf.clone();
        agc.process(&mut buf);
        assert_eq!(buf, before);

        let mut empty: Vec<Complex<f32>> = Vec::new();
        agc.process(&mut empty);
        assert_eq!(agc.gain(), 1.0);
    }

    #[test]
    fn config_update_keeps_gain() {
        let mut agc = AgcStage::new(&AgcConfig::default());
        let mut buf = block(1.0, 64);
        agc.process(&mut buf);
        let gain = agc.gain();
        agc.apply_config(&AgcConfig {
            target_rms: 0.5,
            ..AgcConfig::default()
        });
        assert_eq!(agc.gain(), gain);
    }
}
