// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Stand-in decoder: meters each channel and treats a steady carrier at a
//! configured control-channel frequency as a decoded control channel.

use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use num_complex::Complex;
use trx_channelizer::{
    ChannelConfig, ChannelEvents, ChannelSink, ChannelizerResult, DecoderFactory,
};
use uuid::Uuid;

use crate::config::ToneConfig;

/// Phase-rotation coherence above which a block counts as carrier.
const COHERENCE_LOCK: f32 = 0.9;
/// Consecutive carrier blocks before the control channel is reported.
const LOCK_BLOCKS: u32 = 3;
/// Distance between a channel and a configured tone still heard (Hz).
const CAPTURE_HZ: i64 = 6_250;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectorStats {
    pub blocks: u64,
    pub rms: f32,
    pub coherence: f32,
    pub residual_hz: f64,
    pub locked_blocks: u32,
    pub reported: bool,
}

/// Level, coherence and mean rotation frequency of one block.
///
/// Coherence is `|sum x[n] conj(x[n-1])| / sum |x[n]|^2`: near 1 for a
/// single steady tone, near 0 for noise.
pub fn analyse(samples: &[Complex<f32>], sample_rate: f64) -> (f32, f32, f64) {
    if samples.len() < 2 {
        return (0.0, 0.0, 0.0);
    }
    let energy: f64 = samples.iter().map(|s| s.norm_sqr() as f64).sum();
    let rms = (energy / samples.len() as f64).sqrt() as f32;
    if energy <= f64::EPSILON {
        return (rms, 0.0, 0.0);
    }

    let rotation = samples
        .windows(2)
        .map(|pair| {
            let p = pair[1] * pair[0].conj();
            Complex::new(p.re as f64, p.im as f64)
        })
        .fold(Complex::new(0.0f64, 0.0f64), |acc, p| acc + p);
    let coherence = (rotation.norm() / energy) as f32;
    let residual_hz = rotation.arg() * sample_rate / TAU;
    (rms, coherence.min(1.0), residual_hz)
}

pub struct CarrierDetector {
    name: String,
    events: ChannelEvents,
    /// `Some(main_carrier)` when a control channel is present here.
    announcement: Option<Option<i64>>,
    demod_enabled: AtomicBool,
    closed: AtomicBool,
    stats: Mutex<DetectorStats>,
}

impl CarrierDetector {
    pub fn new(name: String, events: ChannelEvents, announcement: Option<Option<i64>>) -> Self {
        Self {
            name,
            events,
            announcement,
            demod_enabled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            stats: Mutex::new(DetectorStats::default()),
        }
    }

    pub fn stats(&self) -> DetectorStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl ChannelSink for CarrierDetector {
    fn on_channel_iq(&self, samples: &[Complex<f32>], sample_rate: f64) {
        if self.is_closed() || samples.len() < 2 {
            return;
        }
        let (rms, coherence, residual_hz) = analyse(samples, sample_rate);
        let demod = self.demod_enabled.load(Ordering::Acquire);

        let (lock_reached, first_report) = {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.blocks += 1;
            stats.rms = rms;
            stats.coherence = coherence;
            stats.residual_hz = residual_hz;
            if demod && coherence >= COHERENCE_LOCK {
                stats.locked_blocks = stats.locked_blocks.saturating_add(1);
            } else {
                stats.locked_blocks = 0;
            }
            let lock_reached = stats.locked_blocks >= LOCK_BLOCKS;
            let first_report = lock_reached && self.announcement.is_some() && !stats.reported;
            if first_report {
                stats.reported = true;
            }
            (lock_reached, first_report)
        };

        if !demod || coherence < COHERENCE_LOCK {
            return;
        }
        // Carrier above DC means the channel sits below it.
        self.events.report_frequency_error(-residual_hz);

        if let (true, Some(main_carrier)) = (lock_reached, self.announcement) {
            if first_report {
                tracing::info!(
                    "{}: control channel decoded (main carrier {:?})",
                    self.name,
                    main_carrier
                );
            }
            self.events.observe_control_channel(main_carrier);
        }
    }

    fn set_demodulator_enabled(&self, enabled: bool) {
        self.demod_enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .locked_blocks = 0;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Builds one [`CarrierDetector`] per channel and keeps them reachable
/// for status reporting.
pub struct DetectorFactory {
    tones: Vec<ToneConfig>,
    detectors: Mutex<HashMap<Uuid, Arc<CarrierDetector>>>,
}

impl DetectorFactory {
    pub fn new(tones: &[ToneConfig]) -> Self {
        Self {
            tones: tones.to_vec(),
            detectors: Mutex::new(HashMap::new()),
        }
    }

    fn announcement(&self, frequency_hz: i64) -> Option<Option<i64>> {
        self.tones
            .iter()
            .find(|t| t.control_channel && (t.frequency_hz - frequency_hz).abs() <= CAPTURE_HZ)
            .map(|t| t.main_carrier_hz)
    }

    pub fn stats(&self, id: Uuid) -> Option<DetectorStats> {
        self.detectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|d| d.stats())
    }

    pub fn live_detectors(&self) -> usize {
        self.detectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|d| !d.is_closed())
            .count()
    }
}

impl DecoderFactory for DetectorFactory {
    fn create(
        &self,
        config: &ChannelConfig,
        events: ChannelEvents,
    ) -> ChannelizerResult<Arc<dyn ChannelSink>> {
        let detector = Arc::new(CarrierDetector::new(
            config.name.clone(),
            events,
            self.announcement(config.frequency_hz),
        ));
        let mut detectors = self.detectors.lock().unwrap_or_else(PoisonError::into_inner);
        detectors.retain(|_, d| !d.is_closed());
        detectors.insert(config.id, detector.clone());
        Ok(detector)
    }
}
