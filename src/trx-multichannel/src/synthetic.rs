// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Synthetic wideband front end: a handful of carriers over a noise floor,
//! published at real-time pace.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use num_complex::Complex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trx_app::DynResult;
use trx_channelizer::{StreamVariant, WidebandHost, WidebandStream};

use crate::config::HostConfig;

/// Blocks the generator may fall behind before it stops catching up.
const MAX_LAG_BLOCKS: u32 = 8;

struct Oscillator {
    phase: f64,
    step: f64,
    amplitude: f32,
}

/// Sum of complex tones plus uniform noise.
pub struct ToneGenerator {
    oscillators: Vec<Oscillator>,
    noise: f32,
    rng: StdRng,
}

impl ToneGenerator {
    pub fn new(config: &HostConfig, rng: StdRng) -> Self {
        let oscillators = config
            .tones
            .iter()
            .map(|tone| Oscillator {
                phase: 0.0,
                step: TAU * (tone.frequency_hz - config.center_hz) as f64 / config.sample_rate,
                amplitude: tone.amplitude,
            })
            .collect();
        Self {
            oscillators,
            noise: config.noise_amplitude,
            rng,
        }
    }

    pub fn fill(&mut self, buf: &mut [Complex<f32>]) {
        for sample in buf.iter_mut() {
            let mut acc = Complex::new(0.0f32, 0.0f32);
            for osc in &mut self.oscillators {
                let (sin, cos) = osc.phase.sin_cos();
                acc += Complex::new(cos as f32, sin as f32) * osc.amplitude;
                osc.phase = (osc.phase + osc.step).rem_euclid(TAU);
            }
            if self.noise > 0.0 {
                acc += Complex::new(
                    self.rng.gen_range(-self.noise..=self.noise),
                    self.rng.gen_range(-self.noise..=self.noise),
                );
            }
            *sample = acc;
        }
    }
}

pub struct SyntheticHost {
    config: HostConfig,
    stream: Mutex<Option<Arc<dyn WidebandStream>>>,
    running: AtomicBool,
    published: AtomicU64,
}

impl SyntheticHost {
    pub fn new(config: HostConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            stream: Mutex::new(None),
            running: AtomicBool::new(false),
            published: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn is_attached(&self) -> bool {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn blocks_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Push one block into the attached stream. Returns false when no
    /// stream is attached.
    pub fn publish(&self, samples: &[Complex<f32>]) -> bool {
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(stream) = stream else {
            return false;
        };

        let n = self.published.fetch_add(1, Ordering::Relaxed);
        let rate = self.config.sample_rate;
        let raw_rate = if n < u64::from(self.config.raw_rate_failures) {
            0.0
        } else {
            rate
        };
        stream.push(StreamVariant::Raw, samples, raw_rate);
        if self.config.dual_stream {
            stream.push(StreamVariant::Alternate, samples, rate);
        }
        true
    }

    /// Start the generator thread.
    pub fn start(self: &Arc<Self>) -> DynResult<JoinHandle<()>> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err("synthetic source already running".into());
        }
        let host = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("wideband-source".to_string())
            .spawn(move || host.run(StdRng::from_entropy()))
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                e
            })?;
        tracing::info!(
            "synthetic source started: {} tone(s) around {} Hz at {} S/s",
            self.config.tones.len(),
            self.config.center_hz,
            self.config.sample_rate
        );
        Ok(handle)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn run(&self, rng: StdRng) {
        let mut generator = ToneGenerator::new(&self.config, rng);
        let mut buf = vec![Complex::new(0.0, 0.0); self.config.block_size];
        let period =
            Duration::from_secs_f64(self.config.block_size as f64 / self.config.sample_rate);
        let mut next = Instant::now();

        while self.running.load(Ordering::Acquire) {
            generator.fill(&mut buf);
            self.publish(&buf);

            next += period;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else if now - next > period * MAX_LAG_BLOCKS {
                tracing::warn!("synthetic source fell behind, resynchronising");
                next = now;
            }
        }
        tracing::debug!("synthetic source stopped");
    }
}

impl WidebandHost for SyntheticHost {
    fn center_frequency_hz(&self) -> Option<i64> {
        Some(self.config.center_hz)
    }

    fn tuned_frequency_hz(&self) -> i64 {
        self.config.center_hz
    }

    fn declared_sample_rate(&self) -> Option<f64> {
        self.config.declare_rate.then_some(self.config.sample_rate)
    }

    fn attach_stream(&self, stream: Arc<dyn WidebandStream>) {
        *self.stream.lock().unwrap_or_else(PoisonError::into_inner) = Some(stream);
    }

    fn detach_stream(&self) {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
