// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! One addressable channel: downconverter + AGC + AFC + configuration,
//! registered with the wideband distributor as a sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Instant;

use num_complex::Complex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::afc::AfcController;
use crate::config::ChannelConfig;
use crate::dsp::{AgcStage, ChannelDownconverter, CHANNEL_SAMPLE_RATE, IQ_CHUNK_SIZE};
use crate::error::ChannelizerResult;
use crate::host::{
    resolve_center_frequency, ChannelSink, DecoderFactory, SampleBlock, WidebandHost,
    WidebandSink,
};

/// Output buffer is never smaller than this many samples.
const MIN_OUTPUT_CAPACITY: usize = 8192;
/// Rate changes below this (Hz) do not trigger a retune.
const RATE_TOLERANCE_HZ: f64 = 1.0;

/// A control channel seen by a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub at: Instant,
    /// Main carrier announced by the control channel, when decoded.
    pub main_carrier_hz: Option<i64>,
}

/// Current tuning of a channel's downconverter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningSnapshot {
    pub input_rate: f64,
    pub center_hz: i64,
    pub offset_hz: f64,
    pub afc_hz: f64,
    pub decimation: usize,
}

struct DspState {
    ddc: ChannelDownconverter,
    agc: AgcStage,
    afc: AfcController,
    last_rate: f64,
    last_center_hz: i64,
    out_buf: Vec<Complex<f32>>,
}

struct PipelineShared {
    config: RwLock<Arc<ChannelConfig>>,
    state: Mutex<DspState>,
    observed: watch::Sender<Option<Observation>>,
    disposed: AtomicBool,
}

impl PipelineShared {
    fn config(&self) -> Arc<ChannelConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, DspState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_afc_correction(&self, hz: f64) -> f64 {
        let config = self.config();
        let mut state = self.lock_state();
        let acc = state.afc.apply_correction(hz);
        if state.last_rate > 0.0 && state.last_center_hz != 0 {
            let offset = state
                .afc
                .corrected_offset_hz(config.frequency_hz, state.last_center_hz);
            let rate = state.last_rate;
            state.ddc.configure(rate, offset);
            tracing::trace!(
                "channel {}: AFC {:+.1} Hz -> offset {:.1} Hz",
                config.name,
                acc,
                offset
            );
        }
        acc
    }
}

/// Back-channel handed to a channel's decoder.
///
/// Holds only a weak reference, so a decoder keeping it alive does not
/// keep the channel alive.
#[derive(Clone)]
pub struct ChannelEvents {
    shared: Weak<PipelineShared>,
}

impl ChannelEvents {
    /// Report a decoded control channel, optionally with the main carrier
    /// frequency it announces.
    pub fn observe_control_channel(&self, main_carrier_hz: Option<i64>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.observed.send_replace(Some(Observation {
                at: Instant::now(),
                main_carrier_hz: main_carrier_hz.filter(|&hz| hz > 0),
            }));
        }
    }

    /// Feed a frequency-error estimate (Hz) into the channel's AFC.
    ///
    /// Positive when the channel is tuned above the carrier.
    pub fn report_frequency_error(&self, hz: f64) {
        if let Some(shared) = self.shared.upgrade() {
            shared.apply_afc_correction(hz);
        }
    }

    pub fn is_alive(&self) -> bool {
        self.shared
            .upgrade()
            .map(|s| !s.disposed.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

pub struct ChannelPipeline {
    shared: Arc<PipelineShared>,
    host: Arc<dyn WidebandHost>,
    sink: Arc<dyn ChannelSink>,
}

impl ChannelPipeline {
    pub fn new(
        config: ChannelConfig,
        host: Arc<dyn WidebandHost>,
        factory: &dyn DecoderFactory,
    ) -> ChannelizerResult<Arc<Self>> {
        let (observed, _) = watch::channel(None);
        let shared = Arc::new(PipelineShared {
            state: Mutex::new(DspState {
                ddc: ChannelDownconverter::new(CHANNEL_SAMPLE_RATE),
                agc: AgcStage::new(&config.agc),
                afc: AfcController::new(),
                last_rate: 0.0,
                last_center_hz: 0,
                out_buf: vec![Complex::new(0.0, 0.0); MIN_OUTPUT_CAPACITY],
            }),
            config: RwLock::new(Arc::new(config.clone())),
            observed,
            disposed: AtomicBool::new(false),
        });
        let events = ChannelEvents {
            shared: Arc::downgrade(&shared),
        };
        let sink = factory.create(&config, events)?;
        tracing::debug!("channel {} created at {} Hz", config.name, config.frequency_hz);
        Ok(Arc::new(Self { shared, host, sink }))
    }

    pub fn id(&self) -> Uuid {
        self.shared.config().id
    }

    pub fn name(&self) -> String {
        self.shared.config().name.clone()
    }

    pub fn config(&self) -> Arc<ChannelConfig> {
        self.shared.config()
    }

    /// Replace the configuration wholesale. Takes effect from the next
    /// wideband block.
    pub fn update_config(&self, config: ChannelConfig) {
        let mut state = self.shared.lock_state();
        let previous = self.shared.config();
        state.agc.apply_config(&config.agc);
        if previous.frequency_hz != config.frequency_hz {
            // A new carrier has its own error; force a retune.
            state.afc.reset();
            state.last_rate = 0.0;
            state.last_center_hz = 0;
        }
        *self
            .shared
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    /// Apply a frequency-error estimate (Hz); see [`AfcController`].
    /// Returns the accumulated correction.
    pub fn apply_afc_correction(&self, hz: f64) -> f64 {
        self.shared.apply_afc_correction(hz)
    }

    pub fn afc_correction_hz(&self) -> f64 {
        self.shared.lock_state().afc.accumulated_hz()
    }

    pub fn agc_gain(&self) -> f32 {
        self.shared.lock_state().agc.gain()
    }

    pub fn tuning(&self) -> TuningSnapshot {
        let state = self.shared.lock_state();
        TuningSnapshot {
            input_rate: state.ddc.input_rate(),
            center_hz: state.last_center_hz,
            offset_hz: state.ddc.offset_hz(),
            afc_hz: state.afc.accumulated_hz(),
            decimation: state.ddc.decimation(),
        }
    }

    pub fn set_demodulator_enabled(&self, enabled: bool) {
        self.sink.set_demodulator_enabled(enabled);
    }

    pub fn observations(&self) -> watch::Receiver<Option<Observation>> {
        self.shared.observed.subscribe()
    }

    pub fn last_observation(&self) -> Option<Observation> {
        *self.shared.observed.borrow()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Stop processing and release buffers. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sink.close();
        let mut state = self.shared.lock_state();
        state.out_buf = Vec::new();
        state.ddc.configure(0.0, 0.0);
        tracing::debug!("channel {} disposed", self.shared.config().name);
    }

    /// Downconvert one wideband block and forward it to the decoder.
    pub fn on_wideband_samples(&self, block: &SampleBlock<'_>) -> ChannelizerResult<()> {
        if self.is_disposed() || block.is_empty() {
            return Ok(());
        }
        let config = self.shared.config();
        if !config.enabled || !config.has_valid_frequency() {
            return Ok(());
        }

        let center_hz = resolve_center_frequency(self.host.as_ref());
        {
            let mut state = self.shared.lock_state();
            if (block.sample_rate - state.last_rate).abs() > RATE_TOLERANCE_HZ
                || center_hz != state.last_center_hz
            {
                state.last_rate = block.sample_rate;
                state.last_center_hz = center_hz;
                let offset = state.afc.corrected_offset_hz(config.frequency_hz, center_hz);
                state.ddc.configure(block.sample_rate, offset);
                tracing::debug!(
                    "channel {}: retuned (rate={} Hz, center={} Hz, offset={:.1} Hz, decim={})",
                    config.name,
                    block.sample_rate,
                    center_hz,
                    offset,
                    state.ddc.decimation()
                );
            }
        }

        for chunk in block.samples.chunks(IQ_CHUNK_SIZE) {
            let (out, produced, rate) = {
                let mut state = self.shared.lock_state();
                let needed = state
                    .ddc
                    .output_capacity_for(chunk.len())
                    .max(MIN_OUTPUT_CAPACITY);
                if state.out_buf.len() < needed {
                    state.out_buf.resize(needed, Complex::new(0.0, 0.0));
                }
                let DspState {
                    ddc, agc, out_buf, ..
                } = &mut *state;
                let produced = ddc.process(chunk, out_buf);
                if produced == 0 {
                    continue;
                }
                agc.process(&mut out_buf[..produced]);
                let rate = ddc.target_rate();
                (std::mem::take(out_buf), produced, rate)
            };

            // Lock released: the decoder may call back into the AFC.
            self.sink.on_channel_iq(&out[..produced], rate);

            let mut state = self.shared.lock_state();
            if state.out_buf.len() < out.len() && !self.is_disposed() {
                state.out_buf = out;
            }
        }
        Ok(())
    }
}

impl WidebandSink for ChannelPipeline {
    fn on_wideband(&self, block: &SampleBlock<'_>) -> ChannelizerResult<()> {
        self.on_wideband_samples(block)
    }

    fn label(&self) -> String {
        self.name()
    }
}
