// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Control-channel discovery by probing candidate carriers with transient
//! channel pipelines.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use crate::config::{ChannelConfig, ScanSettings};
use crate::distributor::{WidebandDistributor, WidebandLease, WidebandRegistry};
use crate::error::{ChannelizerError, ChannelizerResult};
use crate::executor::SerialExecutor;
use crate::freq::{format_hz, snap_down, snap_up};
use crate::host::{resolve_center_frequency, DecoderFactory, WidebandHost, WidebandSink};
use crate::pipeline::{ChannelPipeline, Observation};

/// Scannable part of the wideband capture, on the carrier raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSpan {
    pub start_hz: i64,
    pub end_hz: i64,
    pub step_hz: i64,
}

impl RasterSpan {
    /// `[center - rate/2 + guard, center + rate/2 - guard]`, shrunk inwards
    /// to the raster.
    pub fn new(
        center_hz: i64,
        sample_rate: f64,
        settings: &ScanSettings,
    ) -> ChannelizerResult<Self> {
        if !sample_rate.is_finite() || sample_rate <= 1.0 {
            return Err(ChannelizerError::InvalidSampleRate(sample_rate));
        }
        let step = settings.step_hz.max(1) as i64;
        let half = (sample_rate / 2.0) as i64;
        let guard = settings.guard_hz as i64;
        Ok(Self {
            start_hz: snap_up(center_hz - half + guard, step),
            end_hz: snap_down(center_hz + half - guard, step),
            step_hz: step,
        })
    }

    pub fn contains(&self, hz: i64) -> bool {
        hz >= self.start_hz && hz <= self.end_hz
    }

    /// Every positive raster point inside the span, ascending.
    pub fn raster(&self) -> Vec<i64> {
        if self.end_hz < self.start_hz {
            return Vec::new();
        }
        (self.start_hz..=self.end_hz)
            .step_by(self.step_hz as usize)
            .filter(|&hz| hz > 0)
            .collect()
    }
}

/// Distinct configured frequencies that fall inside `span`, ascending.
pub fn configured_candidates(
    span: &RasterSpan,
    frequencies: impl IntoIterator<Item = i64>,
) -> Vec<i64> {
    frequencies
        .into_iter()
        .filter(|&hz| hz > 0 && span.contains(hz))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Only frequencies already configured as channels (fast).
    Configured,
    /// The whole raster inside the span.
    Raster,
}

/// Progress notifications emitted while a scan runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Started { total: usize, mode: Option<ScanMode> },
    ProbeStarted { freq_hz: i64 },
    Observed { freq_hz: i64, main_carrier_hz: Option<i64> },
    Found { freq_hz: i64, carrier_hz: i64 },
    ProbeFinished { freq_hz: i64, observed: bool },
    ProbeSkipped { freq_hz: i64, reason: String },
    Finished { found: usize, cancelled: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Discovered carriers, on the raster.
    pub found: BTreeSet<i64>,
    pub candidates: usize,
    pub cancelled: bool,
}

type EventTx = Option<mpsc::UnboundedSender<ScanEvent>>;

fn emit(events: &EventTx, event: ScanEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Resolves once `cancel` reads true. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn next_observation(rx: &mut watch::Receiver<Option<Observation>>) -> Option<Observation> {
    loop {
        if let Some(observation) = *rx.borrow_and_update() {
            return Some(observation);
        }
        if rx.changed().await.is_err() {
            return None;
        }
    }
}

/// Accept an observation that is at most `window` old.
fn accept_recent(observation: Option<Observation>, window: Duration) -> Option<Observation> {
    observation.filter(|obs| obs.at.elapsed() <= window)
}

/// One probe pipeline and its subscription. Dropping it unsubscribes and
/// disposes the pipeline, so an aborted probe task cleans up too.
struct ProbeRegistration {
    pipeline: Arc<ChannelPipeline>,
    distributor: Arc<WidebandDistributor>,
    executor: Arc<SerialExecutor>,
    subscribed: bool,
    released: bool,
}

impl ProbeRegistration {
    fn new(
        pipeline: Arc<ChannelPipeline>,
        distributor: Arc<WidebandDistributor>,
        executor: Arc<SerialExecutor>,
    ) -> Self {
        Self {
            pipeline,
            distributor,
            executor,
            subscribed: false,
            released: false,
        }
    }

    fn sink(&self) -> Arc<dyn WidebandSink> {
        self.pipeline.clone()
    }

    fn subscribe(&mut self) {
        self.distributor.add_sink(self.sink());
        self.subscribed = true;
    }

    fn unsubscribe(&mut self) {
        if std::mem::take(&mut self.subscribed) {
            self.distributor.remove_sink(&self.sink());
        }
    }

    /// Unsubscribe, then dispose on the executor and wait for it.
    async fn release(mut self) {
        self.unsubscribe();
        self.released = true;
        let disposing = self.pipeline.clone();
        if let Err(err) = self.executor.run(move || disposing.dispose()).await {
            tracing::warn!("scan: dispose of {} off-executor: {}", self.pipeline.name(), err);
            self.pipeline.dispose();
        }
    }
}

impl Drop for ProbeRegistration {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.unsubscribe();
        let disposing = self.pipeline.clone();
        if self.executor.spawn(move || disposing.dispose()).is_err() {
            self.pipeline.dispose();
        }
        tracing::debug!("scan: probe {} released on drop", self.pipeline.name());
    }
}

struct ScanContext {
    lease: WidebandLease,
    host: Arc<dyn WidebandHost>,
    factory: Arc<dyn DecoderFactory>,
    executor: Arc<SerialExecutor>,
    settings: ScanSettings,
}

impl ScanContext {
    async fn probe(
        self: Arc<Self>,
        freq_hz: i64,
        gate: Arc<Semaphore>,
        mut cancel: watch::Receiver<bool>,
        events: EventTx,
    ) -> Option<i64> {
        let _permit = tokio::select! {
            permit = gate.acquire_owned() => permit.ok()?,
            _ = cancelled(&mut cancel) => return None,
        };
        if *cancel.borrow() {
            return None;
        }
        emit(&events, ScanEvent::ProbeStarted { freq_hz });

        let host = self.host.clone();
        let factory = self.factory.clone();
        let distributor = self.lease.distributor().clone();
        let executor = self.executor.clone();
        // The guard is built on the executor, so a pipeline created after
        // this task was aborted is still disposed.
        let created = self
            .executor
            .run(move || {
                ChannelPipeline::new(ChannelConfig::probe(freq_hz), host, factory.as_ref())
                    .map(|pipeline| ProbeRegistration::new(pipeline, distributor, executor))
            })
            .await;
        let mut registration = match created {
            Ok(Ok(registration)) => registration,
            Ok(Err(err)) | Err(err) => {
                tracing::warn!("scan: skipping {}: {}", format_hz(freq_hz), err);
                emit(
                    &events,
                    ScanEvent::ProbeSkipped {
                        freq_hz,
                        reason: err.to_string(),
                    },
                );
                return None;
            }
        };

        registration.subscribe();
        let observed = self
            .watch_probe(&registration.pipeline, &mut cancel)
            .await;
        if let Some(main_carrier_hz) = observed {
            emit(&events, ScanEvent::Observed { freq_hz, main_carrier_hz });
        }

        registration.release().await;
        emit(
            &events,
            ScanEvent::ProbeFinished {
                freq_hz,
                observed: observed.is_some(),
            },
        );

        let main_carrier_hz = observed?;
        let step = self.settings.step_hz.max(1) as i64;
        let carrier_hz = snap_down(main_carrier_hz.unwrap_or(freq_hz), step);
        tracing::info!(
            "scan: control channel at {} (probed {})",
            format_hz(carrier_hz),
            format_hz(freq_hz)
        );
        emit(&events, ScanEvent::Found { freq_hz, carrier_hz });
        Some(carrier_hz)
    }

    /// Enable the probe and wait for a control-channel observation.
    /// `Some(main_carrier_hz)` when one was seen.
    async fn watch_probe(
        &self,
        pipeline: &Arc<ChannelPipeline>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<Option<i64>> {
        let mut observations = pipeline.observations();

        tokio::select! {
            _ = tokio::time::sleep(self.settings.settle()) => {}
            _ = cancelled(cancel) => return None,
        }
        let enabling = pipeline.clone();
        if let Err(err) = self
            .executor
            .run(move || enabling.set_demodulator_enabled(true))
            .await
        {
            tracing::warn!("scan: enabling {} failed: {}", pipeline.name(), err);
            return None;
        }

        let timeout = self.settings.probe_timeout();
        let mut seen = tokio::select! {
            seen = next_observation(&mut observations) => seen,
            _ = tokio::time::sleep(timeout) => None,
            _ = cancelled(cancel) => return None,
        };
        if seen.is_none() {
            // Late reports still count during the grace period.
            seen = tokio::select! {
                seen = next_observation(&mut observations) => seen,
                _ = tokio::time::sleep(self.settings.grace()) => None,
                _ = cancelled(cancel) => return None,
            };
            if seen.is_some() {
                tracing::debug!("scan: {} observed during grace", pipeline.name());
            }
        }
        seen.or_else(|| accept_recent(pipeline.last_observation(), timeout + self.settings.grace()))
            .map(|obs| obs.main_carrier_hz)
    }
}

/// Drives probe pipelines over candidate frequencies with bounded
/// concurrency.
pub struct CarrierScanner {
    ctx: Arc<ScanContext>,
}

impl CarrierScanner {
    pub fn new(
        registry: &Arc<WidebandRegistry>,
        factory: Arc<dyn DecoderFactory>,
        executor: Arc<SerialExecutor>,
        settings: ScanSettings,
    ) -> ChannelizerResult<Self> {
        let lease = registry.acquire()?;
        Ok(Self {
            ctx: Arc::new(ScanContext {
                lease,
                host: registry.host().clone(),
                factory,
                executor,
                settings,
            }),
        })
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.ctx.settings
    }

    /// Current scannable span. Needs at least one accepted wideband block.
    pub fn span(&self) -> ChannelizerResult<RasterSpan> {
        let rate = self
            .ctx
            .lease
            .last_sample_rate()
            .ok_or(ChannelizerError::SampleRateUnknown)?;
        let center = resolve_center_frequency(self.ctx.host.as_ref());
        RasterSpan::new(center, rate, &self.ctx.settings)
    }

    pub fn candidates(&self, mode: ScanMode, configured: &[i64]) -> ChannelizerResult<Vec<i64>> {
        let span = self.span()?;
        let candidates = match mode {
            ScanMode::Configured => configured_candidates(&span, configured.iter().copied()),
            ScanMode::Raster => span.raster(),
        };
        if candidates.is_empty() {
            return Err(ChannelizerError::NoCandidates);
        }
        Ok(candidates)
    }

    /// Build candidates for `mode` and probe them.
    pub async fn scan(
        &self,
        mode: ScanMode,
        configured: &[i64],
        cancel: watch::Receiver<bool>,
        events: EventTx,
    ) -> ChannelizerResult<ScanOutcome> {
        let candidates = self.candidates(mode, configured)?;
        tracing::info!(
            "scan ({:?}): {} candidate(s) with {} in flight",
            mode,
            candidates.len(),
            self.ctx.settings.parallel
        );
        self.probe_all(candidates, Some(mode), cancel, events).await
    }

    /// Probe an explicit candidate list.
    pub async fn scan_frequencies(
        &self,
        candidates: Vec<i64>,
        cancel: watch::Receiver<bool>,
        events: EventTx,
    ) -> ChannelizerResult<ScanOutcome> {
        if candidates.is_empty() {
            return Err(ChannelizerError::NoCandidates);
        }
        self.probe_all(candidates, None, cancel, events).await
    }

    async fn probe_all(
        &self,
        candidates: Vec<i64>,
        mode: Option<ScanMode>,
        cancel: watch::Receiver<bool>,
        events: EventTx,
    ) -> ChannelizerResult<ScanOutcome> {
        let total = candidates.len();
        emit(&events, ScanEvent::Started { total, mode });

        let gate = Arc::new(Semaphore::new(self.ctx.settings.parallel.max(1)));
        let mut probes = JoinSet::new();
        for freq_hz in candidates {
            probes.spawn(self.ctx.clone().probe(
                freq_hz,
                gate.clone(),
                cancel.clone(),
                events.clone(),
            ));
        }

        let mut found = BTreeSet::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Some(carrier_hz)) => {
                    found.insert(carrier_hz);
                }
                Ok(None) => {}
                Err(err) => tracing::warn!("scan: probe task failed: {}", err),
            }
        }

        let cancelled = *cancel.borrow();
        emit(
            &events,
            ScanEvent::Finished {
                found: found.len(),
                cancelled,
            },
        );
        tracing::info!(
            "scan finished: {} carrier(s) found in {} candidate(s){}",
            found.len(),
            total,
            if cancelled { " (cancelled)" } else { "" }
        );
        Ok(ScanOutcome {
            found,
            candidates: total,
            cancelled,
        })
    }
}
