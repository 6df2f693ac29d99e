// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Single source of wideband samples fanned out to every channel.

pub mod arbiter;
pub mod queue;
pub mod registry;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use num_complex::Complex;

use crate::config::{DispatchMode, DistributorOptions};
use crate::error::{ChannelizerError, ChannelizerResult};
use crate::host::{
    fallback_sample_rate, is_sane_sample_rate, SampleBlock, StreamVariant, WidebandHost,
    WidebandSink, WidebandStream,
};

pub use arbiter::{ArbiterState, StreamArbiter};
pub use queue::DispatchQueue;
pub use registry::{WidebandLease, WidebandRegistry};

type SinkList = Arc<Vec<Arc<dyn WidebandSink>>>;

fn same_sink(a: &Arc<dyn WidebandSink>, b: &Arc<dyn WidebandSink>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Copy-on-write sink set plus the fan-out itself. Shared with the
/// dispatch thread in queued mode.
struct SinkSet {
    live: Mutex<SinkList>,
    delivered: AtomicU64,
    failures: AtomicU64,
}

impl SinkSet {
    fn new() -> Self {
        Self {
            live: Mutex::new(Arc::new(Vec::new())),
            delivered: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> SinkList {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn add(&self, sink: Arc<dyn WidebandSink>) -> bool {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if live.iter().any(|s| same_sink(s, &sink)) {
            return false;
        }
        let mut next = Vec::with_capacity(live.len() + 1);
        next.extend(live.iter().cloned());
        next.push(sink);
        *live = Arc::new(next);
        true
    }

    fn remove(&self, sink: &Arc<dyn WidebandSink>) -> bool {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if !live.iter().any(|s| same_sink(s, sink)) {
            return false;
        }
        let next: Vec<_> = live
            .iter()
            .filter(|s| !same_sink(s, sink))
            .cloned()
            .collect();
        *live = Arc::new(next);
        true
    }

    fn clear(&self) {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(Vec::new());
    }

    fn dispatch(&self, block: &SampleBlock<'_>) {
        let sinks = self.snapshot();
        self.delivered.fetch_add(1, Ordering::Relaxed);
        for sink in sinks.iter() {
            let err = match catch_unwind(AssertUnwindSafe(|| sink.on_wideband(block))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(payload) => ChannelizerError::from_panic(payload),
            };
            let n = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
            if n == 1 || n % 1000 == 0 {
                tracing::warn!("wideband sink '{}' failed: {} ({} failures)", sink.label(), err, n);
            } else {
                tracing::trace!("wideband sink '{}' failed: {}", sink.label(), err);
            }
        }
    }
}

/// Counters exposed for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributorStats {
    /// Blocks handed to the sink set.
    pub delivered: u64,
    /// Blocks dropped because no usable sample rate was known.
    pub dropped_invalid_rate: u64,
    /// Blocks dropped by the queued dispatcher's backlog limit.
    pub dropped_backlog: u64,
    /// Sink calls that returned an error or panicked.
    pub sink_failures: u64,
}

pub struct WidebandDistributor {
    host: Arc<dyn WidebandHost>,
    options: DistributorOptions,
    sinks: Arc<SinkSet>,
    arbiter: Mutex<StreamArbiter>,
    /// Set by the first alternate-variant callback.
    multi_variant: AtomicBool,
    /// `f64::to_bits` of the last accepted rate; 0 when none yet.
    last_rate_bits: AtomicU64,
    dropped_invalid: AtomicU64,
    queue: Option<DispatchQueue>,
}

impl WidebandDistributor {
    pub fn new(
        host: Arc<dyn WidebandHost>,
        options: DistributorOptions,
    ) -> ChannelizerResult<Arc<Self>> {
        let sinks = Arc::new(SinkSet::new());
        let queue = match options.dispatch {
            DispatchMode::Direct => None,
            DispatchMode::Queued => {
                let worker_sinks = sinks.clone();
                Some(DispatchQueue::start(options.max_backlog, move |block| {
                    worker_sinks.dispatch(block)
                })?)
            }
        };
        tracing::debug!(
            "wideband distributor created (dispatch={:?}, arbitrate={})",
            options.dispatch,
            options.arbitrate
        );
        Ok(Arc::new(Self {
            host,
            options,
            sinks,
            arbiter: Mutex::new(StreamArbiter::new()),
            multi_variant: AtomicBool::new(false),
            last_rate_bits: AtomicU64::new(0),
            dropped_invalid: AtomicU64::new(0),
            queue,
        }))
    }

    pub fn options(&self) -> &DistributorOptions {
        &self.options
    }

    /// Subscribe a sink. Adding the same sink twice has no further effect.
    pub fn add_sink(&self, sink: Arc<dyn WidebandSink>) -> bool {
        let label = sink.label();
        let added = self.sinks.add(sink);
        if added {
            tracing::debug!("wideband sink '{}' added", label);
        }
        added
    }

    /// Unsubscribe a sink. Returns false when it was not subscribed.
    pub fn remove_sink(&self, sink: &Arc<dyn WidebandSink>) -> bool {
        let removed = self.sinks.remove(sink);
        if removed {
            tracing::debug!("wideband sink '{}' removed", sink.label());
        }
        removed
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.snapshot().len()
    }

    /// Rate of the most recently accepted block.
    pub fn last_sample_rate(&self) -> Option<f64> {
        let bits = self.last_rate_bits.load(Ordering::Acquire);
        (bits != 0).then(|| f64::from_bits(bits))
    }

    /// Whether only the arbiter's locked variant is being forwarded.
    pub fn is_arbitrating(&self) -> bool {
        self.options.arbitrate || self.multi_variant.load(Ordering::Acquire)
    }

    pub fn arbiter_state(&self) -> ArbiterState {
        self.arbiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    pub fn stats(&self) -> DistributorStats {
        DistributorStats {
            delivered: self.sinks.delivered.load(Ordering::Relaxed),
            dropped_invalid_rate: self.dropped_invalid.load(Ordering::Relaxed),
            dropped_backlog: self.queue.as_ref().map(|q| q.dropped()).unwrap_or(0),
            sink_failures: self.sinks.failures.load(Ordering::Relaxed),
        }
    }

    /// Stop the dispatch thread (queued mode) and drop every sink.
    pub fn shutdown(&self) {
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
        self.sinks.clear();
        tracing::debug!("wideband distributor shut down");
    }

    fn resolve_rate(&self, reported: f64) -> Option<f64> {
        if is_sane_sample_rate(reported) {
            return Some(reported);
        }
        fallback_sample_rate(self.host.as_ref())
    }
}

impl WidebandStream for WidebandDistributor {
    fn push(&self, variant: StreamVariant, samples: &[Complex<f32>], sample_rate: f64) {
        if samples.is_empty() {
            return;
        }

        // Validity is judged after the host fallback, so a stream that
        // reports 0 Hz on a host with a declared rate still counts as sane.
        let resolved = self.resolve_rate(sample_rate);
        if variant == StreamVariant::Alternate && !self.multi_variant.swap(true, Ordering::AcqRel)
        {
            tracing::debug!("alternate wideband variant seen, arbitration engaged");
        }
        let accepted = self
            .arbiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(variant, resolved.is_some());
        if !accepted && self.is_arbitrating() {
            return;
        }

        let Some(rate) = resolved else {
            let n = self.dropped_invalid.fetch_add(1, Ordering::Relaxed) + 1;
            if n == 1 || n % 100 == 0 {
                tracing::debug!(
                    "dropping wideband block with unusable rate {} Hz ({} dropped)",
                    sample_rate,
                    n
                );
            }
            return;
        };
        self.last_rate_bits.store(rate.to_bits(), Ordering::Release);

        match &self.queue {
            Some(queue) => queue.push(samples, rate),
            None => self.sinks.dispatch(&SampleBlock::new(samples, rate)),
        }
    }
}
