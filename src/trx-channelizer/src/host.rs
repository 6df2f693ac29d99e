// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Contracts between the channelizer and its collaborators: the radio
//! front end that produces wideband IQ, and the per-channel decoders that
//! consume narrowband IQ.

use std::sync::Arc;

use num_complex::Complex;

use crate::config::ChannelConfig;
use crate::error::ChannelizerResult;
use crate::pipeline::ChannelEvents;

/// Lowest wideband rate accepted as plausible (Hz).
pub const MIN_WIDEBAND_RATE: f64 = 8_000.0;
/// Highest wideband rate accepted as plausible (Hz).
pub const MAX_WIDEBAND_RATE: f64 = 50_000_000.0;

/// True when `rate` is finite and within the plausible wideband range.
pub fn is_sane_sample_rate(rate: f64) -> bool {
    rate.is_finite() && (MIN_WIDEBAND_RATE..=MAX_WIDEBAND_RATE).contains(&rate)
}

/// Borrowed view of one wideband block. Valid for a single dispatch only.
#[derive(Debug, Clone, Copy)]
pub struct SampleBlock<'a> {
    pub samples: &'a [Complex<f32>],
    /// Capture rate of `samples` (Hz).
    pub sample_rate: f64,
}

impl<'a> SampleBlock<'a> {
    pub fn new(samples: &'a [Complex<f32>], sample_rate: f64) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Physical stream a host can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamVariant {
    /// Pre-processing stream. Preferred, but some front ends report
    /// broken rates on it.
    Raw,
    /// Post-processed stream with reliable metadata.
    Alternate,
}

/// Entry point the host pushes wideband blocks into.
pub trait WidebandStream: Send + Sync {
    fn push(&self, variant: StreamVariant, samples: &[Complex<f32>], sample_rate: f64);
}

/// Capabilities of the radio front end.
///
/// Accessors are tried in a fixed order and return `None` when the host
/// cannot answer; see [`resolve_center_frequency`] and
/// [`fallback_sample_rate`].
pub trait WidebandHost: Send + Sync {
    /// Absolute centre of the wideband capture (Hz).
    fn center_frequency_hz(&self) -> Option<i64> {
        None
    }

    /// Local-oscillator / hardware frequency (Hz).
    fn lo_frequency_hz(&self) -> Option<i64> {
        None
    }

    /// Frequency the user has tuned to. Always available; last resort.
    fn tuned_frequency_hz(&self) -> i64;

    /// Rate the host declares for its stream (Hz).
    fn declared_sample_rate(&self) -> Option<f64> {
        None
    }

    /// Rate reported by the underlying device (Hz).
    fn device_sample_rate(&self) -> Option<f64> {
        None
    }

    /// Install the single stream hook. Called once by the registry when the
    /// first lease is taken.
    fn attach_stream(&self, _stream: Arc<dyn WidebandStream>) {}

    /// Remove the stream hook. Called when the last lease is dropped.
    fn detach_stream(&self) {}
}

/// Best available wideband centre frequency.
pub fn resolve_center_frequency(host: &dyn WidebandHost) -> i64 {
    host.center_frequency_hz()
        .or_else(|| host.lo_frequency_hz())
        .unwrap_or_else(|| host.tuned_frequency_hz())
}

/// Sample rate to use when block metadata is unusable.
pub fn fallback_sample_rate(host: &dyn WidebandHost) -> Option<f64> {
    [host.declared_sample_rate(), host.device_sample_rate()]
        .into_iter()
        .flatten()
        .find(|&rate| is_sane_sample_rate(rate))
}

/// Consumer of wideband blocks registered with the distributor.
pub trait WidebandSink: Send + Sync {
    fn on_wideband(&self, block: &SampleBlock<'_>) -> ChannelizerResult<()>;

    /// Label used in logs.
    fn label(&self) -> String {
        String::from("sink")
    }
}

/// Downstream consumer of one channel's narrowband IQ (a demodulator /
/// decoder living outside this crate).
pub trait ChannelSink: Send + Sync {
    fn on_channel_iq(&self, samples: &[Complex<f32>], sample_rate: f64);

    fn set_demodulator_enabled(&self, _enabled: bool) {}

    /// The channel is going away; release resources.
    fn close(&self) {}
}

/// Builds the decoder attached to a channel.
pub trait DecoderFactory: Send + Sync {
    fn create(
        &self,
        config: &ChannelConfig,
        events: ChannelEvents,
    ) -> ChannelizerResult<Arc<dyn ChannelSink>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Host {
        center: Option<i64>,
        lo: Option<i64>,
        declared: Option<f64>,
        device: Option<f64>,
    }

    impl WidebandHost for Host {
        fn center_frequency_hz(&self) -> Option<i64> {
            self.center
        }
        fn lo_frequency_hz(&self) -> Option<i64> {
            self.lo
        }
        fn tuned_frequency_hz(&self) -> i64 {
            145_000_000
        }
        fn declared_sample_rate(&self) -> Option<f64> {
            self.declared
        }
        fn device_sample_rate(&self) -> Option<f64> {
            self.device
        }
    }

    #[test]
    fn sane_rate_bounds() {
        assert!(is_sane_sample_rate(8_000.0));
        assert!(is_sane_sample_rate(2_400_000.0));
        assert!(is_sane_sample_rate(50_000_000.0));
        assert!(!is_sane_sample_rate(7_999.0));
        assert!(!is_sane_sample_rate(0.0));
        assert!(!is_sane_sample_rate(f64::NAN));
        assert!(!is_sane_sample_rate(f64::INFINITY));
        assert!(!is_sane_sample_rate(60_000_000.0));
    }

    #[test]
    fn center_frequency_prefers_absolute_center() {
        let mut host = Host {
            center: Some(400_000_000),
            lo: Some(399_000_000),
            declared: None,
            device: None,
        };
        assert_eq!(resolve_center_frequency(&host), 400_000_000);
        host.center = None;
        assert_eq!(resolve_center_frequency(&host), 399_000_000);
        host.lo = None;
        assert_eq!(resolve_center_frequency(&host), 145_000_000);
    }

    #[test]
    fn fallback_rate_skips_insane_values() {
        let host = Host {
            center: None,
            lo: None,
            declared: Some(0.0),
            device: Some(2_048_000.0),
        };
        assert_eq!(fallback_sample_rate(&host), Some(2_048_000.0));

        let host = Host {
            center: None,
            lo: None,
            declared: Some(f64::NAN),
            device: None,
        };
        assert_eq!(fallback_sample_rate(&host), None);
    }
}
