// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Channel, scanner and distributor settings.
//!
//! All records are plain values. A channel's configuration is replaced as a
//! whole (`ChannelPipeline::update_config`), never patched field by field
//! from another thread.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-channel AGC parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgcConfig {
    pub enabled: bool,
    /// Output level the AGC steers towards.
    pub target_rms: f32,
    /// Smoothing coefficient (0..1) used when the gain must drop.
    pub attack: f32,
    /// Smoothing coefficient (0..1) used when the gain may rise.
    pub decay: f32,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_rms: 0.25,
            attack: 0.02,
            decay: 0.002,
        }
    }
}

/// One narrowband channel carved out of the wideband stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Stable channel identity.
    pub id: Uuid,
    /// Human-readable label used in logs.
    pub name: String,
    /// Absolute carrier frequency (Hz). Values <= 0 keep the channel idle.
    pub frequency_hz: i64,
    pub enabled: bool,
    pub agc: AgcConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "TETRA".to_string(),
            frequency_hz: 0,
            enabled: true,
            agc: AgcConfig::default(),
        }
    }
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, frequency_hz: i64) -> Self {
        Self {
            name: name.into(),
            frequency_hz,
            ..Self::default()
        }
    }

    /// Transient channel used by the carrier scanner.
    pub fn probe(frequency_hz: i64) -> Self {
        Self::new("SCAN", frequency_hz)
    }

    pub fn has_valid_frequency(&self) -> bool {
        self.frequency_hz > 0
    }
}

/// Carrier scanner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Carrier raster (Hz).
    pub step_hz: u64,
    /// Distance kept from each edge of the wideband span (Hz).
    pub guard_hz: u64,
    /// Maximum probes in flight.
    pub parallel: usize,
    /// How long a probe waits for a control channel (ms).
    pub probe_timeout_ms: u64,
    /// Extra age accepted for a late observation after the timeout (ms).
    pub grace_ms: u64,
    /// Delay between registering a probe and enabling its demodulator (ms).
    pub settle_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            step_hz: 12_500,
            guard_hz: 10_000,
            parallel: 2,
            probe_timeout_ms: 2_500,
            grace_ms: 750,
            settle_ms: 75,
        }
    }
}

impl ScanSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.step_hz == 0 {
            return Err("[scan].step_hz must be > 0".to_string());
        }
        if self.parallel == 0 {
            return Err("[scan].parallel must be >= 1".to_string());
        }
        if self.probe_timeout_ms == 0 {
            return Err("[scan].probe_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// How accepted wideband blocks reach the channel sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Fan out on the producer's callback, no copy.
    Direct,
    /// Copy into a bounded queue drained by a dispatch thread.
    Queued,
}

/// Wideband distributor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorOptions {
    pub dispatch: DispatchMode,
    /// Arbitrate from the first block. When off, arbitration engages on
    /// the first alternate-variant block; a single-variant host is then
    /// forwarded unfiltered.
    pub arbitrate: bool,
    /// Queued blocks kept before the oldest is dropped, rounded up to a
    /// power of two.
    pub max_backlog: usize,
}

impl Default for DistributorOptions {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::Direct,
            arbitrate: false,
            max_backlog: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_channel_plan() {
        let ch = ChannelConfig::default();
        assert_eq!(ch.name, "TETRA");
        assert!(ch.enabled);
        assert!(!ch.has_valid_frequency());
        assert_eq!(ch.agc.target_rms, 0.25);
        assert_eq!(ch.agc.attack, 0.02);
        assert_eq!(ch.agc.decay, 0.002);

        let scan = ScanSettings::default();
        assert_eq!(scan.step_hz, 12_500);
        assert_eq!(scan.probe_timeout(), Duration::from_millis(2_500));
        assert!(scan.validate().is_ok());

        assert_eq!(DistributorOptions::default().max_backlog, 8);
    }

    #[test]
    fn channel_ids_are_unique() {
        assert_ne!(ChannelConfig::default().id, ChannelConfig::default().id);
    }

    #[test]
    fn parse_channel_from_toml() {
        let toml_str = r#"
name = "MCCH"
frequency_hz = 390962500

[agc]
target_rms = 0.3
"#;
        let ch: ChannelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(ch.name, "MCCH");
        assert_eq!(ch.frequency_hz, 390_962_500);
        assert!(ch.enabled);
        assert!(ch.agc.enabled);
        assert_eq!(ch.agc.target_rms, 0.3);
        assert_eq!(ch.agc.decay, 0.002);
    }

    #[test]
    fn parse_dispatch_mode() {
        let opts: DistributorOptions =
            toml::from_str("dispatch = \"queued\"\narbitrate = true").unwrap();
        assert_eq!(opts.dispatch, DispatchMode::Queued);
        assert!(opts.arbitrate);
        assert_eq!(opts.max_backlog, 8);
    }

    #[test]
    fn scan_validation_rejects_zero_parallel() {
        let scan = ScanSettings {
            parallel: 0,
            ..ScanSettings::default()
        };
        assert!(scan.validate().is_err());
    }
}
