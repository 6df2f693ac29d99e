// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for trx-multichannel.
//!
//! Config is loaded from the `[trx-multichannel]` section of `trx-rs.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./trx-rs.toml`
//! 3. `~/.config/trx-rs/trx-rs.toml`
//! 4. `/etc/trx-rs/trx-rs.toml`

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use trx_app::{validate_log_level, ConfigFile};
use trx_channelizer::host::is_sane_sample_rate;
use trx_channelizer::{ChannelConfig, DispatchMode, DistributorOptions, ScanMode, ScanSettings};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
    /// Seconds between channel status lines; 0 disables them.
    pub status_interval_secs: u64,
}

/// One carrier present in the synthetic capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    /// Absolute carrier frequency (Hz).
    pub frequency_hz: i64,
    /// Linear amplitude.
    pub amplitude: f32,
    /// Whether a decoder tuned here hears a control channel.
    pub control_channel: bool,
    /// Main carrier announced by the control channel, if any.
    pub main_carrier_hz: Option<i64>,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 0,
            amplitude: 0.3,
            control_channel: false,
            main_carrier_hz: None,
        }
    }
}

/// Synthetic wideband source standing in for a radio front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Centre of the capture (Hz).
    pub center_hz: i64,
    /// Capture rate (Hz).
    pub sample_rate: f64,
    /// Samples per pushed block.
    pub block_size: usize,
    /// Peak amplitude of the uniform noise floor.
    pub noise_amplitude: f32,
    /// Publish both the raw and the alternate stream variant.
    pub dual_stream: bool,
    /// Number of leading raw blocks published with an unusable rate.
    pub raw_rate_failures: u32,
    /// Offer `sample_rate` as the fallback for blocks with an unusable
    /// rate. When off, broken raw blocks count against the raw stream.
    pub declare_rate: bool,
    pub tones: Vec<ToneConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            center_hz: 390_500_000,
            sample_rate: 1_200_000.0,
            block_size: 16_384,
            noise_amplitude: 0.02,
            dual_stream: false,
            raw_rate_failures: 0,
            declare_rate: true,
            tones: vec![
                ToneConfig {
                    frequency_hz: 390_012_500,
                    control_channel: true,
                    main_carrier_hz: Some(390_012_500),
                    ..ToneConfig::default()
                },
                ToneConfig {
                    frequency_hz: 390_962_500,
                    control_channel: true,
                    ..ToneConfig::default()
                },
                ToneConfig {
                    frequency_hz: 390_300_000,
                    amplitude: 0.2,
                    ..ToneConfig::default()
                },
            ],
        }
    }
}

/// Scanner behaviour at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Run a scan once the stream is up.
    pub on_start: bool,
    pub mode: ScanMode,
    /// Worker-thread name for probe setup and teardown.
    pub executor_name: String,
    pub probe: ScanSettings,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            on_start: false,
            mode: ScanMode::Configured,
            executor_name: "scan-exec".to_string(),
            probe: ScanSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MultichannelConfig {
    pub general: GeneralConfig,
    pub host: HostConfig,
    pub distributor: DistributorOptions,
    pub scan: ScanConfig,
    pub channels: Vec<ChannelConfig>,
}

impl MultichannelConfig {
    /// Validate semantic correctness.
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;
        validate_host(&self.host)?;

        if self.distributor.dispatch == DispatchMode::Queued && self.distributor.max_backlog == 0 {
            return Err("[distributor].max_backlog must be > 0 for queued dispatch".to_string());
        }

        self.scan.probe.validate()?;
        if self.scan.executor_name.trim().is_empty() {
            return Err("[scan].executor_name must not be empty".to_string());
        }

        validate_channels(&self.channels)
    }

    /// Example configuration printed by `--print-config`.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "trx-multichannel")]
            inner: MultichannelConfig,
        }
        let example = MultichannelConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
                status_interval_secs: 10,
            },
            host: HostConfig::default(),
            distributor: DistributorOptions::default(),
            scan: ScanConfig {
                on_start: true,
                ..ScanConfig::default()
            },
            channels: vec![ChannelConfig::new("TETRA", 390_012_500)],
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

impl ConfigFile for MultichannelConfig {
    fn section_key() -> &'static str {
        "trx-multichannel"
    }

    fn validate(&self) -> Result<(), String> {
        MultichannelConfig::validate(self)
    }
}

fn validate_host(host: &HostConfig) -> Result<(), String> {
    if host.center_hz <= 0 {
        return Err("[host].center_hz must be > 0".to_string());
    }
    if !is_sane_sample_rate(host.sample_rate) {
        return Err(format!(
            "[host].sample_rate {} is outside the supported range",
            host.sample_rate
        ));
    }
    if host.block_size == 0 {
        return Err("[host].block_size must be > 0".to_string());
    }
    if !host.noise_amplitude.is_finite() || host.noise_amplitude < 0.0 {
        return Err("[host].noise_amplitude must be >= 0".to_string());
    }

    let half_span = host.sample_rate / 2.0;
    for (idx, tone) in host.tones.iter().enumerate() {
        let offset = (tone.frequency_hz - host.center_hz) as f64;
        if offset.abs() >= half_span {
            return Err(format!(
                "[[host.tones]][{}].frequency_hz {} lies outside the captured span",
                idx, tone.frequency_hz
            ));
        }
        if !tone.amplitude.is_finite() || tone.amplitude < 0.0 {
            return Err(format!("[[host.tones]][{}].amplitude must be >= 0", idx));
        }
    }
    Ok(())
}

fn validate_channels(channels: &[ChannelConfig]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for (idx, channel) in channels.iter().enumerate() {
        if channel.name.trim().is_empty() {
            return Err(format!("[[channels]][{}].name must not be empty", idx));
        }
        if !seen.insert(channel.id) {
            return Err(format!(
                "[[channels]][{}].id {} is used more than once",
                idx, channel.id
            ));
        }
        if channel.frequency_hz < 0 {
            return Err(format!("[[channels]][{}].frequency_hz must be >= 0", idx));
        }
        let agc = &channel.agc;
        let target_ok = agc.target_rms.is_finite() && agc.target_rms > 0.0;
        if !target_ok {
            return Err(format!("[[channels]][{}].agc.target_rms must be > 0", idx));
        }
        for (field, value) in [("attack", agc.attack), ("decay", agc.decay)] {
            let in_range = value > 0.0 && value <= 1.0;
            if !in_range {
                return Err(format!(
                    "[[channels]][{}].agc.{} must be in (0, 1]",
                    idx, field
                ));
            }
        }
    }
    Ok(())
}
