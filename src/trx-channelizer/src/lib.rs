// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Multichannel narrowband channelizer for a shared wideband IQ stream.
//!
//! One [`WidebandDistributor`] per host fans wideband blocks out to any
//! number of [`ChannelPipeline`]s. Each pipeline mixes its carrier to DC,
//! filters, decimates and resamples to a fixed 72 kHz, levels the result
//! and hands it to an external decoder. [`CarrierScanner`] discovers
//! control channels by running short-lived probe pipelines.

pub mod afc;
pub mod bank;
pub mod config;
pub mod distributor;
pub mod dsp;
pub mod error;
pub mod executor;
pub mod freq;
pub mod host;
pub mod pipeline;
pub mod scanner;

pub use afc::AfcController;
pub use bank::{ChannelBank, MergeReport};
pub use config::{AgcConfig, ChannelConfig, DispatchMode, DistributorOptions, ScanSettings};
pub use distributor::{
    ArbiterState, DistributorStats, WidebandDistributor, WidebandLease, WidebandRegistry,
};
pub use dsp::{AgcStage, ChannelDownconverter, CHANNEL_SAMPLE_RATE};
pub use error::{ChannelizerError, ChannelizerResult};
pub use executor::SerialExecutor;
pub use host::{
    ChannelSink, DecoderFactory, SampleBlock, StreamVariant, WidebandHost, WidebandSink,
    WidebandStream,
};
pub use pipeline::{ChannelEvents, ChannelPipeline, Observation, TuningSnapshot};
pub use scanner::{CarrierScanner, RasterSpan, ScanEvent, ScanMode, ScanOutcome};
