// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-channel DSP: low-pass design, downconversion/resampling and AGC.

pub mod agc;
pub mod ddc;
pub mod filter;

pub use agc::AgcStage;
pub use ddc::{ChannelDownconverter, CHANNEL_SAMPLE_RATE};
pub use filter::design_lowpass;

/// Input is fed to the downconverter in chunks of this many samples.
pub const IQ_CHUNK_SIZE: usize = 4096;
