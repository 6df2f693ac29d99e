// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

pub type ChannelizerResult<T> = Result<T, ChannelizerError>;

#[derive(Debug, Error)]
pub enum ChannelizerError {
    #[error("invalid wideband sample rate: {0} Hz")]
    InvalidSampleRate(f64),

    #[error("wideband sample rate is not known yet; start the receiver first")]
    SampleRateUnknown,

    #[error("no scan candidates inside the current wideband span")]
    NoCandidates,

    #[error("serial executor is no longer running")]
    ExecutorClosed,

    #[error("task panicked: {0}")]
    TaskPanicked(String),

    #[error("probe setup failed: {0}")]
    ProbeSetup(String),

    #[error("channel sink error: {0}")]
    Sink(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ChannelizerError {
    /// Build a [`ChannelizerError::TaskPanicked`] from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::TaskPanicked(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_stringified() {
        let err = ChannelizerError::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "task panicked: boom");

        let err = ChannelizerError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err.to_string(), "task panicked: owned");

        let err = ChannelizerError::from_panic(Box::new(42_u32));
        assert!(err.to_string().contains("non-string"));
    }
}
