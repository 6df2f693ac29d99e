// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Parse a log level name; `None` for anything unrecognised.
pub fn parse_level(name: &str) -> Option<Level> {
    name.trim().parse::<Level>().ok()
}

/// Initialize logging with optional level from config.
/// Falls back to INFO if level is None or invalid.
///
/// Returns false when a global subscriber was already installed.
pub fn init_logging(log_level: Option<&str>) -> bool {
    let level = log_level.and_then(parse_level).unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_target(false)
        .with_thread_names(true)
        .with_max_level(level)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level(" WARN "), Some(Level::WARN));
        assert_eq!(parse_level("chatty"), None);
    }

    #[test]
    fn second_init_is_harmless() {
        init_logging(Some("error"));
        assert!(!init_logging(Some("trace")));
    }
}
