// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod config;
pub mod logging;

pub use config::{config_search_paths, validate_log_level, ConfigError, ConfigFile, LOG_LEVELS};
pub use logging::{init_logging, parse_level};

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
