//! Terminal logging shared by every binary
//!
//! Log records go to stderr so that stdout stays free for progress lines that
//! other tooling may scrape.

use std::{fmt, str::FromStr};

use clap::ValueEnum;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOGS_DATETIME_FORMAT: &str = "[%Y-%m-%d] (%H:%M:%S%.3f)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to install logger: {0}")]
pub struct LoggerError(#[from] log::SetLoggerError);

/// Install the global logger. Can only succeed once per process.
pub fn setup_logger(level: LogLevel, disable_colors: bool) -> Result<(), LoggerError> {
    let colors = ColoredLevelConfig::new()
        .error(Color::BrightRed)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Cyan)
        .trace(Color::BrightBlack);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            let timestamp = chrono::Local::now().format(DEFAULT_LOGS_DATETIME_FORMAT);
            if disable_colors {
                out.finish(format_args!(
                    "{} {} {} > {}",
                    timestamp,
                    record.level(),
                    record.target(),
                    message
                ))
            } else {
                out.finish(format_args!(
                    "{} {} {} > {}",
                    timestamp,
                    colors.color(record.level()),
                    record.target(),
                    message
                ))
            }
        })
        .level(level.into())
        // Transport internals are noisy at debug
        .level_for("hyper", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("rustls", LevelFilter::Warn)
        .level_for("solana_rpc_client", LevelFilter::Info)
        .chain(std::io::stderr())
        .apply()?;

    Ok(())
}
