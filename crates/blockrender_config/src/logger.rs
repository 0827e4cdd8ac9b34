use std::fmt;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// How `serve` writes its logs. `RUST_LOG` overrides `level` at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: LogLevel,
    pub format: LoggerFormat,
    /// ANSI colors on stdout, never written to `file`
    pub colors: bool,
    /// Append to this file instead of stdout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<Utf8PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LoggerFormat::Compact,
            colors: true,
            file: None,
        }
    }
}

impl LoggerConfig {
    pub fn ansi(&self) -> bool {
        self.colors && self.file.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerFormat {
    /// One line per event
    #[default]
    Compact,
    /// Multi-line, for reading on a terminal
    Pretty,
    /// Newline-delimited JSON, for log collectors
    Json,
}

/// Ordered from most to least verbose
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_section_uses_defaults() {
        let cfg: LoggerConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cfg, LoggerConfig::default());
        assert!(cfg.ansi());
    }

    #[test]
    fn test_file_output_disables_colors() {
        let cfg: LoggerConfig = serde_json::from_value(json!({
            "level": "debug",
            "format": "json",
            "file": "logs/blockrender.log"
        }))
        .unwrap();
        assert_eq!(cfg.level, LogLevel::Debug);
        assert_eq!(cfg.format, LoggerFormat::Json);
        assert!(cfg.colors);
        assert!(!cfg.ansi());
    }

    #[test]
    fn test_level_names_and_filters() {
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::TRACE);
        assert!(LogLevel::Trace < LogLevel::Error);
        assert!(serde_json::from_value::<LogLevel>(json!("verbose")).is_err());
    }
}
