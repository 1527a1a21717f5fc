//! Logging setup for embedders
//!
//! The bridge itself only emits `tracing` events (type synthesis, cache
//! traffic, wrapper lifetimes, conversion failures, overload resolution and
//! exception translation). Hosts that have no subscriber of their own can
//! install one here.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily-rotated file
    File { directory: String, prefix: String },
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Emit span enter/close events
    pub span_events: bool,
    /// Extra directives, e.g. `typebridge::binder=trace`
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Read `TYPEBRIDGE_LOG_LEVEL`, `TYPEBRIDGE_LOG_FORMAT`,
    /// `TYPEBRIDGE_LOG_FILTER`, `TYPEBRIDGE_LOG_DIR` and
    /// `TYPEBRIDGE_LOG_SPANS`; unset or unparsable values keep the defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(level) = lookup("TYPEBRIDGE_LOG_LEVEL").and_then(|v| v.parse().ok()) {
            config.level = level;
        }
        if let Some(format) = lookup("TYPEBRIDGE_LOG_FORMAT").and_then(|v| v.parse().ok()) {
            config.format = format;
        }
        if let Some(filter) = lookup("TYPEBRIDGE_LOG_FILTER") {
            config.filter = Some(filter);
        }
        if let Some(directory) = lookup("TYPEBRIDGE_LOG_DIR") {
            config.output = LogOutput::File {
                directory,
                prefix: "typebridge".to_string(),
            };
        }
        if let Some(spans) = lookup("TYPEBRIDGE_LOG_SPANS") {
            config.span_events = matches!(spans.as_str(), "1" | "true" | "yes");
        }
        config
    }
}

/// Install a global subscriber
///
/// Returns the writer guard; keep it alive until shutdown so buffered events
/// are flushed. Returns None when a global subscriber is already installed.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let filter = build_filter(&config);
    let (writer, guard) = match &config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File { directory, prefix } => {
            tracing_appender::non_blocking(rolling::daily(directory, prefix))
        }
    };
    let spans = span_events_config(config.span_events);

    let installed = match config.format {
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_writer(writer)
                .pretty()
                .with_span_events(spans)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .with_writer(writer)
                .compact()
                .with_span_events(spans)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .with_writer(writer)
                .json()
                .with_span_events(spans)
                .with_filter(filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
    };
    installed.ok().map(|_| guard)
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::from_default_env().add_directive(config.level.into());
    match &config.filter {
        Some(directives) => directives
            .split(',')
            .filter(|d| !d.trim().is_empty())
            .fold(base, |filter, directive| match directive.trim().parse() {
                Ok(d) => filter.add_directive(d),
                Err(_) => {
                    tracing::warn!("invalid filter directive: {}", directive);
                    filter
                }
            }),
        None => base,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Verbose stderr logging for local debugging of a host
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::DEBUG,
        format: LogFormat::Pretty,
        output: LogOutput::Stderr,
        span_events: true,
        filter: Some("typebridge=debug".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_builder() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_filter("typebridge=trace");

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.span_events);
        assert_eq!(config.filter, Some("typebridge=trace".to_string()));
    }

    #[test]
    fn test_env_lookup() {
        let vars: HashMap<&str, &str> = [
            ("TYPEBRIDGE_LOG_LEVEL", "trace"),
            ("TYPEBRIDGE_LOG_FORMAT", "compact"),
            ("TYPEBRIDGE_LOG_DIR", "/tmp/logs"),
        ]
        .into_iter()
        .collect();
        let config = LogConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.level, Level::TRACE);
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(
            config.output,
            LogOutput::File { directory: "/tmp/logs".into(), prefix: "typebridge".into() }
        );
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = LogConfig::from_lookup(|k| (k == "TYPEBRIDGE_LOG_FORMAT").then(|| "xml".to_string()));
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.level, Level::INFO);
    }
}
