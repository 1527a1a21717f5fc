//! Bridge configuration
//!
//! ```toml
//! [slots]
//! native_code_page = true
//!
//! [conversion]
//! strict_bool = false
//! allow_float_to_int = false
//! max_repr_length = 200
//!
//! [binder]
//! allow_threads_for_blocking = true
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::logging::{LogConfig, LogFormat};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub slots: SlotsConfig,

    #[serde(default)]
    pub conversion: ConversionConfig,

    #[serde(default)]
    pub binder: BinderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotsConfig {
    /// Fill the GC cooperation slots from the executable code page when the
    /// CPU is supported
    #[serde(default = "default_true")]
    pub native_code_page: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Only `bool` converts to `Boolean`; otherwise any object's truth value does
    #[serde(default = "default_true")]
    pub strict_bool: bool,

    /// Accept integral floats such as `3.0` for integer targets
    #[serde(default = "default_false")]
    pub allow_float_to_int: bool,

    /// Truncation limit for `repr` text placed in error messages
    #[serde(default = "default_repr_length")]
    pub max_repr_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinderConfig {
    /// Release the interpreter lock around methods marked as blocking
    #[serde(default = "default_true")]
    pub allow_threads_for_blocking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self { native_code_page: true }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            strict_bool: true,
            allow_float_to_int: false,
            max_repr_length: default_repr_length(),
        }
    }
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self { allow_threads_for_blocking: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            filter: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_repr_length() -> usize { 200 }
fn default_level() -> String { "info".to_string() }

impl BridgeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BridgeError::Configuration(format!("failed to parse config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            BridgeError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the file named by `TYPEBRIDGE_CONFIG`, or the defaults when unset
    pub fn from_env() -> Result<Self> {
        match std::env::var_os("TYPEBRIDGE_CONFIG") {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Configuration(format!("failed to serialize config: {}", e)))
    }

    /// Logging settings in subscriber form
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::new().with_format(self.logging.format);
        match self.logging.level.parse() {
            Ok(level) => config = config.with_level(level),
            Err(_) => tracing::warn!("invalid log level '{}', using info", self.logging.level),
        }
        if let Some(filter) = &self.logging.filter {
            config = config.with_filter(filter.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(config.slots.native_code_page);
        assert!(config.conversion.strict_bool);
        assert!(!config.conversion.allow_float_to_int);
        assert_eq!(config.conversion.max_repr_length, 200);
    }

    #[test]
    fn test_parse_partial_sections() {
        let toml = r#"
[conversion]
allow_float_to_int = true

[logging]
level = "debug"
format = "json"
"#;
        let config = BridgeConfig::from_toml_str(toml).unwrap();
        assert!(config.conversion.allow_float_to_int);
        assert!(config.conversion.strict_bool);
        assert!(config.binder.allow_threads_for_blocking);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.log_config().level, tracing::Level::DEBUG);
    }

    #[test]
    fn test_bad_toml_is_configuration_error() {
        let err = BridgeConfig::from_toml_str("[slots\n").unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        let mut config = BridgeConfig::default();
        config.slots.native_code_page = false;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(BridgeConfig::from_file(&path).unwrap(), config);
    }
}
