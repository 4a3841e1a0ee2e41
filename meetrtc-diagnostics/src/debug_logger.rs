//! Structured debug logging system

use meetrtc_core::{MeetRtcError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub default_directive: String,
    /// Colored output
    pub ansi: bool,
    /// Print the event target (module path)
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            ansi: true,
            show_target: true,
        }
    }
}

impl LogConfig {
    /// Verbose meetrtc logging, everything else at `warn`
    pub fn debug() -> Self {
        Self {
            default_directive: "warn,meetrtc=debug,meetrtc_signaling=debug,meetrtc_media=debug"
                .to_string(),
            ..Default::default()
        }
    }

    /// Override the default filter directive
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    /// Filter for this configuration, `RUST_LOG` taking precedence
    pub fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_from_default_env().or_else(|_| {
            EnvFilter::try_new(&self.default_directive).map_err(|e| MeetRtcError::Initialization {
                reason: format!("invalid log directive {:?}: {}", self.default_directive, e),
            })
        })
    }
}

/// Debug logger for structured logging
#[derive(Debug, Default)]
pub struct DebugLogger;

impl DebugLogger {
    /// Install the global `tracing` subscriber
    ///
    /// Only the first successful call installs anything; later calls, or a
    /// subscriber installed by the host, leave the existing one in place.
    pub fn init_logging(config: LogConfig) -> Result<()> {
        if INITIALIZED.load(Ordering::SeqCst) {
            return Ok(());
        }

        let filter = config.env_filter()?;
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(config.ansi)
            .with_target(config.show_target)
            .try_init()
            .is_ok();

        INITIALIZED.store(true, Ordering::SeqCst);
        if installed {
            tracing::debug!(directive = %config.default_directive, "Logging initialized");
        }
        Ok(())
    }

    /// Whether [`DebugLogger::init_logging`] has run
    pub fn is_initialized() -> bool {
        INITIALIZED.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json() {
        let config: LogConfig = serde_json::from_str(r#"{"defaultDirective": "debug"}"#).unwrap();
        assert_eq!(config.default_directive, "debug");
        assert!(config.ansi);
        assert!(config.show_target);
    }

    #[test]
    fn test_invalid_directive() {
        let config = LogConfig::default().with_directive("meetrtc=loud");
        if std::env::var("RUST_LOG").is_err() {
            let err = config.env_filter().unwrap_err();
            assert_eq!(err.error_code(), "INITIALIZATION_FAILED");
        }
    }

    #[test]
    fn test_init_is_idempotent() {
        DebugLogger::init_logging(LogConfig::debug().with_directive("warn")).unwrap();
        DebugLogger::init_logging(LogConfig::default()).unwrap();
        assert!(DebugLogger::is_initialized());
    }
}
