//! Logging for Heirloom with redaction of personal family data
//!
//! Two pieces:
//!
//! - [`init_tracing`] installs the global `tracing` subscriber, filtered by
//!   `RUST_LOG` or the configured level, in pretty or JSON form.
//! - [`PiiRedactor`] masks emails, phone numbers and dates in free-form text
//!   before it reaches a log line. [`fingerprint`] turns a name into a short
//!   stable tag so the same person can be followed through the logs.
//!
//! # Example
//!
//! ```rust,no_run
//! use logger_redacted::{init_tracing, redact, LoggerConfig};
//!
//! init_tracing(&LoggerConfig::default()).ok();
//! tracing::info!(note = %redact("call 555-123-4567"), "Contact saved");
//! ```

pub mod config;
pub mod error;
pub mod redactor;

pub use config::{LogFormat, LoggerConfig};
pub use error::LoggerError;
pub use redactor::{fingerprint, redact, PiiRedactor, RedactionConfig};

use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Build the event filter: `RUST_LOG` wins, otherwise `config.log_level`.
pub fn env_filter(config: &LoggerConfig) -> Result<EnvFilter, LoggerError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.log_level).map_err(|e| LoggerError::InvalidFilter {
        filter: config.log_level.clone(),
        message: e.to_string(),
    })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(config.with_target)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_level(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_target(config.with_target)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init(),
    };

    result.map_err(|e| LoggerError::AlreadyInitialized(e.to_string()))
}
