//! Tracing subscriber installation for binaries and test harnesses that
//! embed the STUN client.
//!
//! The library itself only emits `tracing` events; nothing here runs unless
//! the embedding application asks for it.

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{self, TestWriter};
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Environment variable that overrides [`LogSettings::filter`]
pub const LOG_ENV_VAR: &str = "STUN_LOG";

/// Line format of emitted events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Json,
}

/// Where formatted events go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Stdout,
    Stderr,
    /// Output captured by the libtest harness
    TestCapture,
}

/// Subscriber settings, loadable from the same config file as
/// [`ClientConfig`](crate::ClientConfig).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives, e.g. `"info,rvoip_stun_core=trace"`
    pub filter: String,
    pub format: LogFormat,
    pub target: LogTarget,
    /// Include file and line of each event
    pub source_location: bool,
    /// Emit span enter/exit events
    pub span_events: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Full,
            target: LogTarget::Stdout,
            source_location: false,
            span_events: false,
        }
    }
}

impl LogSettings {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..Self::default()
        }
    }

    /// Settings for integration tests: verbose, compact, captured per test.
    pub fn for_tests() -> Self {
        Self {
            filter: "debug".to_string(),
            format: LogFormat::Compact,
            target: LogTarget::TestCapture,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_source_location(mut self, enabled: bool) -> Self {
        self.source_location = enabled;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// Build the event filter. [`LOG_ENV_VAR`], when set, wins over
    /// `self.filter`.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        match std::env::var(LOG_ENV_VAR) {
            Ok(directives) if !directives.trim().is_empty() => parse_filter(&directives),
            _ => parse_filter(&self.filter),
        }
    }

    fn writer(&self) -> BoxMakeWriter {
        match self.target {
            LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogTarget::TestCapture => BoxMakeWriter::new(TestWriter::default()),
        }
    }
}

/// Parse `EnvFilter` directives, reporting bad input as [`Error::Config`].
pub fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| Error::Config(format!("invalid log filter {:?}: {}", directives, e)))
}

/// Install `settings` as the global subscriber.
///
/// Only one global subscriber can exist per process; later calls return
/// [`Error::Config`] and leave the first one in place.
pub fn init_tracing(settings: &LogSettings) -> Result<()> {
    let spans = if settings.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(settings.env_filter()?)
        .with_writer(settings.writer())
        .with_span_events(spans)
        .with_file(settings.source_location)
        .with_line_number(settings.source_location);

    let installed = match settings.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| Error::Config(format!("tracing subscriber not installed: {}", e)))?;

    tracing::debug!(format = ?settings.format, target = ?settings.target, "Tracing initialised");
    Ok(())
}
