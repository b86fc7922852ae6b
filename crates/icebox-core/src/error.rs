//! Common error types shared across icebox crates.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },

    /// Batch size must be non-zero.
    #[snafu(display("Batch size must be greater than zero"))]
    ZeroBatchSize,

    /// Writer pool must have at least one worker.
    #[snafu(display("Writer count must be greater than zero"))]
    ZeroWriters,

    /// Inline body threshold must not exceed the maximum body size.
    #[snafu(display(
        "Inline body threshold ({inline} bytes) exceeds maximum body size ({max} bytes)"
    ))]
    InlineThresholdTooLarge { inline: usize, max: usize },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics were already initialized.
    #[snafu(display("Metrics already initialized"))]
    AlreadyInitialized,

    /// Metrics have not been initialized.
    #[snafu(display("Metrics not initialized"))]
    NotInitialized,

    /// Metrics address could not be parsed.
    #[snafu(display("Invalid metrics address"))]
    AddressParse { source: std::net::AddrParseError },
}
