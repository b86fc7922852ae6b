//! icebox-core: Shared components for the icebox audit/error store.
//!
//! - `config/` - Common configuration types and environment variable interpolation
//! - `metrics/` - Prometheus metrics infrastructure
//! - `signal` - Signal handling for graceful shutdown
//! - `tracing` - Tracing initialization
//! - `error` - Common error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod tracing;

// Re-export commonly used items
pub use config::{KB, MB, MetricsConfig};
pub use error::{ConfigError, MetricsError};
pub use metrics::init as init_metrics;
pub use signal::shutdown_signal;
pub use tracing::init_tracing;
