//! Metrics and observability infrastructure.
//!
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `server`: Prometheus HTTP server and initialization

pub mod events;
pub mod server;

pub use server::init;

/// Macro for emitting metric events.
///
/// Calls `InternalEvent::emit()` on the given event, recording the
/// corresponding Prometheus metric.
///
/// # Example
///
/// ```ignore
/// use icebox_core::metrics::events::RetriesIssued;
///
/// emit!(RetriesIssued { count: 128 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
