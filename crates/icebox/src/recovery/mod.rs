//! Recoverability engine: failure classification, retries, and archival.

mod archive;
mod events;
mod grouping;
mod operations;
mod retry;

pub use archive::ArchiveEngine;
pub use events::{EventPublisher, OperationEvent, OperationPhase};
pub use grouping::{
    ExceptionTypeAndStackTraceGrouper, FailedQueueGrouper, FailureGrouper, default_groupers,
    derive_groups,
};
pub use operations::{InFlightOperations, OperationTicket};
pub use retry::{
    LoggingDispatcher, RetryCommand, RetryDispatcher, RetryEngine, RetryPhase, RetrySummary,
    RetryTarget,
};
