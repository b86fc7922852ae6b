//! Error types for the icebox engine.

use snafu::prelude::*;

// ============ Backend Errors ============

/// Errors surfaced by a storage backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BackendError {
    /// Transient backend failure; commit retries apply.
    #[snafu(display("Backend temporarily unavailable: {message}"))]
    Unavailable { message: String },

    /// A referenced entity does not exist.
    #[snafu(display("{entity} '{id}' not found"))]
    EntityNotFound { entity: &'static str, id: String },

    /// Failed to serialize a persisted entity.
    #[snafu(display("Failed to serialize entity"))]
    Serialize { source: serde_json::Error },
}

impl BackendError {
    /// Check if this error represents a "not found" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::EntityNotFound { .. })
    }

    /// Check if this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable { .. })
    }
}

// ============ Body Store Errors ============

/// Errors that can occur in the body store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BodyError {
    /// No body is stored under the given id.
    #[snafu(display("Body '{id}' not found"))]
    BodyNotFound { id: String },

    /// The backing store rejected the operation.
    #[snafu(display("Body storage failed"))]
    BodyStorage { source: BackendError },
}

// ============ Ingestion Errors ============

/// Errors that can occur in the ingestion pipeline.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    /// Backend rejected an ingestion operation.
    #[snafu(display("Backend operation failed"))]
    IngestBackend { source: BackendError },

    /// The batch assembler has shut down; no further records are accepted.
    #[snafu(display("Batch assembler is closed"))]
    AssemblerClosed,

    /// Admission is paused by the capacity gate; the caller should
    /// redeliver once the flow signal flips back.
    #[snafu(display("Ingestion is paused by the capacity gate"))]
    IngestionPaused,

    /// A batch commit exhausted its retry budget.
    #[snafu(display("Batch commit failed after {attempts} attempts"))]
    CommitRetriesExhausted {
        attempts: u32,
        source: BackendError,
    },
}

// ============ Recoverability Errors ============

/// Errors that can occur in the recoverability engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RecoverabilityError {
    /// An operation with this key is already in flight.
    #[snafu(display("Operation '{key}' is already in flight"))]
    OperationInFlight { key: String },

    /// The group is being archived; retries are excluded meanwhile.
    #[snafu(display("Group '{group_id}' is currently being archived"))]
    GroupArchiving { group_id: String },

    /// A referenced failure or group does not exist.
    #[snafu(display("{entity} '{id}' not found"))]
    RecoveryNotFound { entity: &'static str, id: String },

    /// The backend rejected a recoverability operation.
    #[snafu(display("Backend operation failed"))]
    RecoveryBackend { source: BackendError },

    /// Forwarding a retried message to the transport failed.
    #[snafu(display("Retry dispatch failed: {message}"))]
    Dispatch { message: String },
}

// ============ Engine Errors ============

/// Errors surfaced while starting the engine binary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EngineError {
    /// Failed to load or validate the configuration file.
    #[snafu(display("Configuration error"))]
    EngineConfig {
        source: icebox_core::error::ConfigError,
    },

    /// Failed to initialize the metrics endpoint.
    #[snafu(display("Metrics initialization failed"))]
    EngineMetrics {
        source: icebox_core::error::MetricsError,
    },
}
