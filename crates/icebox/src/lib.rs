//! icebox: an operational audit/error store for message-driven systems.
//!
//! Ingests processed (audit) and failed (error) message observations through
//! a batched pipeline, classifies failures into groups, and drives
//! recoverability: retries, archival, and unarchival with resumable,
//! observable progress.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use icebox::{Config, Engine, MemoryBackend};
//! use icebox::recovery::LoggingDispatcher;
//!
//! #[tokio::main]
//! async fn main() {
//!     let shutdown = CancellationToken::new();
//!     let backend = Arc::new(MemoryBackend::new(0));
//!     let engine = Engine::new(
//!         &Config::default(),
//!         backend,
//!         Arc::new(LoggingDispatcher),
//!         shutdown.clone(),
//!     );
//!     let coordinator = engine.coordinator();
//!     // feed transport messages into `coordinator`, then:
//!     shutdown.cancel();
//!     engine.run().await;
//! }
//! ```

pub mod backend;
pub mod body;
pub mod config;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod model;
pub mod recovery;

// Re-export main types
pub use backend::{Backend, MemoryBackend};
pub use config::Config;
pub use engine::Engine;
pub use ingest::{IngestCoordinator, RawTransportMessage};
