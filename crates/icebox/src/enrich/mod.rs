//! Enrichment pipeline: derives metadata from message headers.
//!
//! Enrichers run in a fixed, registered order and write derived metadata
//! into the record's metadata bag. They are side-effect-free beyond the bag:
//! a missing or unparseable header omits the metadata key rather than
//! failing ingestion.

pub mod headers;

mod endpoint;
mod saga;
mod timing;
mod tracking;

pub use endpoint::{EndpointIdentityEnricher, endpoint_snapshots};
pub use saga::{SagaRelationshipsEnricher, SagaStatus};
pub use timing::TimingEnricher;
pub use tracking::{MessageTypeEnricher, TrackingIdsEnricher};

use crate::model::{Headers, MetadataBag};

/// Derives metadata from message headers into the metadata bag.
pub trait Enricher: Send + Sync {
    fn enrich(&self, headers: &Headers, bag: &mut MetadataBag);
}

/// The default enricher registry, in execution order.
pub fn default_enrichers() -> Vec<Box<dyn Enricher>> {
    vec![
        Box::new(TimingEnricher),
        Box::new(EndpointIdentityEnricher),
        Box::new(SagaRelationshipsEnricher),
        Box::new(TrackingIdsEnricher),
        Box::new(MessageTypeEnricher),
    ]
}

/// Run every registered enricher over the headers, in order.
pub fn run_enrichers(enrichers: &[Box<dyn Enricher>], headers: &Headers) -> MetadataBag {
    let mut bag = MetadataBag::new();
    for enricher in enrichers {
        enricher.enrich(headers, &mut bag);
    }
    bag
}
