//! Endpoint identity enrichment.

use chrono::{DateTime, Utc};

use super::{Enricher, headers};
use crate::model::{EndpointSnapshot, Headers, MetadataBag, MetadataValue};

/// Derives sending and receiving endpoint identity from headers.
pub struct EndpointIdentityEnricher;

impl Enricher for EndpointIdentityEnricher {
    fn enrich(&self, headers: &Headers, bag: &mut MetadataBag) {
        if let Some(name) = headers.get(headers::ORIGINATING_ENDPOINT) {
            bag.insert(
                "SendingEndpoint".to_string(),
                MetadataValue::String(name.clone()),
            );
        }
        if let Some(name) = headers.get(headers::PROCESSING_ENDPOINT) {
            bag.insert(
                "ReceivingEndpoint".to_string(),
                MetadataValue::String(name.clone()),
            );
        }
    }
}

/// Known-endpoint snapshots observable from one message's headers.
///
/// A snapshot needs both a name and a host id; partial identities are
/// skipped.
pub fn endpoint_snapshots(headers: &Headers, now: DateTime<Utc>) -> Vec<EndpointSnapshot> {
    let mut snapshots = Vec::new();

    let pairs = [
        (headers::ORIGINATING_ENDPOINT, headers::ORIGINATING_HOST_ID),
        (headers::PROCESSING_ENDPOINT, headers::PROCESSING_HOST_ID),
    ];

    for (name_header, host_header) in pairs {
        if let (Some(name), Some(host_id)) = (headers.get(name_header), headers.get(host_header)) {
            let snapshot = EndpointSnapshot::new(name.clone(), host_id.clone(), now);
            if !snapshots.contains(&snapshot) {
                snapshots.push(snapshot);
            }
        }
    }

    snapshots
}
