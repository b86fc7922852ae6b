//! Conversation tracking and message type enrichment.

use super::{Enricher, headers};
use crate::model::{Headers, MetadataBag, MetadataValue};

/// Copies conversation, correlation, and related-to ids into the bag.
pub struct TrackingIdsEnricher;

impl Enricher for TrackingIdsEnricher {
    fn enrich(&self, headers: &Headers, bag: &mut MetadataBag) {
        let pairs = [
            (headers::CONVERSATION_ID, "ConversationId"),
            (headers::CORRELATION_ID, "CorrelationId"),
            (headers::RELATED_TO, "RelatedTo"),
        ];

        for (header, key) in pairs {
            if let Some(value) = headers.get(header)
                && !value.is_empty()
            {
                bag.insert(key.to_string(), MetadataValue::String(value.clone()));
            }
        }
    }
}

/// Derives the primary message type from the enclosed-types header.
///
/// The header is a comma-separated list of fully-qualified type names with
/// the concrete message type first; interface markers follow it.
pub struct MessageTypeEnricher;

impl Enricher for MessageTypeEnricher {
    fn enrich(&self, headers: &Headers, bag: &mut MetadataBag) {
        let Some(raw) = headers.get(headers::ENCLOSED_MESSAGE_TYPES) else {
            return;
        };

        let first = raw.split(',').next().map(str::trim).unwrap_or_default();
        if first.is_empty() {
            return;
        }

        bag.insert(
            "MessageType".to_string(),
            MetadataValue::String(first.to_string()),
        );
    }
}
