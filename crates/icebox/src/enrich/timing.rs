//! Timing and critical-path enrichment.

use chrono::{DateTime, Utc};

use super::{Enricher, headers};
use crate::model::{Headers, MetadataBag, MetadataValue};

/// Derives processing, critical, and delivery time from timestamp headers.
///
/// - processing time: processing started → processing ended
/// - critical time: time sent → processing ended
/// - delivery time: time sent → processing started
pub struct TimingEnricher;

impl Enricher for TimingEnricher {
    fn enrich(&self, headers: &Headers, bag: &mut MetadataBag) {
        let sent = parse_timestamp(headers, headers::TIME_SENT);
        let started = parse_timestamp(headers, headers::PROCESSING_STARTED);
        let ended = parse_timestamp(headers, headers::PROCESSING_ENDED);

        if let Some(sent) = sent {
            bag.insert("TimeSent".to_string(), MetadataValue::Timestamp(sent));
        }

        if let (Some(started), Some(ended)) = (started, ended) {
            insert_duration_ms(bag, "ProcessingTime", ended - started);
        }
        if let (Some(sent), Some(ended)) = (sent, ended) {
            insert_duration_ms(bag, "CriticalTime", ended - sent);
        }
        if let (Some(sent), Some(started)) = (sent, started) {
            insert_duration_ms(bag, "DeliveryTime", started - sent);
        }
    }
}

fn parse_timestamp(headers: &Headers, name: &str) -> Option<DateTime<Utc>> {
    headers
        .get(name)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn insert_duration_ms(bag: &mut MetadataBag, key: &str, delta: chrono::TimeDelta) {
    // Clock skew can make intervals negative; clamp rather than report
    // nonsense
    let ms = delta.num_milliseconds().max(0);
    bag.insert(key.to_string(), MetadataValue::Integer(ms));
}
