//! Saga relationship enrichment.
//!
//! A message may carry a list of saga-state change markers of the form
//! `sagaId:Status;sagaId:Status;...`. Several markers can reference the same
//! saga id within one message; the highest-precedence status wins. Malformed
//! segments are skipped, never fatal.

use indexmap::IndexMap;

use super::{Enricher, headers};
use crate::model::{Headers, MetadataBag, MetadataValue};

/// Saga state change status, ordered by precedence.
///
/// `Updated` loses to `New` (the change that created the saga outranks a
/// later update reported in the same message), and `Completed` outranks
/// everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SagaStatus {
    Updated,
    New,
    Completed,
}

impl SagaStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "New" => Some(SagaStatus::New),
            "Updated" => Some(SagaStatus::Updated),
            "Completed" => Some(SagaStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::New => "New",
            SagaStatus::Updated => "Updated",
            SagaStatus::Completed => "Completed",
        }
    }
}

/// Derives saga relationships from the state-change marker header.
pub struct SagaRelationshipsEnricher;

impl Enricher for SagaRelationshipsEnricher {
    fn enrich(&self, headers: &Headers, bag: &mut MetadataBag) {
        let Some(raw) = headers.get(headers::SAGA_STATE_CHANGES) else {
            return;
        };

        let resolved = resolve_saga_changes(raw);
        if resolved.is_empty() {
            return;
        }

        let changes: Vec<String> = resolved
            .iter()
            .map(|(id, status)| format!("{}:{}", id, status.as_str()))
            .collect();
        bag.insert("InvokedSagas".to_string(), MetadataValue::List(changes));
    }
}

/// Resolve the winning status per saga id, preserving first-seen order.
fn resolve_saga_changes(raw: &str) -> IndexMap<String, SagaStatus> {
    let mut resolved: IndexMap<String, SagaStatus> = IndexMap::new();

    for segment in raw.split(';') {
        let Some((id, status)) = segment.split_once(':') else {
            continue;
        };
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        let Some(status) = SagaStatus::parse(status) else {
            continue;
        };

        resolved
            .entry(id.to_string())
            .and_modify(|current| {
                if status > *current {
                    *current = status;
                }
            })
            .or_insert(status);
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrich(raw: &str) -> MetadataBag {
        let mut h = Headers::new();
        h.insert(headers::SAGA_STATE_CHANGES.to_string(), raw.to_string());
        let mut bag = MetadataBag::new();
        SagaRelationshipsEnricher.enrich(&h, &mut bag);
        bag
    }

    #[test]
    fn test_new_wins_over_updated() {
        let bag = enrich("saga-1:New;saga-1:Updated");
        assert_eq!(
            bag["InvokedSagas"].as_list(),
            Some(&["saga-1:New".to_string()][..])
        );
    }

    #[test]
    fn test_completed_wins_over_updated() {
        let bag = enrich("saga-1:Completed;saga-1:Updated");
        assert_eq!(
            bag["InvokedSagas"].as_list(),
            Some(&["saga-1:Completed".to_string()][..])
        );
    }

    #[test]
    fn test_order_does_not_matter() {
        let a = enrich("saga-1:Updated;saga-1:New");
        let b = enrich("saga-1:New;saga-1:Updated");
        assert_eq!(a["InvokedSagas"], b["InvokedSagas"]);
    }

    #[test]
    fn test_multiple_sagas_resolved_independently() {
        let bag = enrich("saga-1:New;saga-2:Completed;saga-1:Updated");
        assert_eq!(
            bag["InvokedSagas"].as_list(),
            Some(&["saga-1:New".to_string(), "saga-2:Completed".to_string()][..])
        );
    }

    #[test]
    fn test_malformed_segments_skipped() {
        let bag = enrich("garbage;saga-1:New;:Updated;saga-2:Nonsense;;");
        assert_eq!(
            bag["InvokedSagas"].as_list(),
            Some(&["saga-1:New".to_string()][..])
        );
    }

    #[test]
    fn test_all_malformed_omits_key() {
        let bag = enrich("garbage;;more-garbage");
        assert!(bag.is_empty());
    }

    #[test]
    fn test_missing_header_is_noop() {
        let mut bag = MetadataBag::new();
        SagaRelationshipsEnricher.enrich(&Headers::new(), &mut bag);
        assert!(bag.is_empty());
    }
}
