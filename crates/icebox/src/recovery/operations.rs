//! In-flight operation tracking.
//!
//! At most one operation may run per key at a time. Claims are RAII: the
//! ticket releases the key when dropped, including on early error paths.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{OperationInFlightSnafu, RecoverabilityError};
use crate::model::{OperationKey, OperationKind};

/// Registry of operations currently in flight.
#[derive(Clone, Default)]
pub struct InFlightOperations {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlightOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a key. Fails with a conflict error when an operation with the
    /// same key is already running, leaving that operation untouched.
    pub fn try_claim(&self, key: &OperationKey) -> Result<OperationTicket, RecoverabilityError> {
        let key = key.to_string();
        let mut keys = self.keys.lock().expect("in-flight lock poisoned");
        if !keys.insert(key.clone()) {
            return OperationInFlightSnafu { key }.fail();
        }
        Ok(OperationTicket {
            key,
            keys: self.keys.clone(),
        })
    }

    /// Whether a group-scoped archive of this group is currently running.
    pub fn is_archiving(&self, group_id: Uuid) -> bool {
        let key = OperationKey::new(OperationKind::Archive, group_id.to_string()).to_string();
        self.keys
            .lock()
            .expect("in-flight lock poisoned")
            .contains(&key)
    }
}

/// Exclusive claim on an operation key, released on drop.
#[derive(Debug)]
pub struct OperationTicket {
    key: String,
    keys: Arc<Mutex<HashSet<String>>>,
}

impl Drop for OperationTicket {
    fn drop(&mut self) {
        self.keys
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive_per_key() {
        let ops = InFlightOperations::new();
        let key = OperationKey::new(OperationKind::Archive, "group-1");

        let ticket = ops.try_claim(&key).unwrap();
        let err = ops.try_claim(&key).unwrap_err();
        assert!(matches!(err, RecoverabilityError::OperationInFlight { .. }));

        drop(ticket);
        ops.try_claim(&key).unwrap();
    }

    #[test]
    fn test_different_kinds_do_not_conflict() {
        let ops = InFlightOperations::new();
        let _archive = ops
            .try_claim(&OperationKey::new(OperationKind::Archive, "group-1"))
            .unwrap();
        ops.try_claim(&OperationKey::new(OperationKind::Unarchive, "group-1"))
            .unwrap();
    }

    #[test]
    fn test_is_archiving_tracks_group_claims() {
        let ops = InFlightOperations::new();
        let group = Uuid::new_v4();
        assert!(!ops.is_archiving(group));

        let ticket = ops
            .try_claim(&OperationKey::new(OperationKind::Archive, group.to_string()))
            .unwrap();
        assert!(ops.is_archiving(group));

        drop(ticket);
        assert!(!ops.is_archiving(group));
    }
}
