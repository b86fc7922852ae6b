//! Failure classification.
//!
//! Each grouper derives at most one group name from a failure reason; a
//! `None` name means the grouper does not classify that failure. Group ids
//! are deterministic, so re-classifying the same failure always lands in the
//! same group.

use chrono::{DateTime, Utc};

use crate::model::{FailureGroup, FailureReason};

/// Derives a classification bucket from a failure reason.
pub trait FailureGrouper: Send + Sync {
    /// Stable type tag distinguishing this grouper's groups.
    fn group_type(&self) -> &'static str;

    /// Human-readable group name, or `None` when the failure is not
    /// classifiable by this grouper.
    fn group_name(&self, reason: &FailureReason) -> Option<String>;
}

/// Groups by exception type and the top stack frame.
pub struct ExceptionTypeAndStackTraceGrouper;

impl FailureGrouper for ExceptionTypeAndStackTraceGrouper {
    fn group_type(&self) -> &'static str {
        "exception-type-and-stack-trace"
    }

    fn group_name(&self, reason: &FailureReason) -> Option<String> {
        if reason.exception_type.is_empty() {
            return None;
        }
        match top_frame(reason.stack_trace.as_deref()) {
            Some(frame) => Some(format!("{} at {}", reason.exception_type, frame)),
            None => Some(reason.exception_type.clone()),
        }
    }
}

/// First non-empty stack trace line, trimmed, without the "at " prefix.
fn top_frame(stack_trace: Option<&str>) -> Option<&str> {
    stack_trace?
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.strip_prefix("at ").unwrap_or(line))
}

/// Groups by the queue the message failed in.
pub struct FailedQueueGrouper;

impl FailureGrouper for FailedQueueGrouper {
    fn group_type(&self) -> &'static str {
        "failed-queue"
    }

    fn group_name(&self, reason: &FailureReason) -> Option<String> {
        if reason.queue_address.is_empty() {
            return None;
        }
        Some(reason.queue_address.clone())
    }
}

/// The default grouper registry, in execution order.
pub fn default_groupers() -> Vec<Box<dyn FailureGrouper>> {
    vec![
        Box::new(ExceptionTypeAndStackTraceGrouper),
        Box::new(FailedQueueGrouper),
    ]
}

/// Run every grouper over a failure reason, yielding the groups it belongs
/// to. Groupers that return no name are skipped.
pub fn derive_groups(
    groupers: &[Box<dyn FailureGrouper>],
    reason: &FailureReason,
    now: DateTime<Utc>,
) -> Vec<FailureGroup> {
    groupers
        .iter()
        .filter_map(|grouper| {
            let name = grouper.group_name(reason)?;
            Some(FailureGroup::new(grouper.group_type(), name, now))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(exception_type: &str, stack: Option<&str>, queue: &str) -> FailureReason {
        FailureReason {
            exception_type: exception_type.into(),
            message: "boom".into(),
            stack_trace: stack.map(str::to_string),
            queue_address: queue.into(),
            endpoint: "sales".into(),
        }
    }

    #[test]
    fn test_exception_grouper_uses_top_frame() {
        let r = reason(
            "TimeoutException",
            Some("\n  at Orders.Handler.Handle()\n  at Pipeline.Invoke()"),
            "orders",
        );
        let name = ExceptionTypeAndStackTraceGrouper.group_name(&r).unwrap();
        assert_eq!(name, "TimeoutException at Orders.Handler.Handle()");
    }

    #[test]
    fn test_exception_grouper_without_stack_trace() {
        let r = reason("TimeoutException", None, "orders");
        let name = ExceptionTypeAndStackTraceGrouper.group_name(&r).unwrap();
        assert_eq!(name, "TimeoutException");
    }

    #[test]
    fn test_empty_exception_type_not_classified() {
        let r = reason("", None, "orders");
        assert!(ExceptionTypeAndStackTraceGrouper.group_name(&r).is_none());
    }

    #[test]
    fn test_queue_grouper() {
        let r = reason("TimeoutException", None, "orders");
        assert_eq!(
            FailedQueueGrouper.group_name(&r).as_deref(),
            Some("orders")
        );
    }

    #[test]
    fn test_derive_groups_skips_unclassifiable() {
        let now = Utc::now();
        let r = reason("", None, "orders");
        let groups = derive_groups(&default_groupers(), &r, now);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_type, "failed-queue");
    }

    #[test]
    fn test_derived_group_ids_are_stable() {
        let r = reason("TimeoutException", None, "orders");
        let a = derive_groups(&default_groupers(), &r, Utc::now());
        let b = derive_groups(&default_groupers(), &r, Utc::now());

        assert_eq!(a[0].id, b[0].id);
        assert_eq!(a[1].id, b[1].id);
    }
}
