//! Error records and user-facing notices produced by the error boundary.

use crate::enums::Severity;
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// How the wrapped operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The operation returned an error value
    Failure,
    /// The operation panicked
    Panic,
}

/// Where a failure happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Full boundary label, e.g. `comments.bulk_delete`
    pub label: String,
    /// Module part of the label (text before the first `.`)
    pub module: String,
    pub kind: ErrorKind,
}

impl ErrorContext {
    pub fn new(label: impl Into<String>, kind: ErrorKind) -> Self {
        let label = label.into();
        let module = module_of(&label).to_string();
        Self {
            label,
            module,
            kind,
        }
    }
}

/// Module part of a boundary label.
pub fn module_of(label: &str) -> &str {
    label.split('.').next().unwrap_or(label)
}

/// One failure captured by the error boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub timestamp: Timestamp,
    pub message: String,
    pub severity: Severity,
    /// Captured backtrace, when the host has backtraces enabled
    pub stack: Option<String>,
    pub context: ErrorContext,
}

impl ErrorRecord {
    pub fn new(
        timestamp: Timestamp,
        message: impl Into<String>,
        severity: Severity,
        context: ErrorContext,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp,
            message: message.into(),
            severity,
            stack: None,
            context,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Same message and severity, the duplicate-suppression identity.
    pub fn same_failure(&self, message: &str, severity: Severity) -> bool {
        self.severity == severity && self.message == message
    }
}

/// A user-visible failure notice. Wording and duration scale with severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub duration: Duration,
}

impl Notice {
    /// Build the notice for a failure in `label`.
    pub fn for_failure(severity: Severity, label: &str, message: &str) -> Self {
        let (title, duration) = match severity {
            Severity::Low => ("Minor hiccup", Duration::from_secs(3)),
            Severity::Medium => ("Something went wrong", Duration::from_secs(4)),
            Severity::High => ("Feature error", Duration::from_secs(6)),
            Severity::Critical => ("Critical error, please check your setup", Duration::from_secs(10)),
        };
        Self {
            severity,
            title: title.to_string(),
            message: format!("{}: {}", label, message),
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    #[test]
    fn test_context_splits_module_from_label() {
        let ctx = ErrorContext::new("comments.bulk_delete", ErrorKind::Failure);
        assert_eq!(ctx.module, "comments");
        assert_eq!(ctx.label, "comments.bulk_delete");

        let bare = ErrorContext::new("overlay", ErrorKind::Panic);
        assert_eq!(bare.module, "overlay");
    }

    #[test]
    fn test_same_failure_requires_message_and_severity() {
        let ctx = ErrorContext::new("a.b", ErrorKind::Failure);
        let record = ErrorRecord::new(Utc::now(), "boom", Severity::High, ctx);
        assert!(record.same_failure("boom", Severity::High));
        assert!(!record.same_failure("boom", Severity::Low));
        assert!(!record.same_failure("bang", Severity::High));
    }

    #[test]
    fn test_notice_duration_scales_with_severity() {
        let medium = Notice::for_failure(Severity::Medium, "x", "m");
        let high = Notice::for_failure(Severity::High, "x", "m");
        let critical = Notice::for_failure(Severity::Critical, "x", "m");
        assert!(medium.duration < high.duration);
        assert!(high.duration < critical.duration);
        assert!(critical.message.contains("x: m"));
    }

    proptest! {
        /// Property: the module is the dot-free prefix of the label.
        #[test]
        fn prop_module_is_label_prefix(label in "[a-z_.]{0,24}") {
            let module = module_of(&label);
            prop_assert!(label.starts_with(module));
            prop_assert!(!module.contains('.'));
        }
    }

    #[test]
    fn test_record_serde_roundtrip_keeps_context() {
        let ctx = ErrorContext::new("download.menu", ErrorKind::Panic);
        let record = ErrorRecord::new(Utc::now(), "index out of bounds", Severity::Medium, ctx)
            .with_stack("frame 0");
        let json = serde_json::to_string(&record).unwrap();
        let back: ErrorRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
