//! Severity classification.
//!
//! An ordered table of (severity, needles). The message is lowercased and the
//! first rule with a matching needle wins; nothing matching means `Medium`.

use warden_core::Severity;

/// One classification rule.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub severity: Severity,
    pub needles: &'static [&'static str],
}

impl Rule {
    pub fn matches(&self, lowered: &str) -> bool {
        self.needles.iter().any(|needle| lowered.contains(needle))
    }
}

/// Rules in evaluation order.
pub const RULES: &[Rule] = &[
    Rule {
        severity: Severity::Low,
        needles: &["network", "timeout", "timed out", "fetch", "connection"],
    },
    Rule {
        severity: Severity::Medium,
        needles: &["null", "undefined", "cannot read", "property"],
    },
    Rule {
        severity: Severity::High,
        needles: &[
            "syntax",
            "referenceerror",
            "typeerror",
            "is not a function",
            "invalid type",
        ],
    },
    Rule {
        severity: Severity::Critical,
        needles: &[
            "security",
            "permission denied",
            "content security policy",
            "csp",
            "policy",
        ],
    },
];

pub const DEFAULT_SEVERITY: Severity = Severity::Medium;

/// Severity of a failure message.
pub fn classify(message: &str) -> Severity {
    let lowered = message.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.matches(&lowered))
        .map_or(DEFAULT_SEVERITY, |rule| rule.severity)
}
