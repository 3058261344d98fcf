//! Pre-LLM rules engine for correspondence classification.
//!
//! Runs before the Secretary model to short-circuit obvious cases: rejection
//! and offer phrasing, interview scheduling, receipt confirmations, account
//! and address verification mails. If a rule matches, the LLM call is skipped
//! entirely and the match counts as full confidence.

use regex::Regex;
use tracing::debug;

use crate::applications::model::{ApplicationStatus, EventKind};

/// Which field a rule matches against.
#[derive(Debug, Clone, Copy)]
pub enum RuleField {
    Subject,
    Body,
    Either,
}

/// A keyword rule mapping matched mail text to an event kind.
struct KeywordRule {
    regex: Regex,
    field: RuleField,
    kind: EventKind,
    /// Status the event implies, for decision and appointment mails.
    outcome: Option<ApplicationStatus>,
    reason: &'static str,
}

/// A rule hit.
#[derive(Debug, Clone)]
pub struct RuleClassification {
    pub kind: EventKind,
    pub outcome: Option<ApplicationStatus>,
    pub reason: &'static str,
}

/// The keyword fast path. Rule order matters: decisions are checked before
/// scheduling so "unfortunately ... we scheduled other interviews" reads as a
/// rejection, not an appointment.
pub struct SecretaryRules {
    rules: Vec<KeywordRule>,
}

impl Default for SecretaryRules {
    fn default() -> Self {
        let rules = vec![
            KeywordRule {
                regex: Regex::new(
                    r"(?i)(\breject|unfortunately|not (move|moving) forward|other candidates|decided to pursue|no longer under consideration|leider)",
                )
                .unwrap(),
                field: RuleField::Either,
                kind: EventKind::Decision,
                outcome: Some(ApplicationStatus::Rejected),
                reason: "rejection phrasing",
            },
            KeywordRule {
                regex: Regex::new(
                    r"(?i)(pleased to offer|offer of employment|job offer|congratulations.{0,60}(offer|position)|extend an offer)",
                )
                .unwrap(),
                field: RuleField::Either,
                kind: EventKind::Decision,
                outcome: Some(ApplicationStatus::Accepted),
                reason: "offer phrasing",
            },
            KeywordRule {
                regex: Regex::new(
                    r"(?i)(interview (is )?confirmed|appointment (is )?confirmed|confirmed your (interview|appointment)|calendar invitation)",
                )
                .unwrap(),
                field: RuleField::Either,
                kind: EventKind::AppointmentConfirmation,
                outcome: Some(ApplicationStatus::Appointment),
                reason: "confirmed appointment",
            },
            KeywordRule {
                regex: Regex::new(
                    r"(?i)(schedule (an |your )?(interview|call|meeting)|invite you to (an )?interview|your availability|book a (time|slot)|vorstellungsgespr)",
                )
                .unwrap(),
                field: RuleField::Either,
                kind: EventKind::AppointmentRequest,
                outcome: None,
                reason: "interview scheduling",
            },
            KeywordRule {
                regex: Regex::new(
                    r"(?i)(received your application|application (was |has been )?received|thank you for (your application|applying)|eingegangen)",
                )
                .unwrap(),
                field: RuleField::Either,
                kind: EventKind::ApplicationConfirmation,
                outcome: Some(ApplicationStatus::Applied),
                reason: "application receipt",
            },
            KeywordRule {
                regex: Regex::new(
                    r"(?i)(verify your (email|e-mail|address)|verification (link|code)|confirm your (email|e-mail))",
                )
                .unwrap(),
                field: RuleField::Either,
                kind: EventKind::VerificationEmail,
                outcome: None,
                reason: "address verification",
            },
            KeywordRule {
                regex: Regex::new(
                    r"(?i)(account (was |has been )?(created|activated)|welcome to your (new )?account|your account is ready)",
                )
                .unwrap(),
                field: RuleField::Either,
                kind: EventKind::AccountConfirmation,
                outcome: None,
                reason: "account creation",
            },
            KeywordRule {
                regex: Regex::new(r"(?i)(received your (follow[- ]?up|inquiry|message)|we will get back to you)")
                    .unwrap(),
                field: RuleField::Either,
                kind: EventKind::FollowUpConfirmation,
                outcome: None,
                reason: "follow-up receipt",
            },
        ];
        Self { rules }
    }
}

impl SecretaryRules {
    /// Empty rules (for testing the LLM path in isolation).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Evaluate a mail against all rules.
    ///
    /// Returns `Some` on the first match (short-circuits the LLM).
    pub fn evaluate(&self, subject: &str, body: &str) -> Option<RuleClassification> {
        for rule in &self.rules {
            let matched = match rule.field {
                RuleField::Subject => rule.regex.is_match(subject),
                RuleField::Body => rule.regex.is_match(body),
                RuleField::Either => rule.regex.is_match(subject) || rule.regex.is_match(body),
            };
            if matched {
                debug!(kind = %rule.kind, reason = rule.reason, "Rule matched correspondence");
                return Some(RuleClassification {
                    kind: rule.kind,
                    outcome: rule.outcome,
                    reason: rule.reason,
                });
            }
        }
        None
    }
}
