//! Application data model — one per submitted job, advanced by employer email.
//!
//! Stage progress is never stored as a counter. It is derived from which
//! event kinds are present in the append-only event sequence (`derive_stage`),
//! so the event list is the single source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a submitted application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    /// Submitted, no decisive reply yet.
    Pending,
    /// Employer confirmed receipt.
    Applied,
    /// Employer rejected the application.
    Rejected,
    /// Employer extended an offer.
    Accepted,
    /// An interview/appointment is confirmed.
    Appointment,
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Applied => write!(f, "applied"),
            Self::Rejected => write!(f, "rejected"),
            Self::Accepted => write!(f, "accepted"),
            Self::Appointment => write!(f, "appointment"),
        }
    }
}

impl std::str::FromStr for ApplicationStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "applied" => Ok(Self::Applied),
            "rejected" => Ok(Self::Rejected),
            "accepted" => Ok(Self::Accepted),
            "appointment" => Ok(Self::Appointment),
            _ => Err(format!("Unknown application status: {}", s)),
        }
    }
}

/// The nine canonical correspondence event kinds, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    VerificationEmail,
    AccountConfirmation,
    ApplicationConfirmation,
    FollowUpSent,
    FollowUpConfirmation,
    FollowUpAnswer,
    /// The employer's decision email — rejection or acceptance.
    Decision,
    AppointmentRequest,
    AppointmentConfirmation,
}

impl EventKind {
    /// Canonical lifecycle order.
    pub const ORDER: [EventKind; 9] = [
        EventKind::VerificationEmail,
        EventKind::AccountConfirmation,
        EventKind::ApplicationConfirmation,
        EventKind::FollowUpSent,
        EventKind::FollowUpConfirmation,
        EventKind::FollowUpAnswer,
        EventKind::Decision,
        EventKind::AppointmentRequest,
        EventKind::AppointmentConfirmation,
    ];

    /// Position in the canonical order.
    pub fn rank(&self) -> usize {
        Self::ORDER.iter().position(|k| k == self).unwrap_or(0)
    }

    /// Display label matching the inbox UI.
    pub fn label(&self) -> &'static str {
        match self {
            Self::VerificationEmail => "Verification Email",
            Self::AccountConfirmation => "Account Confirmation",
            Self::ApplicationConfirmation => "Application Confirmation",
            Self::FollowUpSent => "Follow-up Sent",
            Self::FollowUpConfirmation => "Follow-up Confirmation",
            Self::FollowUpAnswer => "Follow-up Answer",
            Self::Decision => "Rejection/Acceptance",
            Self::AppointmentRequest => "Appointment Request",
            Self::AppointmentConfirmation => "Appointment Confirmation",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VerificationEmail => write!(f, "verification_email"),
            Self::AccountConfirmation => write!(f, "account_confirmation"),
            Self::ApplicationConfirmation => write!(f, "application_confirmation"),
            Self::FollowUpSent => write!(f, "follow_up_sent"),
            Self::FollowUpConfirmation => write!(f, "follow_up_confirmation"),
            Self::FollowUpAnswer => write!(f, "follow_up_answer"),
            Self::Decision => write!(f, "decision"),
            Self::AppointmentRequest => write!(f, "appointment_request"),
            Self::AppointmentConfirmation => write!(f, "appointment_confirmation"),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verification_email" => Ok(Self::VerificationEmail),
            "account_confirmation" => Ok(Self::AccountConfirmation),
            "application_confirmation" => Ok(Self::ApplicationConfirmation),
            "follow_up_sent" => Ok(Self::FollowUpSent),
            "follow_up_confirmation" => Ok(Self::FollowUpConfirmation),
            "follow_up_answer" => Ok(Self::FollowUpAnswer),
            "decision" => Ok(Self::Decision),
            "appointment_request" => Ok(Self::AppointmentRequest),
            "appointment_confirmation" => Ok(Self::AppointmentConfirmation),
            _ => Err(format!("Unknown event kind: {}", s)),
        }
    }
}

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Secretary,
    Employer,
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secretary => write!(f, "secretary"),
            Self::Employer => write!(f, "employer"),
        }
    }
}

impl std::str::FromStr for Party {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "secretary" => Ok(Self::Secretary),
            "employer" => Ok(Self::Employer),
            _ => Err(format!("Unknown party: {}", s)),
        }
    }
}

/// One entry in an application's append-only correspondence log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub kind: EventKind,
    pub from: Party,
    pub timestamp: DateTime<Utc>,
    /// Snippet of the email (or the secretary note) that produced this event.
    pub content: String,
}

impl Event {
    pub fn new(kind: EventKind, from: Party, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            from,
            timestamp: Utc::now(),
            content: content.to_string(),
        }
    }
}

/// Derive lifecycle progress from the event sequence.
///
/// Returns the furthest canonical stage for which an event exists, or `None`
/// for a fresh application with no correspondence yet. Pure function over the
/// events; nothing else stores progress.
pub fn derive_stage(events: &[Event]) -> Option<EventKind> {
    events.iter().map(|e| e.kind).max_by_key(|k| k.rank())
}

/// An application, created exactly once its job reaches `applied`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub job_id: Uuid,
    pub company: String,
    pub position: String,
    pub status: ApplicationStatus,
    /// Set when an ambiguous signal (typically a rejection that could belong
    /// to a different application with the same employer) needs a human call.
    pub needs_manual_confirmation: bool,
    /// The status the classifier would have applied, held until confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_status: Option<ApplicationStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Create the application for a freshly submitted job.
    pub fn for_job(job_id: Uuid, company: &str, position: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_id,
            company: company.to_string(),
            position: position.to_string(),
            status: ApplicationStatus::Pending,
            needs_manual_confirmation: false,
            pending_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the application is still open (no terminal decision recorded).
    pub fn is_open(&self) -> bool {
        !matches!(
            self.status,
            ApplicationStatus::Rejected | ApplicationStatus::Accepted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: EventKind) -> Event {
        Event::new(kind, Party::Employer, "x")
    }

    #[test]
    fn stage_of_empty_sequence_is_none() {
        assert_eq!(derive_stage(&[]), None);
    }

    #[test]
    fn stage_is_furthest_kind_present() {
        let events = vec![
            ev(EventKind::VerificationEmail),
            ev(EventKind::ApplicationConfirmation),
            ev(EventKind::AccountConfirmation),
        ];
        assert_eq!(derive_stage(&events), Some(EventKind::ApplicationConfirmation));
    }

    #[test]
    fn stage_ignores_arrival_order() {
        // The furthest stage wins even if earlier kinds arrive later.
        let events = vec![ev(EventKind::Decision), ev(EventKind::VerificationEmail)];
        assert_eq!(derive_stage(&events), Some(EventKind::Decision));
    }

    #[test]
    fn appending_never_moves_stage_backwards() {
        let mut events = vec![ev(EventKind::AppointmentRequest)];
        let before = derive_stage(&events).unwrap().rank();
        events.push(ev(EventKind::FollowUpSent));
        let after = derive_stage(&events).unwrap().rank();
        assert!(after >= before);
    }

    #[test]
    fn event_kind_round_trips_through_str() {
        for kind in EventKind::ORDER {
            let parsed: EventKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn rejected_and_accepted_are_not_open() {
        let mut app = Application::for_job(Uuid::new_v4(), "Acme", "Engineer");
        assert!(app.is_open());
        app.status = ApplicationStatus::Rejected;
        assert!(!app.is_open());
        app.status = ApplicationStatus::Accepted;
        assert!(!app.is_open());
        app.status = ApplicationStatus::Appointment;
        assert!(app.is_open());
    }
}
