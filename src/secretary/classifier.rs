//! Correspondence classification and application status transitions.
//!
//! Rules first, then the Secretary model. Every accepted classification
//! appends an event to the application's correspondence log; decision and
//! appointment events also move the application status. A rejection that
//! could belong to more than one open application with the same employer is
//! never applied automatically — all candidates get flagged for the human.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::applications::model::{Application, ApplicationStatus, Event, EventKind, Party};
use crate::config::AmbiguityRule;
use crate::error::{Result, SecretaryError};
use crate::gateway::{AiGateway, CallOptions, call_bounded, extract_json_object};
use crate::secretary::feed::InboundEmail;
use crate::secretary::rules::SecretaryRules;
use crate::store::{ActionEntry, Store};

/// A classified email.
#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: EventKind,
    pub confidence: f32,
    /// Status the mail implies, for decisions and confirmations.
    pub outcome: Option<ApplicationStatus>,
}

/// What processing one email did. Serialized as-is for API responses.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SecretaryOutcome {
    /// Event recorded; `new_status` is set if the application moved.
    Recorded {
        kind: EventKind,
        new_status: Option<ApplicationStatus>,
    },
    /// Ambiguous rejection — all listed applications are flagged and none
    /// changed status.
    ManualConfirmationNeeded { applications: Vec<Uuid> },
    /// Nothing recorded (unclassifiable or below the confidence floor).
    Skipped { reason: String },
}

#[derive(Deserialize)]
struct LlmClassification {
    kind: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    outcome: Option<String>,
}

fn build_classification_prompt(subject: &str, body: &str) -> String {
    let body: String = body.chars().take(4000).collect();
    format!(
        r#"You are the secretary of a job application tracker. Classify this employer email.

Subject: {subject}

Body:
{body}

Pick exactly one kind:
- verification_email: asks to verify an email address
- account_confirmation: a portal account was created or activated
- application_confirmation: the employer confirms receiving the application
- follow_up_sent: a follow-up inquiry was sent to the employer
- follow_up_confirmation: the employer confirms receiving a follow-up
- follow_up_answer: the employer answers a follow-up
- decision: the employer rejects the application or extends an offer
- appointment_request: the employer wants to schedule an interview
- appointment_confirmation: an interview or appointment is confirmed

Respond with ONLY a JSON object:
{{"kind": "<kind>", "confidence": <0.0-1.0>, "outcome": "rejected" | "accepted" | null}}

"outcome" is only set for decision emails."#
    )
}

/// The Secretary.
pub struct Secretary {
    gateway: Option<Arc<dyn AiGateway>>,
    call_options: CallOptions,
    rules: SecretaryRules,
    store: Arc<dyn Store>,
    min_confidence: f32,
    ambiguity_rule: AmbiguityRule,
}

impl Secretary {
    pub fn new(
        gateway: Option<Arc<dyn AiGateway>>,
        call_options: CallOptions,
        rules: SecretaryRules,
        store: Arc<dyn Store>,
        min_confidence: f32,
        ambiguity_rule: AmbiguityRule,
    ) -> Self {
        Self {
            gateway,
            call_options,
            rules,
            store,
            min_confidence,
            ambiguity_rule,
        }
    }

    /// Classify an email. Rules short-circuit the model; without a configured
    /// Secretary model, rule misses come back as `None`.
    pub async fn classify(
        &self,
        subject: &str,
        body: &str,
    ) -> std::result::Result<Option<Classification>, SecretaryError> {
        if let Some(hit) = self.rules.evaluate(subject, body) {
            return Ok(Some(Classification {
                kind: hit.kind,
                confidence: 1.0,
                outcome: hit.outcome,
            }));
        }

        let Some(gateway) = &self.gateway else {
            debug!("No Secretary model configured; rule miss stays unclassified");
            return Ok(None);
        };

        let prompt = build_classification_prompt(subject, body);
        let response = call_bounded(gateway.as_ref(), &prompt, &self.call_options)
            .await
            .map_err(|e| SecretaryError::Classification(e.to_string()))?;

        let json = extract_json_object(&response);
        let parsed: LlmClassification = serde_json::from_str(&json)
            .map_err(|e| SecretaryError::Classification(format!("bad model JSON: {e}")))?;

        let kind: EventKind = parsed
            .kind
            .parse()
            .map_err(|e: String| SecretaryError::Classification(e))?;
        let outcome = parsed.outcome.as_deref().and_then(|s| match s {
            "rejected" => Some(ApplicationStatus::Rejected),
            "accepted" => Some(ApplicationStatus::Accepted),
            _ => None,
        });

        Ok(Some(Classification {
            kind,
            confidence: parsed.confidence.clamp(0.0, 1.0),
            outcome,
        }))
    }

    /// Process one inbound employer email end to end.
    pub async fn process_email(&self, email: &InboundEmail) -> Result<SecretaryOutcome> {
        let mut application = self
            .store
            .get_application(email.application_id)
            .await?
            .ok_or(SecretaryError::ApplicationNotFound {
                id: email.application_id,
            })?;

        let classification = match self.classify(&email.subject, &email.body).await? {
            Some(c) => c,
            None => {
                debug!(application_id = %application.id, "Email left unclassified");
                return Ok(SecretaryOutcome::Skipped {
                    reason: "unclassifiable".to_string(),
                });
            }
        };

        if classification.confidence < self.min_confidence {
            debug!(
                application_id = %application.id,
                confidence = classification.confidence,
                "Classification below confidence floor"
            );
            return Ok(SecretaryOutcome::Skipped {
                reason: format!("confidence {:.2} below floor", classification.confidence),
            });
        }

        let snippet: String = format!("{}\n{}", email.subject, email.body)
            .chars()
            .take(500)
            .collect();
        let event = Event::new(classification.kind, Party::Employer, snippet.trim());
        self.store.append_event(application.id, &event).await?;

        // Ambiguous rejections are never applied automatically.
        if classification.kind == EventKind::Decision
            && classification.outcome == Some(ApplicationStatus::Rejected)
        {
            let title = match self.ambiguity_rule {
                AmbiguityRule::SameCompany => None,
                AmbiguityRule::SameCompanyAndTitle => Some(application.position.as_str()),
            };
            let matching = self
                .store
                .list_open_applications_matching(&application.company, title)
                .await?;
            if matching.len() > 1 {
                let mut flagged = Vec::with_capacity(matching.len());
                for mut candidate in matching {
                    candidate.needs_manual_confirmation = true;
                    candidate.pending_status = Some(ApplicationStatus::Rejected);
                    candidate.updated_at = chrono::Utc::now();
                    self.store.update_application(&candidate).await?;
                    flagged.push(candidate.id);
                }
                warn!(
                    application_id = %application.id,
                    company = %application.company,
                    candidates = flagged.len(),
                    "Ambiguous rejection — flagged all open applications for this employer"
                );
                self.store
                    .log_action(
                        &ActionEntry::application("ambiguous_rejection", application.id)
                            .with_detail(format!("{} candidates flagged", flagged.len())),
                    )
                    .await?;
                return Ok(SecretaryOutcome::ManualConfirmationNeeded {
                    applications: flagged,
                });
            }
        }

        let new_status = match (classification.kind, classification.outcome) {
            (EventKind::Decision, Some(status)) => Some(status),
            (EventKind::AppointmentConfirmation, _) => Some(ApplicationStatus::Appointment),
            (EventKind::ApplicationConfirmation, _)
                if application.status == ApplicationStatus::Pending =>
            {
                Some(ApplicationStatus::Applied)
            }
            _ => None,
        };

        if let Some(status) = new_status {
            application.status = status;
            application.updated_at = chrono::Utc::now();
            self.store.update_application(&application).await?;
            info!(
                application_id = %application.id,
                status = %status,
                kind = %classification.kind,
                "Application status updated from correspondence"
            );
        }

        self.store
            .log_action(
                &ActionEntry::application("email_classified", application.id)
                    .with_detail(classification.kind.to_string()),
            )
            .await?;

        Ok(SecretaryOutcome::Recorded {
            kind: classification.kind,
            new_status,
        })
    }

    /// Resolve a manual-confirmation flag: apply the chosen status to this
    /// application only. Other flagged applications stay flagged.
    pub async fn confirm_status(
        &self,
        application_id: Uuid,
        status: ApplicationStatus,
    ) -> Result<Application> {
        let mut application = self
            .store
            .get_application(application_id)
            .await?
            .ok_or(SecretaryError::ApplicationNotFound { id: application_id })?;

        application.status = status;
        application.needs_manual_confirmation = false;
        application.pending_status = None;
        application.updated_at = chrono::Utc::now();
        self.store.update_application(&application).await?;

        self.store
            .log_action(
                &ActionEntry::application("status_confirmed", application_id)
                    .with_detail(status.to_string()),
            )
            .await?;
        info!(application_id = %application_id, status = %status, "Status confirmed by user");
        Ok(application)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::error::GatewayError;
    use crate::store::LibSqlBackend;

    struct JsonGateway {
        response: String,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AiGateway for JsonGateway {
        fn model_name(&self) -> &str {
            "mock-secretary"
        }
        async fn call(&self, _prompt: &str) -> std::result::Result<String, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn email(application_id: Uuid, subject: &str, body: &str) -> InboundEmail {
        InboundEmail {
            application_id,
            from: "hr@acme.example".into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    async fn secretary_with(
        store: Arc<dyn Store>,
        gateway: Option<Arc<dyn AiGateway>>,
        rules: SecretaryRules,
    ) -> Secretary {
        Secretary::new(
            gateway,
            CallOptions::new(std::time::Duration::from_secs(1), 0),
            rules,
            store,
            0.6,
            AmbiguityRule::SameCompany,
        )
    }

    async fn seed_application(store: &Arc<dyn Store>, company: &str, position: &str) -> Application {
        let app = Application::for_job(Uuid::new_v4(), company, position);
        store.update_application(&app).await.unwrap();
        app
    }

    #[tokio::test]
    async fn rule_hit_records_event_without_calling_the_model() {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(JsonGateway {
            response: "{}".into(),
            calls: AtomicU32::new(0),
        });
        let secretary = secretary_with(
            store.clone(),
            Some(gateway.clone()),
            SecretaryRules::default(),
        )
        .await;

        let app = seed_application(&store, "Acme", "Engineer").await;
        let outcome = secretary
            .process_email(&email(app.id, "Thanks", "We have received your application."))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            SecretaryOutcome::Recorded {
                kind: EventKind::ApplicationConfirmation,
                new_status: Some(ApplicationStatus::Applied),
            }
        ));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);

        let events = store.list_events(app.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::ApplicationConfirmation);
        assert_eq!(events[0].from, Party::Employer);
    }

    #[tokio::test]
    async fn model_classifies_when_rules_miss() {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(JsonGateway {
            response: r#"{"kind": "follow_up_answer", "confidence": 0.9, "outcome": null}"#.into(),
            calls: AtomicU32::new(0),
        });
        let secretary =
            secretary_with(store.clone(), Some(gateway.clone()), SecretaryRules::empty()).await;

        let app = seed_application(&store, "Acme", "Engineer").await;
        let outcome = secretary
            .process_email(&email(app.id, "Re: your question", "Here is the answer."))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            SecretaryOutcome::Recorded {
                kind: EventKind::FollowUpAnswer,
                new_status: None,
            }
        ));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn low_confidence_classification_records_nothing() {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(JsonGateway {
            response: r#"{"kind": "decision", "confidence": 0.3, "outcome": "rejected"}"#.into(),
            calls: AtomicU32::new(0),
        });
        let secretary =
            secretary_with(store.clone(), Some(gateway), SecretaryRules::empty()).await;

        let app = seed_application(&store, "Acme", "Engineer").await;
        let outcome = secretary
            .process_email(&email(app.id, "hmm", "maybe"))
            .await
            .unwrap();

        assert!(matches!(outcome, SecretaryOutcome::Skipped { .. }));
        assert!(store.list_events(app.id).await.unwrap().is_empty());
        let app = store.get_application(app.id).await.unwrap().unwrap();
        assert_eq!(app.status, ApplicationStatus::Pending);
    }

    #[tokio::test]
    async fn unambiguous_rejection_applies_directly() {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let secretary = secretary_with(store.clone(), None, SecretaryRules::default()).await;

        let app = seed_application(&store, "Acme", "Engineer").await;
        let outcome = secretary
            .process_email(&email(
                app.id,
                "Your application",
                "Unfortunately we went with other candidates.",
            ))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            SecretaryOutcome::Recorded {
                kind: EventKind::Decision,
                new_status: Some(ApplicationStatus::Rejected),
            }
        ));
        let app = store.get_application(app.id).await.unwrap().unwrap();
        assert_eq!(app.status, ApplicationStatus::Rejected);
        assert!(!app.needs_manual_confirmation);
    }

    #[tokio::test]
    async fn ambiguous_rejection_flags_all_open_applications() {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let secretary = secretary_with(store.clone(), None, SecretaryRules::default()).await;

        let first = seed_application(&store, "Acme", "Engineer").await;
        let second = seed_application(&store, "Acme", "Designer").await;

        let outcome = secretary
            .process_email(&email(
                first.id,
                "Your application",
                "Unfortunately we will not move forward.",
            ))
            .await
            .unwrap();

        let flagged = match outcome {
            SecretaryOutcome::ManualConfirmationNeeded { applications } => applications,
            other => panic!("Expected ManualConfirmationNeeded, got {:?}", other),
        };
        assert_eq!(flagged.len(), 2);

        for id in [first.id, second.id] {
            let app = store.get_application(id).await.unwrap().unwrap();
            // Flagged, status held.
            assert!(app.needs_manual_confirmation);
            assert_eq!(app.pending_status, Some(ApplicationStatus::Rejected));
            assert_eq!(app.status, ApplicationStatus::Pending);
        }

        // The event still landed on the addressed application.
        assert_eq!(store.list_events(first.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn confirm_status_resolves_only_the_confirmed_application() {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let secretary = secretary_with(store.clone(), None, SecretaryRules::default()).await;

        let first = seed_application(&store, "Acme", "Engineer").await;
        let second = seed_application(&store, "Acme", "Designer").await;
        secretary
            .process_email(&email(first.id, "Update", "Unfortunately, no."))
            .await
            .unwrap();

        secretary
            .confirm_status(first.id, ApplicationStatus::Rejected)
            .await
            .unwrap();

        let first = store.get_application(first.id).await.unwrap().unwrap();
        assert_eq!(first.status, ApplicationStatus::Rejected);
        assert!(!first.needs_manual_confirmation);
        assert_eq!(first.pending_status, None);

        // The sibling stays flagged for its own decision.
        let second = store.get_application(second.id).await.unwrap().unwrap();
        assert!(second.needs_manual_confirmation);
        assert_eq!(second.status, ApplicationStatus::Pending);
    }

    #[tokio::test]
    async fn appointment_confirmation_moves_status() {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let secretary = secretary_with(store.clone(), None, SecretaryRules::default()).await;

        let app = seed_application(&store, "Acme", "Engineer").await;
        secretary
            .process_email(&email(
                app.id,
                "Interview confirmed",
                "Your interview is confirmed for Tuesday at 10:00.",
            ))
            .await
            .unwrap();

        let app = store.get_application(app.id).await.unwrap().unwrap();
        assert_eq!(app.status, ApplicationStatus::Appointment);
    }

    #[test]
    fn outcomes_serialize_with_an_outcome_tag() {
        let recorded = serde_json::to_value(SecretaryOutcome::Recorded {
            kind: EventKind::Decision,
            new_status: Some(ApplicationStatus::Rejected),
        })
        .unwrap();
        assert_eq!(recorded["outcome"], "recorded");
        assert_eq!(recorded["kind"], "decision");
        assert_eq!(recorded["new_status"], "rejected");

        let id = Uuid::new_v4();
        let flagged = serde_json::to_value(SecretaryOutcome::ManualConfirmationNeeded {
            applications: vec![id],
        })
        .unwrap();
        assert_eq!(flagged["outcome"], "manual_confirmation_needed");
        assert_eq!(flagged["applications"][0], id.to_string());

        let skipped = serde_json::to_value(SecretaryOutcome::Skipped {
            reason: "unclassifiable".into(),
        })
        .unwrap();
        assert_eq!(skipped["outcome"], "skipped");
        assert_eq!(skipped["reason"], "unclassifiable");
    }

    #[tokio::test]
    async fn unknown_application_is_an_error() {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let secretary = secretary_with(store.clone(), None, SecretaryRules::default()).await;

        let err = secretary
            .process_email(&email(Uuid::new_v4(), "Hi", "Unfortunately..."))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Secretary(SecretaryError::ApplicationNotFound { .. })
        ));
    }
}
