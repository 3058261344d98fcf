//! Form automation agent contract.
//!
//! The agent is an opaque collaborator holding an exclusive browser session
//! per attempt. The orchestrator never drives the DOM itself — it hands over
//! the job, the finalized documents, and the profile, and reacts to the
//! three-way outcome union.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::apply::profile::{QuestionCategory, UserProfile};
use crate::error::ApplyError;
use crate::jobs::model::{DocumentType, Job};

/// A form field the agent could not fill on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQuestion {
    /// Field identifier on the form (name/id/label, whatever the agent has).
    pub field: String,
    /// Visible label next to the field.
    pub label: String,
    /// Question phrased for the human.
    pub question: String,
    /// Input type (text, select, textarea, ...).
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub category: QuestionCategory,
    /// Choices, for select fields.
    #[serde(default)]
    pub options: Vec<String>,
}

/// One answer being fed back to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldAnswer {
    pub field: String,
    pub answer: String,
    /// Persist this answer to the Q&A store for future applications.
    #[serde(default)]
    pub save_for_later: bool,
}

/// What the agent did with the form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AgentOutcome {
    /// Form submitted; confirmation detected on the page.
    Submitted,
    /// Form too ambiguous to submit safely — the human takes over the
    /// browser session.
    ReviewNeeded { reason: String },
    /// Fields the agent needs answers for before it can continue.
    QuestionsPending { questions: Vec<PendingQuestion> },
}

/// Agent response: outcome plus the session handle for resume/cancel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub session_id: String,
    #[serde(flatten)]
    pub outcome: AgentOutcome,
}

/// The form automation capability.
#[async_trait]
pub trait FormAgent: Send + Sync {
    /// Open the listing, fill what it can, and report.
    async fn submit(
        &self,
        job: &Job,
        documents: &BTreeMap<DocumentType, String>,
        profile: &UserProfile,
    ) -> Result<AgentReply, ApplyError>;

    /// Feed answers into an open session. May surface a NEW round of
    /// questions (fields revealed after earlier ones are filled).
    async fn resume(
        &self,
        session_id: &str,
        answers: &[FieldAnswer],
    ) -> Result<AgentReply, ApplyError>;

    /// Tear down the session and its browser, leaving no draft submission.
    async fn cancel(&self, session_id: &str) -> Result<(), ApplyError>;
}

/// JSON-over-HTTP client for the form automation sidecar.
pub struct RemoteFormAgent {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    job_url: &'a str,
    job_title: &'a str,
    company: &'a str,
    documents: BTreeMap<String, &'a str>,
    profile: &'a UserProfile,
}

impl RemoteFormAgent {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn agent_err(e: reqwest::Error) -> ApplyError {
        ApplyError::AgentFailed {
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl FormAgent for RemoteFormAgent {
    async fn submit(
        &self,
        job: &Job,
        documents: &BTreeMap<DocumentType, String>,
        profile: &UserProfile,
    ) -> Result<AgentReply, ApplyError> {
        let body = SubmitRequest {
            job_url: &job.url,
            job_title: &job.title,
            company: &job.company,
            documents: documents
                .iter()
                .map(|(t, p)| (t.to_string(), p.as_str()))
                .collect(),
            profile,
        };

        self.client
            .post(format!("{}/sessions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(Self::agent_err)?
            .error_for_status()
            .map_err(Self::agent_err)?
            .json()
            .await
            .map_err(Self::agent_err)
    }

    async fn resume(
        &self,
        session_id: &str,
        answers: &[FieldAnswer],
    ) -> Result<AgentReply, ApplyError> {
        let response = self
            .client
            .post(format!("{}/sessions/{}/answers", self.base_url, session_id))
            .json(&answers)
            .send()
            .await
            .map_err(Self::agent_err)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ApplyError::SessionExpired {
                session_id: session_id.to_string(),
            });
        }

        response
            .error_for_status()
            .map_err(Self::agent_err)?
            .json()
            .await
            .map_err(Self::agent_err)
    }

    async fn cancel(&self, session_id: &str) -> Result<(), ApplyError> {
        let response = self
            .client
            .delete(format!("{}/sessions/{}", self.base_url, session_id))
            .send()
            .await
            .map_err(Self::agent_err)?;

        // A session the agent already dropped is fine for cancel.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        response.error_for_status().map_err(Self::agent_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_reply_deserializes_each_outcome() {
        let submitted: AgentReply =
            serde_json::from_str(r#"{"session_id": "s1", "outcome": "submitted"}"#).unwrap();
        assert!(matches!(submitted.outcome, AgentOutcome::Submitted));

        let review: AgentReply = serde_json::from_str(
            r#"{"session_id": "s2", "outcome": "review_needed", "reason": "captcha"}"#,
        )
        .unwrap();
        assert!(matches!(
            review.outcome,
            AgentOutcome::ReviewNeeded { ref reason } if reason == "captcha"
        ));

        let questions: AgentReply = serde_json::from_str(
            r#"{
                "session_id": "s3",
                "outcome": "questions_pending",
                "questions": [{
                    "field": "notice",
                    "label": "Notice period",
                    "question": "What is your notice period?",
                    "type": "text",
                    "category": "availability"
                }]
            }"#,
        )
        .unwrap();
        match questions.outcome {
            AgentOutcome::QuestionsPending { questions } => {
                assert_eq!(questions.len(), 1);
                assert_eq!(questions[0].category, QuestionCategory::Availability);
                assert!(questions[0].options.is_empty());
            }
            other => panic!("Expected QuestionsPending, got {:?}", other),
        }
    }

    #[test]
    fn pending_question_round_trips() {
        let q = PendingQuestion {
            field: "salary".into(),
            label: "Salary expectation".into(),
            question: "What are your salary expectations?".into(),
            field_type: "text".into(),
            category: QuestionCategory::Salary,
            options: vec![],
        };
        let json = serde_json::to_string(&q).unwrap();
        let back: PendingQuestion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q);
    }
}
