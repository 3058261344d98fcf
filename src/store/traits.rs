//! The `Store` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::applications::model::{Application, Event};
use crate::apply::knowledge::SavedAnswer;
use crate::apply::machine::SuspendedAttempt;
use crate::error::DatabaseError;
use crate::jobs::model::Job;

/// One entry in the append-only audit trail of automated decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub application_id: Option<Uuid>,
    pub action: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActionEntry {
    pub fn job(action: &str, job_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: Some(job_id),
            application_id: None,
            action: action.to_string(),
            detail: None,
            created_at: Utc::now(),
        }
    }

    pub fn application(action: &str, application_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: None,
            application_id: Some(application_id),
            action: action.to_string(),
            detail: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Backend-agnostic persistence covering jobs, applications, correspondence
/// events, the Q&A store, suspended attempts, and the action log.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert or fully replace a job.
    async fn save_job(&self, job: &Job) -> Result<(), DatabaseError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// All jobs, most recently updated first.
    async fn list_jobs(&self) -> Result<Vec<Job>, DatabaseError>;

    // ── Applications ────────────────────────────────────────────────

    /// Atomically record a submission: update the job and create its
    /// application in one transaction.
    async fn mark_applied(
        &self,
        job: &Job,
        application: &Application,
    ) -> Result<(), DatabaseError>;

    async fn get_application(&self, id: Uuid) -> Result<Option<Application>, DatabaseError>;

    async fn update_application(&self, application: &Application) -> Result<(), DatabaseError>;

    /// All applications, most recently updated first.
    async fn list_applications(&self) -> Result<Vec<Application>, DatabaseError>;

    /// Open applications for an employer (case-insensitive), optionally
    /// narrowed to a position title.
    async fn list_open_applications_matching(
        &self,
        company: &str,
        title: Option<&str>,
    ) -> Result<Vec<Application>, DatabaseError>;

    // ── Correspondence events ───────────────────────────────────────

    /// Append an event to an application's correspondence log.
    async fn append_event(
        &self,
        application_id: Uuid,
        event: &Event,
    ) -> Result<(), DatabaseError>;

    /// Events for an application, oldest first.
    async fn list_events(&self, application_id: Uuid) -> Result<Vec<Event>, DatabaseError>;

    // ── Q&A store ───────────────────────────────────────────────────

    async fn upsert_saved_answer(&self, answer: &SavedAnswer) -> Result<(), DatabaseError>;

    async fn list_saved_answers(&self) -> Result<Vec<SavedAnswer>, DatabaseError>;

    async fn update_saved_answer(&self, id: Uuid, answer: &str) -> Result<(), DatabaseError>;

    async fn delete_saved_answer(&self, id: Uuid) -> Result<(), DatabaseError>;

    // ── Suspended attempts ──────────────────────────────────────────

    async fn save_suspended_attempt(
        &self,
        attempt: &SuspendedAttempt,
    ) -> Result<(), DatabaseError>;

    async fn get_suspended_attempt(
        &self,
        job_id: Uuid,
    ) -> Result<Option<SuspendedAttempt>, DatabaseError>;

    async fn delete_suspended_attempt(&self, job_id: Uuid) -> Result<(), DatabaseError>;

    async fn list_suspended_attempts(&self) -> Result<Vec<SuspendedAttempt>, DatabaseError>;

    // ── Action log ──────────────────────────────────────────────────

    async fn log_action(&self, entry: &ActionEntry) -> Result<(), DatabaseError>;

    /// Most recent actions first, up to `limit`.
    async fn list_actions(&self, limit: usize) -> Result<Vec<ActionEntry>, DatabaseError>;
}
