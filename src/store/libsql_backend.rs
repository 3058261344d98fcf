//! libSQL backend — async `Store` implementation.
//!
//! Supports local file and in-memory databases. Document maps, resolved
//! answers, and open questions are stored as JSON columns; everything else is
//! flat columns with TEXT timestamps in RFC 3339.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::applications::model::{Application, Event};
use crate::apply::knowledge::SavedAnswer;
use crate::apply::machine::SuspendedAttempt;
use crate::error::DatabaseError;
use crate::jobs::model::Job;
use crate::store::migrations;
use crate::store::traits::{ActionEntry, Store};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn optional_text(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

/// Column order: 0:id, 1:url, 2:title, 3:company, 4:description,
/// 5:compatibility_score, 6:status, 7:needs_user_consent,
/// 8:user_confirmed_docs, 9:documents, 10:last_error, 11:created_at,
/// 12:updated_at
fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let id: String = row.get(0).map_err(query_err)?;
    let url: String = row.get(1).map_err(query_err)?;
    let title: String = row.get(2).map_err(query_err)?;
    let company: String = row.get(3).map_err(query_err)?;
    let description: String = row.get(4).map_err(query_err)?;
    let score: i64 = row.get(5).map_err(query_err)?;
    let status: String = row.get(6).map_err(query_err)?;
    let needs_consent: i64 = row.get(7).map_err(query_err)?;
    let confirmed_docs: i64 = row.get(8).map_err(query_err)?;
    let documents_json: String = row.get(9).map_err(query_err)?;
    let last_error = optional_text(row, 10);
    let created: String = row.get(11).map_err(query_err)?;
    let updated: String = row.get(12).map_err(query_err)?;

    let documents = serde_json::from_str(&documents_json)
        .map_err(|e| DatabaseError::Serialization(format!("job documents: {e}")))?;

    Ok(Job {
        id: parse_uuid(&id),
        url,
        title,
        company,
        description,
        compatibility_score: score.clamp(0, 100) as u8,
        status: status.parse().unwrap_or(crate::jobs::model::JobStatus::New),
        needs_user_consent: needs_consent != 0,
        user_confirmed_docs: confirmed_docs != 0,
        documents,
        last_error,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Column order: 0:id, 1:job_id, 2:company, 3:position, 4:status,
/// 5:needs_manual_confirmation, 6:pending_status, 7:created_at, 8:updated_at
fn row_to_application(row: &libsql::Row) -> Result<Application, DatabaseError> {
    let id: String = row.get(0).map_err(query_err)?;
    let job_id: String = row.get(1).map_err(query_err)?;
    let company: String = row.get(2).map_err(query_err)?;
    let position: String = row.get(3).map_err(query_err)?;
    let status: String = row.get(4).map_err(query_err)?;
    let needs_confirmation: i64 = row.get(5).map_err(query_err)?;
    let pending_status = optional_text(row, 6);
    let created: String = row.get(7).map_err(query_err)?;
    let updated: String = row.get(8).map_err(query_err)?;

    Ok(Application {
        id: parse_uuid(&id),
        job_id: parse_uuid(&job_id),
        company,
        position,
        status: status
            .parse()
            .unwrap_or(crate::applications::model::ApplicationStatus::Pending),
        needs_manual_confirmation: needs_confirmation != 0,
        pending_status: pending_status.and_then(|s| s.parse().ok()),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Column order: 0:id, 1:kind, 2:sender, 3:timestamp, 4:content
fn row_to_event(row: &libsql::Row) -> Result<Event, DatabaseError> {
    let id: String = row.get(0).map_err(query_err)?;
    let kind: String = row.get(1).map_err(query_err)?;
    let sender: String = row.get(2).map_err(query_err)?;
    let timestamp: String = row.get(3).map_err(query_err)?;
    let content: String = row.get(4).map_err(query_err)?;

    Ok(Event {
        id: parse_uuid(&id),
        kind: kind
            .parse()
            .map_err(|e: String| DatabaseError::Serialization(e))?,
        from: sender
            .parse()
            .unwrap_or(crate::applications::model::Party::Employer),
        timestamp: parse_datetime(&timestamp),
        content,
    })
}

/// Column order: 0:id, 1:question, 2:answer, 3:category, 4:job_id,
/// 5:created_at, 6:updated_at
fn row_to_saved_answer(row: &libsql::Row) -> Result<SavedAnswer, DatabaseError> {
    let id: String = row.get(0).map_err(query_err)?;
    let question: String = row.get(1).map_err(query_err)?;
    let answer: String = row.get(2).map_err(query_err)?;
    let category: String = row.get(3).map_err(query_err)?;
    let job_id = optional_text(row, 4);
    let created: String = row.get(5).map_err(query_err)?;
    let updated: String = row.get(6).map_err(query_err)?;

    Ok(SavedAnswer {
        id: parse_uuid(&id),
        question,
        answer,
        category: category.parse().unwrap_or_default(),
        job_id: job_id.map(|s| parse_uuid(&s)),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Column order: 0:job_id, 1:session_id, 2:prior_status, 3:resolved,
/// 4:questions, 5:suspended_at
fn row_to_suspended(row: &libsql::Row) -> Result<SuspendedAttempt, DatabaseError> {
    let job_id: String = row.get(0).map_err(query_err)?;
    let session_id: String = row.get(1).map_err(query_err)?;
    let prior_status: String = row.get(2).map_err(query_err)?;
    let resolved_json: String = row.get(3).map_err(query_err)?;
    let questions_json: String = row.get(4).map_err(query_err)?;
    let suspended_at: String = row.get(5).map_err(query_err)?;

    Ok(SuspendedAttempt {
        job_id: parse_uuid(&job_id),
        session_id,
        prior_status: prior_status
            .parse()
            .unwrap_or(crate::jobs::model::JobStatus::Applying),
        resolved: serde_json::from_str(&resolved_json)
            .map_err(|e| DatabaseError::Serialization(format!("resolved answers: {e}")))?,
        questions: serde_json::from_str(&questions_json)
            .map_err(|e| DatabaseError::Serialization(format!("open questions: {e}")))?,
        suspended_at: parse_datetime(&suspended_at),
    })
}

/// Column order: 0:id, 1:job_id, 2:application_id, 3:action, 4:detail,
/// 5:created_at
fn row_to_action(row: &libsql::Row) -> Result<ActionEntry, DatabaseError> {
    let id: String = row.get(0).map_err(query_err)?;
    let job_id = optional_text(row, 1);
    let application_id = optional_text(row, 2);
    let action: String = row.get(3).map_err(query_err)?;
    let detail = optional_text(row, 4);
    let created: String = row.get(5).map_err(query_err)?;

    Ok(ActionEntry {
        id: parse_uuid(&id),
        job_id: job_id.map(|s| parse_uuid(&s)),
        application_id: application_id.map(|s| parse_uuid(&s)),
        action,
        detail,
        created_at: parse_datetime(&created),
    })
}

const JOB_COLUMNS: &str = "id, url, title, company, description, compatibility_score, status, \
     needs_user_consent, user_confirmed_docs, documents, last_error, created_at, updated_at";

const APPLICATION_COLUMNS: &str =
    "id, job_id, company, position, status, needs_manual_confirmation, pending_status, \
     created_at, updated_at";

async fn upsert_job(conn: &Connection, job: &Job) -> Result<(), DatabaseError> {
    let documents = serde_json::to_string(&job.documents)
        .map_err(|e| DatabaseError::Serialization(format!("job documents: {e}")))?;

    conn.execute(
        "INSERT OR REPLACE INTO jobs (id, url, title, company, description, \
         compatibility_score, status, needs_user_consent, user_confirmed_docs, documents, \
         last_error, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            job.id.to_string(),
            job.url.clone(),
            job.title.clone(),
            job.company.clone(),
            job.description.clone(),
            job.compatibility_score as i64,
            job.status.to_string(),
            job.needs_user_consent as i64,
            job.user_confirmed_docs as i64,
            documents,
            job.last_error.clone(),
            job.created_at.to_rfc3339(),
            job.updated_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(query_err)?;
    Ok(())
}

async fn upsert_application(
    conn: &Connection,
    application: &Application,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO applications (id, job_id, company, position, status, \
         needs_manual_confirmation, pending_status, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            application.id.to_string(),
            application.job_id.to_string(),
            application.company.clone(),
            application.position.clone(),
            application.status.to_string(),
            application.needs_manual_confirmation as i64,
            application.pending_status.map(|s| s.to_string()),
            application.created_at.to_rfc3339(),
            application.updated_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(query_err)?;
    Ok(())
}

#[async_trait]
impl Store for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn save_job(&self, job: &Job) -> Result<(), DatabaseError> {
        upsert_job(self.conn(), job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY updated_at DESC"),
                (),
            )
            .await
            .map_err(query_err)?;

        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    // ── Applications ────────────────────────────────────────────────

    async fn mark_applied(
        &self,
        job: &Job,
        application: &Application,
    ) -> Result<(), DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to begin transaction: {e}")))?;

        upsert_job(&tx, job).await?;
        upsert_application(&tx, application).await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to commit submission: {e}")))?;
        Ok(())
    }

    async fn get_application(&self, id: Uuid) -> Result<Option<Application>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_application(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_application(&self, application: &Application) -> Result<(), DatabaseError> {
        upsert_application(self.conn(), application).await
    }

    async fn list_applications(&self) -> Result<Vec<Application>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {APPLICATION_COLUMNS} FROM applications ORDER BY updated_at DESC"),
                (),
            )
            .await
            .map_err(query_err)?;

        let mut applications = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            applications.push(row_to_application(&row)?);
        }
        Ok(applications)
    }

    async fn list_open_applications_matching(
        &self,
        company: &str,
        title: Option<&str>,
    ) -> Result<Vec<Application>, DatabaseError> {
        let mut rows = match title {
            Some(title) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {APPLICATION_COLUMNS} FROM applications \
                         WHERE LOWER(company) = LOWER(?1) AND LOWER(position) = LOWER(?2) \
                         AND status NOT IN ('rejected', 'accepted')"
                    ),
                    params![company, title],
                )
                .await
                .map_err(query_err)?,
            None => self
                .conn()
                .query(
                    &format!(
                        "SELECT {APPLICATION_COLUMNS} FROM applications \
                         WHERE LOWER(company) = LOWER(?1) \
                         AND status NOT IN ('rejected', 'accepted')"
                    ),
                    params![company],
                )
                .await
                .map_err(query_err)?,
        };

        let mut applications = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            applications.push(row_to_application(&row)?);
        }
        Ok(applications)
    }

    // ── Correspondence events ───────────────────────────────────────

    async fn append_event(
        &self,
        application_id: Uuid,
        event: &Event,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO events (id, application_id, kind, sender, timestamp, content) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.id.to_string(),
                    application_id.to_string(),
                    event.kind.to_string(),
                    event.from.to_string(),
                    event.timestamp.to_rfc3339(),
                    event.content.clone(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_events(&self, application_id: Uuid) -> Result<Vec<Event>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, kind, sender, timestamp, content FROM events \
                 WHERE application_id = ?1 ORDER BY timestamp ASC, rowid ASC",
                params![application_id.to_string()],
            )
            .await
            .map_err(query_err)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    // ── Q&A store ───────────────────────────────────────────────────

    async fn upsert_saved_answer(&self, answer: &SavedAnswer) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO saved_answers (id, question, answer, category, job_id, \
                 created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    answer.id.to_string(),
                    answer.question.clone(),
                    answer.answer.clone(),
                    answer.category.to_string(),
                    answer.job_id.map(|id| id.to_string()),
                    answer.created_at.to_rfc3339(),
                    answer.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_saved_answers(&self) -> Result<Vec<SavedAnswer>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, question, answer, category, job_id, created_at, updated_at \
                 FROM saved_answers ORDER BY updated_at DESC",
                (),
            )
            .await
            .map_err(query_err)?;

        let mut answers = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            answers.push(row_to_saved_answer(&row)?);
        }
        Ok(answers)
    }

    async fn update_saved_answer(&self, id: Uuid, answer: &str) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE saved_answers SET answer = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), answer, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_err)?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "saved_answer".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_saved_answer(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM saved_answers WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Suspended attempts ──────────────────────────────────────────

    async fn save_suspended_attempt(
        &self,
        attempt: &SuspendedAttempt,
    ) -> Result<(), DatabaseError> {
        let resolved = serde_json::to_string(&attempt.resolved)
            .map_err(|e| DatabaseError::Serialization(format!("resolved answers: {e}")))?;
        let questions = serde_json::to_string(&attempt.questions)
            .map_err(|e| DatabaseError::Serialization(format!("open questions: {e}")))?;

        self.conn()
            .execute(
                "INSERT OR REPLACE INTO suspended_attempts (job_id, session_id, prior_status, \
                 resolved, questions, suspended_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    attempt.job_id.to_string(),
                    attempt.session_id.clone(),
                    attempt.prior_status.to_string(),
                    resolved,
                    questions,
                    attempt.suspended_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_suspended_attempt(
        &self,
        job_id: Uuid,
    ) -> Result<Option<SuspendedAttempt>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT job_id, session_id, prior_status, resolved, questions, suspended_at \
                 FROM suspended_attempts WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_suspended(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_suspended_attempt(&self, job_id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM suspended_attempts WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_suspended_attempts(&self) -> Result<Vec<SuspendedAttempt>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT job_id, session_id, prior_status, resolved, questions, suspended_at \
                 FROM suspended_attempts ORDER BY suspended_at ASC",
                (),
            )
            .await
            .map_err(query_err)?;

        let mut attempts = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            attempts.push(row_to_suspended(&row)?);
        }
        Ok(attempts)
    }

    // ── Action log ──────────────────────────────────────────────────

    async fn log_action(&self, entry: &ActionEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO action_log (id, job_id, application_id, action, detail, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.id.to_string(),
                    entry.job_id.map(|id| id.to_string()),
                    entry.application_id.map(|id| id.to_string()),
                    entry.action.clone(),
                    entry.detail.clone(),
                    entry.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_actions(&self, limit: usize) -> Result<Vec<ActionEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, job_id, application_id, action, detail, created_at \
                 FROM action_log ORDER BY created_at DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut actions = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            actions.push(row_to_action(&row)?);
        }
        Ok(actions)
    }
}
