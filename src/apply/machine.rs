//! The smart-apply state machine.
//!
//! One attempt per job at a time. An attempt walks Screening → Submitting and
//! either finishes (Submitted, ReviewNeeded) or suspends on AwaitingAnswers
//! until the human answers. Suspended attempts are persisted so a restart
//! resumes them instead of losing the open agent session.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::applications::model::Application;
use crate::apply::agent::{AgentOutcome, AgentReply, FieldAnswer, FormAgent, PendingQuestion};
use crate::apply::knowledge::KnowledgeBase;
use crate::apply::profile::UserProfile;
use crate::config::OrchestratorConfig;
use crate::error::{ApplyError, Result};
use crate::jobs::model::{DocumentType, Job, JobStatus};
use crate::reputation::ReputationGate;
use crate::store::{ActionEntry, Store};

/// Phase of an in-flight attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    Screening,
    PreparingDocs,
    Submitting,
    AwaitingAnswers,
    Submitted,
    ReviewNeeded,
    Cancelled,
    Failed,
}

impl std::fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Screening => write!(f, "screening"),
            Self::PreparingDocs => write!(f, "preparing_docs"),
            Self::Submitting => write!(f, "submitting"),
            Self::AwaitingAnswers => write!(f, "awaiting_answers"),
            Self::Submitted => write!(f, "submitted"),
            Self::ReviewNeeded => write!(f, "review_needed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-attempt options supplied by the caller.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// The user explicitly consented to proceed despite a reputation flag.
    pub user_consent_given: bool,
    /// Document types this attempt submits with.
    pub doc_types: BTreeSet<DocumentType>,
    /// Require `user_confirmed_docs` on the job before submitting.
    pub manual_review: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            user_consent_given: false,
            doc_types: BTreeSet::from([DocumentType::Cv, DocumentType::CoverLetter]),
            manual_review: false,
        }
    }
}

/// How an attempt (or one resume round) came out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The form went through; the application now exists.
    Submitted { application_id: Uuid },
    /// Suspended — these questions need the human.
    QuestionsPending { questions: Vec<PendingQuestion> },
    /// The agent handed the session to the human browser.
    ReviewNeeded { reason: String },
    /// The reputation gate flagged the employer; consent required to proceed.
    ConsentRequired { reasons: Vec<String> },
    /// A cancel request landed mid-attempt; nothing was submitted.
    Cancelled,
}

/// A suspended attempt, durable across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendedAttempt {
    pub job_id: Uuid,
    pub session_id: String,
    /// Job status to restore on cancel.
    pub prior_status: JobStatus,
    /// Answers already auto-resolved, sent together with the human's.
    #[serde(default)]
    pub resolved: Vec<FieldAnswer>,
    /// The questions waiting on the human.
    pub questions: Vec<PendingQuestion>,
    pub suspended_at: DateTime<Utc>,
}

#[derive(Clone)]
struct ActiveAttempt {
    phase: ApplyPhase,
    session_id: Option<String>,
    prior_status: JobStatus,
    /// Set by `cancel`; the running attempt observes it at its next
    /// checkpoint (before persisting any agent reply) and discards progress.
    cancelled: Arc<AtomicBool>,
}

/// The state machine. Exclusivity is enforced through the in-memory attempt
/// map plus the persisted suspended-attempt table.
pub struct SmartApply {
    attempts: Mutex<HashMap<Uuid, ActiveAttempt>>,
    gate: Arc<ReputationGate>,
    agent: Arc<dyn FormAgent>,
    knowledge: Arc<KnowledgeBase>,
    store: Arc<dyn Store>,
    config: OrchestratorConfig,
}

impl SmartApply {
    pub fn new(
        gate: Arc<ReputationGate>,
        agent: Arc<dyn FormAgent>,
        knowledge: Arc<KnowledgeBase>,
        store: Arc<dyn Store>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            gate,
            agent,
            knowledge,
            store,
            config,
        }
    }

    /// Start an attempt for a job whose documents are ready.
    pub async fn start(
        &self,
        job_id: Uuid,
        profile: &UserProfile,
        options: &ApplyOptions,
    ) -> Result<ApplyOutcome> {
        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut attempts = self.attempts.lock().await;
            if let Some(active) = attempts.get(&job_id) {
                return Err(ApplyError::AttemptActive {
                    job_id,
                    phase: active.phase.to_string(),
                }
                .into());
            }
            if self.store.get_suspended_attempt(job_id).await?.is_some() {
                return Err(ApplyError::AttemptActive {
                    job_id,
                    phase: ApplyPhase::AwaitingAnswers.to_string(),
                }
                .into());
            }
            // Claim the slot before any slow work so concurrent starts lose.
            attempts.insert(
                job_id,
                ActiveAttempt {
                    phase: ApplyPhase::Screening,
                    session_id: None,
                    prior_status: JobStatus::New,
                    cancelled: cancelled.clone(),
                },
            );
        }

        let result = self.run_start(job_id, profile, options, &cancelled).await;
        match &result {
            Ok(ApplyOutcome::QuestionsPending { .. }) => {}
            _ => self.release(job_id).await,
        }
        result
    }

    async fn run_start(
        &self,
        job_id: Uuid,
        profile: &UserProfile,
        options: &ApplyOptions,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<ApplyOutcome> {
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(ApplyError::JobNotFound { id: job_id })?;
        let prior_status = job.status;

        // Screening. Consent from the user bypasses the gate for this job.
        if options.user_consent_given {
            if job.needs_user_consent {
                job.needs_user_consent = false;
            }
        } else {
            let verdict = self.gate.check(&job.company, &job.title).await;
            if verdict.is_flagged {
                warn!(job_id = %job.id, company = %job.company, "Reputation gate flagged employer");
                job.status = JobStatus::GhostFlagged;
                job.needs_user_consent = true;
                job.updated_at = Utc::now();
                self.store.save_job(&job).await?;
                self.store
                    .log_action(
                        &ActionEntry::job("reputation_flagged", job.id)
                            .with_detail(verdict.reasons.join("; ")),
                    )
                    .await?;
                return Ok(ApplyOutcome::ConsentRequired {
                    reasons: verdict.reasons,
                });
            }
        }

        // Document readiness is a hard precondition.
        self.set_phase(job_id, ApplyPhase::PreparingDocs, prior_status)
            .await;
        let mut contents = BTreeMap::new();
        let mut missing = Vec::new();
        for &doc_type in &options.doc_types {
            let state = job.document_state(doc_type);
            match (&state.path, state.is_ready()) {
                (Some(path), true) => match tokio::fs::read_to_string(path).await {
                    Ok(text) => {
                        contents.insert(doc_type, text);
                    }
                    Err(_) => missing.push(doc_type.to_string()),
                },
                _ => missing.push(doc_type.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(ApplyError::DocumentsNotReady { job_id, missing }.into());
        }

        if (options.manual_review || self.config.manual_review) && !job.user_confirmed_docs {
            return Ok(ApplyOutcome::ReviewNeeded {
                reason: "generated documents await user confirmation".to_string(),
            });
        }

        // Checkpoint before the agent call: a cancel that landed during
        // screening or doc checks stops the attempt here.
        if cancelled.load(Ordering::SeqCst) {
            return Ok(ApplyOutcome::Cancelled);
        }

        self.set_phase(job_id, ApplyPhase::Submitting, prior_status)
            .await;
        job.status = JobStatus::Applying;
        job.updated_at = Utc::now();
        self.store.save_job(&job).await?;

        let reply = match self.agent.submit(&job, &contents, profile).await {
            Ok(reply) => reply,
            Err(e) => {
                job.status = prior_status;
                job.last_error = Some(e.to_string());
                job.updated_at = Utc::now();
                self.store.save_job(&job).await?;
                return Err(e.into());
            }
        };

        self.drive(&mut job, reply, profile, prior_status, 0, cancelled)
            .await
    }

    /// Feed the human's answers into a suspended attempt.
    pub async fn resume(
        &self,
        job_id: Uuid,
        profile: &UserProfile,
        answers: Vec<FieldAnswer>,
    ) -> Result<ApplyOutcome> {
        let suspended = self
            .store
            .get_suspended_attempt(job_id)
            .await?
            .ok_or(ApplyError::NoActiveAttempt { job_id })?;
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(ApplyError::JobNotFound { id: job_id })?;

        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut attempts = self.attempts.lock().await;
            if let Some(active) = attempts.get(&job_id)
                && active.phase != ApplyPhase::AwaitingAnswers
            {
                return Err(ApplyError::AttemptActive {
                    job_id,
                    phase: active.phase.to_string(),
                }
                .into());
            }
            attempts.insert(
                job_id,
                ActiveAttempt {
                    phase: ApplyPhase::Submitting,
                    session_id: Some(suspended.session_id.clone()),
                    prior_status: suspended.prior_status,
                    cancelled: cancelled.clone(),
                },
            );
        }

        // Answers flagged save-for-later go to the knowledge base first, so
        // they survive even if the agent errors below.
        for answer in answers.iter().filter(|a| a.save_for_later) {
            if let Some(q) = suspended.questions.iter().find(|q| q.field == answer.field) {
                let text = if q.question.is_empty() { &q.label } else { &q.question };
                self.knowledge
                    .save(text, &answer.answer, q.category, Some(job_id))
                    .await?;
            }
        }

        let mut merged = suspended.resolved.clone();
        merged.extend(answers);

        let reply = match self.agent.resume(&suspended.session_id, &merged).await {
            Ok(reply) => reply,
            Err(e) => {
                if matches!(e, ApplyError::SessionExpired { .. }) {
                    // The agent dropped the session; the attempt is dead.
                    self.store.delete_suspended_attempt(job_id).await?;
                    self.release(job_id).await;
                    job.status = suspended.prior_status;
                    job.last_error = Some(e.to_string());
                    job.updated_at = Utc::now();
                    self.store.save_job(&job).await?;
                } else {
                    self.set_phase(job_id, ApplyPhase::AwaitingAnswers, suspended.prior_status)
                        .await;
                }
                return Err(e.into());
            }
        };

        self.store.delete_suspended_attempt(job_id).await?;
        let result = self
            .drive(&mut job, reply, profile, suspended.prior_status, 0, &cancelled)
            .await;
        match &result {
            Ok(ApplyOutcome::QuestionsPending { .. }) => {}
            _ => self.release(job_id).await,
        }
        result
    }

    /// Abort an attempt, tear down the agent session, and restore the job.
    ///
    /// Cancellation is cooperative: an in-flight attempt keeps its slot and
    /// observes the flag at its next checkpoint, discarding any agent reply
    /// instead of persisting it. A suspended attempt is torn down here.
    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        let suspended = self.store.get_suspended_attempt(job_id).await?;
        let in_memory = { self.attempts.lock().await.get(&job_id).cloned() };

        let (session_id, prior_status, in_flight) = match (in_memory, suspended) {
            (Some(active), _) => {
                active.cancelled.store(true, Ordering::SeqCst);
                let in_flight = active.phase != ApplyPhase::AwaitingAnswers;
                (active.session_id, active.prior_status, in_flight)
            }
            (None, Some(s)) => (Some(s.session_id), s.prior_status, false),
            (None, None) => {
                return Err(ApplyError::NotCancellable {
                    job_id,
                    phase: "none".to_string(),
                }
                .into());
            }
        };

        if let Some(session_id) = &session_id {
            self.agent.cancel(session_id).await?;
        }
        self.store.delete_suspended_attempt(job_id).await?;
        // An in-flight attempt keeps its slot and restores the job itself at
        // the checkpoint; it knows the accurate prior status.
        if !in_flight {
            self.release(job_id).await;
            if let Some(mut job) = self.store.get_job(job_id).await? {
                job.status = prior_status;
                job.needs_user_consent = false;
                job.updated_at = Utc::now();
                self.store.save_job(&job).await?;
            }
        }
        self.store
            .log_action(&ActionEntry::job("attempt_cancelled", job_id))
            .await?;
        info!(job_id = %job_id, "Application attempt cancelled");
        Ok(())
    }

    /// Rehydrate suspended attempts after a restart. Returns how many.
    pub async fn recover(&self) -> Result<usize> {
        let suspended = self.store.list_suspended_attempts().await?;
        let count = suspended.len();
        let mut attempts = self.attempts.lock().await;
        for s in suspended {
            info!(job_id = %s.job_id, open_questions = s.questions.len(), "Restored suspended attempt");
            attempts.insert(
                s.job_id,
                ActiveAttempt {
                    phase: ApplyPhase::AwaitingAnswers,
                    session_id: Some(s.session_id),
                    prior_status: s.prior_status,
                    cancelled: Arc::new(AtomicBool::new(false)),
                },
            );
        }
        Ok(count)
    }

    /// Questions currently waiting on the human for a job, if any.
    pub async fn pending_questions(&self, job_id: Uuid) -> Result<Option<Vec<PendingQuestion>>> {
        Ok(self
            .store
            .get_suspended_attempt(job_id)
            .await?
            .map(|s| s.questions))
    }

    /// Phase of the attempt for a job, if one is active.
    pub async fn phase(&self, job_id: Uuid) -> Option<ApplyPhase> {
        self.attempts.lock().await.get(&job_id).map(|a| a.phase)
    }

    /// React to an agent reply, auto-resolving question rounds from the
    /// profile and the knowledge base until the attempt settles or suspends.
    async fn drive(
        &self,
        job: &mut Job,
        reply: AgentReply,
        profile: &UserProfile,
        prior_status: JobStatus,
        start_round: u32,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<ApplyOutcome> {
        let mut reply = reply;
        let mut round = start_round;

        loop {
            let AgentReply { session_id, outcome } = reply;
            self.set_session(job.id, &session_id).await;

            // Checkpoint: a cancel that landed while the agent was working
            // discards this reply instead of persisting it.
            if cancelled.load(Ordering::SeqCst) {
                if let Err(e) = self.agent.cancel(&session_id).await {
                    warn!(job_id = %job.id, error = %e, "Agent session teardown failed on cancel");
                }
                job.status = prior_status;
                job.updated_at = Utc::now();
                self.store.save_job(job).await?;
                self.release(job.id).await;
                info!(job_id = %job.id, "Attempt cancelled before persisting agent reply");
                return Ok(ApplyOutcome::Cancelled);
            }

            match outcome {
                AgentOutcome::Submitted => {
                    let application = Application::for_job(job.id, &job.company, &job.title);
                    job.status = JobStatus::Applied;
                    job.last_error = None;
                    job.updated_at = Utc::now();
                    self.store.mark_applied(job, &application).await?;
                    self.store
                        .log_action(&ActionEntry::job("application_submitted", job.id))
                        .await?;
                    info!(
                        job_id = %job.id,
                        application_id = %application.id,
                        company = %job.company,
                        "Application submitted"
                    );
                    return Ok(ApplyOutcome::Submitted {
                        application_id: application.id,
                    });
                }

                AgentOutcome::ReviewNeeded { reason } => {
                    warn!(job_id = %job.id, reason = %reason, "Agent handed the form to the human");
                    job.status = prior_status;
                    job.last_error = Some(reason.clone());
                    job.updated_at = Utc::now();
                    self.store.save_job(job).await?;
                    self.store
                        .log_action(
                            &ActionEntry::job("review_needed", job.id).with_detail(&reason),
                        )
                        .await?;
                    return Ok(ApplyOutcome::ReviewNeeded { reason });
                }

                AgentOutcome::QuestionsPending { questions } => {
                    let mut resolved = Vec::new();
                    let mut unresolved = Vec::new();
                    for q in questions {
                        if let Some(value) = profile
                            .map_field(&q.label)
                            .or_else(|| profile.map_field(&q.question))
                        {
                            resolved.push(FieldAnswer {
                                field: q.field,
                                answer: value,
                                save_for_later: false,
                            });
                        } else if let Some(saved) = self.knowledge.resolve(&q).await? {
                            resolved.push(FieldAnswer {
                                field: q.field,
                                answer: saved.answer,
                                save_for_later: false,
                            });
                        } else {
                            unresolved.push(q);
                        }
                    }

                    if unresolved.is_empty() {
                        if round >= self.config.max_answer_rounds {
                            let reason = format!(
                                "question round limit ({}) reached",
                                self.config.max_answer_rounds
                            );
                            warn!(job_id = %job.id, "{}", reason);
                            job.status = prior_status;
                            job.last_error = Some(reason.clone());
                            job.updated_at = Utc::now();
                            self.store.save_job(job).await?;
                            return Ok(ApplyOutcome::ReviewNeeded { reason });
                        }
                        round += 1;
                        reply = self.agent.resume(&session_id, &resolved).await?;
                        continue;
                    }

                    // Suspend. The resolved answers ride along so the next
                    // resume sends everything at once.
                    let attempt = SuspendedAttempt {
                        job_id: job.id,
                        session_id: session_id.clone(),
                        prior_status,
                        resolved,
                        questions: unresolved.clone(),
                        suspended_at: Utc::now(),
                    };
                    self.store.save_suspended_attempt(&attempt).await?;
                    {
                        let mut attempts = self.attempts.lock().await;
                        attempts.insert(
                            job.id,
                            ActiveAttempt {
                                phase: ApplyPhase::AwaitingAnswers,
                                session_id: Some(session_id),
                                prior_status,
                                cancelled: cancelled.clone(),
                            },
                        );
                    }
                    self.store
                        .log_action(
                            &ActionEntry::job("questions_pending", job.id)
                                .with_detail(format!("{} open questions", unresolved.len())),
                        )
                        .await?;
                    info!(job_id = %job.id, count = unresolved.len(), "Attempt suspended on open questions");
                    return Ok(ApplyOutcome::QuestionsPending {
                        questions: unresolved,
                    });
                }
            }
        }
    }

    /// Record the agent session id as soon as a reply carries one, so a
    /// concurrent cancel can tear the session down.
    async fn set_session(&self, job_id: Uuid, session_id: &str) {
        let mut attempts = self.attempts.lock().await;
        if let Some(active) = attempts.get_mut(&job_id) {
            active.session_id = Some(session_id.to_string());
        }
    }

    async fn set_phase(&self, job_id: Uuid, phase: ApplyPhase, prior_status: JobStatus) {
        let mut attempts = self.attempts.lock().await;
        if let Some(active) = attempts.get_mut(&job_id) {
            active.phase = phase;
            active.prior_status = prior_status;
        }
    }

    async fn release(&self, job_id: Uuid) {
        self.attempts.lock().await.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::error::Error;
    use crate::jobs::model::{DocumentState, DocumentStatus};
    use crate::reputation::{ReputationLookup, ReputationVerdict};
    use crate::store::LibSqlBackend;

    struct FixedLookup {
        flagged: bool,
    }

    #[async_trait]
    impl ReputationLookup for FixedLookup {
        async fn lookup(
            &self,
            _company: &str,
            _title: &str,
        ) -> std::result::Result<ReputationVerdict, anyhow::Error> {
            if self.flagged {
                Ok(ReputationVerdict::flagged(vec!["reported ghost job".into()]))
            } else {
                Ok(ReputationVerdict::clean())
            }
        }
    }

    /// Agent that replays a scripted sequence of outcomes.
    struct ScriptedAgent {
        script: Vec<AgentOutcome>,
        step: AtomicU32,
        cancels: AtomicU32,
    }

    impl ScriptedAgent {
        fn new(script: Vec<AgentOutcome>) -> Self {
            Self {
                script,
                step: AtomicU32::new(0),
                cancels: AtomicU32::new(0),
            }
        }

        fn next_reply(&self) -> AgentReply {
            let n = self.step.fetch_add(1, Ordering::SeqCst) as usize;
            let outcome = self
                .script
                .get(n)
                .cloned()
                .unwrap_or(AgentOutcome::Submitted);
            AgentReply {
                session_id: "session-1".into(),
                outcome,
            }
        }
    }

    #[async_trait]
    impl FormAgent for ScriptedAgent {
        async fn submit(
            &self,
            _job: &Job,
            _documents: &BTreeMap<DocumentType, String>,
            _profile: &UserProfile,
        ) -> std::result::Result<AgentReply, ApplyError> {
            Ok(self.next_reply())
        }

        async fn resume(
            &self,
            _session_id: &str,
            _answers: &[FieldAnswer],
        ) -> std::result::Result<AgentReply, ApplyError> {
            Ok(self.next_reply())
        }

        async fn cancel(&self, _session_id: &str) -> std::result::Result<(), ApplyError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Agent whose submit blocks until the test releases it, so a cancel can
    /// land while the submission is in flight.
    struct GatedAgent {
        entered: tokio::sync::Semaphore,
        gate: tokio::sync::Semaphore,
        cancels: AtomicU32,
    }

    impl GatedAgent {
        fn new() -> Self {
            Self {
                entered: tokio::sync::Semaphore::new(0),
                gate: tokio::sync::Semaphore::new(0),
                cancels: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FormAgent for GatedAgent {
        async fn submit(
            &self,
            _job: &Job,
            _documents: &BTreeMap<DocumentType, String>,
            _profile: &UserProfile,
        ) -> std::result::Result<AgentReply, ApplyError> {
            self.entered.add_permits(1);
            self.gate.acquire().await.unwrap().forget();
            Ok(AgentReply {
                session_id: "session-1".into(),
                outcome: AgentOutcome::Submitted,
            })
        }

        async fn resume(
            &self,
            _session_id: &str,
            _answers: &[FieldAnswer],
        ) -> std::result::Result<AgentReply, ApplyError> {
            Ok(AgentReply {
                session_id: "session-1".into(),
                outcome: AgentOutcome::Submitted,
            })
        }

        async fn cancel(&self, _session_id: &str) -> std::result::Result<(), ApplyError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn question(field: &str, label: &str, question_text: &str) -> PendingQuestion {
        PendingQuestion {
            field: field.into(),
            label: label.into(),
            question: question_text.into(),
            field_type: "text".into(),
            category: crate::apply::profile::categorize_field(label),
            options: vec![],
        }
    }

    struct Fixture {
        machine: SmartApply,
        store: Arc<dyn Store>,
        agent: Arc<ScriptedAgent>,
        _docs: tempfile::TempDir,
    }

    async fn seed_ready_job(store: &Arc<dyn Store>) -> (Uuid, tempfile::TempDir) {
        let docs = tempfile::tempdir().unwrap();
        let mut job = Job::new("https://example.com/j/1", "Engineer", "Acme", 80);
        job.status = JobStatus::DocumentsReady;
        for doc_type in [DocumentType::Cv, DocumentType::CoverLetter] {
            let path = docs.path().join(format!("{}.md", doc_type));
            std::fs::write(&path, "content").unwrap();
            job.documents.insert(
                doc_type,
                DocumentState {
                    status: DocumentStatus::AuditorDone,
                    path: Some(path.to_string_lossy().into_owned()),
                    error: None,
                },
            );
        }
        store.save_job(&job).await.unwrap();
        (job.id, docs)
    }

    async fn fixture(flagged: bool, script: Vec<AgentOutcome>) -> (Fixture, Uuid) {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gate = Arc::new(ReputationGate::new(
            Arc::new(FixedLookup { flagged }),
            std::time::Duration::from_secs(60),
        ));
        let agent = Arc::new(ScriptedAgent::new(script));
        let knowledge = Arc::new(KnowledgeBase::new(store.clone()));

        let (job_id, docs) = seed_ready_job(&store).await;

        let machine = SmartApply::new(
            gate,
            agent.clone(),
            knowledge,
            store.clone(),
            OrchestratorConfig::default(),
        );
        (
            Fixture {
                machine,
                store,
                agent,
                _docs: docs,
            },
            job_id,
        )
    }

    fn profile() -> UserProfile {
        UserProfile {
            name: "Jo Doe".into(),
            email: "jo@example.com".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn clean_job_submits_and_creates_the_application() {
        let (f, job_id) = fixture(false, vec![AgentOutcome::Submitted]).await;

        let outcome = f
            .machine
            .start(job_id, &profile(), &ApplyOptions::default())
            .await
            .unwrap();

        let application_id = match outcome {
            ApplyOutcome::Submitted { application_id } => application_id,
            other => panic!("Expected Submitted, got {:?}", other),
        };

        let job = f.store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Applied);

        let app = f.store.get_application(application_id).await.unwrap().unwrap();
        assert_eq!(app.job_id, job_id);
        assert_eq!(app.status, crate::applications::model::ApplicationStatus::Pending);
        // Fresh application, no correspondence yet.
        assert!(f.store.list_events(application_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn flagged_employer_pauses_for_consent() {
        let (f, job_id) = fixture(true, vec![AgentOutcome::Submitted]).await;

        let outcome = f
            .machine
            .start(job_id, &profile(), &ApplyOptions::default())
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::ConsentRequired { ref reasons } if !reasons.is_empty()));

        let job = f.store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::GhostFlagged);
        assert!(job.needs_user_consent);

        // With consent the same job goes through.
        let outcome = f
            .machine
            .start(
                job_id,
                &profile(),
                &ApplyOptions {
                    user_consent_given: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Submitted { .. }));
        let job = f.store.get_job(job_id).await.unwrap().unwrap();
        assert!(!job.needs_user_consent);
    }

    #[tokio::test]
    async fn unanswerable_questions_suspend_the_attempt() {
        let (f, job_id) = fixture(
            false,
            vec![AgentOutcome::QuestionsPending {
                questions: vec![
                    question("email", "Email", "What is your email?"),
                    question("notice", "Notice period", "What is your notice period?"),
                ],
            }],
        )
        .await;

        let outcome = f
            .machine
            .start(job_id, &profile(), &ApplyOptions::default())
            .await
            .unwrap();

        // Email resolves from the profile; only the notice question surfaces.
        match outcome {
            ApplyOutcome::QuestionsPending { questions } => {
                assert_eq!(questions.len(), 1);
                assert_eq!(questions[0].field, "notice");
            }
            other => panic!("Expected QuestionsPending, got {:?}", other),
        }

        let suspended = f.store.get_suspended_attempt(job_id).await.unwrap().unwrap();
        assert_eq!(suspended.resolved.len(), 1);
        assert_eq!(suspended.resolved[0].field, "email");

        // A second start while suspended is rejected without side effects.
        let err = f
            .machine
            .start(job_id, &profile(), &ApplyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Apply(ApplyError::AttemptActive { .. })));
        let after = f.store.get_suspended_attempt(job_id).await.unwrap().unwrap();
        assert_eq!(after.questions.len(), 1);
    }

    #[tokio::test]
    async fn resume_sends_answers_and_persists_save_for_later() {
        let (f, job_id) = fixture(
            false,
            vec![
                AgentOutcome::QuestionsPending {
                    questions: vec![question(
                        "notice",
                        "Notice period",
                        "What is your notice period?",
                    )],
                },
                AgentOutcome::Submitted,
            ],
        )
        .await;

        f.machine
            .start(job_id, &profile(), &ApplyOptions::default())
            .await
            .unwrap();

        let outcome = f
            .machine
            .resume(
                job_id,
                &profile(),
                vec![FieldAnswer {
                    field: "notice".into(),
                    answer: "Three months".into(),
                    save_for_later: true,
                }],
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Submitted { .. }));

        // Suspension record gone, knowledge base remembers the answer.
        assert!(f.store.get_suspended_attempt(job_id).await.unwrap().is_none());
        let saved = f.store.list_saved_answers().await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].question, "What is your notice period?");
        assert_eq!(saved[0].answer, "Three months");
    }

    #[tokio::test]
    async fn cancel_restores_the_job_and_tears_down_the_session() {
        let (f, job_id) = fixture(
            false,
            vec![AgentOutcome::QuestionsPending {
                questions: vec![question("notice", "Notice period", "")],
            }],
        )
        .await;

        f.machine
            .start(job_id, &profile(), &ApplyOptions::default())
            .await
            .unwrap();
        f.machine.cancel(job_id).await.unwrap();

        assert_eq!(f.agent.cancels.load(Ordering::SeqCst), 1);
        assert!(f.store.get_suspended_attempt(job_id).await.unwrap().is_none());
        let job = f.store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::DocumentsReady);

        // Nothing left to cancel.
        let err = f.machine.cancel(job_id).await.unwrap_err();
        assert!(matches!(err, Error::Apply(ApplyError::NotCancellable { .. })));
    }

    #[tokio::test]
    async fn cancel_during_submission_discards_the_in_flight_reply() {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let (job_id, _docs) = seed_ready_job(&store).await;
        let agent = Arc::new(GatedAgent::new());
        let machine = SmartApply::new(
            Arc::new(ReputationGate::new(
                Arc::new(FixedLookup { flagged: false }),
                std::time::Duration::from_secs(60),
            )),
            agent.clone(),
            Arc::new(KnowledgeBase::new(store.clone())),
            store.clone(),
            OrchestratorConfig::default(),
        );

        // Cancel lands while the agent is mid-submission, then the agent is
        // released and replies Submitted.
        let profile = profile();
        let options = ApplyOptions::default();
        let (outcome, _) = tokio::join!(
            machine.start(job_id, &profile, &options),
            async {
                agent.entered.acquire().await.unwrap().forget();
                machine.cancel(job_id).await.unwrap();
                agent.gate.add_permits(1);
            }
        );

        assert!(matches!(outcome.unwrap(), ApplyOutcome::Cancelled));

        // The late reply was discarded: no application exists and the job is
        // back where it started.
        assert!(store.list_applications().await.unwrap().is_empty());
        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::DocumentsReady);
        assert_eq!(agent.cancels.load(Ordering::SeqCst), 1);
        assert!(machine.phase(job_id).await.is_none());
    }

    #[tokio::test]
    async fn missing_documents_are_a_hard_precondition() {
        let (f, job_id) = fixture(false, vec![AgentOutcome::Submitted]).await;

        let options = ApplyOptions {
            doc_types: BTreeSet::from([DocumentType::Cv, DocumentType::Portfolio]),
            ..Default::default()
        };
        let err = f
            .machine
            .start(job_id, &profile(), &options)
            .await
            .unwrap_err();
        match err {
            Error::Apply(ApplyError::DocumentsNotReady { missing, .. }) => {
                assert_eq!(missing, vec!["portfolio".to_string()]);
            }
            other => panic!("Expected DocumentsNotReady, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn recover_restores_suspended_attempts_after_restart() {
        let (f, job_id) = fixture(
            false,
            vec![
                AgentOutcome::QuestionsPending {
                    questions: vec![question("notice", "Notice period", "")],
                },
                AgentOutcome::Submitted,
            ],
        )
        .await;

        f.machine
            .start(job_id, &profile(), &ApplyOptions::default())
            .await
            .unwrap();

        // A fresh machine over the same store stands in for the restart.
        let machine = SmartApply::new(
            Arc::new(ReputationGate::new(
                Arc::new(FixedLookup { flagged: false }),
                std::time::Duration::from_secs(60),
            )),
            f.agent.clone(),
            Arc::new(KnowledgeBase::new(f.store.clone())),
            f.store.clone(),
            OrchestratorConfig::default(),
        );
        assert_eq!(machine.recover().await.unwrap(), 1);
        assert_eq!(machine.phase(job_id).await, Some(ApplyPhase::AwaitingAnswers));

        let outcome = machine
            .resume(
                job_id,
                &profile(),
                vec![FieldAnswer {
                    field: "notice".into(),
                    answer: "One month".into(),
                    save_for_later: false,
                }],
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Submitted { .. }));
    }

    #[tokio::test]
    async fn repeated_auto_rounds_hit_the_limit_and_need_review() {
        // Every round asks an auto-answerable question, forever.
        let loop_question = || AgentOutcome::QuestionsPending {
            questions: vec![question("email", "Email", "What is your email?")],
        };
        let script: Vec<AgentOutcome> = (0..20).map(|_| loop_question()).collect();
        let (f, job_id) = fixture(false, script).await;

        let outcome = f
            .machine
            .start(job_id, &profile(), &ApplyOptions::default())
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::ReviewNeeded { ref reason } if reason.contains("round limit")));

        let job = f.store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::DocumentsReady);
    }
}
