//! The orchestrator — the one place that wires discovery, document
//! generation, smart-apply, and the Secretary together.
//!
//! Everything the HTTP surface exposes goes through here, so the invariants
//! (one attempt per job, documents before submission, consent before flagged
//! employers) live in one layer instead of being re-checked per route.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::applications::model::{Application, ApplicationStatus, Event, derive_stage};
use crate::apply::agent::{FieldAnswer, FormAgent, PendingQuestion};
use crate::apply::knowledge::{KnowledgeBase, SavedAnswer};
use crate::apply::machine::{ApplyOptions, ApplyOutcome, ApplyPhase, SmartApply};
use crate::apply::profile::UserProfile;
use crate::config::OrchestratorConfig;
use crate::docs::pipeline::{DocumentPipeline, DocumentProgress};
use crate::error::{DocumentError, Result};
use crate::gateway::{AiGateway, CallOptions, RoleConfig, call_bounded};
use crate::jobs::model::{DocumentStatus, DocumentType, Job, JobStatus};
use crate::reputation::ReputationGate;
use crate::secretary::classifier::{Secretary, SecretaryOutcome};
use crate::secretary::feed::InboundEmail;
use crate::secretary::rules::SecretaryRules;
use crate::store::{ActionEntry, Store};

/// An application plus its derived lifecycle stage, for the inbox view.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApplicationView {
    #[serde(flatten)]
    pub application: Application,
    pub stage: Option<String>,
    pub events: Vec<Event>,
}

/// Persists intermediate per-document statuses the pipeline reports, so a
/// watcher can see a drafted document before its audit finishes.
struct DocumentStatusRecorder {
    store: Arc<dyn Store>,
}

#[async_trait]
impl DocumentProgress for DocumentStatusRecorder {
    async fn on_status(&self, job_id: Uuid, doc_type: DocumentType, status: DocumentStatus) {
        let mut job = match self.store.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Could not load job for document status");
                return;
            }
        };
        job.documents.entry(doc_type).or_default().status = status;
        job.updated_at = chrono::Utc::now();
        if let Err(e) = self.store.save_job(&job).await {
            warn!(job_id = %job_id, error = %e, "Could not persist document status");
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    pipeline: std::result::Result<Arc<DocumentPipeline>, DocumentError>,
    observer: Option<Arc<dyn AiGateway>>,
    smart_apply: SmartApply,
    secretary: Arc<Secretary>,
    knowledge: Arc<KnowledgeBase>,
    profile: RwLock<UserProfile>,
    call_options: CallOptions,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        roles: RoleConfig,
        gate: Arc<ReputationGate>,
        agent: Arc<dyn FormAgent>,
        profile: UserProfile,
        config: OrchestratorConfig,
    ) -> Self {
        let call_options = CallOptions::new(config.ai_timeout, config.ai_retries);
        let knowledge = Arc::new(KnowledgeBase::new(store.clone()));

        // The pipeline needs both generation roles. Without them the rest of
        // the orchestrator still runs; document generation refuses and names
        // the missing role.
        let pipeline = DocumentPipeline::new(
            roles.thinker.clone(),
            roles.auditor.clone(),
            call_options.clone(),
            config.max_revisions,
            config.docs_dir.clone(),
        )
        .map(|p| {
            Arc::new(p.with_progress(Arc::new(DocumentStatusRecorder {
                store: store.clone(),
            })))
        });

        let secretary = Arc::new(Secretary::new(
            roles.secretary.clone(),
            call_options.clone(),
            SecretaryRules::default(),
            store.clone(),
            config.min_classification_confidence,
            config.ambiguity_rule,
        ));

        let smart_apply = SmartApply::new(
            gate,
            agent,
            knowledge.clone(),
            store.clone(),
            config.clone(),
        );

        Self {
            store,
            pipeline,
            observer: roles.observer,
            smart_apply,
            secretary,
            knowledge,
            profile: RwLock::new(profile),
            call_options,
            config,
        }
    }

    /// The Secretary, shared with the correspondence feed consumer.
    pub fn secretary(&self) -> Arc<Secretary> {
        self.secretary.clone()
    }

    /// Restore suspended application attempts after a restart.
    pub async fn recover(&self) -> Result<usize> {
        self.smart_apply.recover().await
    }

    // ── Jobs ────────────────────────────────────────────────────────

    /// Register a discovered listing. When auto-apply is enabled and the
    /// compatibility level clears the policy floor, the full pipeline runs
    /// immediately; failures are logged, never bubbled to discovery.
    pub async fn add_job(
        &self,
        url: &str,
        title: &str,
        company: &str,
        description: &str,
        compatibility_score: u8,
    ) -> Result<Job> {
        let mut job = Job::new(url, title, company, compatibility_score);
        job.description = description.to_string();
        self.store.save_job(&job).await?;
        self.store
            .log_action(
                &ActionEntry::job("job_discovered", job.id)
                    .with_detail(format!("{title} at {company}")),
            )
            .await?;
        info!(job_id = %job.id, company, score = compatibility_score, "Job registered");

        if self.config.auto_apply.enabled
            && job.compatibility_level() >= self.config.auto_apply.min_level
        {
            info!(job_id = %job.id, level = ?job.compatibility_level(), "Auto-apply triggered");
            match self.process_application(job.id, &ApplyOptions::default()).await {
                Ok(outcome) => debug!(job_id = %job.id, ?outcome, "Auto-apply finished"),
                Err(e) => warn!(job_id = %job.id, error = %e, "Auto-apply failed"),
            }
            if let Some(updated) = self.store.get_job(job.id).await? {
                job = updated;
            }
        }

        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.store.get_job(id).await?)
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.store.list_jobs().await?)
    }

    /// The human reviewed the generated documents and approved them.
    pub async fn confirm_documents(&self, job_id: Uuid) -> Result<Job> {
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(crate::error::ApplyError::JobNotFound { id: job_id })?;
        job.user_confirmed_docs = true;
        job.updated_at = chrono::Utc::now();
        self.store.save_job(&job).await?;
        Ok(job)
    }

    // ── Documents ───────────────────────────────────────────────────

    /// Generate the requested document types and merge the results into the
    /// job. Types not requested keep their previous state.
    pub async fn generate_documents(
        &self,
        job_id: Uuid,
        types: &BTreeSet<DocumentType>,
    ) -> Result<Job> {
        let pipeline = self.pipeline.as_ref().map_err(|e| e.clone())?;
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(crate::error::ApplyError::JobNotFound { id: job_id })?;

        for &doc_type in types {
            let state = job.documents.entry(doc_type).or_default();
            state.status = DocumentStatus::Pending;
            state.error = None;
        }
        job.updated_at = chrono::Utc::now();
        self.store.save_job(&job).await?;

        let research = self.research(&job).await;
        let profile = self.profile.read().await.clone();
        let results = pipeline
            .generate(&job, types, &profile, research.as_deref())
            .await;

        let mut failures = Vec::new();
        for (doc_type, state) in results {
            if state.status == DocumentStatus::Failed {
                failures.push(format!(
                    "{doc_type}: {}",
                    state.error.as_deref().unwrap_or("failed")
                ));
            }
            job.documents.insert(doc_type, state);
        }

        let all_ready = types.iter().all(|t| job.document_state(*t).is_ready());
        if all_ready && matches!(job.status, JobStatus::New | JobStatus::DocumentsReady) {
            job.status = JobStatus::DocumentsReady;
        }
        job.last_error = if failures.is_empty() {
            None
        } else {
            Some(failures.join("; "))
        };
        job.updated_at = chrono::Utc::now();
        self.store.save_job(&job).await?;

        self.store
            .log_action(&ActionEntry::job("documents_generated", job.id).with_detail(format!(
                "{} requested, {} failed",
                types.len(),
                failures.len()
            )))
            .await?;

        Ok(job)
    }

    /// Observer research brief for the draft prompts. Best effort — a
    /// missing role or a failed call degrades to no research.
    async fn research(&self, job: &Job) -> Option<String> {
        let observer = self.observer.as_ref()?;
        let description: String = job.description.chars().take(4000).collect();
        let prompt = format!(
            "Write a short research brief (at most 300 words) for a job application.\n\
             Company: {}\nPosition: {}\nListing:\n{}\n\n\
             Cover what the company does, what they seem to value in this role, \
             and anything worth echoing in a tailored application.",
            job.company, job.title, description
        );
        match call_bounded(observer.as_ref(), &prompt, &self.call_options).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Observer research failed; drafting without it");
                None
            }
        }
    }

    // ── Smart-apply ─────────────────────────────────────────────────

    /// Run the full attempt for a job: generate whatever requested documents
    /// are not ready yet, then hand over to the state machine.
    pub async fn process_application(
        &self,
        job_id: Uuid,
        options: &ApplyOptions,
    ) -> Result<ApplyOutcome> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(crate::error::ApplyError::JobNotFound { id: job_id })?;

        let missing: BTreeSet<DocumentType> = options
            .doc_types
            .iter()
            .copied()
            .filter(|t| !job.document_state(*t).is_ready())
            .collect();
        if !missing.is_empty() {
            self.generate_documents(job_id, &missing).await?;
        }

        let profile = self.profile.read().await.clone();
        self.smart_apply.start(job_id, &profile, options).await
    }

    /// Feed the human's answers into a suspended attempt.
    pub async fn continue_application(
        &self,
        job_id: Uuid,
        answers: Vec<FieldAnswer>,
    ) -> Result<ApplyOutcome> {
        let profile = self.profile.read().await.clone();
        self.smart_apply.resume(job_id, &profile, answers).await
    }

    pub async fn cancel_application(&self, job_id: Uuid) -> Result<()> {
        self.smart_apply.cancel(job_id).await
    }

    pub async fn pending_questions(&self, job_id: Uuid) -> Result<Option<Vec<PendingQuestion>>> {
        self.smart_apply.pending_questions(job_id).await
    }

    pub async fn attempt_phase(&self, job_id: Uuid) -> Option<ApplyPhase> {
        self.smart_apply.phase(job_id).await
    }

    // ── Applications ────────────────────────────────────────────────

    pub async fn list_applications(&self) -> Result<Vec<ApplicationView>> {
        let applications = self.store.list_applications().await?;
        let mut views = Vec::with_capacity(applications.len());
        for application in applications {
            let events = self.store.list_events(application.id).await?;
            views.push(ApplicationView {
                stage: derive_stage(&events).map(|k| k.to_string()),
                events,
                application,
            });
        }
        Ok(views)
    }

    pub async fn get_application(&self, id: Uuid) -> Result<Option<ApplicationView>> {
        let Some(application) = self.store.get_application(id).await? else {
            return Ok(None);
        };
        let events = self.store.list_events(application.id).await?;
        Ok(Some(ApplicationView {
            stage: derive_stage(&events).map(|k| k.to_string()),
            events,
            application,
        }))
    }

    pub async fn handle_email(&self, email: &InboundEmail) -> Result<SecretaryOutcome> {
        self.secretary.process_email(email).await
    }

    pub async fn confirm_application_status(
        &self,
        application_id: Uuid,
        status: ApplicationStatus,
    ) -> Result<Application> {
        self.secretary.confirm_status(application_id, status).await
    }

    // ── Profile and Q&A store ───────────────────────────────────────

    pub async fn profile(&self) -> UserProfile {
        self.profile.read().await.clone()
    }

    pub async fn update_profile(&self, profile: UserProfile) {
        *self.profile.write().await = profile;
    }

    pub async fn list_saved_answers(&self) -> Result<Vec<SavedAnswer>> {
        self.knowledge.list().await
    }

    pub async fn update_saved_answer(&self, id: Uuid, answer: &str) -> Result<()> {
        self.knowledge.update(id, answer).await
    }

    pub async fn delete_saved_answer(&self, id: Uuid) -> Result<()> {
        self.knowledge.delete(id).await
    }

    pub async fn list_actions(&self, limit: usize) -> Result<Vec<ActionEntry>> {
        Ok(self.store.list_actions(limit).await?)
    }
}
