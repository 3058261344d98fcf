//! The Draft→Audit generation loop.
//!
//! Per requested document type: the Thinker drafts, the Auditor reviews, and
//! revision feedback feeds the next draft until approval or the iteration cap.
//! Types are independent — one type failing never aborts the others, and a
//! call only ever touches the types it was asked for.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::apply::profile::UserProfile;
use crate::docs::prompts::{self, AuditVerdict};
use crate::error::DocumentError;
use crate::gateway::{AiGateway, CallOptions, call_bounded};
use crate::jobs::model::{DocumentState, DocumentStatus, DocumentType, Job};

/// Observer for intermediate per-document status. The pipeline reports each
/// accepted draft (`ThinkerDone`) here before the audit runs, so a caller can
/// persist the in-between state and a watcher can tell a drafted document
/// from one still pending.
#[async_trait]
pub trait DocumentProgress: Send + Sync {
    async fn on_status(&self, job_id: Uuid, doc_type: DocumentType, status: DocumentStatus);
}

/// Document pipeline over explicit Thinker/Auditor gateways.
pub struct DocumentPipeline {
    thinker: Arc<dyn AiGateway>,
    auditor: Arc<dyn AiGateway>,
    call_options: CallOptions,
    max_revisions: u32,
    docs_dir: PathBuf,
    progress: Option<Arc<dyn DocumentProgress>>,
}

impl DocumentPipeline {
    /// Build the pipeline. Both roles are required up front — a missing role
    /// is a hard precondition failure, not something to discover mid-loop.
    pub fn new(
        thinker: Option<Arc<dyn AiGateway>>,
        auditor: Option<Arc<dyn AiGateway>>,
        call_options: CallOptions,
        max_revisions: u32,
        docs_dir: PathBuf,
    ) -> Result<Self, DocumentError> {
        let thinker = thinker.ok_or_else(|| DocumentError::RoleMissing {
            role: "Thinker".to_string(),
        })?;
        let auditor = auditor.ok_or_else(|| DocumentError::RoleMissing {
            role: "Auditor".to_string(),
        })?;
        Ok(Self {
            thinker,
            auditor,
            call_options,
            max_revisions,
            docs_dir,
            progress: None,
        })
    }

    /// Attach a progress observer for intermediate statuses.
    pub fn with_progress(mut self, progress: Arc<dyn DocumentProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Generate the requested document types for a job.
    ///
    /// Returns a state per requested type — and ONLY the requested types, so
    /// the caller can merge results without clobbering unrelated statuses.
    pub async fn generate(
        &self,
        job: &Job,
        types: &BTreeSet<DocumentType>,
        profile: &UserProfile,
        research: Option<&str>,
    ) -> BTreeMap<DocumentType, DocumentState> {
        let futures = types
            .iter()
            .map(|&doc_type| async move {
                let state = self.generate_one(job, doc_type, profile, research).await;
                (doc_type, state)
            })
            .collect::<Vec<_>>();

        futures::future::join_all(futures).await.into_iter().collect()
    }

    /// Run the Draft→Audit loop for one document type.
    async fn generate_one(
        &self,
        job: &Job,
        doc_type: DocumentType,
        profile: &UserProfile,
        research: Option<&str>,
    ) -> DocumentState {
        info!(job_id = %job.id, doc_type = %doc_type, "Generating document");

        let mut feedback: Option<String> = None;

        for iteration in 1..=self.max_revisions {
            // Draft
            let draft_prompt = prompts::build_draft_prompt(
                doc_type,
                job,
                profile,
                research,
                feedback.as_deref(),
            );
            let draft = match call_bounded(&*self.thinker, &draft_prompt, &self.call_options).await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!(job_id = %job.id, doc_type = %doc_type, error = %e, "Thinker call failed");
                    return DocumentState {
                        status: DocumentStatus::Failed,
                        path: None,
                        error: Some(e.to_string()),
                    };
                }
            };

            // The draft exists; the document is thinker-done until the
            // auditor rules on it.
            if let Some(progress) = &self.progress {
                progress
                    .on_status(job.id, doc_type, DocumentStatus::ThinkerDone)
                    .await;
            }

            // Audit
            let audit_prompt = prompts::build_audit_prompt(doc_type, job, &draft);
            let review = match call_bounded(&*self.auditor, &audit_prompt, &self.call_options).await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!(job_id = %job.id, doc_type = %doc_type, error = %e, "Auditor call failed");
                    return DocumentState {
                        status: DocumentStatus::Failed,
                        path: None,
                        error: Some(e.to_string()),
                    };
                }
            };

            match prompts::parse_audit_response(&review) {
                AuditVerdict::Approved => {
                    info!(
                        job_id = %job.id,
                        doc_type = %doc_type,
                        iteration,
                        "Draft approved"
                    );
                    return self.finalize(job, doc_type, &draft).await;
                }
                AuditVerdict::Revise(notes) => {
                    info!(
                        job_id = %job.id,
                        doc_type = %doc_type,
                        iteration,
                        "Auditor requested revision"
                    );
                    feedback = Some(notes);
                }
            }
        }

        // Cap exhausted; the last auditor feedback is the failure reason.
        DocumentState {
            status: DocumentStatus::Failed,
            path: None,
            error: feedback
                .or_else(|| Some(format!("revision limit ({}) reached", self.max_revisions))),
        }
    }

    /// Write the approved content to disk and report the final state.
    async fn finalize(&self, job: &Job, doc_type: DocumentType, content: &str) -> DocumentState {
        let path = self.docs_dir.join(format!("{}_{}.md", job.id, doc_type));

        if let Some(parent) = path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return DocumentState {
                status: DocumentStatus::Failed,
                path: None,
                error: Some(format!("failed to create docs dir: {}", e)),
            };
        }

        match tokio::fs::write(&path, content).await {
            Ok(()) => DocumentState {
                status: DocumentStatus::AuditorDone,
                path: Some(path.to_string_lossy().into_owned()),
                error: None,
            },
            Err(e) => DocumentState {
                status: DocumentStatus::Failed,
                path: None,
                error: Some(
                    DocumentError::Write {
                        doc_type: doc_type.to_string(),
                        path: path.to_string_lossy().into_owned(),
                        reason: e.to_string(),
                    }
                    .to_string(),
                ),
            },
        }
    }
}
