//! Q&A knowledge base — remembered answers to recurring application questions.
//!
//! Matching is deliberately conservative: case-insensitive equality or
//! substring overlap on the question text, and anything with more than one
//! plausible match is treated as ambiguous — the question goes back to the
//! human instead of the system guessing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::apply::agent::PendingQuestion;
use crate::apply::profile::QuestionCategory;
use crate::error::Result;
use crate::store::Store;

/// A durable question/answer pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedAnswer {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    pub category: QuestionCategory,
    /// The job this was first answered for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SavedAnswer {
    pub fn new(
        question: &str,
        answer: &str,
        category: QuestionCategory,
        job_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            question: question.to_string(),
            answer: answer.to_string(),
            category,
            job_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Knowledge base over the durable store.
pub struct KnowledgeBase {
    store: Arc<dyn Store>,
}

impl KnowledgeBase {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Try to auto-resolve a pending question.
    ///
    /// Exact (case-insensitive) equality on question or label wins first;
    /// then a single substring match. Multiple candidates at either level
    /// mean ambiguity — return `None` and let the human answer.
    pub async fn resolve(&self, question: &PendingQuestion) -> Result<Option<SavedAnswer>> {
        let saved = self.store.list_saved_answers().await?;
        if saved.is_empty() {
            return Ok(None);
        }

        let needle_question = question.question.to_lowercase();
        let needle_label = question.label.to_lowercase();

        let exact: Vec<&SavedAnswer> = saved
            .iter()
            .filter(|s| {
                let stored = s.question.to_lowercase();
                stored == needle_question || stored == needle_label
            })
            .collect();
        match exact.len() {
            1 => {
                debug!(field = %question.field, "Q&A resolved by exact match");
                return Ok(Some(exact[0].clone()));
            }
            n if n > 1 => {
                debug!(field = %question.field, candidates = n, "Ambiguous exact Q&A matches");
                return Ok(None);
            }
            _ => {}
        }

        let substring: Vec<&SavedAnswer> = saved
            .iter()
            .filter(|s| {
                let stored = s.question.to_lowercase();
                (!needle_question.is_empty()
                    && (stored.contains(&needle_question) || needle_question.contains(&stored)))
                    || (!needle_label.is_empty()
                        && (stored.contains(&needle_label) || needle_label.contains(&stored)))
            })
            .collect();
        match substring.len() {
            1 => {
                debug!(field = %question.field, "Q&A resolved by substring match");
                Ok(Some(substring[0].clone()))
            }
            0 => Ok(None),
            n => {
                debug!(field = %question.field, candidates = n, "Ambiguous substring Q&A matches");
                Ok(None)
            }
        }
    }

    /// Persist an answer the user marked "save for later".
    ///
    /// An existing entry with the same question text (case-insensitive) is
    /// updated rather than duplicated.
    pub async fn save(
        &self,
        question: &str,
        answer: &str,
        category: QuestionCategory,
        job_id: Option<Uuid>,
    ) -> Result<SavedAnswer> {
        let existing = self.store.list_saved_answers().await?;
        if let Some(mut entry) = existing
            .into_iter()
            .find(|s| s.question.eq_ignore_ascii_case(question))
        {
            entry.answer = answer.to_string();
            entry.updated_at = Utc::now();
            self.store.upsert_saved_answer(&entry).await?;
            return Ok(entry);
        }

        let entry = SavedAnswer::new(question, answer, category, job_id);
        self.store.upsert_saved_answer(&entry).await?;
        Ok(entry)
    }

    /// All saved answers, for the settings UI.
    pub async fn list(&self) -> Result<Vec<SavedAnswer>> {
        Ok(self.store.list_saved_answers().await?)
    }

    /// Edit a saved answer's text.
    pub async fn update(&self, id: Uuid, new_answer: &str) -> Result<()> {
        Ok(self.store.update_saved_answer(id, new_answer).await?)
    }

    /// Delete a saved answer. Never retroactively alters submitted
    /// applications — it only affects future resolution.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        Ok(self.store.delete_saved_answer(id).await?)
    }
}
