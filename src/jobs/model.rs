//! Job data model — discovered listings and their per-document generation state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a discovered job listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Freshly discovered, nothing done yet.
    New,
    /// Reputation gate flagged the employer; waiting for user consent.
    GhostFlagged,
    /// All selected document types have passed the auditor.
    DocumentsReady,
    /// A smart-apply attempt is in flight.
    Applying,
    /// Submitted — an Application entity exists for this job.
    Applied,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::GhostFlagged => write!(f, "ghost_flagged"),
            Self::DocumentsReady => write!(f, "documents_ready"),
            Self::Applying => write!(f, "applying"),
            Self::Applied => write!(f, "applied"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "ghost_flagged" => Ok(Self::GhostFlagged),
            "documents_ready" => Ok(Self::DocumentsReady),
            "applying" => Ok(Self::Applying),
            "applied" => Ok(Self::Applied),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// The closed set of document types the pipeline can produce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Cv,
    MotivationLetter,
    CoverLetter,
    Portfolio,
    Proposal,
}

impl DocumentType {
    /// All document types, in a stable order.
    pub const ALL: [DocumentType; 5] = [
        DocumentType::Cv,
        DocumentType::MotivationLetter,
        DocumentType::CoverLetter,
        DocumentType::Portfolio,
        DocumentType::Proposal,
    ];

    /// Human-readable label used in prompts and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cv => "CV",
            Self::MotivationLetter => "Motivation Letter",
            Self::CoverLetter => "Cover Letter",
            Self::Portfolio => "Portfolio",
            Self::Proposal => "Proposal",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cv => write!(f, "cv"),
            Self::MotivationLetter => write!(f, "motivation_letter"),
            Self::CoverLetter => write!(f, "cover_letter"),
            Self::Portfolio => write!(f, "portfolio"),
            Self::Proposal => write!(f, "proposal"),
        }
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cv" => Ok(Self::Cv),
            "motivation_letter" => Ok(Self::MotivationLetter),
            "cover_letter" => Ok(Self::CoverLetter),
            "portfolio" => Ok(Self::Portfolio),
            "proposal" => Ok(Self::Proposal),
            _ => Err(format!("Unknown document type: {}", s)),
        }
    }
}

/// Generation status of a single document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Never requested.
    #[default]
    None,
    /// Generation in progress.
    Pending,
    /// Thinker produced a draft; auditor has not approved yet.
    ThinkerDone,
    /// Auditor approved; content finalized to `path`.
    AuditorDone,
    /// Revision cap exhausted or the loop errored out.
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Pending => write!(f, "pending"),
            Self::ThinkerDone => write!(f, "thinker_done"),
            Self::AuditorDone => write!(f, "auditor_done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Full per-type generation state: status plus the finalized path or the
/// last failure reason.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentState {
    pub fn is_ready(&self) -> bool {
        self.status == DocumentStatus::AuditorDone
    }
}

/// Compatibility bands from the scoring service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityLevel {
    Red,
    Yellow,
    Green,
    Gold,
}

impl CompatibilityLevel {
    /// Band boundaries: red <26, yellow 26–50, green 51–75, gold 76+.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=25 => Self::Red,
            26..=50 => Self::Yellow,
            51..=75 => Self::Green,
            _ => Self::Gold,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "red" => Some(Self::Red),
            "yellow" => Some(Self::Yellow),
            "green" => Some(Self::Green),
            "gold" => Some(Self::Gold),
            _ => None,
        }
    }
}

/// A discovered job listing.
///
/// Mutated only by the orchestrator and the document pipeline; never deleted
/// by automated flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub company: String,
    /// Listing description scraped at discovery time.
    #[serde(default)]
    pub description: String,
    /// Compatibility score 0–100.
    pub compatibility_score: u8,
    pub status: JobStatus,
    /// Set when the reputation gate flagged this job and processing paused.
    pub needs_user_consent: bool,
    /// Set by the human after reviewing generated documents.
    pub user_confirmed_docs: bool,
    /// Per-type generation state. Absent types have never been requested.
    #[serde(default)]
    pub documents: BTreeMap<DocumentType, DocumentState>,
    /// Human-readable reason for the most recent failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a fresh listing.
    pub fn new(url: &str, title: &str, company: &str, compatibility_score: u8) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.to_string(),
            title: title.to_string(),
            company: company.to_string(),
            description: String::new(),
            compatibility_score,
            status: JobStatus::New,
            needs_user_consent: false,
            user_confirmed_docs: false,
            documents: BTreeMap::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn compatibility_level(&self) -> CompatibilityLevel {
        CompatibilityLevel::from_score(self.compatibility_score)
    }

    /// State of one document type (default state if never requested).
    pub fn document_state(&self, doc_type: DocumentType) -> DocumentState {
        self.documents.get(&doc_type).cloned().unwrap_or_default()
    }
}
