//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::model::CompatibilityLevel;

/// How rejection ambiguity is decided when a rejection email could belong to
/// more than one open application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguityRule {
    /// Flag whenever more than one open application shares the employer.
    SameCompany,
    /// Flag only when employer AND position title both collide.
    SameCompanyAndTitle,
}

/// Policy for unattended applications triggered by job discovery.
#[derive(Debug, Clone)]
pub struct AutoApplyPolicy {
    /// Whether discovery triggers may start applications without a click.
    pub enabled: bool,
    /// Minimum compatibility level a job must reach.
    pub min_level: CompatibilityLevel,
}

impl Default for AutoApplyPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            min_level: CompatibilityLevel::Green,
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum Draft→Audit iterations per document type.
    pub max_revisions: u32,
    /// Directory where finalized documents are written.
    pub docs_dir: PathBuf,
    /// Per-call AI gateway timeout.
    pub ai_timeout: Duration,
    /// Retry attempts for transient gateway failures.
    pub ai_retries: u32,
    /// How long a cached reputation verdict stays valid.
    pub reputation_cache_ttl: Duration,
    /// Require the user to confirm generated documents before submission.
    pub manual_review: bool,
    /// Maximum auto-resolution rounds against the form agent before handing
    /// the form to the human browser session.
    pub max_answer_rounds: u32,
    /// Minimum classifier confidence before an event is recorded.
    pub min_classification_confidence: f32,
    /// Rejection-ambiguity predicate.
    pub ambiguity_rule: AmbiguityRule,
    /// Auto-apply policy.
    pub auto_apply: AutoApplyPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_revisions: 3,
            docs_dir: PathBuf::from("./data/generated_docs"),
            ai_timeout: Duration::from_secs(45),
            ai_retries: 2,
            reputation_cache_ttl: Duration::from_secs(24 * 3600),
            manual_review: false,
            max_answer_rounds: 5,
            min_classification_confidence: 0.6,
            ambiguity_rule: AmbiguityRule::SameCompany,
            auto_apply: AutoApplyPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("APPLYFLOW_MAX_REVISIONS")
            && let Ok(n) = v.parse()
        {
            config.max_revisions = n;
        }
        if let Ok(v) = std::env::var("APPLYFLOW_DOCS_DIR") {
            config.docs_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("APPLYFLOW_AI_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            config.ai_timeout = Duration::from_secs(n);
        }
        if let Ok(v) = std::env::var("APPLYFLOW_MANUAL_REVIEW") {
            config.manual_review = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("APPLYFLOW_AUTO_APPLY") {
            config.auto_apply.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("APPLYFLOW_AUTO_APPLY_MIN_LEVEL") {
            if let Some(level) = CompatibilityLevel::parse(&v) {
                config.auto_apply.min_level = level;
            }
        }
        if let Ok(v) = std::env::var("APPLYFLOW_AMBIGUITY_RULE") {
            config.ambiguity_rule = match v.as_str() {
                "company_and_title" => AmbiguityRule::SameCompanyAndTitle,
                _ => AmbiguityRule::SameCompany,
            };
        }

        config
    }
}
