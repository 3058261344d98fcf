//! Document pipeline — Thinker drafts, Auditor reviews, loop until approval.

pub mod pipeline;
pub mod prompts;

pub use pipeline::DocumentPipeline;
pub use prompts::AuditVerdict;
