//! Smart-apply — the automated form-submission attempt for one job.

pub mod agent;
pub mod knowledge;
pub mod machine;
pub mod profile;

pub use agent::{AgentOutcome, AgentReply, FieldAnswer, FormAgent, PendingQuestion};
pub use knowledge::{KnowledgeBase, SavedAnswer};
pub use machine::{ApplyOptions, ApplyOutcome, ApplyPhase, SmartApply, SuspendedAttempt};
pub use profile::{QuestionCategory, UserProfile};
