//! Error types for Applyflow.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("AI gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Document pipeline error: {0}")]
    Document(#[from] DocumentError),

    #[error("Smart-apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("Secretary error: {0}")]
    Secretary(#[from] SecretaryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// AI gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Model {model} request failed: {reason}")]
    RequestFailed { model: String, reason: String },

    #[error("Model {model} timed out after {timeout:?}")]
    Timeout { model: String, timeout: Duration },

    #[error("No active model configured for role {role}")]
    RoleNotConfigured { role: String },

    #[error("Model {model} does not accept image input")]
    ImageUnsupported { model: String },

    #[error("Invalid response from {model}: {reason}")]
    InvalidResponse { model: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Document pipeline errors.
///
/// Revision-limit exhaustion is NOT an error — it is reported as a `Failed`
/// document state so other document types keep generating. Only hard
/// preconditions and storage problems surface here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DocumentError {
    #[error("No active model configured for role {role}")]
    RoleMissing { role: String },

    #[error("Failed to write {doc_type} to {path}: {reason}")]
    Write {
        doc_type: String,
        path: String,
        reason: String,
    },
}

/// Smart-apply state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("Job {id} not found")]
    JobNotFound { id: Uuid },

    #[error("Job {job_id} already has an active application attempt in phase {phase}")]
    AttemptActive { job_id: Uuid, phase: String },

    #[error("Job {job_id} has no suspended application attempt to resume")]
    NoActiveAttempt { job_id: Uuid },

    #[error("Job {job_id} cannot be cancelled from phase {phase}")]
    NotCancellable { job_id: Uuid, phase: String },

    #[error("Documents not ready for job {job_id}: {}", missing.join(", "))]
    DocumentsNotReady { job_id: Uuid, missing: Vec<String> },

    #[error("Form automation agent failed: {reason}")]
    AgentFailed { reason: String },

    #[error("Automation agent session {session_id} no longer exists")]
    SessionExpired { session_id: String },
}

/// Correspondence classifier errors.
#[derive(Debug, thiserror::Error)]
pub enum SecretaryError {
    #[error("Application {id} not found")]
    ApplicationNotFound { id: Uuid },

    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Correspondence feed error: {0}")]
    Feed(String),
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
