//! Job listing model and document state tracking.

pub mod model;

pub use model::{
    CompatibilityLevel, DocumentState, DocumentStatus, DocumentType, Job, JobStatus,
};
