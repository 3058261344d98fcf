//! Applyflow — an application lifecycle orchestrator.
//!
//! Takes a discovered job listing through reputation screening, AI document
//! generation (Thinker drafts, Auditor reviews), automated form submission
//! with suspend/resume Q&A, and post-submission lifecycle tracking driven by
//! classified employer correspondence.

pub mod applications;
pub mod apply;
pub mod config;
pub mod docs;
pub mod error;
pub mod gateway;
pub mod http;
pub mod jobs;
pub mod orchestrator;
pub mod reputation;
pub mod secretary;
pub mod store;

pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
