//! Application entity, correspondence events, and stage derivation.

pub mod model;

pub use model::{Application, ApplicationStatus, Event, EventKind, Party, derive_stage};
