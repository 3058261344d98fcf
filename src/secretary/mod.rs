//! The Secretary — employer-email classification and application lifecycle.

pub mod classifier;
pub mod feed;
pub mod rules;

pub use classifier::{Classification, Secretary, SecretaryOutcome};
pub use feed::{InboundEmail, spawn_feed_consumer};
pub use rules::SecretaryRules;
