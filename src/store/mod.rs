//! Durable state for the automation pipeline
//!
//! `StateStore` holds ContentItem and RetryState records with atomic
//! writes; `PublicationLog` is the append-only publication audit trail.

pub mod publication_log;
pub mod state_store;

pub use publication_log::{PublicationLog, PublicationRecord};
pub use state_store::StateStore;
