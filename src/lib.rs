pub mod core;
pub mod orchestration;
pub mod security;
pub mod stages;
pub mod store;
pub mod targets;

pub use crate::core::*;
pub use crate::orchestration::{
    AutomationAnalytics, Orchestrator, ReportOptions, RunOptions, RunSummary, Scheduler,
};
pub use crate::security::TokenManager;
pub use crate::store::{PublicationLog, PublicationRecord, StateStore};
