//! Distribution target clients
//!
//! One module per external platform, each implementing the
//! `DistributionTarget` trait, plus the loader that builds the enabled set
//! from configuration.

pub mod medium;
pub mod pinterest;
pub mod reddit;
pub mod site;
pub mod target_loader;

pub use medium::MediumTarget;
pub use pinterest::PinterestTarget;
pub use reddit::RedditTarget;
pub use site::SiteTarget;
pub use target_loader::{TargetKind, TargetLoader};
