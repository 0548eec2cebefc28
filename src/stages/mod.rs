//! Pipeline stage implementations
//!
//! Source and Enrichment wrap HTTP services; Monetization applies the
//! policy table locally through the affiliate catalog capability;
//! Distribution fans out to the configured targets.

pub mod distribution;
pub mod enrichment;
pub mod monetization;
pub mod source;

pub use distribution::DistributionStage;
pub use enrichment::{EnrichmentStage, LinkIndex, LinkTarget};
pub use monetization::{ConfigCatalog, MonetizationStage};
pub use source::SourceStage;
