//! Monetization stage
//!
//! Inserts ad slot markers and affiliate references into the draft body,
//! driven by the tag-keyed policy table. Products come from the affiliate
//! catalog capability; each product is inserted at most once per item,
//! keyed by the stable slug of its name.

use crate::core::config::{MonetizationConfig, MonetizationPolicy};
use crate::core::error::StageError;
use crate::core::item::{ContentItem, MonetizedBody, StageKind};
use crate::core::traits::{AffiliateCatalog, AffiliateProduct, Stage, StageOutput, StageResult};
use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Marker the site template replaces with an ad unit
const AD_SLOT_MARKER: &str = "<!-- ad-slot -->";

/// Catalog backed by the static product list in configuration
pub struct ConfigCatalog {
    products: Vec<AffiliateProduct>,
}

impl ConfigCatalog {
    pub fn new(products: Vec<AffiliateProduct>) -> Self {
        Self { products }
    }
}

#[async_trait]
impl AffiliateCatalog for ConfigCatalog {
    async fn products_for(&self, programs: &[String]) -> Result<Vec<AffiliateProduct>, StageError> {
        Ok(self
            .products
            .iter()
            .filter(|product| programs.contains(&product.program))
            .cloned()
            .collect())
    }
}

/// Policy-driven ad and affiliate insertion
pub struct MonetizationStage {
    policies: HashMap<String, MonetizationPolicy>,
    catalog: Arc<dyn AffiliateCatalog>,
    max_refs: usize,
}

impl MonetizationStage {
    pub fn new(config: &MonetizationConfig, catalog: Arc<dyn AffiliateCatalog>) -> Self {
        Self {
            policies: config.policies.clone(),
            catalog,
            max_refs: config.max_affiliate_refs,
        }
    }

    /// Policies whose tag appears on the item
    fn matching_policies(&self, tags: &[String]) -> Vec<&MonetizationPolicy> {
        tags.iter()
            .filter_map(|tag| self.policies.get(tag))
            .collect()
    }

    /// Rank catalog products by keyword hits in the body
    fn rank_products(body: &str, products: &[AffiliateProduct]) -> Vec<(AffiliateProduct, usize)> {
        let mut ranked = Vec::new();

        for product in products {
            if product.keywords.is_empty() {
                continue;
            }
            let Ok(matcher) = AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(&product.keywords)
            else {
                continue;
            };

            let hits = matcher.find_iter(body).count();
            if hits > 0 {
                ranked.push((product.clone(), hits));
            }
        }

        // Most relevant first; name breaks ties so ordering is stable
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name.cmp(&b.0.name)));
        ranked
    }

    /// Affiliate link for a product under a program's partner tag
    fn affiliate_url(product: &AffiliateProduct) -> String {
        let separator = if product.url.contains('?') { '&' } else { '?' };
        format!("{}{}ref={}", product.url, separator, product.program)
    }

    /// Replace the first keyword occurrence with an anchor to the product
    fn insert_reference(body: &str, product: &AffiliateProduct) -> Option<String> {
        for keyword in &product.keywords {
            let pattern = format!(r"(?i){}", regex::escape(keyword));
            let Ok(regex) = Regex::new(&pattern) else {
                continue;
            };
            if regex.is_match(body) {
                let link = format!(
                    r#"<a href="{}" rel="sponsored">{}</a>"#,
                    Self::affiliate_url(product),
                    product.name
                );
                return Some(regex.replace(body, link.as_str()).to_string());
            }
        }
        None
    }

    /// Insert up to `density` ad markers at even paragraph intervals
    fn insert_ad_slots(body: &str, density: u32) -> (String, u32) {
        if density == 0 {
            return (body.to_string(), 0);
        }

        let paragraphs: Vec<&str> = body.split("</p>").collect();
        // Last split element is the trailing remainder, not a paragraph
        let count = paragraphs.len().saturating_sub(1);
        if count < 2 {
            return (body.to_string(), 0);
        }

        let slots = (density as usize).min(count - 1);
        let interval = count / (slots + 1);
        let interval = interval.max(1);

        let mut result = String::new();
        let mut inserted = 0u32;
        for (index, paragraph) in paragraphs.iter().enumerate() {
            result.push_str(paragraph);
            if index < count {
                result.push_str("</p>");
            }

            let paragraph_number = index + 1;
            if paragraph_number < count
                && paragraph_number % interval == 0
                && (inserted as usize) < slots
            {
                result.push_str("\n");
                result.push_str(AD_SLOT_MARKER);
                inserted += 1;
            }
        }

        (result, inserted)
    }

    /// Recommendations section appended when products matched
    fn recommendation_section(products: &[AffiliateProduct]) -> String {
        let mut html = String::from("\n<div class=\"product-recommendations\">\n");
        html.push_str("<h2>Recommended Products</h2>\n");

        for product in products {
            let price = product.price_range.as_deref().unwrap_or("");
            let description = product.description.as_deref().unwrap_or("");
            html.push_str(&format!(
                "<div class=\"product-card\"><h3>{}</h3><p>{}</p><p>{}</p><a href=\"{}\" rel=\"sponsored\">View product</a></div>\n",
                product.name,
                price,
                description,
                Self::affiliate_url(product),
            ));
        }

        html.push_str("</div>\n");
        html
    }
}

#[async_trait]
impl Stage for MonetizationStage {
    fn kind(&self) -> StageKind {
        StageKind::Monetization
    }

    async fn apply(&self, item: &ContentItem) -> StageResult {
        let stage = self.kind().as_str();

        let draft = item.draft.as_ref().ok_or_else(|| StageError::MissingMetadata {
            stage: stage.to_string(),
            field: "draft".to_string(),
        })?;
        let enrichment = item
            .enrichment
            .as_ref()
            .ok_or_else(|| StageError::MissingMetadata {
                stage: stage.to_string(),
                field: "enrichment".to_string(),
            })?;

        let policies = self.matching_policies(&enrichment.tags);
        if policies.is_empty() {
            return Err(StageError::MissingMetadata {
                stage: stage.to_string(),
                field: "tags".to_string(),
            });
        }

        let density = policies
            .iter()
            .map(|policy| policy.ad_slot_density)
            .max()
            .unwrap_or(0);

        let mut programs: Vec<String> = Vec::new();
        for policy in &policies {
            if !programs.contains(&policy.affiliate_program) {
                programs.push(policy.affiliate_program.clone());
            }
        }

        let products = self.catalog.products_for(&programs).await?;
        let ranked = Self::rank_products(&draft.body, &products);

        let mut body = draft.body.clone();
        let mut inserted_products: Vec<AffiliateProduct> = Vec::new();
        let mut affiliate_refs: Vec<String> = Vec::new();

        for (product, _hits) in ranked {
            if affiliate_refs.len() >= self.max_refs {
                break;
            }
            let key = product.product_key();
            if affiliate_refs.contains(&key) {
                continue;
            }
            if let Some(updated) = Self::insert_reference(&body, &product) {
                body = updated;
                affiliate_refs.push(key);
                inserted_products.push(product);
            }
        }

        let (mut body, ad_slots) = Self::insert_ad_slots(&body, density);

        if !inserted_products.is_empty() {
            body.push_str(&Self::recommendation_section(&inserted_products));
        }

        Ok(StageOutput::Monetized(MonetizedBody {
            body,
            ad_slots,
            affiliate_refs,
        }))
    }
}
