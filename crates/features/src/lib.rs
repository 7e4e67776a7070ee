//! Feature extraction for lead resolution and scoring.
//!
//! Provides pure functions over raw business records:
//! - Domain normalization and site comparison (`domain`)
//! - Identity key generation (`identity`)
//! - Service/category detection and budget bands (`services`)
//! - Region inference from postal addresses (`region`)

pub mod domain;
pub mod identity;
pub mod region;
pub mod services;

pub use domain::{
    is_multi_tenant, normalize, same_site, site_key, try_normalize, CanonicalDomain, DomainError,
    SiteKey,
};
pub use identity::{generate_key, slugify, IdentityKey, KeyDefaults};
pub use region::{infer_region, macro_region, MacroRegion};
pub use services::{budget_band, detect_services, typical_budget};

/// Normalize free text into lowercase words separated by single spaces.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Hello,  World!  "), "hello world");
        assert_eq!(normalize_text("Web-Design & SEO"), "web design seo");
    }
}
