//! Service/category detection over a fixed taxonomy.

use std::collections::BTreeSet;

use leadmatch_model::{BudgetRange, ServiceType};

use crate::normalize_text;

/// Phrases that name a service directly, matched on word boundaries.
fn keywords(service: ServiceType) -> &'static [&'static str] {
    match service {
        ServiceType::WebDesign => &[
            "web design",
            "web designer",
            "website",
            "websites",
            "web development",
            "landing page",
            "wordpress",
        ],
        ServiceType::Seo => &[
            "seo",
            "search engine",
            "search ranking",
            "google ranking",
            "local seo",
        ],
        ServiceType::SocialMedia => &[
            "social media",
            "instagram",
            "facebook",
            "tiktok",
            "influencer",
            "community management",
        ],
        ServiceType::PaidAdvertising => &[
            "google ads",
            "ppc",
            "pay per click",
            "advertising",
            "ad campaign",
            "ad campaigns",
            "paid media",
        ],
        ServiceType::Branding => &["branding", "brand identity", "logo", "logo design", "rebrand"],
        ServiceType::Photography => &[
            "photography",
            "photographer",
            "photo shoot",
            "product photos",
            "videography",
        ],
        ServiceType::Copywriting => &[
            "copywriting",
            "copywriter",
            "content writing",
            "blog posts",
            "newsletter",
        ],
        ServiceType::Bookkeeping => &[
            "bookkeeping",
            "bookkeeper",
            "accounting",
            "accountant",
            "payroll",
            "tax preparation",
        ],
        ServiceType::ItSupport => &[
            "it support",
            "it services",
            "computer repair",
            "managed services",
            "network setup",
            "cybersecurity",
        ],
        ServiceType::Consulting => &[
            "consulting",
            "consultant",
            "business strategy",
            "growth strategy",
            "coaching",
        ],
    }
}

/// Listing categories whose businesses habitually buy these services.
const CATEGORY_AFFINITY: &[(&str, &[ServiceType])] = &[
    ("restaurant", &[ServiceType::SocialMedia, ServiceType::Photography]),
    ("cafe", &[ServiceType::SocialMedia, ServiceType::Photography]),
    ("bakery", &[ServiceType::SocialMedia, ServiceType::Photography]),
    ("bar", &[ServiceType::SocialMedia]),
    ("salon", &[ServiceType::SocialMedia, ServiceType::Branding]),
    ("spa", &[ServiceType::SocialMedia, ServiceType::Branding]),
    ("boutique", &[ServiceType::SocialMedia, ServiceType::PaidAdvertising]),
    ("store", &[ServiceType::PaidAdvertising, ServiceType::WebDesign]),
    ("dentist", &[ServiceType::Seo, ServiceType::WebDesign]),
    ("clinic", &[ServiceType::Seo, ServiceType::WebDesign]),
    ("chiropractor", &[ServiceType::Seo, ServiceType::WebDesign]),
    ("lawyer", &[ServiceType::Seo, ServiceType::Copywriting]),
    ("attorney", &[ServiceType::Seo, ServiceType::Copywriting]),
    ("plumber", &[ServiceType::Seo, ServiceType::PaidAdvertising, ServiceType::WebDesign]),
    ("electrician", &[ServiceType::Seo, ServiceType::PaidAdvertising, ServiceType::WebDesign]),
    ("contractor", &[ServiceType::Seo, ServiceType::PaidAdvertising, ServiceType::WebDesign]),
    ("roofing", &[ServiceType::Seo, ServiceType::PaidAdvertising]),
    ("real estate", &[ServiceType::Photography, ServiceType::PaidAdvertising]),
    ("realtor", &[ServiceType::Photography, ServiceType::PaidAdvertising]),
    ("startup", &[ServiceType::Branding, ServiceType::Consulting, ServiceType::ItSupport]),
    ("accounting", &[ServiceType::ItSupport, ServiceType::WebDesign]),
    ("gym", &[ServiceType::SocialMedia, ServiceType::PaidAdvertising]),
    ("fitness", &[ServiceType::SocialMedia, ServiceType::PaidAdvertising]),
];

fn contains_phrase(padded: &str, phrase: &str) -> bool {
    padded.contains(&format!(" {} ", phrase))
}

/// Detect the services that a free-text description and a structured category point at.
///
/// Returns an empty set when nothing matches.
pub fn detect_services(text: &str, structured_category: &str) -> BTreeSet<ServiceType> {
    let mut detected = BTreeSet::new();

    let combined = format!(" {} {} ", normalize_text(text), normalize_text(structured_category));
    for service in ServiceType::ALL {
        if keywords(service).iter().any(|kw| contains_phrase(&combined, kw)) {
            detected.insert(service);
        }
    }

    let category = format!(" {} ", normalize_text(structured_category));
    for (hint, services) in CATEGORY_AFFINITY {
        if contains_phrase(&category, hint) || contains_phrase(&category, &format!("{}s", hint)) {
            detected.extend(services.iter().copied());
        }
    }

    detected
}

/// Typical engagement budget for a service.
pub fn typical_budget(service: ServiceType) -> BudgetRange {
    match service {
        ServiceType::WebDesign => BudgetRange::new(2_000, 10_000),
        ServiceType::Seo => BudgetRange::new(500, 3_000),
        ServiceType::SocialMedia => BudgetRange::new(300, 2_000),
        ServiceType::PaidAdvertising => BudgetRange::new(1_000, 5_000),
        ServiceType::Branding => BudgetRange::new(1_500, 8_000),
        ServiceType::Photography => BudgetRange::new(300, 2_500),
        ServiceType::Copywriting => BudgetRange::new(200, 1_500),
        ServiceType::Bookkeeping => BudgetRange::new(200, 1_000),
        ServiceType::ItSupport => BudgetRange::new(500, 4_000),
        ServiceType::Consulting => BudgetRange::new(1_000, 10_000),
    }
}

/// Budget band spanning the typical budgets of `services`, if any.
pub fn budget_band<'a>(services: impl IntoIterator<Item = &'a ServiceType>) -> Option<BudgetRange> {
    services
        .into_iter()
        .map(|s| typical_budget(*s))
        .reduce(|acc, band| acc.span(&band))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_detection() {
        let found = detect_services("We need a new website and better Google ranking", "");
        assert!(found.contains(&ServiceType::WebDesign));
        assert!(found.contains(&ServiceType::Seo));
        assert!(!found.contains(&ServiceType::Photography));
    }

    #[test]
    fn test_word_boundaries() {
        // "seo" inside another word must not match
        let found = detect_services("Seoul Garden", "Korean");
        assert!(found.is_empty());
    }

    #[test]
    fn test_category_affinity() {
        let found = detect_services("", "Plumbers");
        assert!(found.contains(&ServiceType::Seo));
        assert!(found.contains(&ServiceType::PaidAdvertising));

        let found = detect_services("Family owned since 1982", "Italian Restaurant");
        assert_eq!(
            found,
            BTreeSet::from([ServiceType::SocialMedia, ServiceType::Photography])
        );
    }

    #[test]
    fn test_no_match_returns_empty() {
        assert!(detect_services("", "").is_empty());
        assert!(detect_services("lorem ipsum", "widgets").is_empty());
    }

    #[test]
    fn test_budget_band_spans_services() {
        let band = budget_band(&[ServiceType::Seo, ServiceType::Photography]).unwrap();
        assert_eq!(band, BudgetRange::new(300, 3_000));
        assert!(budget_band(std::iter::empty()).is_none());
    }
}
