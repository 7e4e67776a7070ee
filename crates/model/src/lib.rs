//! Core domain model for LeadMatch lead resolution and scoring.
//!
//! This crate defines the fundamental types used throughout the system:
//! - `RawBusinessRecord`: A scraped business record, as delivered by collectors
//! - `Lead`: The canonical, deduplicated entity stored per identity key
//! - `MergeLogEntry`: Immutable audit record written on every merge
//! - `UserProfile`: What a user sells, where, and to whom
//! - `RelevanceBreakdown`: Per-dimension scores for a (lead, user) pair

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by external store collaborators (lead store, audit sink, quota store).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A conditional write lost against a concurrent writer.
    #[error("Write conflict: {0}")]
    Conflict(String),
}

/// Origin tag of a scraped record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordSource {
    GoogleMaps,
    Manual,
    Directory,
    Import,
    Other(String),
}

impl RecordSource {
    pub fn as_str(&self) -> &str {
        match self {
            Self::GoogleMaps => "google_maps",
            Self::Manual => "manual",
            Self::Directory => "directory",
            Self::Import => "import",
            Self::Other(tag) => tag,
        }
    }
}

impl Default for RecordSource {
    fn default() -> Self {
        Self::GoogleMaps
    }
}

impl From<&str> for RecordSource {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "google_maps" | "maps" | "gmaps" => Self::GoogleMaps,
            "manual" => Self::Manual,
            "directory" => Self::Directory,
            "import" | "csv" => Self::Import,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for RecordSource {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<RecordSource> for String {
    fn from(source: RecordSource) -> Self {
        source.as_str().to_string()
    }
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A business record as extracted by a scraper.
///
/// No identity guarantee: the same business may arrive many times across runs,
/// and every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBusinessRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// Free-text postal address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<RecordSource>,

    /// Free-text category as reported by the listing (e.g. "Plumber")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Listing blurb or scraped about-text, used for service detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RawBusinessRecord {
    /// Create a record with just a name, for tests and manual entry.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_source(mut self, source: RecordSource) -> Self {
        self.source = Some(source);
        self
    }
}

/// Returns the trimmed value if present and non-blank.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// The canonical stored entity for one identity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Assigned once at creation, never reused
    pub id: Uuid,

    /// Upsert key; unique across the store
    pub identity_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub source: RecordSource,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_merged_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub merge_count: u32,
}

impl Lead {
    /// Build a fresh lead from its first observed record.
    pub fn from_record(
        identity_key: impl Into<String>,
        record: &RawBusinessRecord,
        canonical_domain: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let owned = |v: &Option<String>| non_blank(v.as_deref()).map(str::to_string);
        Self {
            id: Uuid::new_v4(),
            identity_key: identity_key.into(),
            business_name: owned(&record.name),
            canonical_domain,
            website: owned(&record.website),
            address: owned(&record.address),
            phone: owned(&record.phone),
            category: owned(&record.category),
            description: owned(&record.description),
            source: record.source.clone().unwrap_or_default(),
            created_at,
            last_merged_at: None,
            merge_count: 0,
        }
    }

    /// Fill every empty field from `record`, never overwriting populated ones.
    ///
    /// Returns the names of the fields that were filled.
    pub fn fill_missing_from(
        &mut self,
        record: &RawBusinessRecord,
        canonical_domain: Option<&str>,
    ) -> Vec<&'static str> {
        let mut filled = Vec::new();
        let pairs: [(&'static str, &mut Option<String>, Option<&str>); 7] = [
            ("business_name", &mut self.business_name, record.name.as_deref()),
            ("canonical_domain", &mut self.canonical_domain, canonical_domain),
            ("website", &mut self.website, record.website.as_deref()),
            ("address", &mut self.address, record.address.as_deref()),
            ("phone", &mut self.phone, record.phone.as_deref()),
            ("category", &mut self.category, record.category.as_deref()),
            ("description", &mut self.description, record.description.as_deref()),
        ];

        for (field, slot, incoming) in pairs {
            let empty = non_blank(slot.as_deref()).is_none();
            if let (true, Some(value)) = (empty, non_blank(incoming)) {
                *slot = Some(value.to_string());
                filled.push(field);
            }
        }

        filled
    }

    /// Name to show in listings.
    pub fn display_name(&self) -> &str {
        self.business_name.as_deref().unwrap_or("(unnamed business)")
    }
}

/// Why two observations were folded into one lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeReason {
    /// Both observations point at the same business site
    SameDomain,
    /// Same identity key reached through name and address
    SameNameAndAddressFuzzyMatch,
}

impl MergeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SameDomain => "same-domain",
            Self::SameNameAndAddressFuzzyMatch => "same-name-and-address-fuzzy-match",
        }
    }
}

/// Immutable audit record, one per merge decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeLogEntry {
    pub lead_id: Uuid,
    pub incoming_record: RawBusinessRecord,
    pub merged_at: DateTime<Utc>,
    pub reason: MergeReason,
    /// Lead fields populated by this merge
    #[serde(default)]
    pub filled_fields: Vec<String>,
}

/// Service categories a user can offer and a business can need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    WebDesign,
    Seo,
    SocialMedia,
    PaidAdvertising,
    Branding,
    Photography,
    Copywriting,
    Bookkeeping,
    ItSupport,
    Consulting,
}

impl ServiceType {
    pub const ALL: [ServiceType; 10] = [
        Self::WebDesign,
        Self::Seo,
        Self::SocialMedia,
        Self::PaidAdvertising,
        Self::Branding,
        Self::Photography,
        Self::Copywriting,
        Self::Bookkeeping,
        Self::ItSupport,
        Self::Consulting,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::WebDesign => "Web Design",
            Self::Seo => "SEO",
            Self::SocialMedia => "Social Media",
            Self::PaidAdvertising => "Paid Advertising",
            Self::Branding => "Branding",
            Self::Photography => "Photography",
            Self::Copywriting => "Copywriting",
            Self::Bookkeeping => "Bookkeeping",
            Self::ItSupport => "IT Support",
            Self::Consulting => "Consulting",
        }
    }
}

/// An inclusive budget band in whole currency units.
///
/// Deserialization goes through `BudgetRange::new`, so `min <= max` holds for
/// every value built from JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BudgetBounds")]
pub struct BudgetRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Deserialize)]
struct BudgetBounds {
    min: u32,
    max: u32,
}

impl From<BudgetBounds> for BudgetRange {
    fn from(bounds: BudgetBounds) -> Self {
        Self::new(bounds.min, bounds.max)
    }
}

impl BudgetRange {
    /// Create a range, swapping the bounds if given in the wrong order.
    pub fn new(a: u32, b: u32) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Whether `other` lies entirely inside this range.
    pub fn contains(&self, other: &BudgetRange) -> bool {
        other.min >= self.min && other.max <= self.max
    }

    /// Total amount by which `other` sticks out of this range on either side.
    pub fn overhang(&self, other: &BudgetRange) -> u32 {
        self.min
            .saturating_sub(other.min)
            .saturating_add(other.max.saturating_sub(self.max))
    }

    /// Smallest range covering both.
    pub fn span(&self, other: &BudgetRange) -> BudgetRange {
        BudgetRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// How quickly a user wants to act on new leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Immediate,
    Soon,
    #[default]
    Flexible,
}

impl From<&str> for Urgency {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "immediate" | "asap" | "urgent" => Self::Immediate,
            "soon" => Self::Soon,
            _ => Self::Flexible,
        }
    }
}

/// Interaction counts for one (category, region) bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorBucket {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub views: u32,
    #[serde(default)]
    pub unlocks: u32,
    #[serde(default)]
    pub contacts: u32,
}

/// Aggregated past interactions of a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserBehaviorSummary {
    #[serde(default)]
    pub buckets: Vec<BehaviorBucket>,
}

impl UserBehaviorSummary {
    /// Sum the buckets for `category`, restricted to `region` when one is given.
    ///
    /// Returns `(views, engagements)` where engagements are unlocks plus contacts,
    /// or `None` when no bucket matches.
    pub fn totals_for(&self, category: &str, region: Option<&str>) -> Option<(u32, u32)> {
        let category = category.trim().to_lowercase();
        let mut matched = false;
        let (mut views, mut engaged) = (0u32, 0u32);

        for bucket in &self.buckets {
            if bucket.category.trim().to_lowercase() != category {
                continue;
            }
            if let (Some(wanted), Some(have)) = (region, bucket.region.as_deref()) {
                if !wanted.eq_ignore_ascii_case(have) {
                    continue;
                }
            }
            matched = true;
            views = views.saturating_add(bucket.views);
            engaged = engaged
                .saturating_add(bucket.unlocks)
                .saturating_add(bucket.contacts);
        }

        matched.then_some((views, engaged))
    }
}

/// Attributes of a user consumed by relevance scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,

    /// Bumped whenever the profile changes; part of the score cache key
    #[serde(default)]
    pub version: u32,

    #[serde(default)]
    pub services: BTreeSet<ServiceType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetRange>,

    /// Region codes such as `US-MN`
    #[serde(default)]
    pub regions: BTreeSet<String>,

    #[serde(default)]
    pub industries: BTreeSet<String>,

    #[serde(default)]
    pub urgency: Urgency,

    #[serde(default)]
    pub behavior: UserBehaviorSummary,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_services(mut self, services: impl IntoIterator<Item = ServiceType>) -> Self {
        self.services = services.into_iter().collect();
        self
    }

    pub fn with_regions<S: Into<String>>(mut self, regions: impl IntoIterator<Item = S>) -> Self {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_industries<S: Into<String>>(
        mut self,
        industries: impl IntoIterator<Item = S>,
    ) -> Self {
        self.industries = industries.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_budget(mut self, budget: BudgetRange) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// The six scored dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Service,
    Budget,
    Location,
    Industry,
    Urgency,
    Behavioral,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Self::Service,
        Self::Budget,
        Self::Location,
        Self::Industry,
        Self::Urgency,
        Self::Behavioral,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Service => "Service",
            Self::Budget => "Budget",
            Self::Location => "Location",
            Self::Industry => "Industry",
            Self::Urgency => "Urgency",
            Self::Behavioral => "Behavioral",
        }
    }
}

/// Per-(lead, user) relevance, recomputed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceBreakdown {
    pub lead_id: Uuid,
    pub profile_version: u32,
    pub weights_version: u32,
    pub service: f64,
    pub budget: f64,
    pub location: f64,
    pub industry: f64,
    pub urgency: f64,
    pub behavioral: f64,
    /// Weighted sum, clamped to [0, 1]
    pub relevance: f64,
}

impl RelevanceBreakdown {
    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Service => self.service,
            Dimension::Budget => self.budget,
            Dimension::Location => self.location,
            Dimension::Industry => self.industry,
            Dimension::Urgency => self.urgency,
            Dimension::Behavioral => self.behavioral,
        }
    }

    pub fn sub_scores(&self) -> [(Dimension, f64); 6] {
        Dimension::ALL.map(|d| (d, self.get(d)))
    }
}

/// A lead paired with its computed relevance, as returned by ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredLead {
    pub lead: Lead,
    pub breakdown: RelevanceBreakdown,
}
