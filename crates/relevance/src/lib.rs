//! Relevance scoring and ranking of leads for a user profile.
//!
//! Each lead gets six independent sub-scores in [0, 1] (service, budget,
//! location, industry, urgency, behavioral) combined with a versioned set
//! of weights. Scoring is pure: the same lead, profile, behavior, time and
//! config always produce the same breakdown.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use leadmatch_features::{budget_band, detect_services, infer_region, macro_region};
use leadmatch_model::{
    non_blank, BudgetRange, Lead, RelevanceBreakdown, ScoredLead, ServiceType, Urgency,
    UserBehaviorSummary, UserProfile,
};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum ScoringError {
    #[error("Invalid scoring weights: {0}")]
    InvalidWeights(String),
}

/// Weight of each dimension in the final relevance. Must sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Bumped whenever the weighting policy changes
    pub version: u32,
    pub service: f64,
    pub budget: f64,
    pub location: f64,
    pub industry: f64,
    pub urgency: f64,
    pub behavioral: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            version: 1,
            service: 0.40,
            budget: 0.20,
            location: 0.15,
            industry: 0.10,
            urgency: 0.10,
            behavioral: 0.05,
        }
    }
}

impl ScoringWeights {
    fn as_array(&self) -> [f64; 6] {
        [
            self.service,
            self.budget,
            self.location,
            self.industry,
            self.urgency,
            self.behavioral,
        ]
    }

    /// Check that every weight is in [0, 1] and that they sum to 1.0.
    pub fn validate(&self) -> Result<(), ScoringError> {
        let weights = self.as_array();
        if let Some(w) = weights.iter().find(|w| !(0.0..=1.0).contains(*w)) {
            return Err(ScoringError::InvalidWeights(format!(
                "weight {} outside [0, 1]",
                w
            )));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ScoringError::InvalidWeights(format!(
                "weights sum to {:.4}, expected 1.0",
                sum
            )));
        }
        Ok(())
    }
}

/// Configuration for the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// Location score when the lead is in the same macro-region as a target
    pub macro_region_score: f64,
    /// Budget overhang, as a fraction of the accepted maximum, at which the budget score hits 0
    pub budget_max_gap_ratio: f64,
    /// Days for the urgency score to halve at `Urgency::Soon`
    pub recency_half_life_days: f64,
    /// Budget score when either side's budget is unknown
    pub neutral_budget_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            macro_region_score: 0.5,
            budget_max_gap_ratio: 1.0,
            recency_half_life_days: 14.0,
            neutral_budget_score: 0.5,
        }
    }
}

/// Signals derived from a lead's raw fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadSignals {
    pub services: BTreeSet<ServiceType>,
    pub budget: Option<BudgetRange>,
    pub region: Option<String>,
    pub category: Option<String>,
}

impl LeadSignals {
    pub fn from_lead(lead: &Lead) -> Self {
        let text = [lead.business_name.as_deref(), lead.description.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let category = non_blank(lead.category.as_deref());

        let services = detect_services(&text, category.unwrap_or(""));
        let budget = budget_band(&services);

        Self {
            budget,
            services,
            region: lead.address.as_deref().and_then(infer_region),
            category: category.map(|c| c.to_lowercase()),
        }
    }
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Jaccard overlap of offered and detected services; 0 if either is empty.
pub fn service_score(lead: &BTreeSet<ServiceType>, offered: &BTreeSet<ServiceType>) -> f64 {
    if lead.is_empty() || offered.is_empty() {
        return 0.0;
    }
    let intersection = lead.intersection(offered).count() as f64;
    let union = lead.union(offered).count() as f64;
    intersection / union
}

/// 1.0 when the lead's band fits inside the accepted range, decaying linearly
/// with the overhang until `max_gap_ratio` of the accepted maximum.
pub fn budget_score(
    lead: Option<&BudgetRange>,
    accepted: Option<&BudgetRange>,
    config: &ScoringConfig,
) -> f64 {
    let (Some(lead), Some(accepted)) = (lead, accepted) else {
        return clamp01(config.neutral_budget_score);
    };
    if accepted.contains(lead) {
        return 1.0;
    }
    if config.budget_max_gap_ratio <= 0.0 {
        return 0.0;
    }
    let gap_ratio = accepted.overhang(lead) as f64 / accepted.max.max(1) as f64;
    clamp01(1.0 - gap_ratio / config.budget_max_gap_ratio)
}

/// 1.0 for an exact region match, the macro-region constant for a neighbour, else 0.
pub fn location_score(
    lead_region: Option<&str>,
    targets: &BTreeSet<String>,
    config: &ScoringConfig,
) -> f64 {
    let Some(region) = lead_region else {
        return 0.0;
    };
    if targets.iter().any(|t| t.trim().eq_ignore_ascii_case(region)) {
        return 1.0;
    }
    match macro_region(region) {
        Some(lead_macro) if targets.iter().any(|t| macro_region(t) == Some(lead_macro)) => {
            clamp01(config.macro_region_score)
        }
        _ => 0.0,
    }
}

pub fn industry_score(category: Option<&str>, industries: &BTreeSet<String>) -> f64 {
    match category {
        Some(c) if industries.iter().any(|i| i.trim().eq_ignore_ascii_case(c)) => 1.0,
        _ => 0.0,
    }
}

/// Exponential recency decay scaled by how often the lead has been re-sighted.
///
/// Non-increasing in lead age for a fixed lead.
pub fn urgency_score(
    lead: &Lead,
    preference: Urgency,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> f64 {
    let half_life = match preference {
        Urgency::Immediate => config.recency_half_life_days * 0.5,
        Urgency::Soon => config.recency_half_life_days,
        Urgency::Flexible => config.recency_half_life_days * 2.0,
    };
    if half_life <= 0.0 {
        return 0.0;
    }

    let age_days = ((now - lead.created_at).num_seconds().max(0)) as f64 / 86_400.0;
    let recency = 0.5_f64.powf(age_days / half_life);
    let sightings = lead.merge_count.min(4) as f64 / 4.0;

    clamp01(recency * (0.8 + 0.2 * sightings))
}

/// Engagement rate (unlocks plus contacts per view) in the lead's bucket.
/// 0 on cold start.
pub fn behavioral_score(
    category: Option<&str>,
    region: Option<&str>,
    behavior: &UserBehaviorSummary,
) -> f64 {
    let Some(category) = category else {
        return 0.0;
    };
    match behavior.totals_for(category, region) {
        Some((views, engaged)) if views > 0 => clamp01(engaged as f64 / views as f64),
        _ => 0.0,
    }
}

/// Score one lead for one user.
pub fn score(
    lead: &Lead,
    profile: &UserProfile,
    behavior: &UserBehaviorSummary,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> RelevanceBreakdown {
    let signals = LeadSignals::from_lead(lead);
    score_signals(lead, &signals, profile, behavior, now, config)
}

/// Score one lead whose signals were already derived.
pub fn score_signals(
    lead: &Lead,
    signals: &LeadSignals,
    profile: &UserProfile,
    behavior: &UserBehaviorSummary,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> RelevanceBreakdown {
    let region = signals.region.as_deref();
    let category = signals.category.as_deref();

    let service = service_score(&signals.services, &profile.services);
    let budget = budget_score(signals.budget.as_ref(), profile.budget.as_ref(), config);
    let location = location_score(region, &profile.regions, config);
    let industry = industry_score(category, &profile.industries);
    let urgency = urgency_score(lead, profile.urgency, now, config);
    let behavioral = behavioral_score(category, region, behavior);

    let w = &config.weights;
    let relevance = clamp01(
        w.service * service
            + w.budget * budget
            + w.location * location
            + w.industry * industry
            + w.urgency * urgency
            + w.behavioral * behavioral,
    );

    RelevanceBreakdown {
        lead_id: lead.id,
        profile_version: profile.version,
        weights_version: w.version,
        service,
        budget,
        location,
        industry,
        urgency,
        behavioral,
        relevance,
    }
}

/// Score every lead, drop those below `min_relevance`, and sort best first.
///
/// Ties are broken by lead id so the order is reproducible.
pub fn rank(
    leads: &[Lead],
    profile: &UserProfile,
    now: DateTime<Utc>,
    config: &ScoringConfig,
    min_relevance: f64,
) -> Vec<ScoredLead> {
    let mut scored: Vec<ScoredLead> = leads
        .iter()
        .map(|lead| ScoredLead {
            breakdown: score(lead, profile, &profile.behavior, now, config),
            lead: lead.clone(),
        })
        .filter(|s| s.breakdown.relevance >= min_relevance)
        .collect();

    scored.sort_by(|a, b| {
        b.breakdown
            .relevance
            .partial_cmp(&a.breakdown.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.lead.id.cmp(&b.lead.id))
    });

    scored
}

/// Cache key; a breakdown is only reused for the same lead state, profile
/// version, behavior, scoring config and day (urgency depends on the date).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    lead_id: Uuid,
    lead_merge_count: u32,
    user_id: String,
    profile_version: u32,
    weights_version: u32,
    config_fingerprint: u64,
    behavior_fingerprint: u64,
    day: NaiveDate,
}

fn config_fingerprint(config: &ScoringConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.weights.version.hash(&mut hasher);
    let values = config.weights.as_array().into_iter().chain([
        config.macro_region_score,
        config.budget_max_gap_ratio,
        config.recency_half_life_days,
        config.neutral_budget_score,
    ]);
    for value in values {
        value.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

fn behavior_fingerprint(behavior: &UserBehaviorSummary) -> u64 {
    let mut hasher = DefaultHasher::new();
    for bucket in &behavior.buckets {
        bucket.category.hash(&mut hasher);
        bucket.region.hash(&mut hasher);
        (bucket.views, bucket.unlocks, bucket.contacts).hash(&mut hasher);
    }
    hasher.finish()
}

/// LRU cache of computed breakdowns.
pub struct RelevanceCache {
    entries: Mutex<LruCache<CacheKey, RelevanceBreakdown>>,
}

impl RelevanceCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, RelevanceBreakdown>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the cached breakdown or compute and remember it.
    pub fn get_or_score(
        &self,
        lead: &Lead,
        profile: &UserProfile,
        behavior: &UserBehaviorSummary,
        now: DateTime<Utc>,
        config: &ScoringConfig,
    ) -> RelevanceBreakdown {
        let key = CacheKey {
            lead_id: lead.id,
            lead_merge_count: lead.merge_count,
            user_id: profile.user_id.clone(),
            profile_version: profile.version,
            weights_version: config.weights.version,
            config_fingerprint: config_fingerprint(config),
            behavior_fingerprint: behavior_fingerprint(behavior),
            day: now.date_naive(),
        };

        if let Some(hit) = self.lock().get(&key) {
            return hit.clone();
        }

        let breakdown = score(lead, profile, behavior, now, config);
        self.lock().put(key, breakdown.clone());
        breakdown
    }

    /// Drop every entry computed for `user_id`.
    pub fn invalidate_user(&self, user_id: &str) {
        let mut entries = self.lock();
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(k, _)| k.user_id == user_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
