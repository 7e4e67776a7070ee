//! Explanation generation for relevance scores and merge decisions.
//!
//! Converts breakdowns and audit entries into human-readable text suitable
//! for display next to a ranked lead or in a merge history view.

use leadmatch_model::{Dimension, Lead, MergeLogEntry, MergeReason, RelevanceBreakdown, UserProfile};
use leadmatch_relevance::LeadSignals;
use serde::{Deserialize, Serialize};

/// A structured explanation for one scored dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub dimension: Dimension,

    /// Short summary (1 line)
    pub summary: String,

    /// Detailed explanation (1-2 sentences)
    pub detail: String,

    /// The sub-score (0.0 - 1.0)
    pub strength: f64,

    /// Evidence items supporting this explanation
    pub evidence: Vec<EvidenceItem>,
}

/// A piece of evidence behind a sub-score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub kind: String,

    pub value: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl EvidenceItem {
    fn new(kind: &str, value: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            value: value.into(),
            context: None,
        }
    }
}

/// Explain every dimension of a breakdown.
pub fn explain_breakdown(
    breakdown: &RelevanceBreakdown,
    lead: &Lead,
    profile: &UserProfile,
) -> Vec<Explanation> {
    let signals = LeadSignals::from_lead(lead);
    Dimension::ALL
        .iter()
        .map(|d| explain_dimension(*d, breakdown.get(*d), &signals, profile))
        .collect()
}

/// Explain a single dimension given its sub-score and the lead's signals.
pub fn explain_dimension(
    dimension: Dimension,
    strength: f64,
    signals: &LeadSignals,
    profile: &UserProfile,
) -> Explanation {
    match dimension {
        Dimension::Service => {
            let shared: Vec<_> = signals
                .services
                .intersection(&profile.services)
                .map(|s| s.label())
                .collect();
            let (summary, detail) = if shared.is_empty() {
                (
                    "No service overlap".to_string(),
                    "None of the services you offer were detected for this business.".to_string(),
                )
            } else {
                (
                    format!("Needs {}", shared.join(", ")),
                    format!(
                        "{} of the {} services involved match what you offer.",
                        shared.len(),
                        signals.services.union(&profile.services).count()
                    ),
                )
            };
            Explanation {
                dimension,
                summary,
                detail,
                strength,
                evidence: signals
                    .services
                    .iter()
                    .map(|s| EvidenceItem::new("detected_service", s.label()))
                    .collect(),
            }
        }

        Dimension::Budget => {
            let (summary, detail) = match (signals.budget, profile.budget) {
                (Some(lead), Some(accepted)) if accepted.contains(&lead) => (
                    "Budget fits".to_string(),
                    format!(
                        "Typical spend of {}-{} is inside your {}-{} range.",
                        lead.min, lead.max, accepted.min, accepted.max
                    ),
                ),
                (Some(lead), Some(accepted)) => (
                    "Budget partly outside range".to_string(),
                    format!(
                        "Typical spend of {}-{} extends {} beyond your {}-{} range.",
                        lead.min,
                        lead.max,
                        accepted.overhang(&lead),
                        accepted.min,
                        accepted.max
                    ),
                ),
                _ => (
                    "Budget unknown".to_string(),
                    "Not enough information to compare budgets; a neutral score was used."
                        .to_string(),
                ),
            };
            Explanation {
                dimension,
                summary,
                detail,
                strength,
                evidence: signals
                    .budget
                    .map(|b| vec![EvidenceItem::new("budget_band", format!("{}-{}", b.min, b.max))])
                    .unwrap_or_default(),
            }
        }

        Dimension::Location => {
            let summary = match (signals.region.as_deref(), strength) {
                (None, _) => "Location unknown".to_string(),
                (Some(r), s) if s >= 1.0 => format!("In {}", r),
                (Some(r), s) if s > 0.0 => format!("Near your regions ({})", r),
                (Some(r), _) => format!("Outside your regions ({})", r),
            };
            Explanation {
                dimension,
                detail: format!(
                    "Your target regions: {}.",
                    join_or_none(profile.regions.iter().map(String::as_str))
                ),
                summary,
                strength,
                evidence: signals
                    .region
                    .iter()
                    .map(|r| EvidenceItem::new("region", r.clone()))
                    .collect(),
            }
        }

        Dimension::Industry => Explanation {
            dimension,
            summary: if strength > 0.0 {
                "Target industry".to_string()
            } else {
                "Outside target industries".to_string()
            },
            detail: format!(
                "Listed as '{}'; your industries: {}.",
                signals.category.as_deref().unwrap_or("uncategorized"),
                join_or_none(profile.industries.iter().map(String::as_str))
            ),
            strength,
            evidence: signals
                .category
                .iter()
                .map(|c| EvidenceItem::new("category", c.clone()))
                .collect(),
        },

        Dimension::Urgency => Explanation {
            dimension,
            summary: if strength >= 0.5 {
                "Fresh lead".to_string()
            } else {
                "Older lead".to_string()
            },
            detail: format!(
                "Recency score {:.0}% at your {:?} urgency preference.",
                strength * 100.0,
                profile.urgency
            ),
            strength,
            evidence: vec![],
        },

        Dimension::Behavioral => Explanation {
            dimension,
            summary: if strength > 0.0 {
                "Similar leads engaged before".to_string()
            } else {
                "No engagement history".to_string()
            },
            detail: if strength > 0.0 {
                format!(
                    "You unlocked or contacted {:.0}% of similar leads you viewed.",
                    strength * 100.0
                )
            } else {
                "No past interactions with leads in this category and region.".to_string()
            },
            strength,
            evidence: vec![],
        },
    }
}

fn join_or_none<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let joined = items.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "none".to_string()
    } else {
        joined
    }
}

/// One-line summary of a breakdown.
pub fn summarize_relevance(breakdown: &RelevanceBreakdown) -> String {
    let level = if breakdown.relevance >= 0.7 {
        "STRONG MATCH"
    } else if breakdown.relevance >= 0.4 {
        "GOOD MATCH"
    } else {
        "WEAK MATCH"
    };

    let strong: Vec<_> = breakdown
        .sub_scores()
        .iter()
        .filter(|(_, v)| *v >= 0.5)
        .map(|(d, _)| d.label())
        .collect();

    if strong.is_empty() {
        format!("{} ({:.2})", level, breakdown.relevance)
    } else {
        format!("{} ({:.2}): {}", level, breakdown.relevance, strong.join(", "))
    }
}

/// Describe a merge audit entry.
pub fn describe_merge(entry: &MergeLogEntry) -> String {
    let why = match entry.reason {
        MergeReason::SameDomain => "same website",
        MergeReason::SameNameAndAddressFuzzyMatch => "same name and address",
    };
    let filled = if entry.filled_fields.is_empty() {
        "no new fields".to_string()
    } else {
        format!("filled {}", entry.filled_fields.join(", "))
    };
    format!(
        "{} merged into lead {} ({}): {}",
        entry.merged_at.format("%Y-%m-%d %H:%M"),
        entry.lead_id,
        why,
        filled
    )
}
