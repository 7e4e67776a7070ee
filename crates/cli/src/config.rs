//! Engine configuration loaded from an optional JSON file.

use std::path::Path;

use anyhow::{Context, Result};
use leadmatch_features::KeyDefaults;
use leadmatch_quota::QuotaPolicy;
use leadmatch_relevance::ScoringConfig;
use serde::{Deserialize, Serialize};

/// All tunable policy in one place. Missing sections fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub keys: KeyDefaults,
    pub scoring: ScoringConfig,
    pub quota: QuotaPolicy,
}

impl EngineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };

        config
            .scoring
            .weights
            .validate()
            .context("scoring weights")?;

        Ok(config)
    }
}
