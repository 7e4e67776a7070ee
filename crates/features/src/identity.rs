//! Identity key generation for raw business records.
//!
//! Keys are `source_domain_name` when a website is known and
//! `source_name_address` otherwise, with every part slugified.

use std::fmt;

use leadmatch_model::{non_blank, RawBusinessRecord};
use serde::{Deserialize, Serialize};

use crate::domain::try_normalize;

/// Placeholders substituted for missing record fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyDefaults {
    /// Source tag used when the record carries none
    pub source: String,
    /// Name used when the record carries none
    pub unknown_name: String,
    /// Maximum length of the slugified address part
    pub address_slug_len: usize,
    /// Category assigned to new leads that arrive without one
    pub category: Option<String>,
}

impl Default for KeyDefaults {
    fn default() -> Self {
        Self {
            source: "google_maps".to_string(),
            unknown_name: "unknown".to_string(),
            address_slug_len: 50,
            category: None,
        }
    }
}

/// Deterministic deduplication key for a business.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase and replace every character outside `[a-zA-Z0-9]` with `_`.
pub fn slugify(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Derive the identity key for `record`. Never fails.
pub fn generate_key(record: &RawBusinessRecord, defaults: &KeyDefaults) -> IdentityKey {
    let source = record
        .source
        .as_ref()
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|| defaults.source.clone());
    let source = slugify(&source);

    let name = slugify(non_blank(record.name.as_deref()).unwrap_or(defaults.unknown_name.as_str()));

    if let Some(website) = non_blank(record.website.as_deref()) {
        let site = match try_normalize(website) {
            Ok(domain) => slugify(domain.as_str()),
            Err(_) => slugify(website),
        };
        return IdentityKey(format!("{}_{}_{}", source, site, name));
    }

    let mut address = slugify(non_blank(record.address.as_deref()).unwrap_or(""));
    address.truncate(defaults.address_slug_len);

    IdentityKey(format!("{}_{}_{}", source, name, address))
}
