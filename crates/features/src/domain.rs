//! URL to canonical domain normalization.
//!
//! The registrable domain is approximated by the last two host labels.
//! Multi-label public suffixes are not special-cased, so `a.co.uk` and
//! `b.co.uk` both reduce to `co.uk`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Host, Url};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// A lowercase host with `www.` stripped, reduced to two labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalDomain(String);

impl CanonicalDomain {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platforms that host many unrelated businesses under one domain.
const MULTI_TENANT_DOMAINS: &[&str] = &[
    "facebook.com",
    "fb.com",
    "instagram.com",
    "linkedin.com",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "youtube.com",
    "pinterest.com",
    "yelp.com",
    "linktr.ee",
    "etsy.com",
    "google.com",
    "business.site",
    "wixsite.com",
    "wordpress.com",
    "blogspot.com",
    "squarespace.com",
    "godaddysites.com",
    "weebly.com",
];

/// Path segments that precede the tenant slug on some platforms (`/biz/acme`).
const TENANT_PATH_PREFIXES: &[&str] = &[
    "biz", "c", "channel", "companies", "company", "in", "page", "pages", "people", "shop",
    "user", "view",
];

/// Platform subdomains that do not name a tenant.
const PLATFORM_SUBDOMAINS: &[&str] = &["business", "m", "maps", "mobile", "sites", "touch", "web"];

fn with_scheme(raw: &str) -> String {
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

fn last_two_labels(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() >= 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        labels.join(".")
    }
}

/// Parse `raw` and return its lowercase host without `www.`.
fn parse_host(raw: &str) -> Result<(Url, String, bool), DomainError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidUrl(raw.to_string()));
    }

    let parsed =
        Url::parse(&with_scheme(trimmed)).map_err(|_| DomainError::InvalidUrl(raw.to_string()))?;

    let (host, is_ip) = match parsed.host() {
        Some(Host::Domain(d)) => (d.to_lowercase(), false),
        Some(Host::Ipv4(ip)) => (ip.to_string(), true),
        Some(Host::Ipv6(ip)) => (ip.to_string(), true),
        None => return Err(DomainError::InvalidUrl(raw.to_string())),
    };

    let host = strip_www(&host).to_string();
    if host.is_empty() {
        return Err(DomainError::InvalidUrl(raw.to_string()));
    }

    Ok((parsed, host, is_ip))
}

/// Strict normalization; fails on text that does not parse as a URL with a host.
pub fn try_normalize(raw: &str) -> Result<CanonicalDomain, DomainError> {
    let (_, host, is_ip) = parse_host(raw)?;
    if is_ip {
        return Ok(CanonicalDomain(host));
    }
    Ok(CanonicalDomain(last_two_labels(&host)))
}

/// Best-effort host from text that `Url` rejects: drop the scheme and any
/// userinfo, cut at the first path, query, fragment or port delimiter.
fn fallback_host(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let rest = lowered
        .split_once("://")
        .map_or(lowered.as_str(), |(_, rest)| rest);
    let authority = rest
        .split(|c| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or(rest);
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    let host = host.split(':').next().unwrap_or(host);
    last_two_labels(strip_www(host.trim()))
}

/// Total normalization over arbitrary text.
///
/// Falls back to the lowercased host-like part of the input when it does not
/// parse as a URL. The result always normalizes to itself.
pub fn normalize(raw: &str) -> CanonicalDomain {
    try_normalize(raw).unwrap_or_else(|_| {
        let host = fallback_host(raw);
        try_normalize(&host).unwrap_or(CanonicalDomain(host))
    })
}

pub fn is_multi_tenant(domain: &CanonicalDomain) -> bool {
    MULTI_TENANT_DOMAINS.contains(&domain.as_str())
}

/// Canonical domain plus, on multi-tenant platforms, the tenant slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteKey {
    pub domain: CanonicalDomain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

/// Build the site key for a URL.
///
/// The tenant is the subdomain label (`acme.wixsite.com`) when present, else
/// the first meaningful path segment (`facebook.com/acme`).
pub fn site_key(raw: &str) -> Result<SiteKey, DomainError> {
    let (parsed, host, is_ip) = parse_host(raw)?;
    if is_ip {
        return Ok(SiteKey {
            domain: CanonicalDomain(host),
            tenant: None,
        });
    }

    let domain = CanonicalDomain(last_two_labels(&host));
    if !is_multi_tenant(&domain) {
        return Ok(SiteKey {
            domain,
            tenant: None,
        });
    }

    let subdomain = host
        .strip_suffix(domain.as_str())
        .map(|s| s.trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .and_then(|s| s.split('.').last())
        .filter(|s| !PLATFORM_SUBDOMAINS.contains(s))
        .map(str::to_string);

    let tenant = subdomain.or_else(|| {
        parsed.path_segments().and_then(|mut segments| {
            segments
                .find(|s| !s.is_empty() && !TENANT_PATH_PREFIXES.contains(s))
                .map(|s| s.trim_start_matches('@').to_lowercase())
        })
    });

    Ok(SiteKey { domain, tenant })
}

/// Whether two URLs point at the same business site.
///
/// Equal canonical domains are enough, except on multi-tenant platforms where
/// the tenant slugs must also be present and equal.
pub fn same_site(a: &str, b: &str) -> bool {
    match (site_key(a), site_key(b)) {
        (Ok(a), Ok(b)) => {
            if a.domain != b.domain {
                return false;
            }
            if is_multi_tenant(&a.domain) {
                return matches!((&a.tenant, &b.tenant), (Some(x), Some(y)) if x == y);
            }
            true
        }
        _ => false,
    }
}
