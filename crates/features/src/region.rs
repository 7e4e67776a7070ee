//! Region inference from free-text postal addresses.
//!
//! Region codes follow ISO 3166-2 style (`US-MN`). Only US states are
//! inferred from addresses; other codes can still appear on user profiles
//! and match exactly.

use serde::{Deserialize, Serialize};

/// US census macro-regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MacroRegion {
    Northeast,
    Midwest,
    South,
    West,
}

const STATES: &[(&str, MacroRegion)] = &[
    ("CT", MacroRegion::Northeast),
    ("ME", MacroRegion::Northeast),
    ("MA", MacroRegion::Northeast),
    ("NH", MacroRegion::Northeast),
    ("RI", MacroRegion::Northeast),
    ("VT", MacroRegion::Northeast),
    ("NJ", MacroRegion::Northeast),
    ("NY", MacroRegion::Northeast),
    ("PA", MacroRegion::Northeast),
    ("IL", MacroRegion::Midwest),
    ("IN", MacroRegion::Midwest),
    ("MI", MacroRegion::Midwest),
    ("OH", MacroRegion::Midwest),
    ("WI", MacroRegion::Midwest),
    ("IA", MacroRegion::Midwest),
    ("KS", MacroRegion::Midwest),
    ("MN", MacroRegion::Midwest),
    ("MO", MacroRegion::Midwest),
    ("NE", MacroRegion::Midwest),
    ("ND", MacroRegion::Midwest),
    ("SD", MacroRegion::Midwest),
    ("DE", MacroRegion::South),
    ("DC", MacroRegion::South),
    ("FL", MacroRegion::South),
    ("GA", MacroRegion::South),
    ("MD", MacroRegion::South),
    ("NC", MacroRegion::South),
    ("SC", MacroRegion::South),
    ("VA", MacroRegion::South),
    ("WV", MacroRegion::South),
    ("AL", MacroRegion::South),
    ("KY", MacroRegion::South),
    ("MS", MacroRegion::South),
    ("TN", MacroRegion::South),
    ("AR", MacroRegion::South),
    ("LA", MacroRegion::South),
    ("OK", MacroRegion::South),
    ("TX", MacroRegion::South),
    ("AZ", MacroRegion::West),
    ("CO", MacroRegion::West),
    ("ID", MacroRegion::West),
    ("MT", MacroRegion::West),
    ("NV", MacroRegion::West),
    ("NM", MacroRegion::West),
    ("UT", MacroRegion::West),
    ("WY", MacroRegion::West),
    ("AK", MacroRegion::West),
    ("CA", MacroRegion::West),
    ("HI", MacroRegion::West),
    ("OR", MacroRegion::West),
    ("WA", MacroRegion::West),
];

fn state(code: &str) -> Option<MacroRegion> {
    STATES
        .iter()
        .find(|(abbr, _)| *abbr == code)
        .map(|(_, region)| *region)
}

/// Infer a `US-XX` region code from an address.
///
/// Looks for an uppercase two-letter state abbreviation, scanning from the end
/// of the address where it normally sits.
pub fn infer_region(address: &str) -> Option<String> {
    address
        .split(|c: char| !c.is_ascii_alphanumeric())
        .rev()
        .filter(|token| token.len() == 2 && token.chars().all(|c| c.is_ascii_uppercase()))
        .find(|token| state(token).is_some())
        .map(|token| format!("US-{}", token))
}

/// Macro-region for a `US-XX` code; `None` for unknown or non-US codes.
pub fn macro_region(code: &str) -> Option<MacroRegion> {
    let upper = code.trim().to_uppercase();
    upper.strip_prefix("US-").and_then(state)
}
