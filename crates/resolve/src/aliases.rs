//! Known aliases for frequently mentioned actors and policies.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::normalizer::normalize;

/// Canonical label followed by the names it is known under.
const ALIAS_TABLE: &[(&str, &[&str])] = &[
    // Actors
    (
        "United States",
        &[
            "US",
            "USA",
            "U.S.",
            "U.S.A.",
            "America",
            "United States of America",
        ],
    ),
    (
        "United Kingdom",
        &[
            "UK",
            "U.K.",
            "Britain",
            "Great Britain",
            "Great Britain and Northern Ireland",
        ],
    ),
    ("European Union", &["EU", "E.U."]),
    ("United Nations", &["UN", "U.N."]),
    ("Israel", &["State of Israel"]),
    ("Russia", &["Russian Federation"]),
    ("China", &["People's Republic of China", "PRC"]),
    (
        "US Congress",
        &["United States Congress", "Congress", "U.S. Congress"],
    ),
    ("US Senate", &["United States Senate", "Senate", "U.S. Senate"]),
    (
        "US House of Representatives",
        &["House of Representatives", "House", "US House"],
    ),
    ("White House", &["Executive Office of the President"]),
    ("NATO", &["North Atlantic Treaty Organization"]),
    (
        "World Bank",
        &["International Bank for Reconstruction and Development"],
    ),
    ("International Monetary Fund", &["IMF"]),
    ("World Health Organization", &["WHO"]),
    ("European Central Bank", &["ECB"]),
    ("Federal Reserve", &["Fed", "Federal Reserve System"]),
    (
        "Supreme Court",
        &["US Supreme Court", "United States Supreme Court"],
    ),
    ("Department of Defense", &["DoD", "Pentagon"]),
    // Policies
    ("Sanctions", &["Economic Sanctions", "Trade Sanctions"]),
    (
        "Trade Policy",
        &["Trade Agreement", "Trade Deal", "Free Trade Agreement"],
    ),
    (
        "Foreign Aid",
        &["International Aid", "Development Assistance", "Foreign Assistance"],
    ),
    (
        "Military Aid",
        &["Security Assistance", "Defense Assistance", "Military Assistance"],
    ),
];

/// Normalized name -> canonical label. Articles and punctuation are handled
/// by normalization, so "the U.S." and "US" share one key.
static LOOKUP: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    let mut lookup = HashMap::new();
    for (canonical, aliases) in ALIAS_TABLE {
        lookup.insert(normalize(canonical), *canonical);
        for alias in *aliases {
            lookup.entry(normalize(alias)).or_insert(*canonical);
        }
    }
    lookup
});

/// Canonical label for a known name, matched case- and article-insensitively.
pub fn canonical_label(label: &str) -> Option<&'static str> {
    LOOKUP.get(&normalize(label)).copied()
}
