//! Content-derived entity tags.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::Hasher;

/// Fingerprint of an entry's raw value bytes.
///
/// Identical bytes always give the identical tag. The hash is not
/// collision-resistant and is not meant to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityTag(u64);

impl EntityTag {
    pub fn of(value: &[u8]) -> Self {
        let mut hasher = DefaultHasher::new();
        hasher.write(value);
        Self(hasher.finish())
    }

    /// Whether an `If-Match` / `If-None-Match` header names this tag.
    ///
    /// Accepts `*`, comma-separated lists, quoted or bare tags and weak (`W/`)
    /// tags.
    pub fn matches_header(&self, header: &str) -> bool {
        let own = self.0.to_string();
        header.split(',').map(str::trim).any(|candidate| {
            if candidate == "*" {
                return true;
            }
            let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
            candidate.trim_matches('"') == own
        })
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}
