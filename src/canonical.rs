// Source URL canonicalisation: the stable cache key for every lookup.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A source URL with its query component removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip everything from the first `?` onwards.
///
/// Works on the raw string so that any input, parseable URL or not, maps to a key.
/// Appending a query to an input therefore never changes its key.
pub fn canonical(url: &str) -> CanonicalKey {
    let end = url.find('?').unwrap_or(url.len());
    CanonicalKey(url[..end].to_string())
}
