//! Composite state identifiers.
//!
//! A resource persists a single opaque `id`. Resources keyed by more than one
//! remote identifier (organization + team, project + access-list entry) pack
//! the parts into that string: each part becomes `base64(key):base64(value)`
//! and parts are joined with `-`, in key order.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::warn;

use crate::error::ProviderError;

const PART_SEPARATOR: char = '-';
const KEY_VALUE_SEPARATOR: char = ':';

/// Named parts of a composite identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateId {
    parts: BTreeMap<String, String>,
}

impl StateId {
    /// Create an empty identifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a part.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.insert(key.into(), value.into());
        self
    }

    /// Look up a part.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.parts.get(key).map(String::as_str)
    }

    /// Look up a part that the caller cannot proceed without.
    pub fn require(&self, key: &str) -> Result<&str, ProviderError> {
        self.get(key).filter(|v| !v.is_empty()).ok_or_else(|| {
            ProviderError::InvalidRequest(format!("state ID is missing '{}'", key))
        })
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the identifier has no parts.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Encode into the persisted string form.
    pub fn encode(&self) -> String {
        self.parts
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}{}{}",
                    STANDARD.encode(k),
                    KEY_VALUE_SEPARATOR,
                    STANDARD.encode(v)
                )
            })
            .collect::<Vec<_>>()
            .join(&PART_SEPARATOR.to_string())
    }

    /// Decode the persisted string form.
    ///
    /// Segments that are not `key:value` pairs of valid base64 are skipped, so
    /// malformed input produces a partial or empty identifier instead of an
    /// error. Callers use [`StateId::require`] to reject what is missing.
    pub fn decode(encoded: &str) -> Self {
        let mut parts = BTreeMap::new();
        for segment in encoded.split(PART_SEPARATOR).filter(|s| !s.is_empty()) {
            let Some((key, value)) = segment.split_once(KEY_VALUE_SEPARATOR) else {
                warn!(segment, "state ID segment has no key/value separator");
                continue;
            };
            match (decode_part(key), decode_part(value)) {
                (Some(k), Some(v)) => {
                    parts.insert(k, v);
                },
                _ => warn!(segment, "state ID segment is not valid base64"),
            }
        }
        Self { parts }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StateId {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            parts: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn decode_part(part: &str) -> Option<String> {
    let bytes = STANDARD.decode(part).ok()?;
    String::from_utf8(bytes).ok()
}

/// Split an import identifier of the form `{first}-{rest}` at the first hyphen.
///
/// Both sides must be non-empty; `rest` may itself contain hyphens. An empty
/// side such as `-t1` or `o1-` is rejected here as a format error, rather
/// than surfacing later as a failed lookup of an empty id.
pub fn split_import_id<'a>(id: &'a str, format_hint: &str) -> Result<(&'a str, &'a str), ProviderError> {
    match id.split_once(PART_SEPARATOR) {
        Some((first, rest)) if !first.is_empty() && !rest.is_empty() => Ok((first, rest)),
        _ => Err(ProviderError::InvalidRequest(format!(
            "import format error: got '{}', expected {}",
            id, format_hint
        ))),
    }
}
