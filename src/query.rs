//! Query string canonicalization.
//!
//! The canonical form is what gets hashed, so the rules here are
//! deliberately literal:
//! 1. Strip a leading `?`, split on `&`, split each segment on the first `=`
//! 2. Drop segments with no `=` or an empty name
//! 3. Fold repeated names into one value joined with `,`
//! 4. Serialize in first-occurrence order, without re-encoding

use url::{ParseError, Url};

use crate::errors::{Result, SealError};

/// An ordered name → value mapping parsed from a query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMap {
    pairs: Vec<(String, String)>,
}

impl QueryMap {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw query string (with or without the leading `?`).
    pub fn parse(query: &str) -> Self {
        let mut map = Self::new();
        let query = query.strip_prefix('?').unwrap_or(query);
        if query.is_empty() {
            return map;
        }
        for part in query.split('&') {
            if let Some((name, value)) = part.split_once('=') {
                if name.is_empty() {
                    continue;
                }
                map.append(name, value);
            }
        }
        map
    }

    /// Add a value under `name`.
    ///
    /// A name that is already present keeps its position and gets the new
    /// value appended after a comma, exactly as [`QueryMap::parse`] folds
    /// repeated parameters.
    pub fn append(&mut self, name: &str, value: &str) {
        match self.pairs.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => {
                existing.push(',');
                existing.push_str(value);
            }
            None => self.pairs.push((name.to_string(), value.to_string())),
        }
    }

    /// Remove `name`, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self.pairs.iter().position(|(n, _)| n == name)?;
        Some(self.pairs.remove(pos).1)
    }

    /// Look up the value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterate over `(name, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Serialize to `name=value&...`, skipping every name in `exclude`.
    pub fn serialize(&self, exclude: &[&str]) -> String {
        self.pairs
            .iter()
            .filter(|(n, _)| !exclude.contains(&n.as_str()))
            .map(|(n, v)| format!("{n}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Parse a raw query string into a [`QueryMap`].
pub fn parse_query(query: &str) -> QueryMap {
    QueryMap::parse(query)
}

/// Serialize `map`, leaving out the names in `exclude`.
pub fn serialize_query(map: &QueryMap, exclude: &[&str]) -> String {
    map.serialize(exclude)
}

/// Parse `input` and insist that it is an absolute URL with an authority.
///
/// A relative URL is never resolved against an implicit base.
pub fn parse_absolute_url(input: &str) -> Result<Url> {
    if input.trim().is_empty() {
        return Err(SealError::invalid_argument("a URL is required"));
    }
    let url = match Url::parse(input) {
        Ok(url) => url,
        Err(ParseError::RelativeUrlWithoutBase) => {
            return Err(SealError::invalid_state(format!(
                "URL must be absolute: {input}"
            )))
        }
        Err(e) => {
            return Err(SealError::invalid_argument(format!(
                "invalid URL '{input}': {e}"
            )))
        }
    };
    if url.cannot_be_a_base() {
        return Err(SealError::invalid_state(format!(
            "URL has no authority or path to protect: {input}"
        )));
    }
    Ok(url)
}

/// Fail if canonicalizing `query` would lose anything the caller sent.
///
/// Valueless segments (`print`), nameless segments (`=x`) and repeated
/// names cannot be carried through the canonical form unchanged, so they
/// are rejected instead of silently dropped or folded.  Names in
/// `replaced` are about to be overwritten and are not checked.  Empty
/// segments (`a=1&&b=2`) carry nothing and are allowed.
pub(crate) fn ensure_canonical(query: &str, replaced: &[&str]) -> Result<()> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut seen: Vec<&str> = Vec::new();
    for part in query.split('&').filter(|p| !p.is_empty()) {
        let (name, has_value) = match part.split_once('=') {
            Some((name, _)) => (name, true),
            None => (part, false),
        };
        if replaced.contains(&name) {
            continue;
        }
        if !has_value || name.is_empty() {
            return Err(SealError::invalid_argument(format!(
                "query segment '{part}' is not a name=value pair and cannot be protected"
            )));
        }
        if seen.contains(&name) {
            return Err(SealError::invalid_argument(format!(
                "query parameter '{name}' is repeated and cannot be protected"
            )));
        }
        seen.push(name);
    }
    Ok(())
}

/// Check that `name` can be used as a query parameter name verbatim.
pub(crate) fn validate_parameter_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SealError::invalid_argument(
            "query parameter name must not be empty",
        ));
    }
    if name.contains(['&', '=', '#', '?']) {
        return Err(SealError::invalid_argument(format!(
            "query parameter name '{name}' contains a reserved character"
        )));
    }
    Ok(())
}
