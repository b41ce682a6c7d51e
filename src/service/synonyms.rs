//! Term-to-schema synonym dictionary.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;

/// Maps business terms to real table or column names.
#[derive(Debug, Clone, Default)]
pub struct SynonymMap {
    /// Original dictionary, kept for display.
    raw: Map<String, Value>,
    /// Lower-cased term -> target.
    lookup: HashMap<String, String>,
}

impl SynonymMap {
    /// Load the dictionary from a JSON file.
    ///
    /// A missing or malformed file is logged and yields an empty map.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(raw) => match Self::from_json(&raw) {
                Ok(map) => {
                    info!("Loaded {} synonyms from {}", map.len(), path.display());
                    map
                }
                Err(e) => {
                    warn!("Could not parse synonyms file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Could not read synonyms file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse a `{ "term": "target" }` JSON object. Non-string targets are skipped.
    pub fn from_json(raw: &str) -> Result<Self> {
        let raw: Map<String, Value> = serde_json::from_str(raw)?;
        let lookup = raw
            .iter()
            .filter_map(|(term, target)| {
                target
                    .as_str()
                    .map(|t| (term.to_lowercase(), t.to_string()))
            })
            .collect();
        Ok(Self { raw, lookup })
    }

    /// Resolve a term, falling back to the term itself.
    pub fn resolve<'a>(&'a self, term: &'a str) -> &'a str {
        self.lookup
            .get(&term.to_lowercase())
            .map(String::as_str)
            .unwrap_or(term)
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Pretty-printed dictionary.
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_is_case_insensitive() {
        let map = SynonymMap::from_json(r#"{"clients": "customers", "Sales": "orders"}"#).unwrap();
        assert_eq!(map.resolve("CLIENTS"), "customers");
        assert_eq!(map.resolve("sales"), "orders");
        assert_eq!(map.resolve("products"), "products");
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = SynonymMap::load(Some(&dir.path().join("absent.json")));
        assert!(map.is_empty());
        assert!(SynonymMap::load(None).is_empty());
    }

    #[test]
    fn test_load_malformed_file_is_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(SynonymMap::load(Some(file.path())).is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"buyers": "customers"}}"#).unwrap();
        let map = SynonymMap::load(Some(file.path()));
        assert_eq!(map.len(), 1);
        assert_eq!(map.resolve("Buyers"), "customers");
    }

    #[test]
    fn test_pretty_json() {
        let map = SynonymMap::from_json(r#"{"a": "b"}"#).unwrap();
        assert_eq!(map.to_pretty_json().unwrap(), "{\n  \"a\": \"b\"\n}");
    }
}
