//! Element mapping tables.
//!
//! An [`ElementMap`] tells the pipeline workers what to do with each key:
//! rename the field to a predicate, translate its value through a lookup
//! table, or drop it. Tables are JSON objects keyed by key spec:
//!
//! ```json
//! {
//!   "001":     { "kind": "predicate", "predicate": "identifier" },
//!   "245$1$0": { "kind": "predicate", "predicate": "title",
//!                "subfields": { "a": "main", "c": "responsibility" } },
//!   "041":     { "kind": "lookup", "predicate": "language",
//!                "table": { "ger": "German" } },
//!   "035":     { "kind": "drop" }
//! }
//! ```
//!
//! A key is looked up by its full spec (`245$1$0$a`), then its field spec
//! (`245$1$0`), then its bare tag (`245`).
//!
//! # Value remapping
//!
//! A `lookup` entry translates a value by trying, in order:
//!
//! 1. the whole value in `table`
//! 2. the value's first word in `table`
//! 3. each of `patterns` in turn, matched case-insensitively against the
//!    whole value
//! 4. `default`
//!
//! A translated value keeps its original under `<property>Source`:
//!
//! ```json
//! { "kind": "lookup", "predicate": "language",
//!   "table": { "ger": "German" },
//!   "patterns": [ { "pattern": "eng.*", "value": "English" } ],
//!   "indicators": { "07": "languageCode" } }
//! ```
//!
//! `indicators` picks another predicate for fields carrying the given
//! indicator characters.

use crate::error::{MarcError, Result};
use crate::field::FieldCollection;
use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// A value pattern and its replacement.
///
/// The pattern is case-insensitive and must match the whole value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PatternEntry", into = "PatternEntry")]
pub struct ValuePattern {
    pattern: String,
    regex: Regex,
    value: String,
}

#[derive(Serialize, Deserialize)]
struct PatternEntry {
    pattern: String,
    value: String,
}

impl ValuePattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns `MarcError::InvalidMapping` if the pattern is not a valid regex.
    pub fn new(pattern: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let regex = RegexBuilder::new(&format!("^(?:{pattern})$"))
            .case_insensitive(true)
            .build()
            .map_err(|e| {
                MarcError::InvalidMapping(format!("invalid value pattern {pattern}: {e}"))
            })?;
        Ok(ValuePattern {
            pattern,
            regex,
            value: value.into(),
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns true if the pattern matches the whole value.
    #[must_use]
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for ValuePattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.value == other.value
    }
}

impl Eq for ValuePattern {}

impl TryFrom<PatternEntry> for ValuePattern {
    type Error = MarcError;

    fn try_from(entry: PatternEntry) -> Result<Self> {
        ValuePattern::new(entry.pattern, entry.value)
    }
}

impl From<ValuePattern> for PatternEntry {
    fn from(pattern: ValuePattern) -> Self {
        PatternEntry {
            pattern: pattern.pattern,
            value: pattern.value,
        }
    }
}

/// What to do with the pairs of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementMapping {
    /// Emit the value under a predicate.
    Predicate {
        /// Target predicate.
        predicate: String,
        /// Subfield code to property renames.
        #[serde(default)]
        subfields: IndexMap<String, String>,
        /// Indicator characters to predicates replacing `predicate`.
        #[serde(default)]
        indicators: IndexMap<String, String>,
    },
    /// Emit the value under a predicate after translating it.
    Lookup {
        /// Target predicate.
        predicate: String,
        /// Value translations, tried for the whole value and its first word.
        #[serde(default)]
        table: IndexMap<String, String>,
        /// Tried in order when the table has no translation.
        #[serde(default)]
        patterns: Vec<ValuePattern>,
        /// Replacement for values nothing else translates; the value is kept if unset.
        #[serde(default)]
        default: Option<String>,
        /// Subfield code to property renames.
        #[serde(default)]
        subfields: IndexMap<String, String>,
        /// Indicator characters to predicates replacing `predicate`.
        #[serde(default)]
        indicators: IndexMap<String, String>,
    },
    /// Discard the pair.
    Drop,
}

impl ElementMapping {
    /// Shorthand for a plain predicate rename.
    pub fn predicate(predicate: impl Into<String>) -> Self {
        ElementMapping::Predicate {
            predicate: predicate.into(),
            subfields: IndexMap::new(),
            indicators: IndexMap::new(),
        }
    }

    fn validate(&self, spec: &str) -> Result<()> {
        let (predicate, indicators) = match self {
            ElementMapping::Predicate {
                predicate,
                indicators,
                ..
            }
            | ElementMapping::Lookup {
                predicate,
                indicators,
                ..
            } => (predicate, indicators),
            ElementMapping::Drop => return Ok(()),
        };
        if predicate.trim().is_empty() || indicators.values().any(|p| p.trim().is_empty()) {
            return Err(MarcError::InvalidMapping(format!("empty predicate for key {spec}")));
        }
        Ok(())
    }
}

/// Translate a value: whole value, first word, patterns, then default.
fn translate<'m>(
    value: &str,
    table: &'m IndexMap<String, String>,
    patterns: &'m [ValuePattern],
    default: Option<&'m String>,
) -> Option<&'m String> {
    table
        .get(value)
        .or_else(|| {
            value
                .find(' ')
                .filter(|&i| i > 0)
                .and_then(|i| table.get(&value[..i]))
        })
        .or_else(|| patterns.iter().find(|p| p.is_match(value)).map(|p| &p.value))
        .or(default)
}

/// A mapped pair, ready for a resource builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedElement {
    /// Key spec of the pair.
    pub key: String,
    /// Target predicate.
    pub predicate: String,
    /// Property inside the predicate's child resource; `None` for a plain literal.
    pub property: Option<String>,
    /// The (possibly translated) value.
    pub value: String,
    /// The value before translation, if it was translated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Outcome of looking up one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The pair maps to an element.
    Mapped(MappedElement),
    /// The table says to discard the pair.
    Dropped,
    /// No entry matches the key.
    Unmapped,
}

/// Mapping table from key spec to [`ElementMapping`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementMap {
    entries: IndexMap<String, ElementMapping>,
}

impl ElementMap {
    /// Create an empty table; every key is unmapped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a table from JSON.
    ///
    /// # Errors
    ///
    /// Returns `MarcError::Json` for malformed JSON or an invalid value
    /// pattern, and `MarcError::InvalidMapping` for entries with an empty
    /// predicate.
    pub fn from_json(json: &str) -> Result<Self> {
        let map: ElementMap = serde_json::from_str(json)?;
        map.validate()?;
        Ok(map)
    }

    /// Parse a table from a JSON reader.
    ///
    /// # Errors
    ///
    /// See [`ElementMap::from_json`].
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let map: ElementMap = serde_json::from_reader(reader)?;
        map.validate()?;
        Ok(map)
    }

    /// Add or replace an entry.
    #[must_use]
    pub fn with(mut self, spec: impl Into<String>, mapping: ElementMapping) -> Self {
        self.entries.insert(spec.into(), mapping);
        self
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn validate(&self) -> Result<()> {
        for (spec, mapping) in &self.entries {
            mapping.validate(spec)?;
        }
        Ok(())
    }

    /// Find the entry for a key: full spec, then field spec, then bare tag.
    #[must_use]
    pub fn lookup(&self, key: &FieldCollection) -> Option<&ElementMapping> {
        self.entries
            .get(&key.to_spec())
            .or_else(|| self.entries.get(&key.field_spec()))
            .or_else(|| key.tag().and_then(|tag| self.entries.get(tag)))
    }

    /// Resolve one pair against the table.
    #[must_use]
    pub fn resolve(&self, key: &FieldCollection, value: &str) -> Resolution {
        let Some(mapping) = self.lookup(key) else {
            return Resolution::Unmapped;
        };
        let code = key.last().and_then(|f| f.subfield_id());
        let (predicate, subfields, indicators, translated) = match mapping {
            ElementMapping::Drop => return Resolution::Dropped,
            ElementMapping::Predicate {
                predicate,
                subfields,
                indicators,
            } => (predicate, subfields, indicators, None),
            ElementMapping::Lookup {
                predicate,
                table,
                patterns,
                default,
                subfields,
                indicators,
            } => (
                predicate,
                subfields,
                indicators,
                translate(value, table, patterns, default.as_ref()),
            ),
        };
        let predicate = key
            .first()
            .and_then(|f| f.indicator())
            .and_then(|ind| indicators.get(ind))
            .unwrap_or(predicate);
        let property = code.map(|c| subfields.get(c).map_or_else(|| c.to_string(), Clone::clone));
        let (value, source) = match translated {
            Some(t) => (t.clone(), Some(value.to_string())),
            None => (value.to_string(), None),
        };
        Resolution::Mapped(MappedElement {
            key: key.to_spec(),
            predicate: predicate.clone(),
            property,
            value,
            source,
        })
    }
}
