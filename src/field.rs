//! Field designators and field collections.
//!
//! A [`Field`] designates one field or subfield occurrence inside a record:
//! its tag, indicator characters, optional subfield identifier and, once the
//! terminal event for the occurrence has been reached, its data. A
//! [`FieldCollection`] is an ordered run of designators that together form a
//! key in the key/value stream (a field designator followed by the subfield
//! designator whose value is being emitted).
//!
//! # Examples
//!
//! ```
//! use marckv::{Field, FieldCollection};
//!
//! let field = Field::data_field("245", "10");
//! let subfield = field.subfield("a").with_data("Title");
//!
//! let key: FieldCollection = vec![field, subfield].into_iter().collect();
//! assert_eq!(key.to_spec(), "245$1$0$a");
//! assert_eq!(key.field_spec(), "245$1$0");
//! ```

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

/// Tag assigned to fields whose tag could not be recovered.
pub const ERROR_TAG: &str = "___";

/// Tag used when a field arrives without any tag at all.
pub const NULL_TAG: &str = "000";

/// A field or subfield designator.
///
/// Designators are created fresh for every occurrence by the decoder and are
/// handed to listeners by reference, so listeners observe them as immutable
/// values. The decoder fills in `data` before it emits the terminal event for
/// the occurrence (`end_sub_field` / `end_control_field`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Field tag, three characters for well-formed records.
    pub tag: String,
    /// Indicator characters (usually two for data fields, none for control fields).
    pub indicator: Option<String>,
    /// Subfield identifier, present only on subfield designators.
    pub subfield_id: Option<String>,
    /// Field or subfield data.
    pub data: Option<String>,
}

impl Field {
    /// Create a designator carrying only a tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Field {
            tag: tag.into(),
            indicator: None,
            subfield_id: None,
            data: None,
        }
    }

    /// Create a control field designator (no indicators, no subfields).
    pub fn control_field(tag: impl Into<String>) -> Self {
        Self::new(tag)
    }

    /// Create a data field designator with the given indicator characters.
    pub fn data_field(tag: impl Into<String>, indicator: impl Into<String>) -> Self {
        let indicator = indicator.into();
        Field {
            tag: tag.into(),
            indicator: if indicator.is_empty() {
                None
            } else {
                Some(indicator)
            },
            subfield_id: None,
            data: None,
        }
    }

    /// Derive a subfield designator from this field designator.
    ///
    /// Tag and indicators are copied; data is left undefined.
    #[must_use]
    pub fn subfield(&self, code: impl Into<String>) -> Self {
        Field {
            tag: self.tag.clone(),
            indicator: self.indicator.clone(),
            subfield_id: Some(code.into()),
            data: None,
        }
    }

    /// Set the data of this designator.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Field tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Indicator characters, if any.
    #[must_use]
    pub fn indicator(&self) -> Option<&str> {
        self.indicator.as_deref()
    }

    /// Subfield identifier, if this is a subfield designator.
    #[must_use]
    pub fn subfield_id(&self) -> Option<&str> {
        self.subfield_id.as_deref()
    }

    /// Field data, if set.
    #[must_use]
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// Returns true if the tag begins with `"00"`.
    #[must_use]
    pub fn is_control_field(&self) -> bool {
        self.tag.starts_with("00")
    }

    /// Returns true if this designator names a subfield.
    #[must_use]
    pub fn is_subfield(&self) -> bool {
        self.subfield_id.is_some()
    }

    /// Returns true if this field has indicator characters.
    #[must_use]
    pub fn has_indicator(&self) -> bool {
        self.indicator.is_some()
    }

    /// Two designators belong to the same field if tag and indicators match.
    #[must_use]
    pub fn same_field(&self, other: &Field) -> bool {
        self.tag == other.tag && self.indicator == other.indicator
    }

    /// The designator string: tag, indicators and subfield identifier, no data.
    #[must_use]
    pub fn designator(&self) -> String {
        let mut s = String::with_capacity(6);
        s.push_str(&self.tag);
        if let Some(ind) = &self.indicator {
            s.push_str(ind);
        }
        if let Some(id) = &self.subfield_id {
            s.push_str(id);
        }
        s
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.designator())?;
        if let Some(data) = &self.data {
            write!(f, "={data}")?;
        }
        Ok(())
    }
}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by tag, then indicator, subfield identifier and data, so that
/// `cmp` agrees with `==`.
impl Ord for Field {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.tag, &self.indicator, &self.subfield_id, &self.data).cmp(&(
            &other.tag,
            &other.indicator,
            &other.subfield_id,
            &other.data,
        ))
    }
}

/// An ordered collection of designators forming one key.
///
/// The adapter starts a new collection at every field boundary; a snapshot of
/// the collection is taken for every key/value pair it emits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldCollection {
    fields: SmallVec<[Field; 2]>,
}

impl FieldCollection {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collection holding a single designator under the given tag.
    ///
    /// Used for the synthetic `FORMAT`, `TYPE` and `LEADER` keys.
    pub fn label(tag: impl Into<String>) -> Self {
        let mut c = Self::new();
        c.push(Field::new(tag));
        c
    }

    /// Append a designator.
    pub fn push(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Remove and return the last designator.
    pub fn pop(&mut self) -> Option<Field> {
        self.fields.pop()
    }

    /// Remove every designator.
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Number of designators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the collection holds no designators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First designator, usually the field designator.
    #[must_use]
    pub fn first(&self) -> Option<&Field> {
        self.fields.first()
    }

    /// Last designator, usually the subfield whose value is being emitted.
    #[must_use]
    pub fn last(&self) -> Option<&Field> {
        self.fields.last()
    }

    /// Iterate over the designators in encounter order.
    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.fields.iter()
    }

    /// The designators as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Field] {
        &self.fields
    }

    /// Render the key's string form.
    ///
    /// Designators are grouped by tag; for each tag the pattern lists the tag,
    /// then `$` and the distinct characters seen at each indicator position,
    /// then `$` and the distinct subfield identifiers, each sorted. Groups are
    /// ordered by tag and joined with `|`. A control field renders as its bare
    /// tag.
    #[must_use]
    pub fn to_spec(&self) -> String {
        let mut groups: BTreeMap<&str, SpecGroup> = BTreeMap::new();
        for field in &self.fields {
            groups.entry(field.tag.as_str()).or_default().merge(field);
        }
        let mut out = String::new();
        for (tag, group) in &groups {
            if !out.is_empty() {
                out.push('|');
            }
            out.push_str(tag);
            group.render(&mut out, true);
        }
        out
    }

    /// Render the key's string form without subfield identifiers.
    #[must_use]
    pub fn field_spec(&self) -> String {
        let mut groups: BTreeMap<&str, SpecGroup> = BTreeMap::new();
        for field in &self.fields {
            groups.entry(field.tag.as_str()).or_default().merge(field);
        }
        let mut out = String::new();
        for (tag, group) in &groups {
            if !out.is_empty() {
                out.push('|');
            }
            out.push_str(tag);
            group.render(&mut out, false);
        }
        out
    }

    /// Tag of the first designator.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.first().map(Field::tag)
    }
}

impl fmt::Display for FieldCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_spec())
    }
}

impl FromIterator<Field> for FieldCollection {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        FieldCollection {
            fields: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FieldCollection {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

#[derive(Default)]
struct SpecGroup {
    indicators: Vec<Vec<char>>,
    subfields: Vec<char>,
}

impl SpecGroup {
    fn merge(&mut self, field: &Field) {
        if let Some(ind) = &field.indicator {
            for (i, ch) in ind.chars().enumerate() {
                if self.indicators.len() <= i {
                    self.indicators.push(Vec::new());
                }
                if !self.indicators[i].contains(&ch) {
                    self.indicators[i].push(ch);
                }
            }
        }
        if let Some(id) = &field.subfield_id {
            for ch in id.chars() {
                if !self.subfields.contains(&ch) {
                    self.subfields.push(ch);
                }
            }
        }
    }

    fn render(&self, out: &mut String, with_subfields: bool) {
        for chars in &self.indicators {
            out.push('$');
            let mut sorted = chars.clone();
            sorted.sort_unstable();
            out.extend(sorted);
        }
        if with_subfields && !self.subfields.is_empty() {
            out.push('$');
            let mut sorted = self.subfields.clone();
            sorted.sort_unstable();
            out.extend(sorted);
        }
    }
}
