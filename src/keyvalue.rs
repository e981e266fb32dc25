//! Flattening listener events into key/value pairs.
//!
//! [`KeyValueAdapter`] turns the nested event stream of the decoder into a
//! flat stream of `(key, value)` pairs, one per subfield and one per control
//! field. The key is a [`FieldCollection`] snapshot: the field designator
//! followed by the subfield designator. After the last pair of each record a
//! boundary marker `(None, None)` is emitted, followed by `end()`.
//!
//! ```text
//! begin()
//!   (001, "ocn123")
//!   (245$1$0$a, "Title")
//!   (None, None)
//! end()
//! ```

use crate::field::{Field, FieldCollection};
use crate::listener::MarcListener;
use crate::transformer::StringTransformer;
use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of the synthetic record format pair.
pub const FORMAT_KEY: &str = "FORMAT";
/// Key of the synthetic record type pair.
pub const TYPE_KEY: &str = "TYPE";
/// Key of the synthetic record label pair.
pub const LEADER_KEY: &str = "LEADER";

/// One key/value pair.
///
/// A pair with neither key nor value is a record boundary marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// The key, `None` for a boundary marker.
    pub key: Option<FieldCollection>,
    /// The value, `None` for a boundary marker.
    pub value: Option<String>,
}

impl KeyValue {
    /// Create a pair.
    pub fn new(key: FieldCollection, value: impl Into<String>) -> Self {
        KeyValue {
            key: Some(key),
            value: Some(value.into()),
        }
    }

    /// The record boundary marker.
    #[must_use]
    pub fn marker() -> Self {
        KeyValue::default()
    }

    /// Returns true if this pair has no key.
    #[must_use]
    pub fn is_marker(&self) -> bool {
        self.key.is_none()
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.key, &self.value) {
            (Some(key), Some(value)) => write!(f, "{key}={value}"),
            (Some(key), None) => write!(f, "{key}"),
            (None, _) => f.write_str("<end of record>"),
        }
    }
}

/// Consumer of a key/value stream.
pub trait KeyValueListener {
    /// Opens a record.
    fn begin(&mut self) {}

    /// One pair; `(None, None)` marks the end of the record's data.
    fn key_value(&mut self, key: Option<&FieldCollection>, value: Option<&str>);

    /// Closes a record.
    fn end(&mut self) {}
}

impl<L: KeyValueListener + ?Sized> KeyValueListener for &mut L {
    fn begin(&mut self) {
        (**self).begin();
    }
    fn key_value(&mut self, key: Option<&FieldCollection>, value: Option<&str>) {
        (**self).key_value(key, value);
    }
    fn end(&mut self) {
        (**self).end();
    }
}

impl<L: KeyValueListener + ?Sized> KeyValueListener for Box<L> {
    fn begin(&mut self) {
        (**self).begin();
    }
    fn key_value(&mut self, key: Option<&FieldCollection>, value: Option<&str>) {
        (**self).key_value(key, value);
    }
    fn end(&mut self) {
        (**self).end();
    }
}

/// Adapts decoder events to one or more key/value listeners.
///
/// # Examples
///
/// ```
/// use marckv::{Field, KeyValueAdapter, KeyValueLogger, MarcListener};
///
/// let mut logger = KeyValueLogger::default();
/// {
///     let mut adapter = KeyValueAdapter::new().add_listener(&mut logger);
///     adapter.begin_record("MARC21", "Bibliographic");
///     let f = Field::control_field("001");
///     adapter.begin_control_field(&f);
///     adapter.end_control_field(&f.with_data("ocn123"));
///     adapter.end_record();
/// }
/// assert_eq!(logger.pairs(), 1);
/// assert_eq!(logger.records(), 1);
/// ```
#[derive(Default)]
pub struct KeyValueAdapter<'a> {
    listeners: Vec<Box<dyn KeyValueListener + 'a>>,
    transformer: Option<Box<dyn StringTransformer + 'a>>,
    label_keys: bool,
    fields: FieldCollection,
}

impl<'a> KeyValueAdapter<'a> {
    /// Create an adapter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a downstream listener; every pair goes to every listener in
    /// registration order.
    #[must_use]
    pub fn add_listener(mut self, listener: impl KeyValueListener + 'a) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    /// Transform values before they are passed on.
    #[must_use]
    pub fn with_transformer(mut self, transformer: impl StringTransformer + 'a) -> Self {
        self.transformer = Some(Box::new(transformer));
        self
    }

    /// Also emit `FORMAT`, `TYPE` and `LEADER` pairs at the start of each record.
    #[must_use]
    pub fn with_label_keys(mut self, enabled: bool) -> Self {
        self.label_keys = enabled;
        self
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn emit(&mut self, key: &FieldCollection, value: &str) {
        let value = match &self.transformer {
            Some(t) => t.transform(value),
            None => value.to_string(),
        };
        for listener in &mut self.listeners {
            listener.key_value(Some(key), Some(&value));
        }
    }

    fn emit_label(&mut self, tag: &str, value: &str) {
        if self.label_keys {
            self.emit(&FieldCollection::label(tag), value);
        }
    }
}

impl fmt::Debug for KeyValueAdapter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValueAdapter")
            .field("listeners", &self.listeners.len())
            .field("label_keys", &self.label_keys)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl MarcListener for KeyValueAdapter<'_> {
    fn begin_record(&mut self, format: &str, record_type: &str) {
        self.fields.clear();
        for listener in &mut self.listeners {
            listener.begin();
        }
        self.emit_label(FORMAT_KEY, format);
        self.emit_label(TYPE_KEY, record_type);
    }

    fn leader(&mut self, label: &str) {
        self.emit_label(LEADER_KEY, label);
    }

    fn begin_control_field(&mut self, field: &Field) {
        self.fields.clear();
        self.fields.push(field.clone());
    }

    fn end_control_field(&mut self, field: &Field) {
        let key = std::mem::take(&mut self.fields);
        self.emit(&key, field.data().unwrap_or_default());
        self.fields = key;
    }

    fn begin_data_field(&mut self, field: &Field) {
        self.fields.clear();
        self.fields.push(field.clone());
    }

    /// Text before the first subfield is keyed by the field designator alone,
    /// after the subfield pairs.
    fn end_data_field(&mut self, field: &Field) {
        if let Some(data) = field.data() {
            let key = std::mem::take(&mut self.fields);
            self.emit(&key, data);
            self.fields = key;
        }
    }

    fn begin_sub_field(&mut self, field: &Field) {
        self.fields.push(field.clone());
    }

    fn end_sub_field(&mut self, field: &Field) {
        let key = std::mem::take(&mut self.fields);
        self.emit(&key, field.data().unwrap_or_default());
        self.fields = key;
        self.fields.pop();
    }

    fn end_record(&mut self) {
        for listener in &mut self.listeners {
            listener.key_value(None, None);
            listener.end();
        }
        self.fields.clear();
    }
}

/// Debug sink that logs every pair at trace level.
#[derive(Debug, Clone, Default)]
pub struct KeyValueLogger {
    pairs: usize,
    records: usize,
}

impl KeyValueLogger {
    /// Number of pairs seen, boundary markers excluded.
    #[must_use]
    pub fn pairs(&self) -> usize {
        self.pairs
    }

    /// Number of records seen.
    #[must_use]
    pub fn records(&self) -> usize {
        self.records
    }
}

impl KeyValueListener for KeyValueLogger {
    fn begin(&mut self) {
        trace!("begin record {}", self.records + 1);
    }

    fn key_value(&mut self, key: Option<&FieldCollection>, value: Option<&str>) {
        if let Some(key) = key {
            self.pairs += 1;
            trace!("{key} = {}", value.unwrap_or_default());
        }
    }

    fn end(&mut self) {
        self.records += 1;
        trace!("end record {}", self.records);
    }
}
