//! The MarcXchange listener contract and record-type dispatch.
//!
//! The ISO 2709 reader pushes every record it decodes to a [`MarcListener`]
//! as a balanced sequence of events:
//!
//! ```text
//! begin_record(format, type)
//!   leader(label)
//!   begin_control_field(f) end_control_field(f)           -- per control field
//!   begin_data_field(f)                                  -- per data field
//!     begin_sub_field(s) end_sub_field(s)                -- per subfield
//!   end_data_field(f)
//! end_record()
//! ```
//!
//! [`TypeDispatcher`] routes records to different listeners by record type,
//! and [`FieldEventListener`] receives diagnostics about repairs the decoder
//! made to the data (cleaned tags, scrubbed data).

use crate::field::Field;
use std::fmt;

/// Callback contract for consumers of decoded records.
///
/// Designators are passed by reference; a listener that needs to keep one
/// clones it.
pub trait MarcListener {
    /// Called once before the first record of a stream.
    fn begin_collection(&mut self) {}

    /// Called once after the last record of a stream.
    fn end_collection(&mut self) {}

    /// Opens a record.
    fn begin_record(&mut self, format: &str, record_type: &str);

    /// Delivers the (repaired) 24-character record label.
    fn leader(&mut self, label: &str);

    /// Opens a control field.
    fn begin_control_field(&mut self, field: &Field);

    /// Closes a control field; `field.data` carries the field content.
    fn end_control_field(&mut self, field: &Field);

    /// Opens a data field; `field.indicator` carries the indicators.
    fn begin_data_field(&mut self, field: &Field);

    /// Closes a data field.
    fn end_data_field(&mut self, field: &Field);

    /// Opens a subfield.
    fn begin_sub_field(&mut self, field: &Field);

    /// Closes a subfield; `field.data` carries the subfield content.
    fn end_sub_field(&mut self, field: &Field);

    /// Closes a record.
    fn end_record(&mut self);

    /// Delivers a trailing label for formats that carry one.
    fn trailer(&mut self, _label: &str) {}
}

impl<L: MarcListener + ?Sized> MarcListener for &mut L {
    fn begin_collection(&mut self) {
        (**self).begin_collection();
    }
    fn end_collection(&mut self) {
        (**self).end_collection();
    }
    fn begin_record(&mut self, format: &str, record_type: &str) {
        (**self).begin_record(format, record_type);
    }
    fn leader(&mut self, label: &str) {
        (**self).leader(label);
    }
    fn begin_control_field(&mut self, field: &Field) {
        (**self).begin_control_field(field);
    }
    fn end_control_field(&mut self, field: &Field) {
        (**self).end_control_field(field);
    }
    fn begin_data_field(&mut self, field: &Field) {
        (**self).begin_data_field(field);
    }
    fn end_data_field(&mut self, field: &Field) {
        (**self).end_data_field(field);
    }
    fn begin_sub_field(&mut self, field: &Field) {
        (**self).begin_sub_field(field);
    }
    fn end_sub_field(&mut self, field: &Field) {
        (**self).end_sub_field(field);
    }
    fn end_record(&mut self) {
        (**self).end_record();
    }
    fn trailer(&mut self, label: &str) {
        (**self).trailer(label);
    }
}

/// Routes each record to the listener registered for its record type.
///
/// Records whose type has no registered listener are dropped. Collection
/// events go to every registered listener.
///
/// # Examples
///
/// ```ignore
/// use marckv::{Iso2709Reader, TypeDispatcher};
///
/// let mut dispatcher = TypeDispatcher::new()
///     .route("Bibliographic", &mut bib_adapter)
///     .route("Holdings", &mut holdings_adapter);
/// reader.parse(&mut dispatcher)?;
/// ```
#[derive(Default)]
pub struct TypeDispatcher<'a> {
    routes: Vec<(String, &'a mut dyn MarcListener)>,
    current: Option<usize>,
}

impl<'a> TypeDispatcher<'a> {
    /// Create a dispatcher with no routes.
    #[must_use]
    pub fn new() -> Self {
        TypeDispatcher {
            routes: Vec::new(),
            current: None,
        }
    }

    /// Register a listener for a record type, replacing any earlier one.
    #[must_use]
    pub fn route(mut self, record_type: impl Into<String>, listener: &'a mut dyn MarcListener) -> Self {
        let record_type = record_type.into();
        self.routes.retain(|(t, _)| *t != record_type);
        self.routes.push((record_type, listener));
        self
    }

    fn with_current(&mut self, f: impl FnOnce(&mut dyn MarcListener)) {
        if let Some(i) = self.current {
            f(&mut *self.routes[i].1);
        }
    }
}

impl fmt::Debug for TypeDispatcher<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDispatcher")
            .field("routes", &self.routes.iter().map(|(t, _)| t).collect::<Vec<_>>())
            .field("current", &self.current)
            .finish()
    }
}

impl MarcListener for TypeDispatcher<'_> {
    fn begin_collection(&mut self) {
        for (_, listener) in &mut self.routes {
            listener.begin_collection();
        }
    }

    fn end_collection(&mut self) {
        for (_, listener) in &mut self.routes {
            listener.end_collection();
        }
    }

    fn begin_record(&mut self, format: &str, record_type: &str) {
        self.current = self.routes.iter().position(|(t, _)| t == record_type);
        self.with_current(|l| l.begin_record(format, record_type));
    }

    fn leader(&mut self, label: &str) {
        self.with_current(|l| l.leader(label));
    }

    fn begin_control_field(&mut self, field: &Field) {
        self.with_current(|l| l.begin_control_field(field));
    }

    fn end_control_field(&mut self, field: &Field) {
        self.with_current(|l| l.end_control_field(field));
    }

    fn begin_data_field(&mut self, field: &Field) {
        self.with_current(|l| l.begin_data_field(field));
    }

    fn end_data_field(&mut self, field: &Field) {
        self.with_current(|l| l.end_data_field(field));
    }

    fn begin_sub_field(&mut self, field: &Field) {
        self.with_current(|l| l.begin_sub_field(field));
    }

    fn end_sub_field(&mut self, field: &Field) {
        self.with_current(|l| l.end_sub_field(field));
    }

    fn end_record(&mut self) {
        self.with_current(|l| l.end_record());
        self.current = None;
    }

    fn trailer(&mut self, label: &str) {
        self.with_current(|l| l.trailer(label));
    }
}

/// Diagnostics emitted by the decoder when it repairs or drops data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEvent {
    /// An invalid tag was replaced by the error tag.
    TagCleaned {
        /// The tag as found in the directory.
        original: String,
        /// The designator after cleaning.
        field: Field,
    },
    /// Characters not allowed in XML 1.0 were removed from the data.
    DataScrubbed(Field),
    /// A string transformer changed the data.
    DataTransformed(Field),
    /// A field could not be decoded and was left out of the record.
    FieldDropped {
        /// Tag of the dropped field.
        tag: String,
        /// Why the field was dropped.
        cause: String,
    },
}

impl fmt::Display for FieldEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldEvent::TagCleaned { original, field } => {
                write!(f, "[Event:TAG_CLEANED:{field}:prev={original}]")
            },
            FieldEvent::DataScrubbed(field) => write!(f, "[Event:DATA_SCRUBBED:{field}]"),
            FieldEvent::DataTransformed(field) => write!(f, "[Event:DATA_TRANSFORMED:{field}]"),
            FieldEvent::FieldDropped { tag, cause } => {
                write!(f, "[Event:FIELD_DROPPED:{tag}:cause={cause}]")
            },
        }
    }
}

/// Receiver for [`FieldEvent`] diagnostics.
pub trait FieldEventListener {
    /// Handle one event.
    fn receive(&mut self, event: &FieldEvent);
}

impl<F: FnMut(&FieldEvent)> FieldEventListener for F {
    fn receive(&mut self, event: &FieldEvent) {
        self(event);
    }
}
