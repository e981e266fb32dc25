//! Writing decoded records back to ISO 2709.
//!
//! [`Iso2709Writer`] is a [`MarcListener`]: connect it to an
//! [`Iso2709Reader`](crate::Iso2709Reader) and every record is re-encoded,
//! with the record length, base address and directory recomputed from the
//! field data actually written.
//!
//! # Examples
//!
//! ```
//! use marckv::{Iso2709Reader, Iso2709Writer};
//! use std::io::Cursor;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input: Vec<u8> = Vec::new();
//! let mut writer = Iso2709Writer::new(Vec::new());
//! Iso2709Reader::new(Cursor::new(input)).parse(&mut writer)?;
//! writer.finish()?;
//! assert_eq!(writer.records_written(), 0);
//! # Ok(())
//! # }
//! ```

use crate::encoding::{FieldDecoder, FieldEncoding};
use crate::error::{MarcError, Result};
use crate::field::Field;
use crate::leader::{RecordLabel, LABEL_LENGTH};
use crate::listener::MarcListener;
use crate::reader::{FIELD_TERMINATOR, RECORD_TERMINATOR, SUBFIELD_DELIMITER};
use log::error;
use std::io::Write;

/// Re-encodes listener events as ISO 2709 records.
///
/// Listener callbacks cannot fail, so the first error is kept and returned by
/// [`Iso2709Writer::finish`]. Records after an I/O error are discarded.
#[derive(Debug)]
pub struct Iso2709Writer<W: Write> {
    writer: W,
    encoding: FieldEncoding,
    legacy: FieldDecoder,
    encoder: FieldDecoder,
    subfield_delimiter: u8,
    label: RecordLabel,
    directory: Vec<u8>,
    data: Vec<u8>,
    field: Vec<u8>,
    lead_at: usize,
    records_written: usize,
    error: Option<MarcError>,
}

impl<W: Write> Iso2709Writer<W> {
    /// Create a writer encoding field data as UTF-8.
    pub fn new(writer: W) -> Self {
        Iso2709Writer {
            writer,
            encoding: FieldEncoding::Utf8,
            legacy: FieldDecoder::default(),
            encoder: FieldDecoder::default(),
            subfield_delimiter: SUBFIELD_DELIMITER,
            label: RecordLabel::default(),
            directory: Vec::new(),
            data: Vec::new(),
            field: Vec::new(),
            lead_at: 0,
            records_written: 0,
            error: None,
        }
    }

    /// Encode field data of records not coded as UCS (label position 9)
    /// with the given encoding.
    ///
    /// # Errors
    ///
    /// Returns `MarcError::EncodingError` for an unknown legacy label.
    pub fn with_encoding(mut self, encoding: &FieldEncoding) -> Result<Self> {
        self.legacy = encoding.decoder()?;
        self.encoding = encoding.clone();
        Ok(self)
    }

    /// Open subfields with the given byte instead of 0x1F.
    #[must_use]
    pub fn with_subfield_delimiter(mut self, delimiter: u8) -> Self {
        self.subfield_delimiter = delimiter;
        self
    }

    /// Number of records written so far.
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Flush the destination and report the first error met while writing.
    ///
    /// # Errors
    ///
    /// Returns the first error kept by a listener callback, or the flush error.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Consume the writer and return the destination.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn fail(&mut self, e: MarcError) {
        error!("cannot write record {}: {e}", self.records_written + 1);
        if self.error.is_none() {
            self.error = Some(e);
        }
    }

    fn push_entry(&mut self, tag: &str, content_len: usize) -> Result<()> {
        let length = content_len + 1;
        let start = self.data.len() - content_len;
        if length > 9999 {
            return Err(MarcError::InvalidField(format!(
                "field {tag} is {length} bytes, more than a directory entry can address"
            )));
        }
        if start > 99_999 {
            return Err(MarcError::InvalidField(format!(
                "field {tag} starts at {start}, beyond the addressable data area"
            )));
        }
        let mut tag_bytes = tag.as_bytes().to_vec();
        tag_bytes.resize(3, b' ');
        self.directory.extend_from_slice(&tag_bytes[..3]);
        self.directory
            .extend_from_slice(format!("{length:04}{start:05}").as_bytes());
        self.data.push(FIELD_TERMINATOR);
        Ok(())
    }

    fn write_record(&mut self) -> Result<()> {
        let base_address = LABEL_LENGTH + self.directory.len() + 1;
        let record_length = base_address + self.data.len() + 1;
        let mut label = self.label.clone();
        label.record_length = u32::try_from(record_length)
            .map_err(|_| MarcError::InvalidLeader("record length exceeds 4GB".to_string()))?;
        label.base_address = u32::try_from(base_address)
            .map_err(|_| MarcError::InvalidLeader("base address exceeds 4GB".to_string()))?;
        label.field_length_width = 4;
        label.start_position_width = 5;
        label.implementation_width = 0;

        self.writer.write_all(&label.as_bytes()?)?;
        self.writer.write_all(&self.directory)?;
        self.writer.write_all(&[FIELD_TERMINATOR])?;
        self.writer.write_all(&self.data)?;
        self.writer.write_all(&[RECORD_TERMINATOR])?;
        Ok(())
    }
}

impl<W: Write> MarcListener for Iso2709Writer<W> {
    fn begin_record(&mut self, _format: &str, _record_type: &str) {
        self.label = RecordLabel::default();
        self.directory.clear();
        self.data.clear();
    }

    fn leader(&mut self, label: &str) {
        match RecordLabel::from_bytes(label.as_bytes()) {
            Ok(label) => {
                self.encoder =
                    match FieldEncoding::from_label_char(label.character_coding, &self.encoding) {
                        FieldEncoding::Utf8 => FieldDecoder::default(),
                        FieldEncoding::Legacy(_) => self.legacy,
                    };
                self.label = label;
            },
            Err(e) => self.fail(e),
        }
    }

    fn begin_control_field(&mut self, _field: &Field) {}

    fn end_control_field(&mut self, field: &Field) {
        let bytes = self.encoder.encode(field.data().unwrap_or_default());
        self.data.extend_from_slice(&bytes);
        let len = bytes.len();
        if let Err(e) = self.push_entry(&field.tag, len) {
            self.data.truncate(self.data.len() - len);
            self.fail(e);
        }
    }

    fn begin_data_field(&mut self, field: &Field) {
        self.field.clear();
        if let Some(indicator) = field.indicator() {
            self.field.extend_from_slice(indicator.as_bytes());
        }
        self.lead_at = self.field.len();
    }

    fn end_data_field(&mut self, field: &Field) {
        if let Some(lead) = field.data() {
            let bytes = self.encoder.encode(lead).into_owned();
            self.field.splice(self.lead_at..self.lead_at, bytes);
        }
        let content = std::mem::take(&mut self.field);
        self.data.extend_from_slice(&content);
        if let Err(e) = self.push_entry(&field.tag, content.len()) {
            self.data.truncate(self.data.len() - content.len());
            self.fail(e);
        }
        self.field = content;
    }

    fn begin_sub_field(&mut self, _field: &Field) {}

    fn end_sub_field(&mut self, field: &Field) {
        self.field.push(self.subfield_delimiter);
        if let Some(code) = field.subfield_id() {
            self.field.extend_from_slice(code.as_bytes());
        }
        let bytes = self.encoder.encode(field.data().unwrap_or_default());
        self.field.extend_from_slice(&bytes);
    }

    fn end_record(&mut self) {
        if self.error.as_ref().is_some_and(|e| matches!(e, MarcError::IoError(_))) {
            return;
        }
        match self.write_record() {
            Ok(()) => self.records_written += 1,
            Err(e) => self.fail(e),
        }
    }
}
