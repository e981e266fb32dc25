//! Streaming ISO 2709 decoder.
//!
//! [`Iso2709Reader`] reads records framed per ISO 2709 from any source
//! implementing [`std::io::Read`] and pushes each one to a [`MarcListener`]
//! as a balanced event sequence. Records are decoded one at a time; nothing
//! beyond the current record is buffered.
//!
//! # Framing
//!
//! ```text
//! | label (24) | directory (n * 12) FT | field FT | field FT | ... | RT |
//!              ^ tag(3) length(4) start(5)   ^ base address of data
//! ```
//!
//! Framing errors (bad label, malformed directory, out-of-range entries,
//! truncated records) stop the stream when `fatal_errors` is set. Otherwise
//! the record is skipped: if `begin_record` was already emitted, a matching
//! `end_record` follows immediately so the listener stays balanced.
//!
//! # Examples
//!
//! ```no_run
//! use marckv::{DecoderConfig, Iso2709Reader, KeyValueAdapter, KeyValueLogger};
//! use std::fs::File;
//!
//! let file = File::open("records.mrc")?;
//! let mut reader = Iso2709Reader::new(file)
//!     .with_config(DecoderConfig::default().with_fatal_errors(true));
//! let mut adapter = KeyValueAdapter::new().add_listener(KeyValueLogger::default());
//! let records = reader.parse(&mut adapter)?;
//! println!("{records} records");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::directory::{Directory, DirectoryEntry};
use crate::encoding::{FieldDecoder, FieldEncoding};
use crate::error::{MarcError, Result};
use crate::field::{Field, ERROR_TAG, NULL_TAG};
use crate::leader::{RecordLabel, LABEL_LENGTH};
use crate::listener::{FieldEvent, FieldEventListener, MarcListener};
use crate::recovery::{ErrorPolicy, RecoveryContext};
use crate::transformer::{scrub_xml10, StringTransformer};
use flate2::read::MultiGzDecoder;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;

/// Closes every field and the directory.
pub const FIELD_TERMINATOR: u8 = 0x1E;
/// Opens every subfield.
pub const SUBFIELD_DELIMITER: u8 = 0x1F;
/// Closes every record.
pub const RECORD_TERMINATOR: u8 = 0x1D;

/// Default record format label.
pub const MARC21: &str = "MARC21";

lazy_static! {
    static ref TAG_PATTERN: Regex = Regex::new("^[0-9A-Za-z]{3}$").expect("valid tag pattern");
}

/// Decoder settings.
///
/// Loaded from JSON or built with the `with_*` methods:
///
/// ```
/// use marckv::DecoderConfig;
///
/// let config = DecoderConfig::from_json(r#"{"format": "MAB", "fatal_errors": true}"#)?;
/// assert_eq!(config.format, "MAB");
/// assert!(config.fatal_errors);
/// assert!(config.clean_tags);
/// # Ok::<(), marckv::MarcError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Format label passed to `begin_record`.
    pub format: String,
    /// Record type passed to `begin_record`; derived from the label when `None`.
    pub record_type: Option<String>,
    /// Abort the stream on the first framing error.
    pub fatal_errors: bool,
    /// Skip malformed records without logging.
    pub silent_errors: bool,
    /// Replace tags that are not three alphanumerics by the error tag.
    pub clean_tags: bool,
    /// Remove characters not allowed in XML 1.0 from data.
    pub scrub_data: bool,
    /// Encoding of field data in records not coded as UCS (label position 9).
    pub encoding: FieldEncoding,
    /// Byte opening every subfield.
    pub subfield_delimiter: u8,
    /// Override for the number of subfield code characters.
    pub subfield_code_length: Option<usize>,
    /// Tags starting with this prefix are control fields.
    pub control_tag_prefix: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            format: MARC21.to_string(),
            record_type: None,
            fatal_errors: false,
            silent_errors: false,
            clean_tags: true,
            scrub_data: true,
            encoding: FieldEncoding::Utf8,
            subfield_delimiter: SUBFIELD_DELIMITER,
            subfield_code_length: None,
            control_tag_prefix: "00".to_string(),
        }
    }
}

impl DecoderConfig {
    /// Parse a configuration from JSON; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `MarcError::Json` if the document is not a valid configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the format label.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Force the record type instead of deriving it from the label.
    #[must_use]
    pub fn with_record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    /// Make framing errors fatal.
    #[must_use]
    pub fn with_fatal_errors(mut self, fatal: bool) -> Self {
        self.fatal_errors = fatal;
        self
    }

    /// Skip malformed records without logging.
    #[must_use]
    pub fn with_silent_errors(mut self, silent: bool) -> Self {
        self.silent_errors = silent;
        self
    }

    /// Enable or disable tag cleaning.
    #[must_use]
    pub fn with_clean_tags(mut self, clean: bool) -> Self {
        self.clean_tags = clean;
        self
    }

    /// Enable or disable XML 1.0 scrubbing.
    #[must_use]
    pub fn with_scrub_data(mut self, scrub: bool) -> Self {
        self.scrub_data = scrub;
        self
    }

    /// Set the field data encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: FieldEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the byte that opens every subfield.
    #[must_use]
    pub fn with_subfield_delimiter(mut self, delimiter: u8) -> Self {
        self.subfield_delimiter = delimiter;
        self
    }

    /// Override the subfield code length declared in the label.
    #[must_use]
    pub fn with_subfield_code_length(mut self, length: usize) -> Self {
        self.subfield_code_length = Some(length.max(1));
        self
    }

    /// The error policy implied by the flags.
    #[must_use]
    pub fn policy(&self) -> ErrorPolicy {
        ErrorPolicy::from_flags(self.fatal_errors, self.silent_errors)
    }
}

/// Streaming ISO 2709 decoder.
pub struct Iso2709Reader<R: Read> {
    reader: BufReader<R>,
    config: DecoderConfig,
    decoder: FieldDecoder,
    record_decoder: FieldDecoder,
    transformer: Option<Box<dyn StringTransformer>>,
    field_transformers: HashMap<String, Box<dyn StringTransformer>>,
    event_listener: Option<Box<dyn FieldEventListener + Send>>,
    recovery: RecoveryContext,
    records_read: usize,
    offset: u64,
}

impl<R: Read> fmt::Debug for Iso2709Reader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iso2709Reader")
            .field("config", &self.config)
            .field("records_read", &self.records_read)
            .field("offset", &self.offset)
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl Iso2709Reader<Box<dyn Read + Send>> {
    /// Open a file, decompressing it on the fly if its name ends in `.gz`.
    ///
    /// # Errors
    ///
    /// Returns `MarcError::IoError` if the file cannot be opened.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let gzipped = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
        debug!("opening {} (gzip: {gzipped})", path.display());
        let reader: Box<dyn Read + Send> = if gzipped {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Iso2709Reader::new(reader))
    }
}

impl<R: Read> Iso2709Reader<R> {
    /// Create a reader with the default configuration.
    pub fn new(reader: R) -> Self {
        Iso2709Reader {
            reader: BufReader::with_capacity(65536, reader),
            config: DecoderConfig::default(),
            decoder: FieldDecoder::default(),
            record_decoder: FieldDecoder::default(),
            transformer: None,
            field_transformers: HashMap::new(),
            event_listener: None,
            recovery: RecoveryContext::new(ErrorPolicy::default()),
            records_read: 0,
            offset: 0,
        }
    }

    /// Replace the configuration.
    ///
    /// An unknown legacy encoding label falls back to UTF-8 with a warning;
    /// use [`FieldEncoding::legacy`] to validate labels up front.
    #[must_use]
    pub fn with_config(mut self, config: DecoderConfig) -> Self {
        self.decoder = match config.encoding.decoder() {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!("{e}, decoding as UTF-8");
                FieldDecoder::default()
            },
        };
        self.recovery.policy = config.policy();
        self.config = config;
        self
    }

    /// Set the transformer applied to every control field, data field and
    /// subfield value.
    #[must_use]
    pub fn with_transformer(mut self, transformer: impl StringTransformer + 'static) -> Self {
        self.transformer = Some(Box::new(transformer));
        self
    }

    /// Set a transformer for one tag, used instead of the default transformer.
    #[must_use]
    pub fn with_transformer_for(
        mut self,
        tag: impl Into<String>,
        transformer: impl StringTransformer + 'static,
    ) -> Self {
        self.field_transformers.insert(tag.into(), Box::new(transformer));
        self
    }

    /// Receive diagnostics about cleaned tags, scrubbed and transformed data.
    #[must_use]
    pub fn with_event_listener(mut self, listener: impl FieldEventListener + Send + 'static) -> Self {
        self.event_listener = Some(Box::new(listener));
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Number of records decoded successfully so far.
    #[must_use]
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    /// Skipped records and recovery messages.
    #[must_use]
    pub fn recovery(&self) -> &RecoveryContext {
        &self.recovery
    }

    /// Decode the whole stream, wrapped in `begin_collection`/`end_collection`.
    ///
    /// Returns the number of records decoded successfully.
    ///
    /// # Errors
    ///
    /// Returns the first framing error when fatal errors are enabled, and
    /// any I/O error. The current record is closed before returning.
    pub fn parse<L: MarcListener + ?Sized>(&mut self, listener: &mut L) -> Result<usize> {
        let before = self.records_read;
        listener.begin_collection();
        while self.read_next(listener)? {}
        listener.end_collection();
        debug!(
            "decoded {} records, skipped {}",
            self.records_read - before,
            self.recovery.skipped
        );
        Ok(self.records_read - before)
    }

    /// Decode the next record.
    ///
    /// Returns `Ok(false)` at end of stream. A record skipped because of a
    /// framing error still returns `Ok(true)` if its `begin_record` had been
    /// emitted.
    ///
    /// # Errors
    ///
    /// See [`Iso2709Reader::parse`].
    pub fn read_next<L: MarcListener + ?Sized>(&mut self, listener: &mut L) -> Result<bool> {
        loop {
            let record_no = self.records_read + self.recovery.skipped + 1;
            let Some(label_bytes) = self.read_label(record_no)? else {
                return Ok(false);
            };
            let label = match RecordLabel::from_bytes(&label_bytes)
                .and_then(|label| label.validate_for_reading().map(|()| label))
            {
                Ok(label) => label,
                Err(e) => {
                    let e = at_offset(e, self.offset - LABEL_LENGTH as u64);
                    self.recovery.recover(e, record_no)?;
                    self.resync()?;
                    continue;
                },
            };

            let expected = label.record_length as usize - LABEL_LENGTH;
            let mut body = vec![0u8; expected];
            let got = self.read_fully(&mut body)?;
            body.truncate(got);

            let record_type = match &self.config.record_type {
                Some(t) => t.clone(),
                None => label.record_type_name().to_string(),
            };
            listener.begin_record(&self.config.format, &record_type);
            listener.leader(&label.to_string());
            let outcome = if got < expected {
                Err(MarcError::TruncatedRecord(format!(
                    "expected {expected} bytes after the label, got {got}"
                )))
            } else {
                self.decode_body(&label, &body, listener)
            };
            listener.end_record();

            match outcome {
                Ok(()) => self.records_read += 1,
                Err(e) => self.recovery.recover(e, record_no)?,
            }
            return Ok(true);
        }
    }

    fn decode_body<L: MarcListener + ?Sized>(
        &mut self,
        label: &RecordLabel,
        body: &[u8],
        listener: &mut L,
    ) -> Result<()> {
        if body.last() != Some(&RECORD_TERMINATOR) {
            let message = format!(
                "record length {} does not end at a record terminator",
                label.record_length
            );
            match self.recovery.policy {
                ErrorPolicy::Fatal => return Err(MarcError::TruncatedRecord(message)),
                ErrorPolicy::Warn => warn!("{message}, decoding anyway"),
                ErrorPolicy::Silent => {},
            }
        }

        let directory_len = label.base_address as usize - LABEL_LENGTH;
        if directory_len > body.len() {
            return Err(MarcError::InvalidDirectory(format!(
                "base address {} lies beyond the record",
                label.base_address
            )));
        }
        let directory = Directory::parse(&body[..directory_len], label)?;
        let encoding =
            FieldEncoding::from_label_char(label.character_coding, &self.config.encoding);
        self.record_decoder = match encoding {
            FieldEncoding::Utf8 => FieldDecoder::default(),
            FieldEncoding::Legacy(_) => self.decoder,
        };

        let data_end = if body.last() == Some(&RECORD_TERMINATOR) {
            body.len() - 1
        } else {
            body.len()
        };
        let data = &body[directory_len.min(data_end)..data_end];
        directory.check_bounds(data.len())?;

        for entry in directory.entries() {
            self.emit_field(entry, &data[entry.start..entry.end()], label, listener);
        }
        Ok(())
    }

    fn emit_field<L: MarcListener + ?Sized>(
        &mut self,
        entry: &DirectoryEntry,
        raw: &[u8],
        label: &RecordLabel,
        listener: &mut L,
    ) {
        let content = raw.strip_suffix(&[FIELD_TERMINATOR]).unwrap_or(raw);
        let tag = self.clean_tag(&entry.tag);

        if tag.starts_with(self.config.control_tag_prefix.as_str()) {
            let mut field = Field::control_field(tag);
            listener.begin_control_field(&field);
            field.data = Some(self.field_text(&field, content));
            listener.end_control_field(&field);
            return;
        }

        let indicator_len = usize::from(label.indicator_length);
        if content.len() < indicator_len {
            debug!("dropping field {tag}: {} bytes, shorter than its indicators", content.len());
            if let Some(events) = self.event_listener.as_mut() {
                events.receive(&FieldEvent::FieldDropped {
                    tag,
                    cause: format!(
                        "{} bytes of content, {indicator_len} indicator bytes expected",
                        content.len()
                    ),
                });
            }
            return;
        }
        // '-' is a legacy stand-in for blank seen in some exports
        let indicator: String = content[..indicator_len]
            .iter()
            .map(|&b| if b == b'-' { ' ' } else { b as char })
            .collect();
        let mut field = Field::data_field(tag, indicator);
        listener.begin_data_field(&field);

        let code_len = self
            .config
            .subfield_code_length
            .unwrap_or_else(|| label.subfield_code_length());
        let (lead, subfields) =
            split_subfields(&content[indicator_len..], self.config.subfield_delimiter);
        for segment in subfields {
            if segment.is_empty() {
                continue;
            }
            let (text, _) = self.record_decoder.decode(segment);
            let split = text
                .char_indices()
                .nth(code_len)
                .map_or(text.len(), |(i, _)| i);
            let mut subfield = field.subfield(&text[..split]);
            listener.begin_sub_field(&subfield);
            let value = self.finish_text(&subfield, text[split..].to_string());
            subfield.data = Some(value);
            listener.end_sub_field(&subfield);
        }

        if !lead.is_empty() {
            field.data = Some(self.field_text(&field, lead));
        }
        listener.end_data_field(&field);
    }

    /// Blank tags become the null tag, other invalid tags the error tag.
    fn clean_tag(&mut self, tag: &str) -> String {
        if !self.config.clean_tags || TAG_PATTERN.is_match(tag) {
            return tag.to_string();
        }
        let cleaned = if tag.chars().all(|c| c == ' ' || c == '\0') {
            NULL_TAG
        } else {
            ERROR_TAG
        };
        if let Some(events) = self.event_listener.as_mut() {
            events.receive(&FieldEvent::TagCleaned {
                original: tag.to_string(),
                field: Field::new(cleaned),
            });
        }
        cleaned.to_string()
    }

    fn field_text(&mut self, field: &Field, bytes: &[u8]) -> String {
        let (text, _) = self.record_decoder.decode(bytes);
        self.finish_text(field, text.into_owned())
    }

    /// Apply the transformer and scrubbing to a decoded value.
    fn finish_text(&mut self, field: &Field, text: String) -> String {
        let transformer = self
            .field_transformers
            .get(&field.tag)
            .or(self.transformer.as_ref());
        let mut value = match transformer {
            Some(t) => {
                let transformed = t.transform(&text);
                if transformed != text {
                    if let Some(events) = self.event_listener.as_mut() {
                        events.receive(&FieldEvent::DataTransformed(
                            field.clone().with_data(transformed.clone()),
                        ));
                    }
                }
                transformed
            },
            None => text,
        };
        if self.config.scrub_data {
            if let Some(scrubbed) = scrub_xml10(&value) {
                value = scrubbed;
                if let Some(events) = self.event_listener.as_mut() {
                    events.receive(&FieldEvent::DataScrubbed(field.clone().with_data(value.clone())));
                }
            }
        }
        value
    }

    /// Skip leading line breaks and stray terminators, then read a label.
    fn read_label(&mut self, record_no: usize) -> Result<Option<[u8; LABEL_LENGTH]>> {
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(None);
            }
            let skip = buf
                .iter()
                .take_while(|&&b| matches!(b, b'\n' | b'\r' | RECORD_TERMINATOR))
                .count();
            if skip == 0 {
                break;
            }
            self.reader.consume(skip);
            self.offset += skip as u64;
        }
        let mut label = [0u8; LABEL_LENGTH];
        let got = self.read_fully(&mut label)?;
        if got < LABEL_LENGTH {
            let e = MarcError::TruncatedRecord(format!(
                "stream ends inside a record label ({got} of 24 bytes)"
            ));
            self.recovery.recover(e, record_no)?;
            return Ok(None);
        }
        Ok(Some(label))
    }

    /// Skip to just past the next record terminator.
    fn resync(&mut self) -> Result<()> {
        let mut skipped = Vec::new();
        let n = self.reader.read_until(RECORD_TERMINATOR, &mut skipped)?;
        self.offset += n as u64;
        Ok(())
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(MarcError::IoError(e)),
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }
}

fn at_offset(error: MarcError, offset: u64) -> MarcError {
    match error {
        MarcError::InvalidLeader(msg) => MarcError::InvalidLeader(format!("{msg} at byte {offset}")),
        other => other,
    }
}

/// Split field content after the indicators into the text before the first
/// subfield delimiter and the subfield segments (code plus data).
fn split_subfields(content: &[u8], delimiter: u8) -> (&[u8], Vec<&[u8]>) {
    let mut positions = memchr::memchr_iter(delimiter, content);
    let Some(first) = positions.next() else {
        return (content, Vec::new());
    };
    let mut segments = Vec::new();
    let mut start = first + 1;
    for pos in positions {
        segments.push(&content[start..pos]);
        start = pos + 1;
    }
    segments.push(&content[start..]);
    (&content[..first], segments)
}
