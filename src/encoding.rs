//! Character encodings for field data.
//!
//! ISO 2709 framing is byte-oriented: directory offsets and lengths always
//! count bytes. Field content is decoded to text one field slice at a time,
//! after framing, so that multi-byte or legacy 8-bit encodings cannot shift
//! offsets.
//!
//! - **UTF-8** (default) - invalid sequences are replaced, never fatal
//! - **Legacy** - any single- or multi-byte encoding known to `encoding_rs`
//!   by its WHATWG label (`iso-8859-1`, `windows-1252`, `iso-8859-2`, ...)

use crate::error::{MarcError, Result};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Encoding used to turn field bytes into text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldEncoding {
    /// UTF-8, decoded lossily.
    #[default]
    Utf8,
    /// A legacy encoding named by its WHATWG label.
    Legacy(String),
}

impl FieldEncoding {
    /// Create a legacy encoding from a label, checking that it is known.
    ///
    /// # Errors
    ///
    /// Returns `MarcError::EncodingError` if `encoding_rs` does not know the label.
    pub fn legacy(label: &str) -> Result<Self> {
        resolve(label)?;
        Ok(FieldEncoding::Legacy(label.to_string()))
    }

    /// Choose an encoding from the character coding scheme at label position 9.
    ///
    /// `'a'` means UCS/Unicode; anything else is treated as the given fallback.
    #[must_use]
    pub fn from_label_char(c: char, fallback: &FieldEncoding) -> FieldEncoding {
        match c {
            'a' => FieldEncoding::Utf8,
            _ => fallback.clone(),
        }
    }

    /// Build a decoder for this encoding.
    ///
    /// # Errors
    ///
    /// Returns `MarcError::EncodingError` for an unknown legacy label.
    pub fn decoder(&self) -> Result<FieldDecoder> {
        match self {
            FieldEncoding::Utf8 => Ok(FieldDecoder { encoding: None }),
            FieldEncoding::Legacy(label) => Ok(FieldDecoder {
                encoding: Some(resolve(label)?),
            }),
        }
    }
}

fn resolve(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| MarcError::EncodingError(format!("Unknown character encoding: {label}")))
}

/// A resolved decoder, cheap to copy and reuse for every field.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldDecoder {
    encoding: Option<&'static Encoding>,
}

impl FieldDecoder {
    /// Decode one slice of field bytes.
    ///
    /// Malformed sequences are replaced with U+FFFD; the second element of
    /// the returned pair is true if that happened.
    #[must_use]
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> (Cow<'a, str>, bool) {
        match self.encoding {
            None => match std::str::from_utf8(bytes) {
                Ok(s) => (Cow::Borrowed(s), false),
                Err(_) => (String::from_utf8_lossy(bytes), true),
            },
            Some(encoding) => {
                let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
                (text, had_errors)
            },
        }
    }

    /// Encode text back to field bytes, the inverse of [`FieldDecoder::decode`].
    #[must_use]
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        match self.encoding {
            None => Cow::Borrowed(text.as_bytes()),
            Some(encoding) => {
                let (bytes, _, _) = encoding.encode(text);
                bytes
            },
        }
    }
}
