//! Record label (leader) parsing and repair.
//!
//! The record label is the fixed 24-byte header at the start of every
//! ISO 2709 record. It declares the total record length, where the data
//! block begins, and how wide indicators, subfield identifiers and directory
//! entries are.
//!
//! # Structure
//!
//! - Positions 0-4: Record length (5 digits)
//! - Position 5: Record status
//! - Position 6: Type of record
//! - Position 7: Bibliographic level
//! - Position 8: Type of control
//! - Position 9: Character coding scheme
//! - Position 10: Indicator length
//! - Position 11: Subfield identifier length (delimiter plus code)
//! - Positions 12-16: Base address of data (5 digits)
//! - Positions 17-19: Encoding level, cataloging form, multipart level
//! - Positions 20-23: Entry map (length-of-field, start-position, impl-defined, undefined)

use crate::error::{MarcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the record label in bytes.
pub const LABEL_LENGTH: usize = 24;

/// Record type name used when the label does not say otherwise.
pub const BIBLIOGRAPHIC: &str = "Bibliographic";
/// Record type name for holdings records (type `u`, `v`, `x`, `y`).
pub const HOLDINGS: &str = "Holdings";
/// Record type name for authority records (type `z`).
pub const AUTHORITY: &str = "Authority";
/// Record type name for classification records (type `w`).
pub const CLASSIFICATION: &str = "Classification";
/// Record type name for community information records (type `q`).
pub const COMMUNITY: &str = "Community";

/// The 24-byte record label.
///
/// Numeric positions that carry garbage in real-world data (indicator
/// length, subfield identifier length, entry map) are repaired to their
/// MARC 21 defaults on parse; record length and base address are not
/// repairable and make the label invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLabel {
    /// Record length - positions 0-4
    pub record_length: u32,
    /// Record status - position 5
    pub record_status: char,
    /// Type of record - position 6
    pub record_type: char,
    /// Bibliographic level - position 7
    pub bibliographic_level: char,
    /// Type of control - position 8
    pub control_type: char,
    /// Character coding scheme - position 9
    pub character_coding: char,
    /// Indicator length - position 10
    pub indicator_length: u8,
    /// Subfield identifier length, delimiter included - position 11
    pub subfield_identifier_length: u8,
    /// Base address of data - positions 12-16
    pub base_address: u32,
    /// Encoding level - position 17
    pub encoding_level: char,
    /// Descriptive cataloging form - position 18
    pub cataloging_form: char,
    /// Multipart resource record level - position 19
    pub multipart_level: char,
    /// Length of the length-of-field portion of a directory entry - position 20
    pub field_length_width: u8,
    /// Length of the starting-character-position portion - position 21
    pub start_position_width: u8,
    /// Length of the implementation-defined portion - position 22
    pub implementation_width: u8,
    /// Undefined entry map character - position 23
    pub undefined: char,
}

impl Default for RecordLabel {
    fn default() -> Self {
        RecordLabel {
            record_length: 0,
            record_status: 'n',
            record_type: 'a',
            bibliographic_level: 'm',
            control_type: ' ',
            character_coding: 'a',
            indicator_length: 2,
            subfield_identifier_length: 2,
            base_address: 0,
            encoding_level: ' ',
            cataloging_form: ' ',
            multipart_level: ' ',
            field_length_width: 4,
            start_position_width: 5,
            implementation_width: 0,
            undefined: '0',
        }
    }
}

impl RecordLabel {
    /// Parse a label from at least 24 bytes, repairing the width positions.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than 24 bytes are given or if the record
    /// length or base address are not five ASCII digits.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LABEL_LENGTH {
            return Err(MarcError::InvalidLeader(format!(
                "Leader must be at least 24 bytes, got {}",
                bytes.len()
            )));
        }

        Ok(RecordLabel {
            record_length: parse_digits(&bytes[0..5])?,
            record_status: bytes[5] as char,
            record_type: bytes[6] as char,
            bibliographic_level: bytes[7] as char,
            control_type: bytes[8] as char,
            character_coding: bytes[9] as char,
            indicator_length: digit_or(bytes[10], 2),
            subfield_identifier_length: digit_or(bytes[11], 2),
            base_address: parse_digits(&bytes[12..17])?,
            encoding_level: bytes[17] as char,
            cataloging_form: bytes[18] as char,
            multipart_level: bytes[19] as char,
            field_length_width: nonzero_digit_or(bytes[20], 4),
            start_position_width: nonzero_digit_or(bytes[21], 5),
            implementation_width: digit_or(bytes[22], 0),
            undefined: bytes[23] as char,
        })
    }

    /// Validate that the label is suitable for binary record reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the record length or base address is less than 24,
    /// or if the base address lies beyond the declared record length.
    pub fn validate_for_reading(&self) -> Result<()> {
        if (self.record_length as usize) < LABEL_LENGTH {
            return Err(MarcError::InvalidLeader(format!(
                "Record length must be at least 24, got {}",
                self.record_length
            )));
        }
        if (self.base_address as usize) < LABEL_LENGTH {
            return Err(MarcError::InvalidLeader(format!(
                "Base address of data must be at least 24, got {}",
                self.base_address
            )));
        }
        if self.base_address > self.record_length {
            return Err(MarcError::InvalidLeader(format!(
                "Base address {} exceeds record length {}",
                self.base_address, self.record_length
            )));
        }
        Ok(())
    }

    /// Width of one directory entry: tag plus the entry map widths.
    #[must_use]
    pub fn directory_entry_width(&self) -> usize {
        3 + usize::from(self.field_length_width)
            + usize::from(self.start_position_width)
            + usize::from(self.implementation_width)
    }

    /// Number of subfield code characters following the delimiter.
    #[must_use]
    pub fn subfield_code_length(&self) -> usize {
        usize::from(self.subfield_identifier_length.saturating_sub(1)).max(1)
    }

    /// Name of the record type declared at position 6.
    #[must_use]
    pub fn record_type_name(&self) -> &'static str {
        match self.record_type {
            'u' | 'v' | 'x' | 'y' => HOLDINGS,
            'z' => AUTHORITY,
            'w' => CLASSIFICATION,
            'q' => COMMUNITY,
            _ => BIBLIOGRAPHIC,
        }
    }

    /// Serialize the label to 24 bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the record length or base address do not fit
    /// in five digits.
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        if self.record_length > 99_999 || self.base_address > 99_999 {
            return Err(MarcError::InvalidLeader(format!(
                "Record length {} or base address {} exceeds 5 digits",
                self.record_length, self.base_address
            )));
        }
        Ok(self.to_string().into_bytes())
    }
}

impl fmt::Display for RecordLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:05}{}{}{}{}{}{}{}{:05}{}{}{}{}{}{}{}",
            self.record_length,
            self.record_status,
            self.record_type,
            self.bibliographic_level,
            self.control_type,
            self.character_coding,
            self.indicator_length,
            self.subfield_identifier_length,
            self.base_address,
            self.encoding_level,
            self.cataloging_form,
            self.multipart_level,
            self.field_length_width,
            self.start_position_width,
            self.implementation_width,
            self.undefined
        )
    }
}

fn digit_or(byte: u8, default: u8) -> u8 {
    if byte.is_ascii_digit() {
        byte - b'0'
    } else {
        default
    }
}

fn nonzero_digit_or(byte: u8, default: u8) -> u8 {
    match digit_or(byte, default) {
        0 => default,
        d => d,
    }
}

/// Parse 5-digit ASCII number from bytes
fn parse_digits(bytes: &[u8]) -> Result<u32> {
    let mut result = 0u32;
    for &byte in bytes {
        if byte.is_ascii_digit() {
            result = result * 10 + u32::from(byte - b'0');
        } else {
            return Err(MarcError::InvalidLeader(format!(
                "Invalid numeric field: '{}'",
                String::from_utf8_lossy(bytes)
            )));
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_from_bytes() {
        let label = RecordLabel::from_bytes(b"00714cam a2200205 a 4500").unwrap();
        assert_eq!(label.record_length, 714);
        assert_eq!(label.record_status, 'c');
        assert_eq!(label.record_type, 'a');
        assert_eq!(label.bibliographic_level, 'm');
        assert_eq!(label.character_coding, 'a');
        assert_eq!(label.indicator_length, 2);
        assert_eq!(label.subfield_identifier_length, 2);
        assert_eq!(label.base_address, 205);
        assert_eq!(label.directory_entry_width(), 12);
        assert_eq!(label.subfield_code_length(), 1);
    }

    #[test]
    fn test_label_display_roundtrip() {
        let raw = "00714cam a2200205 a 4500";
        let label = RecordLabel::from_bytes(raw.as_bytes()).unwrap();
        assert_eq!(label.to_string(), raw);
        assert_eq!(label.as_bytes().unwrap(), raw.as_bytes());
    }

    #[test]
    fn test_label_repairs_widths() {
        let label = RecordLabel::from_bytes(b"00714cam a  00205 a   00").unwrap();
        assert_eq!(label.indicator_length, 2);
        assert_eq!(label.subfield_identifier_length, 2);
        assert_eq!(label.field_length_width, 4);
        assert_eq!(label.start_position_width, 5);
        assert_eq!(label.to_string(), "00714cam a2200205 a 4500");
    }

    #[test]
    fn test_label_too_short() {
        assert!(RecordLabel::from_bytes(b"0123456789012").is_err());
    }

    #[test]
    fn test_label_non_numeric_length() {
        let err = RecordLabel::from_bytes(b"0x714cam a2200205 a 4500").unwrap_err();
        assert!(err.to_string().contains("Invalid numeric field"), "got: {err}");
    }

    #[test]
    fn test_record_type_names() {
        let mut label = RecordLabel::default();
        assert_eq!(label.record_type_name(), BIBLIOGRAPHIC);
        label.record_type = 'x';
        assert_eq!(label.record_type_name(), HOLDINGS);
        label.record_type = 'z';
        assert_eq!(label.record_type_name(), AUTHORITY);
    }

    #[test]
    fn test_validate_for_reading_rejects_small_record_length() {
        let label = RecordLabel::from_bytes(b"00010nam a2200025 i 4500").unwrap();
        let err = label.validate_for_reading().unwrap_err().to_string();
        assert!(err.contains("Record length must be at least 24"), "got: {err}");
    }

    #[test]
    fn test_validate_for_reading_rejects_small_base_address() {
        let label = RecordLabel::from_bytes(b"00050nam a2200010 i 4500").unwrap();
        let err = label.validate_for_reading().unwrap_err().to_string();
        assert!(
            err.contains("Base address of data must be at least 24"),
            "got: {err}"
        );
    }

    #[test]
    fn test_validate_for_reading_rejects_base_beyond_length() {
        let label = RecordLabel::from_bytes(b"00050nam a2200080 i 4500").unwrap();
        assert!(label.validate_for_reading().is_err());
    }
}
