//! Record directory parsing.
//!
//! The directory follows the record label and holds one fixed-width entry per
//! field: a three-character tag, the field length and the field's starting
//! position relative to the base address of data. The directory is closed by
//! a field terminator.

use crate::error::{MarcError, Result};
use crate::leader::RecordLabel;
use crate::reader::FIELD_TERMINATOR;

/// One directory entry locating a field inside the data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Field tag, as found in the directory (possibly not a valid tag).
    pub tag: String,
    /// Field length in bytes, field terminator included.
    pub length: usize,
    /// Start offset relative to the base address of data.
    pub start: usize,
}

impl DirectoryEntry {
    /// End offset (exclusive) relative to the base address of data.
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// The parsed directory of one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<DirectoryEntry>,
}

impl Directory {
    /// Parse directory entries from the bytes between the label and the base
    /// address, stopping at the first field terminator.
    ///
    /// Entry widths come from the label's entry map.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is incomplete or its length or start
    /// position are not ASCII digits.
    pub fn parse(bytes: &[u8], label: &RecordLabel) -> Result<Self> {
        let width = label.directory_entry_width();
        let len_width = usize::from(label.field_length_width);
        let start_width = usize::from(label.start_position_width);

        let mut entries = Vec::with_capacity(bytes.len() / width);
        let mut pos = 0;
        while pos < bytes.len() {
            if bytes[pos] == FIELD_TERMINATOR {
                break;
            }
            if pos + width > bytes.len() {
                return Err(MarcError::InvalidDirectory(format!(
                    "Incomplete directory entry at offset {pos}"
                )));
            }
            let chunk = &bytes[pos..pos + width];
            let tag = String::from_utf8_lossy(&chunk[0..3]).into_owned();
            let length = parse_digits(&chunk[3..3 + len_width], &tag)?;
            let start = parse_digits(&chunk[3 + len_width..3 + len_width + start_width], &tag)?;
            entries.push(DirectoryEntry { tag, length, start });
            pos += width;
        }
        Ok(Directory { entries })
    }

    /// Check that every entry lies inside a data block of `data_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns the first entry that exceeds the data block.
    pub fn check_bounds(&self, data_len: usize) -> Result<()> {
        for entry in &self.entries {
            if entry.end() > data_len {
                return Err(MarcError::InvalidDirectory(format!(
                    "Field {} at {}+{} exceeds data area of {data_len} bytes",
                    entry.tag, entry.start, entry.length
                )));
            }
        }
        Ok(())
    }

    /// Directory entries in directory order.
    #[must_use]
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the directory has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_digits(bytes: &[u8], tag: &str) -> Result<usize> {
    let mut result = 0usize;
    for &byte in bytes {
        if byte.is_ascii_digit() {
            result = result * 10 + usize::from(byte - b'0');
        } else {
            return Err(MarcError::InvalidDirectory(format!(
                "Invalid numeric field in entry for tag {tag}: got byte {}",
                byte as char
            )));
        }
    }
    Ok(result)
}
