//! Common test helpers and utilities shared across test suite.

#![allow(dead_code)]

use marckv::{Field, MarcListener};

const FT: u8 = 0x1E;
const SD: u8 = 0x1F;
const RT: u8 = 0x1D;

/// Route `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-memory ISO 2709 record builder.
#[derive(Debug, Clone)]
pub struct TestRecord {
    /// Label characters 5-11 (status, type, levels, coding, lengths).
    pub head: String,
    /// Label characters 17-23.
    pub tail: String,
    /// (tag, raw content without field terminator)
    pub fields: Vec<(String, Vec<u8>)>,
}

impl TestRecord {
    /// A bibliographic record with an empty field list.
    pub fn bibliographic() -> Self {
        Self::with_type('a')
    }

    /// A record of the given type of record (label position 6).
    pub fn with_type(record_type: char) -> Self {
        TestRecord {
            head: format!("n{record_type}m a22"),
            tail: " a 4500".to_string(),
            fields: Vec::new(),
        }
    }

    /// Add a control field.
    pub fn control(mut self, tag: &str, value: &str) -> Self {
        self.fields.push((tag.to_string(), value.as_bytes().to_vec()));
        self
    }

    /// Add a data field with two indicators and subfields.
    pub fn data(mut self, tag: &str, ind: &str, subfields: &[(char, &str)]) -> Self {
        let mut content = ind.as_bytes().to_vec();
        for (code, value) in subfields {
            content.push(SD);
            let mut buf = [0u8; 4];
            content.extend_from_slice(code.encode_utf8(&mut buf).as_bytes());
            content.extend_from_slice(value.as_bytes());
        }
        self.fields.push((tag.to_string(), content));
        self
    }

    /// Encode as ISO 2709 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut directory = Vec::new();
        let mut data = Vec::new();
        for (tag, content) in &self.fields {
            directory.extend_from_slice(tag.as_bytes());
            directory.extend_from_slice(format!("{:04}{:05}", content.len() + 1, data.len()).as_bytes());
            data.extend_from_slice(content);
            data.push(FT);
        }
        directory.push(FT);
        let base = 24 + directory.len();
        let total = base + data.len() + 1;
        let mut out = format!("{total:05}{}{base:05}{}", self.head, self.tail).into_bytes();
        assert_eq!(out.len(), 24, "label must be 24 bytes");
        out.extend_from_slice(&directory);
        out.extend_from_slice(&data);
        out.push(RT);
        out
    }
}

/// Concatenate records into one stream.
pub fn stream(records: &[TestRecord]) -> Vec<u8> {
    records.iter().flat_map(TestRecord::to_bytes).collect()
}

/// The two-record sample: 001 plus 245 10 $a for each record.
pub fn two_records() -> Vec<u8> {
    stream(&[
        TestRecord::bibliographic()
            .control("001", "ocn123")
            .data("245", "10", &[('a', "Title")]),
        TestRecord::bibliographic()
            .control("001", "ocn456")
            .data("245", "10", &[('a', "Another title")]),
    ])
}

/// Counts listener events and checks that they nest properly.
#[derive(Debug, Default)]
pub struct EventRecorder {
    pub begin_records: usize,
    pub end_records: usize,
    pub open_fields: i64,
    pub open_subfields: i64,
    pub fields: usize,
    pub subfields: usize,
    pub record_types: Vec<String>,
    pub violations: Vec<String>,
    in_record: bool,
}

impl EventRecorder {
    /// Returns true if every begin was matched by its end.
    pub fn balanced(&self) -> bool {
        self.violations.is_empty()
            && self.begin_records == self.end_records
            && self.open_fields == 0
            && self.open_subfields == 0
    }

    fn check(&mut self, ok: bool, what: &str) {
        if !ok {
            self.violations.push(what.to_string());
        }
    }
}

impl MarcListener for EventRecorder {
    fn begin_record(&mut self, _format: &str, record_type: &str) {
        self.check(!self.in_record, "nested begin_record");
        self.in_record = true;
        self.begin_records += 1;
        self.record_types.push(record_type.to_string());
    }

    fn leader(&mut self, label: &str) {
        self.check(label.chars().count() == 24, "label is not 24 characters");
    }

    fn begin_control_field(&mut self, _field: &Field) {
        self.check(self.open_fields == 0, "field opened inside field");
        self.open_fields += 1;
        self.fields += 1;
    }

    fn end_control_field(&mut self, field: &Field) {
        self.check(field.data.is_some(), "control field closed without data");
        self.open_fields -= 1;
    }

    fn begin_data_field(&mut self, _field: &Field) {
        self.check(self.open_fields == 0, "field opened inside field");
        self.open_fields += 1;
        self.fields += 1;
    }

    fn end_data_field(&mut self, _field: &Field) {
        self.check(self.open_subfields == 0, "data field closed with open subfield");
        self.open_fields -= 1;
    }

    fn begin_sub_field(&mut self, _field: &Field) {
        self.check(self.open_fields == 1, "subfield outside data field");
        self.open_subfields += 1;
        self.subfields += 1;
    }

    fn end_sub_field(&mut self, field: &Field) {
        self.check(field.data.is_some(), "subfield closed without data");
        self.open_subfields -= 1;
    }

    fn end_record(&mut self) {
        self.check(self.in_record, "end_record without begin_record");
        self.check(self.open_fields == 0, "record closed with open field");
        self.in_record = false;
        self.end_records += 1;
    }
}
