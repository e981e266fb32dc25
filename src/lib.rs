#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! # marckv: ISO 2709 to key/value streams
//!
//! Decodes MARC records in the ISO 2709 interchange format, flattens them into
//! key/value pairs and maps those pairs to resources on a pool of worker
//! threads.
//!
//! ```text
//! bytes -> Iso2709Reader -> MarcListener events -> KeyValueAdapter
//!       -> ElementMapper -> rendezvous channel -> N KeyValuePipeline workers
//!       -> ResourceBuilder (one per worker)
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use marckv::{
//!     ElementMap, ElementMapper, Iso2709Reader, KeyValueAdapter, ResourceCollector,
//! };
//! use std::io::Cursor;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let map = ElementMap::from_json(r#"{
//!     "001": { "kind": "predicate", "predicate": "identifier" },
//!     "245": { "kind": "predicate", "predicate": "title", "subfields": { "a": "main" } }
//! }"#)?;
//! let (tx, rx) = crossbeam_channel::unbounded();
//!
//! let mut mapper = ElementMapper::new(map).pipelines(4);
//! mapper.start(|_| ResourceCollector::new(tx.clone()))?;
//! let mut reader = Iso2709Reader::new(Cursor::new(Vec::new()));
//! {
//!     let mut adapter = KeyValueAdapter::new().add_listener(&mut mapper);
//!     reader.parse(&mut adapter)?;
//! }
//! let reports = mapper.close()?;
//! let pairs: u64 = reports.iter().map(|r| r.counter).sum();
//! assert_eq!(pairs, 0);
//! drop(tx);
//! for resource in rx {
//!     println!("{}", resource.to_json()?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`reader`] - streaming ISO 2709 decoder and its configuration
//! - [`writer`] - re-encoding listener events as ISO 2709
//! - [`listener`] - the listener contract, record-type dispatch, field events
//! - [`keyvalue`] - the key/value adapter and listener contract
//! - [`mapping`] - JSON mapping tables
//! - [`mapper`] - the concurrent element mapper
//! - [`pipeline`] - the worker loop and builder contract
//! - [`resource`] - output resources and the channel-backed builder
//! - [`field`] - field designators and keys
//! - [`leader`] - the 24-byte record label
//! - [`directory`] - record directory parsing
//! - [`encoding`] - field data encodings
//! - [`transformer`] - string transformers
//! - [`recovery`] - error policy for malformed records
//! - [`error`] - error types and result type

pub mod directory;
pub mod encoding;
pub mod error;
pub mod field;
pub mod keyvalue;
pub mod leader;
pub mod listener;
pub mod mapper;
pub mod mapping;
pub mod pipeline;
pub mod reader;
pub mod recovery;
pub mod resource;
pub mod transformer;
pub mod writer;

pub use directory::{Directory, DirectoryEntry};
pub use encoding::{FieldDecoder, FieldEncoding};
pub use error::{MarcError, Result};
pub use field::{Field, FieldCollection, ERROR_TAG, NULL_TAG};
pub use keyvalue::{KeyValue, KeyValueAdapter, KeyValueListener, KeyValueLogger};
pub use leader::RecordLabel;
pub use listener::{FieldEvent, FieldEventListener, MarcListener, TypeDispatcher};
pub use mapper::{ElementMapper, MapperConfig, MapperError};
pub use mapping::{ElementMap, ElementMapping, MappedElement, Resolution, ValuePattern};
pub use pipeline::{Batch, KeyValuePipeline, PipelineReport, ResourceBuilder, UnmappedKeyListener};
pub use reader::{DecoderConfig, Iso2709Reader};
pub use recovery::{ErrorPolicy, RecoveryContext};
pub use resource::{Node, Resource, ResourceCollector};
pub use transformer::{Chain, Identity, NormalizationForm, StringTransformer, UnicodeNormalizer};
pub use writer::Iso2709Writer;
