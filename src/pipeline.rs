//! The key/value pipeline worker.
//!
//! Each worker owns a [`ResourceBuilder`], a pair counter and a set of keys it
//! could not map. It takes whole-record batches from the shared hand-off
//! channel until it receives [`Batch::Shutdown`]:
//!
//! ```text
//! recv ─┬─ Shutdown              -> exit
//!       ├─ [marker]              -> skip
//!       └─ [pairs.., marker]     -> begin, build per keyed pair, end at marker
//! ```
//!
//! Nothing in a worker is shared: counters are per worker and are summed by
//! the caller from the [`PipelineReport`]s returned by
//! [`ElementMapper::close`](crate::ElementMapper::close).

use crate::field::FieldCollection;
use crate::keyvalue::KeyValue;
use crate::mapping::{ElementMap, MappedElement, Resolution};
use crossbeam_channel::Receiver;
use log::{debug, error, trace};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A unit of work on the hand-off channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    /// All pairs of one record, ending with its boundary marker.
    Record(Vec<KeyValue>),
    /// Tells the receiving worker to exit.
    Shutdown,
}

/// Builds an output resource from the mapped pairs of a record.
///
/// Every worker gets its own builder, so implementations need `Send` but
/// never `Sync`. An error ends the worker that returned it.
pub trait ResourceBuilder: Send {
    /// Start a new resource.
    ///
    /// # Errors
    ///
    /// Any error ends the worker.
    fn begin(&mut self) -> anyhow::Result<()>;

    /// Attach one mapped element to the current resource.
    ///
    /// # Errors
    ///
    /// Any error ends the worker.
    fn build(&mut self, element: MappedElement) -> anyhow::Result<()>;

    /// Finish the current resource.
    ///
    /// # Errors
    ///
    /// Any error ends the worker.
    fn end(&mut self) -> anyhow::Result<()>;
}

impl<B: ResourceBuilder + ?Sized> ResourceBuilder for Box<B> {
    fn begin(&mut self) -> anyhow::Result<()> {
        (**self).begin()
    }
    fn build(&mut self, element: MappedElement) -> anyhow::Result<()> {
        (**self).build(element)
    }
    fn end(&mut self) -> anyhow::Result<()> {
        (**self).end()
    }
}

/// Notified once per worker for every distinct key with no mapping.
pub trait UnmappedKeyListener: Send + Sync {
    /// A key spec with no entry in the mapping table.
    fn unknown(&self, key: &str);
}

impl<F: Fn(&str) + Send + Sync> UnmappedKeyListener for F {
    fn unknown(&self, key: &str) {
        self(key);
    }
}

/// What a worker did before it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// Worker number, from 0.
    pub id: usize,
    /// Keyed pairs processed.
    pub counter: u64,
    /// Records built.
    pub records: u64,
    /// Distinct key specs with no mapping.
    pub unknown_keys: BTreeSet<String>,
    /// Why the worker stopped early, if it did.
    pub failure: Option<String>,
}

/// One worker.
pub struct KeyValuePipeline<B: ResourceBuilder> {
    id: usize,
    receiver: Receiver<Batch>,
    builder: B,
    map: Arc<ElementMap>,
    listener: Option<Arc<dyn UnmappedKeyListener>>,
    counter: u64,
    records: u64,
    unknown_keys: BTreeSet<String>,
}

impl<B: ResourceBuilder> std::fmt::Debug for KeyValuePipeline<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValuePipeline")
            .field("id", &self.id)
            .field("counter", &self.counter)
            .field("records", &self.records)
            .field("unknown_keys", &self.unknown_keys.len())
            .finish_non_exhaustive()
    }
}

impl<B: ResourceBuilder> KeyValuePipeline<B> {
    /// Create a worker reading from `receiver`.
    pub fn new(id: usize, receiver: Receiver<Batch>, builder: B, map: Arc<ElementMap>) -> Self {
        KeyValuePipeline {
            id,
            receiver,
            builder,
            map,
            listener: None,
            counter: 0,
            records: 0,
            unknown_keys: BTreeSet::new(),
        }
    }

    /// Set the unmapped-key listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Option<Arc<dyn UnmappedKeyListener>>) -> Self {
        self.listener = listener;
        self
    }

    /// Keyed pairs processed so far.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Distinct unmapped key specs seen so far.
    #[must_use]
    pub fn unknown_keys(&self) -> &BTreeSet<String> {
        &self.unknown_keys
    }

    /// Process batches until shutdown, disconnection or failure.
    ///
    /// Builder errors and panics end this worker only; they are logged and
    /// returned in the report.
    pub fn run(mut self) -> PipelineReport {
        debug!("pipeline {} started", self.id);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process()));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                error!("pipeline {} failed: {e:#}", self.id);
                Some(format!("{e:#}"))
            },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("pipeline {} panicked: {message}", self.id);
                Some(format!("panic: {message}"))
            },
        };
        debug!(
            "pipeline {} stopped after {} pairs in {} records",
            self.id, self.counter, self.records
        );
        PipelineReport {
            id: self.id,
            counter: self.counter,
            records: self.records,
            unknown_keys: std::mem::take(&mut self.unknown_keys),
            failure,
        }
    }

    fn process(&mut self) -> anyhow::Result<()> {
        loop {
            match self.receiver.recv() {
                Ok(Batch::Record(batch)) => self.handle(batch)?,
                Ok(Batch::Shutdown) => return Ok(()),
                Err(_) => {
                    debug!("pipeline {}: channel disconnected", self.id);
                    return Ok(());
                },
            }
        }
    }

    /// Build one record.
    pub(crate) fn handle(&mut self, batch: Vec<KeyValue>) -> anyhow::Result<()> {
        if batch.len() == 1 && batch[0].is_marker() {
            trace!("pipeline {}: skipping empty record", self.id);
            return Ok(());
        }
        self.builder.begin()?;
        let mut ended = false;
        for pair in batch {
            match pair.key {
                Some(key) => self.build(&key, pair.value.as_deref().unwrap_or_default())?,
                None => {
                    if !ended {
                        self.builder.end()?;
                        ended = true;
                    }
                },
            }
        }
        if !ended {
            self.builder.end()?;
        }
        self.records += 1;
        Ok(())
    }

    fn build(&mut self, key: &FieldCollection, value: &str) -> anyhow::Result<()> {
        self.counter += 1;
        match self.map.resolve(key, value) {
            Resolution::Mapped(element) => self.builder.build(element)?,
            Resolution::Dropped => {},
            Resolution::Unmapped => {
                let spec = key.to_spec();
                if !self.unknown_keys.contains(&spec) {
                    if let Some(listener) = &self.listener {
                        listener.unknown(&spec);
                    }
                    self.unknown_keys.insert(spec);
                }
            },
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::mapping::ElementMapping;
    use crossbeam_channel::unbounded;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Trace {
        calls: Vec<String>,
    }

    impl ResourceBuilder for Arc<Mutex<Trace>> {
        fn begin(&mut self) -> anyhow::Result<()> {
            self.lock().unwrap().calls.push("begin".to_string());
            Ok(())
        }
        fn build(&mut self, element: MappedElement) -> anyhow::Result<()> {
            self.lock()
                .unwrap()
                .calls
                .push(format!("{}={}", element.predicate, element.value));
            Ok(())
        }
        fn end(&mut self) -> anyhow::Result<()> {
            self.lock().unwrap().calls.push("end".to_string());
            Ok(())
        }
    }

    struct Failing;

    impl ResourceBuilder for Failing {
        fn begin(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn build(&mut self, _element: MappedElement) -> anyhow::Result<()> {
            anyhow::bail!("store unavailable")
        }
        fn end(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn record(values: &[(&str, &str)]) -> Batch {
        let mut batch: Vec<KeyValue> = values
            .iter()
            .map(|(tag, v)| KeyValue::new(FieldCollection::label(*tag), *v))
            .collect();
        batch.push(KeyValue::marker());
        Batch::Record(batch)
    }

    fn id_map() -> Arc<ElementMap> {
        Arc::new(ElementMap::new().with("001", ElementMapping::predicate("id")))
    }

    #[test]
    fn test_builds_record_and_counts_pairs() {
        let (tx, rx) = unbounded();
        let trace = Arc::new(Mutex::new(Trace::default()));
        let pipeline = KeyValuePipeline::new(0, rx, Arc::clone(&trace), id_map());
        tx.send(record(&[("001", "a"), ("002", "b")])).unwrap();
        tx.send(Batch::Record(vec![KeyValue::marker()])).unwrap();
        tx.send(Batch::Shutdown).unwrap();
        let report = pipeline.run();
        assert_eq!(report.counter, 2);
        assert_eq!(report.records, 1);
        assert!(report.failure.is_none());
        assert_eq!(trace.lock().unwrap().calls, vec!["begin", "id=a", "end"]);
    }

    #[test]
    fn test_unmapped_listener_called_once_per_key() {
        let (tx, rx) = unbounded();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn UnmappedKeyListener> =
            Arc::new(move |key: &str| sink.lock().unwrap().push(key.to_string()));
        let pipeline = KeyValuePipeline::new(0, rx, Arc::new(Mutex::new(Trace::default())), id_map())
            .with_listener(Some(listener));
        tx.send(record(&[("001", "a"), ("002", "b")])).unwrap();
        tx.send(record(&[("001", "c"), ("002", "d")])).unwrap();
        drop(tx);
        let report = pipeline.run();
        assert_eq!(*seen.lock().unwrap(), vec!["002"]);
        assert_eq!(report.unknown_keys.len(), 1);
        assert_eq!(report.counter, 4);
    }

    #[test]
    fn test_batch_without_marker_still_ends() {
        let (tx, rx) = unbounded();
        let trace = Arc::new(Mutex::new(Trace::default()));
        let pipeline = KeyValuePipeline::new(0, rx, Arc::clone(&trace), id_map());
        let key = FieldCollection::label("001");
        tx.send(Batch::Record(vec![KeyValue::new(key, "x")])).unwrap();
        drop(tx);
        pipeline.run();
        assert_eq!(trace.lock().unwrap().calls, vec!["begin", "id=x", "end"]);
    }

    #[test]
    fn test_builder_error_ends_worker() {
        let (tx, rx) = unbounded();
        let pipeline = KeyValuePipeline::new(3, rx, Failing, id_map());
        tx.send(record(&[("001", "a")])).unwrap();
        tx.send(record(&[("001", "b")])).unwrap();
        let report = pipeline.run();
        assert_eq!(report.id, 3);
        assert_eq!(report.counter, 1);
        assert_eq!(report.failure.as_deref(), Some("store unavailable"));
    }

    #[test]
    fn test_panic_is_contained() {
        struct Panicking;
        impl ResourceBuilder for Panicking {
            fn begin(&mut self) -> anyhow::Result<()> {
                panic!("boom");
            }
            fn build(&mut self, _element: MappedElement) -> anyhow::Result<()> {
                Ok(())
            }
            fn end(&mut self) -> anyhow::Result<()> {
                Ok(())
            }
        }
        let (tx, rx) = unbounded();
        let pipeline = KeyValuePipeline::new(0, rx, Panicking, id_map());
        tx.send(record(&[("001", "a")])).unwrap();
        let report = pipeline.run();
        assert_eq!(report.failure.as_deref(), Some("panic: boom"));
    }

    #[test]
    fn test_field_designators_in_unknown_keys() {
        let (tx, rx) = unbounded();
        let pipeline =
            KeyValuePipeline::new(0, rx, Arc::new(Mutex::new(Trace::default())), id_map());
        let field = Field::data_field("245", "10");
        let key: FieldCollection = vec![field.clone(), field.subfield("a")].into_iter().collect();
        tx.send(Batch::Record(vec![KeyValue::new(key, "T"), KeyValue::marker()]))
            .unwrap();
        drop(tx);
        let report = pipeline.run();
        assert!(report.unknown_keys.contains("245$1$0$a"));
    }
}
