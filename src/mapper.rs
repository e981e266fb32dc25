//! Concurrent element mapper.
//!
//! [`ElementMapper`] is the [`KeyValueListener`] at the end of the decoding
//! thread. It collects the pairs of one record, publishes them as a single
//! [`Batch`] on a rendezvous channel and lets a fixed pool of
//! [`KeyValuePipeline`] workers build resources from them.
//!
//! The channel has no buffer by default: publishing blocks until a worker is
//! free to take the batch, so at most one record per worker plus the one
//! being assembled is in memory. Any idle worker takes the next batch, which
//! means records may be built out of stream order; each record's pairs stay
//! together and in order.
//!
//! # Examples
//!
//! ```
//! use marckv::{ElementMap, ElementMapper, ElementMapping, ResourceCollector};
//!
//! let map = ElementMap::new().with("001", ElementMapping::predicate("identifier"));
//! let (tx, rx) = crossbeam_channel::unbounded();
//!
//! let mut mapper = ElementMapper::new(map).pipelines(2);
//! mapper.start(|_| ResourceCollector::new(tx.clone()))?;
//! // feed the mapper from a KeyValueAdapter here
//! let reports = mapper.close()?;
//! assert_eq!(reports.len(), 2);
//! drop(tx);
//! assert_eq!(rx.iter().count(), 0);
//! # Ok::<(), marckv::MapperError>(())
//! ```

use crate::field::FieldCollection;
use crate::keyvalue::{KeyValue, KeyValueListener};
use crate::mapping::ElementMap;
use crate::pipeline::{Batch, KeyValuePipeline, PipelineReport, ResourceBuilder, UnmappedKeyListener};
use crossbeam_channel::{bounded, Sender};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Upper bound on the number of pipeline workers.
pub const MAX_PIPELINES: usize = 256;

/// Errors raised by the mapper.
#[derive(Error, Debug)]
pub enum MapperError {
    /// The mapper was closed.
    #[error("Mapper is closed")]
    Closed,

    /// Pairs were published before `start`.
    #[error("Mapper is not started")]
    NotStarted,

    /// No worker is left to take the batch; it was dropped.
    #[error("All pipelines have stopped; batch dropped")]
    Disconnected,

    /// A worker thread could not be spawned.
    #[error("Cannot spawn pipeline thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Mapper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Number of workers, within `[1, 256]`.
    pub pipelines: usize,
    /// Capacity of the hand-off channel; 0 is a rendezvous channel.
    pub queue_capacity: usize,
    /// Worker threads are named `{prefix}-{id}`.
    pub thread_name_prefix: String,
}

impl Default for MapperConfig {
    fn default() -> Self {
        MapperConfig {
            pipelines: thread::available_parallelism().map_or(1, usize::from),
            queue_capacity: 0,
            thread_name_prefix: "pipeline".to_string(),
        }
    }
}

impl MapperConfig {
    /// Set the number of workers, clamped to `[1, 256]`.
    #[must_use]
    pub fn with_pipelines(mut self, n: usize) -> Self {
        self.pipelines = n.clamp(1, MAX_PIPELINES);
        self
    }

    /// Set the hand-off channel capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

/// Distributes records to a pool of pipeline workers.
pub struct ElementMapper {
    config: MapperConfig,
    map: Arc<ElementMap>,
    listener: Option<Arc<dyn UnmappedKeyListener>>,
    sender: Option<Sender<Batch>>,
    workers: Vec<JoinHandle<PipelineReport>>,
    buffer: Vec<KeyValue>,
    published: u64,
    dropped: u64,
    closed: bool,
}

impl fmt::Debug for ElementMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementMapper")
            .field("config", &self.config)
            .field("mappings", &self.map.len())
            .field("workers", &self.workers.len())
            .field("published", &self.published)
            .field("dropped", &self.dropped)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ElementMapper {
    /// Create a mapper for the given table with the default configuration.
    #[must_use]
    pub fn new(map: ElementMap) -> Self {
        ElementMapper {
            config: MapperConfig::default(),
            map: Arc::new(map),
            listener: None,
            sender: None,
            workers: Vec::new(),
            buffer: Vec::new(),
            published: 0,
            dropped: 0,
            closed: false,
        }
    }

    /// Replace the configuration; the worker count is clamped to `[1, 256]`.
    #[must_use]
    pub fn with_config(mut self, config: MapperConfig) -> Self {
        let pipelines = config.pipelines;
        self.config = config.with_pipelines(pipelines);
        self
    }

    /// Set the number of workers, clamped to `[1, 256]`.
    ///
    /// Takes effect at [`ElementMapper::start`].
    #[must_use]
    pub fn pipelines(mut self, n: usize) -> Self {
        self.config.pipelines = n.clamp(1, MAX_PIPELINES);
        self
    }

    /// Set the listener notified of unmapped keys.
    ///
    /// Takes effect at [`ElementMapper::start`].
    pub fn set_listener(&mut self, listener: impl UnmappedKeyListener + 'static) {
        self.listener = Some(Arc::new(listener));
    }

    /// Builder-style [`ElementMapper::set_listener`].
    #[must_use]
    pub fn with_listener(mut self, listener: impl UnmappedKeyListener + 'static) -> Self {
        self.set_listener(listener);
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Returns true once the workers are running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.sender.is_some()
    }

    /// Number of batches handed to a worker.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Number of batches lost because no worker could take them.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Spawn the workers, each with its own builder from `factory`.
    ///
    /// The factory is called with the worker number. Calling `start` on a
    /// running mapper does nothing.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Closed` after [`ElementMapper::close`], and
    /// `MapperError::Spawn` if a thread cannot be created; workers spawned
    /// before the failure are shut down.
    pub fn start<F, B>(&mut self, mut factory: F) -> Result<&mut Self, MapperError>
    where
        F: FnMut(usize) -> B,
        B: ResourceBuilder + 'static,
    {
        if self.closed {
            return Err(MapperError::Closed);
        }
        if self.is_started() {
            debug!("mapper already started with {} pipelines", self.workers.len());
            return Ok(self);
        }
        let (sender, receiver) = bounded(self.config.queue_capacity);
        for id in 0..self.config.pipelines {
            let pipeline = KeyValuePipeline::new(id, receiver.clone(), factory(id), Arc::clone(&self.map))
                .with_listener(self.listener.clone());
            let spawned = thread::Builder::new()
                .name(format!("{}-{id}", self.config.thread_name_prefix))
                .spawn(move || pipeline.run());
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    self.sender = Some(sender);
                    self.close()?;
                    return Err(MapperError::Spawn(e));
                },
            }
        }
        debug!(
            "started {} pipelines (queue capacity {})",
            self.workers.len(),
            self.config.queue_capacity
        );
        self.sender = Some(sender);
        Ok(self)
    }

    /// Add one pair to the record being assembled.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Closed` after [`ElementMapper::close`].
    pub fn push(&mut self, pair: KeyValue) -> Result<(), MapperError> {
        if self.closed {
            return Err(MapperError::Closed);
        }
        self.buffer.push(pair);
        Ok(())
    }

    /// Hand the assembled record to a worker, blocking until one takes it.
    ///
    /// The buffer moves into the batch; the next record starts empty.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Closed` after close, `MapperError::NotStarted`
    /// before start and `MapperError::Disconnected` if every worker has
    /// stopped. In every case the record is dropped.
    pub fn publish(&mut self) -> Result<(), MapperError> {
        let batch = std::mem::take(&mut self.buffer);
        if self.closed {
            return Err(MapperError::Closed);
        }
        let Some(sender) = &self.sender else {
            self.dropped += 1;
            return Err(MapperError::NotStarted);
        };
        if batch.is_empty() {
            return Ok(());
        }
        if sender.send(Batch::Record(batch)).is_err() {
            self.dropped += 1;
            return Err(MapperError::Disconnected);
        }
        self.published += 1;
        Ok(())
    }

    /// Stop every worker and collect their reports.
    ///
    /// Sends one [`Batch::Shutdown`] per worker, then joins them. Workers
    /// finish the record they are building before they see the shutdown.
    /// Closing twice returns no reports the second time.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for a join timeout.
    pub fn close(&mut self) -> Result<Vec<PipelineReport>, MapperError> {
        self.closed = true;
        if !self.buffer.is_empty() {
            warn!("closing mapper with {} unpublished pairs", self.buffer.len());
            self.buffer.clear();
        }
        let Some(sender) = self.sender.take() else {
            return Ok(Vec::new());
        };
        for _ in 0..self.workers.len() {
            if sender.send(Batch::Shutdown).is_err() {
                // every receiver is gone, remaining workers have exited
                break;
            }
        }
        drop(sender);

        let mut reports = Vec::with_capacity(self.workers.len());
        for (id, handle) in self.workers.drain(..).enumerate() {
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => reports.push(PipelineReport {
                    id,
                    failure: Some("worker thread panicked".to_string()),
                    ..PipelineReport::default()
                }),
            }
        }
        let total: u64 = reports.iter().map(|r| r.counter).sum();
        debug!(
            "closed mapper: {} pipelines, {} pairs, {} batches published, {} dropped",
            reports.len(),
            total,
            self.published,
            self.dropped
        );
        Ok(reports)
    }
}

impl KeyValueListener for ElementMapper {
    fn begin(&mut self) {
        self.buffer.clear();
    }

    fn key_value(&mut self, key: Option<&FieldCollection>, value: Option<&str>) {
        let pair = KeyValue {
            key: key.cloned(),
            value: value.map(str::to_string),
        };
        if let Err(e) = self.push(pair) {
            warn!("pair ignored: {e}");
        }
    }

    fn end(&mut self) {
        if let Err(e) = self.publish() {
            error!("record {} dropped: {e}", self.published + self.dropped);
        }
    }
}

impl Drop for ElementMapper {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappedElement;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct Counting(Arc<AtomicUsize>);

    impl ResourceBuilder for Counting {
        fn begin(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn build(&mut self, _element: MappedElement) -> anyhow::Result<()> {
            Ok(())
        }
        fn end(&mut self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Slow(Duration);

    impl ResourceBuilder for Slow {
        fn begin(&mut self) -> anyhow::Result<()> {
            thread::sleep(self.0);
            Ok(())
        }
        fn build(&mut self, _element: MappedElement) -> anyhow::Result<()> {
            Ok(())
        }
        fn end(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn send_record(mapper: &mut ElementMapper, value: &str) {
        mapper.begin();
        mapper.key_value(Some(&FieldCollection::label("001")), Some(value));
        mapper.key_value(None, None);
        mapper.end();
    }

    #[test]
    fn test_pipelines_clamped() {
        let map = ElementMap::new();
        assert_eq!(ElementMapper::new(map.clone()).pipelines(0).config().pipelines, 1);
        assert_eq!(ElementMapper::new(map.clone()).pipelines(1000).config().pipelines, 256);
        let config = MapperConfig {
            pipelines: 0,
            ..MapperConfig::default()
        };
        assert_eq!(ElementMapper::new(map).with_config(config).config().pipelines, 1);
        assert!(MapperConfig::default().pipelines >= 1);
    }

    #[test]
    fn test_every_record_built_once() {
        let ends = Arc::new(AtomicUsize::new(0));
        let mut mapper = ElementMapper::new(ElementMap::new()).pipelines(4);
        mapper.start(|_| Counting(Arc::clone(&ends))).unwrap();
        for n in 0..100 {
            send_record(&mut mapper, &n.to_string());
        }
        let reports = mapper.close().unwrap();
        assert_eq!(reports.len(), 4);
        assert_eq!(ends.load(Ordering::SeqCst), 100);
        assert_eq!(reports.iter().map(|r| r.counter).sum::<u64>(), 100);
        assert_eq!(reports.iter().map(|r| r.records).sum::<u64>(), 100);
        assert_eq!(mapper.published(), 100);
        assert_eq!(mapper.dropped(), 0);
    }

    #[test]
    fn test_start_twice_keeps_pool() {
        let ends = Arc::new(AtomicUsize::new(0));
        let mut mapper = ElementMapper::new(ElementMap::new()).pipelines(2);
        mapper.start(|_| Counting(Arc::clone(&ends))).unwrap();
        mapper.start(|_| Counting(Arc::clone(&ends))).unwrap();
        assert_eq!(mapper.close().unwrap().len(), 2);
    }

    #[test]
    fn test_closed_mapper_rejects_work() {
        let mut mapper = ElementMapper::new(ElementMap::new()).pipelines(1);
        mapper.start(|_| Slow(Duration::ZERO)).unwrap();
        mapper.close().unwrap();
        assert!(matches!(mapper.push(KeyValue::marker()), Err(MapperError::Closed)));
        assert!(matches!(mapper.publish(), Err(MapperError::Closed)));
        assert!(matches!(
            mapper.start(|_| Slow(Duration::ZERO)),
            Err(MapperError::Closed)
        ));
        assert!(mapper.close().unwrap().is_empty());
    }

    #[test]
    fn test_publish_before_start() {
        let mut mapper = ElementMapper::new(ElementMap::new());
        mapper.push(KeyValue::marker()).unwrap();
        assert!(matches!(mapper.publish(), Err(MapperError::NotStarted)));
        assert_eq!(mapper.dropped(), 1);
    }

    #[test]
    fn test_publish_blocks_while_workers_busy() {
        let delay = Duration::from_millis(200);
        let mut mapper = ElementMapper::new(ElementMap::new()).pipelines(1);
        mapper.start(|_| Slow(delay)).unwrap();
        send_record(&mut mapper, "first");
        let started = Instant::now();
        send_record(&mut mapper, "second");
        assert!(started.elapsed() >= Duration::from_millis(100));
        mapper.close().unwrap();
    }

    #[test]
    fn test_close_joins_all_workers() {
        let mut mapper = ElementMapper::new(ElementMap::new()).pipelines(8);
        mapper.start(|_| Slow(Duration::from_millis(5))).unwrap();
        for n in 0..20 {
            send_record(&mut mapper, &n.to_string());
        }
        let reports = mapper.close().unwrap();
        assert_eq!(reports.len(), 8);
        assert!(reports.iter().all(|r| r.failure.is_none()));
        let mut ids: Vec<usize> = reports.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
    }
}
