//! End-to-end tests: decoder, key/value adapter and concurrent mapper

mod common;

use common::{init_logging, stream, two_records, TestRecord};
use marckv::{
    ElementMap, ElementMapper, ElementMapping, FieldCollection, Iso2709Reader, KeyValueAdapter,
    KeyValueListener, MappedElement, Resource, ResourceBuilder, ResourceCollector,
};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Run `bytes` through decoder, adapter and a mapper with `pipelines` workers.
fn run(
    bytes: Vec<u8>,
    map: ElementMap,
    pipelines: usize,
) -> (Vec<marckv::PipelineReport>, Vec<String>, Vec<Resource>) {
    let unknown = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&unknown);
    let (tx, rx) = crossbeam_channel::unbounded();

    let mut mapper = ElementMapper::new(map)
        .pipelines(pipelines)
        .with_listener(move |key: &str| sink.lock().unwrap().push(key.to_string()));
    mapper.start(|_| ResourceCollector::new(tx.clone())).unwrap();
    {
        let mut adapter = KeyValueAdapter::new().add_listener(&mut mapper);
        Iso2709Reader::new(Cursor::new(bytes)).parse(&mut adapter).unwrap();
    }
    let reports = mapper.close().unwrap();
    drop(tx);
    let resources = rx.iter().collect();
    let unknown = unknown.lock().unwrap().clone();
    (reports, unknown, resources)
}

#[test]
fn test_two_records_nothing_mapped() {
    init_logging();
    let (reports, unknown, resources) = run(two_records(), ElementMap::new(), 1);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].counter, 4);
    assert_eq!(reports[0].records, 2);
    assert_eq!(unknown, vec!["001", "245$1$0$a"]);
    assert_eq!(resources.len(), 2);
    assert!(resources.iter().all(Resource::is_empty));
}

#[test]
fn test_two_records_all_mapped() {
    init_logging();
    let map = ElementMap::new()
        .with("001", ElementMapping::predicate("identifier"))
        .with("245", ElementMapping::predicate("title"));
    let (reports, unknown, resources) = run(two_records(), map, 1);
    assert_eq!(reports[0].counter, 4);
    assert!(unknown.is_empty());
    assert!(reports[0].unknown_keys.is_empty());
    let ids: HashSet<&str> = resources
        .iter()
        .flat_map(|r| r.literals("identifier"))
        .collect();
    assert_eq!(ids, HashSet::from(["ocn123", "ocn456"]));
    let titles = resources[0].children("title");
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0].get("a").map(<[_]>::len), Some(1));
}

#[test]
fn test_counters_sum_across_workers() {
    init_logging();
    let records: Vec<TestRecord> = (0..200)
        .map(|n| {
            TestRecord::bibliographic()
                .control("001", &format!("id{n}"))
                .data("245", "10", &[('a', "Title"), ('b', "Sub")])
                .data("650", " 0", &[('a', "Topic")])
        })
        .collect();
    let (reports, unknown, resources) = run(stream(&records), ElementMap::new(), 4);
    assert_eq!(reports.len(), 4);
    assert_eq!(reports.iter().map(|r| r.counter).sum::<u64>(), 800);
    assert_eq!(reports.iter().map(|r| r.records).sum::<u64>(), 200);
    assert_eq!(resources.len(), 200);
    // each worker reports a key once; across workers a key may repeat
    let distinct: HashSet<&String> = unknown.iter().collect();
    assert_eq!(distinct.len(), 4);
}

/// Counts every pair and boundary marker it sees.
#[derive(Default)]
struct MarkerCounter {
    pairs: usize,
    markers: usize,
    last_was_marker: bool,
    violations: usize,
}

impl KeyValueListener for MarkerCounter {
    fn begin(&mut self) {
        self.last_was_marker = false;
    }
    fn key_value(&mut self, key: Option<&FieldCollection>, _value: Option<&str>) {
        if key.is_some() {
            if self.last_was_marker {
                self.violations += 1;
            }
            self.pairs += 1;
        } else {
            self.markers += 1;
            self.last_was_marker = true;
        }
    }
    fn end(&mut self) {
        if !self.last_was_marker {
            self.violations += 1;
        }
    }
}

#[test]
fn test_one_marker_per_record() {
    let records: Vec<TestRecord> = (0..7)
        .map(|n| TestRecord::bibliographic().control("001", &n.to_string()))
        .collect();
    let mut counter = MarkerCounter::default();
    {
        let mut adapter = KeyValueAdapter::new().add_listener(&mut counter);
        Iso2709Reader::new(Cursor::new(stream(&records)))
            .parse(&mut adapter)
            .unwrap();
    }
    assert_eq!(counter.markers, 7);
    assert_eq!(counter.pairs, 7);
    assert_eq!(counter.violations, 0);
}

/// Records which worker built which record.
struct Claiming {
    worker: usize,
    current: Option<String>,
    claims: Arc<Mutex<Vec<(String, usize)>>>,
}

impl ResourceBuilder for Claiming {
    fn begin(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(self.current.is_none(), "begin inside an open record");
        self.current = Some(String::new());
        Ok(())
    }
    fn build(&mut self, element: MappedElement) -> anyhow::Result<()> {
        if let Some(current) = &mut self.current {
            current.push_str(&element.value);
        }
        Ok(())
    }
    fn end(&mut self) -> anyhow::Result<()> {
        let id = self
            .current
            .take()
            .ok_or_else(|| anyhow::anyhow!("end without begin"))?;
        self.claims.lock().unwrap().push((id, self.worker));
        Ok(())
    }
}

#[test]
fn test_each_record_built_by_exactly_one_worker() {
    init_logging();
    let records: Vec<TestRecord> = (0..300)
        .map(|n| TestRecord::bibliographic().control("001", &format!("r{n}")))
        .collect();
    let map = ElementMap::new().with("001", ElementMapping::predicate("id"));
    let claims = Arc::new(Mutex::new(Vec::new()));

    let mut mapper = ElementMapper::new(map).pipelines(6);
    mapper
        .start(|worker| Claiming {
            worker,
            current: None,
            claims: Arc::clone(&claims),
        })
        .unwrap();
    {
        let mut adapter = KeyValueAdapter::new().add_listener(&mut mapper);
        Iso2709Reader::new(Cursor::new(stream(&records)))
            .parse(&mut adapter)
            .unwrap();
    }
    let reports = mapper.close().unwrap();
    assert!(reports.iter().all(|r| r.failure.is_none()));

    let claims = claims.lock().unwrap();
    assert_eq!(claims.len(), 300);
    let ids: HashSet<&String> = claims.iter().map(|(id, _)| id).collect();
    assert_eq!(ids.len(), 300);
}

struct Sleepy {
    delay: Duration,
    active: Arc<AtomicUsize>,
}

impl ResourceBuilder for Sleepy {
    fn begin(&mut self) -> anyhow::Result<()> {
        self.active.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        Ok(())
    }
    fn build(&mut self, _element: MappedElement) -> anyhow::Result<()> {
        Ok(())
    }
    fn end(&mut self) -> anyhow::Result<()> {
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_backpressure_with_busy_workers() {
    init_logging();
    let workers = 3;
    let delay = Duration::from_millis(300);
    let active = Arc::new(AtomicUsize::new(0));
    let mut mapper = ElementMapper::new(ElementMap::new()).pipelines(workers);
    mapper
        .start(|_| Sleepy {
            delay,
            active: Arc::clone(&active),
        })
        .unwrap();

    let key = FieldCollection::label("001");
    let publish = |mapper: &mut ElementMapper| {
        mapper.begin();
        mapper.key_value(Some(&key), Some("x"));
        mapper.key_value(None, None);
        let started = Instant::now();
        mapper.end();
        started.elapsed()
    };

    for _ in 0..workers {
        assert!(publish(&mut mapper) < delay);
    }
    // every worker is now sleeping; the next hand-off waits for one of them
    let waited = publish(&mut mapper);
    assert!(waited >= Duration::from_millis(150), "waited only {waited:?}");
    mapper.close().unwrap();
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[test]
fn test_close_terminates_all_workers() {
    init_logging();
    let mut mapper = ElementMapper::new(ElementMap::new())
        .pipelines(16)
        .with_config(marckv::MapperConfig::default().with_pipelines(16).with_thread_name_prefix("kv"));
    mapper
        .start(|_| ResourceCollector::new(crossbeam_channel::unbounded().0))
        .unwrap();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let closer = thread::spawn(move || {
        let reports = mapper.close();
        let _ = done_tx.send(());
        reports
    });
    done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("close did not return in time");
    let reports = closer.join().unwrap().unwrap();
    assert_eq!(reports.len(), 16);
}

#[test]
fn test_failed_worker_does_not_stop_others() {
    init_logging();
    struct Refusing {
        fail: bool,
    }
    impl ResourceBuilder for Refusing {
        fn begin(&mut self) -> anyhow::Result<()> {
            anyhow::ensure!(!self.fail, "worker refuses records");
            Ok(())
        }
        fn build(&mut self, _element: MappedElement) -> anyhow::Result<()> {
            Ok(())
        }
        fn end(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }
    let records: Vec<TestRecord> = (0..50)
        .map(|n| TestRecord::bibliographic().control("001", &n.to_string()))
        .collect();
    let mut mapper = ElementMapper::new(ElementMap::new()).pipelines(2);
    mapper.start(|worker| Refusing { fail: worker == 0 }).unwrap();
    {
        let mut adapter = KeyValueAdapter::new().add_listener(&mut mapper);
        Iso2709Reader::new(Cursor::new(stream(&records)))
            .parse(&mut adapter)
            .unwrap();
    }
    let reports = mapper.close().unwrap();
    let failed: Vec<_> = reports.iter().filter(|r| r.failure.is_some()).collect();
    assert!(failed.len() <= 1);
    let built: u64 = reports.iter().map(|r| r.records).sum();
    assert_eq!(built + mapper.dropped() + failed.len() as u64, 50);
}
