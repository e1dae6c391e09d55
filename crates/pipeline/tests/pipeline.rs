//! End-to-end delivery behaviour of the poller against an in-memory remote.

use async_trait::async_trait;
use ferry_ledger::error::{ErrorKind as LedgerErrorKind, Result as LedgerResult};
use ferry_ledger::{
    Database, Marker, MarkerState, MarkerStore, MarkerStoreHandle, MemoryMarkerStore, SqliteMarkerStore,
};
use ferry_pipeline::error::ErrorKind;
use ferry_pipeline::processor::error::Result as ProcessorResult;
use ferry_pipeline::{
    Outcome, PollState, Poller, PollerOptions, PrimeNumberProcessor, Processor, Resolution, STAGING_DIR,
};
use ferry_transfer::remote::MockRemote;
use ferry_transfer::{PoolOptions, RemoteFileRef, SessionPool};
use rstest::rstest;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use time::UtcDateTime;
use tokio_util::sync::CancellationToken;

const NUMBERS1: &str = "12345\n5\n";
const NUMBERS2: &str = "not a number";

struct Harness<P = PrimeNumberProcessor> {
    _dir: TempDir,
    local: PathBuf,
    remote: MockRemote,
    pool: SessionPool,
    store: MarkerStoreHandle,
    poller: Arc<Poller<P>>,
}

fn options(local: &Path) -> PollerOptions {
    PollerOptions {
        remote_directory: PathBuf::from("/upload"),
        local_directory: local.to_path_buf(),
        delay: Duration::from_millis(10),
        max_fetch_size: 10,
        max_messages_per_poll: 10,
    }
}

fn build<P: Processor>(
    options: impl FnOnce(&Path) -> PollerOptions,
    store: MarkerStoreHandle,
    processor: P,
) -> Harness<P> {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local");
    let remote = MockRemote::default();
    let pool = SessionPool::new(
        Arc::new(remote.clone()),
        PoolOptions {
            size: 2,
            wait_timeout: Duration::from_millis(200),
        },
    )
    .unwrap();
    let poller = Arc::new(Poller::new(options(&local), pool.clone(), Arc::clone(&store), processor));
    Harness {
        _dir: dir,
        local,
        remote,
        pool,
        store,
        poller,
    }
}

fn harness_with(options: impl FnOnce(&Path) -> PollerOptions, store: MarkerStoreHandle) -> Harness {
    build(options, store, PrimeNumberProcessor)
}

fn harness() -> Harness {
    harness_with(options, Arc::new(MemoryMarkerStore::new()))
}

impl<P> Harness<P> {
    async fn upload(&self, name: &str, content: &str) {
        self.remote.put(format!("/upload/{name}"), content).await.unwrap();
    }

    fn fetches(&self, name: &str) -> usize {
        self.remote.fetch_count(format!("/upload/{name}"))
    }

    fn local_copy(&self, name: &str) -> PathBuf {
        self.local.join(name)
    }
}

/// Fails the `fail_on`-th call to `mark`, once.
struct FlakyStore {
    inner: MemoryMarkerStore,
    marks: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl MarkerStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn mark(&self, file: &RemoteFileRef) -> LedgerResult<bool> {
        if self.marks.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            exn::bail!(LedgerErrorKind::Database);
        }
        self.inner.mark(file).await
    }

    async fn is_marked(&self, file: &RemoteFileRef) -> LedgerResult<bool> {
        self.inner.is_marked(file).await
    }

    async fn clear(&self, key: &str) -> LedgerResult<bool> {
        self.inner.clear(key).await
    }

    async fn settle(&self, file: &RemoteFileRef) -> LedgerResult<()> {
        self.inner.settle(file).await
    }

    async fn prune(&self, directory: &Path, listing: &[RemoteFileRef]) -> LedgerResult<u64> {
        self.inner.prune(directory, listing).await
    }

    async fn markers(&self) -> LedgerResult<Vec<Marker>> {
        self.inner.markers().await
    }
}

/// Holds every line until released, so a unit stays inside processing.
#[derive(Default)]
struct Gate {
    entered: AtomicBool,
    open: AtomicBool,
}

struct GatedProcessor(Arc<Gate>);
impl Processor for GatedProcessor {
    type Output = ();

    fn process(&self, _line: &str) -> ProcessorResult<()> {
        self.0.entered.store(true, Ordering::SeqCst);
        while !self.0.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}

/// Checks primes, and on `touch <path>` rewinds that file's modification time.
struct TouchingProcessor;
impl Processor for TouchingProcessor {
    type Output = ();

    fn process(&self, line: &str) -> ProcessorResult<()> {
        if let Some(path) = line.strip_prefix("touch ") {
            let rewound = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
            std::fs::File::options().write(true).open(path).unwrap().set_modified(rewound).unwrap();
            return Ok(());
        }
        PrimeNumberProcessor.process(line).map(|_| ())
    }
}

#[rstest]
#[case::as_given(NUMBERS1)]
#[case::padded_line("12345\n 5\n")]
#[tokio::test]
async fn test_valid_file_is_committed(#[case] content: &str) {
    let h = harness();
    h.upload("numbers1.txt", content).await;

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.listed, 1);
    assert_eq!(report.fetched, 1);
    assert_eq!(report.resolutions, vec![("numbers1.txt".to_string(), Resolution::Commit)]);

    let monitor = h.poller.monitor();
    assert_eq!(monitor.inspect("numbers1.txt"), Some(Outcome::Committed));
    assert!(monitor.health().up);
    assert!(!h.local_copy("numbers1.txt").exists());
    // The remote original is never removed.
    assert!(h.remote.contains("/upload/numbers1.txt").await);
    let markers = h.store.markers().await.unwrap();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].state, MarkerState::Consumed);
}

#[rstest]
#[case::single_sentence(NUMBERS2, "line 1: `not a number` is not a valid number")]
#[case::later_line("3\nfive\n7\n", "line 2: `five` is not a valid number")]
#[tokio::test]
async fn test_invalid_file_is_rolled_back(#[case] content: &str, #[case] reason: &str) {
    let h = harness();
    h.upload("numbers2.txt", content).await;

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.rolled_back(), 1);

    let monitor = h.poller.monitor();
    assert_eq!(monitor.inspect("numbers2.txt"), Some(Outcome::RolledBack));
    let health = monitor.health();
    assert!(!health.up);
    assert_eq!(health.detail, Some(format!("Got processing error: {reason}")));
    assert_eq!(std::fs::read_to_string(h.local_copy("numbers2.txt")).unwrap(), content);
    assert!(h.store.markers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_committed_file_is_never_fetched_again() {
    let h = harness();
    h.upload("numbers1.txt", NUMBERS1).await;
    h.poller.poll_once().await.unwrap();

    for _ in 0..3 {
        let report = h.poller.poll_once().await.unwrap();
        assert_eq!(report.selected, 0);
        assert!(report.resolutions.is_empty());
    }
    assert_eq!(h.fetches("numbers1.txt"), 1);
}

#[tokio::test]
async fn test_rolled_back_file_is_neither_refetched_nor_redispatched() {
    let h = harness();
    h.upload("numbers2.txt", NUMBERS2).await;
    h.poller.poll_once().await.unwrap();

    // The cleared marker lets the listing select it again, but the retained
    // local copy is reused and held back by the local filter.
    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.selected, 1);
    assert_eq!(report.present, 1);
    assert!(report.resolutions.is_empty());

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.selected, 0);
    assert!(report.resolutions.is_empty());
    assert_eq!(h.fetches("numbers2.txt"), 1);
}

#[tokio::test]
async fn test_requeue_after_fixing_a_rolled_back_file() {
    let h = harness();
    h.upload("numbers2.txt", NUMBERS2).await;
    h.poller.poll_once().await.unwrap();
    assert!(!h.poller.monitor().health().up);

    std::fs::write(h.local_copy("numbers2.txt"), "3\n5\n7\n").unwrap();
    assert!(h.poller.requeue("numbers2.txt"));
    assert!(!h.poller.requeue("numbers2.txt"));

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.resolutions, vec![("numbers2.txt".to_string(), Resolution::Commit)]);
    let monitor = h.poller.monitor();
    assert_eq!(monitor.inspect("numbers2.txt"), Some(Outcome::Committed));
    assert!(monitor.health().up);
    assert_eq!(monitor.health().detail, None);
}

#[tokio::test]
async fn test_concurrent_cycles_fetch_each_file_once() {
    let h = harness();
    let names = ["a.txt", "b.txt", "c.txt", "d.txt", "e.txt"];
    for name in names {
        h.upload(name, "2\n3\n").await;
    }

    let (first, second) = tokio::join!(h.poller.poll_once(), h.poller.poll_once());
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.selected + second.selected, names.len());
    // Whatever a racing cycle left behind is picked up by the next one.
    let third = h.poller.poll_once().await.unwrap();
    assert_eq!(first.committed() + second.committed() + third.committed(), names.len());

    for name in names {
        assert_eq!(h.fetches(name), 1, "{name} fetched more than once");
        assert_eq!(h.poller.monitor().inspect(name), Some(Outcome::Committed));
    }
}

#[tokio::test]
async fn test_failed_transfer_is_retried() {
    let h = harness();
    h.upload("numbers1.txt", NUMBERS1).await;
    h.remote.fail_transfers("/upload/numbers1.txt");

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(report.resolutions.is_empty());
    let health = h.poller.monitor().health();
    assert!(!health.up);
    assert_eq!(health.detail.as_deref(), Some("transfer of /upload/numbers1.txt failed"));
    assert!(!h.local.join(STAGING_DIR).join("numbers1.txt").exists());

    h.remote.restore("/upload/numbers1.txt");
    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.committed(), 1);
    assert!(h.poller.monitor().health().up);
}

#[rstest]
#[case(1, 1)]
#[case(2, 1)]
#[case(3, 2)]
#[case(10, 10)]
#[tokio::test]
async fn test_cycle_bounds(#[case] max_fetch_size: usize, #[case] max_messages_per_poll: usize) {
    let h = harness_with(
        |local| PollerOptions {
            max_fetch_size,
            max_messages_per_poll,
            ..options(local)
        },
        Arc::new(MemoryMarkerStore::new()),
    );
    for i in 0..5 {
        h.upload(&format!("{i}.txt"), "7\n").await;
    }

    let mut committed = 0;
    for _ in 0..20 {
        let report = h.poller.poll_once().await.unwrap();
        assert!(report.selected <= max_fetch_size);
        assert!(report.resolutions.len() <= max_messages_per_poll);
        committed += report.committed();
        if committed == 5 {
            break;
        }
    }
    assert_eq!(committed, 5);
}

#[tokio::test]
async fn test_dedup_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ledger.db");

    let db = Database::connect(&db_path).await.unwrap();
    let h = harness_with(options, Arc::new(SqliteMarkerStore::new(&db, "mock")));
    h.upload("numbers1.txt", NUMBERS1).await;
    assert_eq!(h.poller.poll_once().await.unwrap().committed(), 1);
    db.close().await;

    let db = Database::connect(&db_path).await.unwrap();
    let store: MarkerStoreHandle = Arc::new(SqliteMarkerStore::new(&db, "mock"));
    let restarted = Poller::new(options(&h.local), h.pool.clone(), store, PrimeNumberProcessor);
    let report = restarted.poll_once().await.unwrap();
    assert_eq!(report.selected, 0);
    assert_eq!(h.fetches("numbers1.txt"), 1);
    db.close().await;
}

#[tokio::test]
async fn test_changed_remote_file_is_processed_again() {
    let h = harness();
    h.upload("numbers1.txt", NUMBERS1).await;
    h.poller.poll_once().await.unwrap();

    h.upload("numbers1.txt", "12345\n5\n11\n").await;
    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.committed(), 1);
    assert_eq!(h.fetches("numbers1.txt"), 2);
}

#[tokio::test]
async fn test_tombstone_is_pruned_once_remote_file_disappears() {
    let h = harness();
    h.upload("numbers1.txt", NUMBERS1).await;
    h.poller.poll_once().await.unwrap();
    assert_eq!(h.store.markers().await.unwrap().len(), 1);

    h.remote.remove("/upload/numbers1.txt").await.unwrap();
    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.pruned, 1);
    assert!(h.store.markers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pool_exhaustion_aborts_cycle_without_selecting() {
    let h = harness();
    h.upload("numbers1.txt", NUMBERS1).await;
    let _held = (h.pool.acquire().await.unwrap(), h.pool.acquire().await.unwrap());

    let err = h.poller.poll_once().await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::PoolExhausted));
    assert!(h.store.markers().await.unwrap().is_empty());
    assert_eq!(h.fetches("numbers1.txt"), 0);
}

#[tokio::test]
async fn test_unreachable_remote_is_a_connection_error() {
    let h = harness();
    h.remote.refuse_connections(true);
    let err = h.poller.poll_once().await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Connection));
    assert_eq!(*h.poller.state().borrow(), PollState::Idle);
}

#[tokio::test]
async fn test_run_stops_gracefully_and_closes_pool() {
    let h = harness();
    h.upload("numbers1.txt", NUMBERS1).await;
    h.upload("numbers2.txt", NUMBERS2).await;
    let shutdown = CancellationToken::new();
    let monitor = h.poller.monitor();

    let (result, ()) = tokio::join!(h.poller.run(shutdown.clone()), async {
        for _ in 0..500 {
            if monitor.inspect("numbers1.txt").is_some() && monitor.inspect("numbers2.txt").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
    });

    result.unwrap();
    assert!(h.pool.is_closed());
    assert_eq!(monitor.inspect("numbers1.txt"), Some(Outcome::Committed));
    assert_eq!(monitor.inspect("numbers2.txt"), Some(Outcome::RolledBack));
    // Errors inside the loop are routed rather than ending it.
    assert!(!monitor.health().up);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_waits_for_unit_in_progress() {
    let gate = Arc::new(Gate::default());
    let h = build(options, Arc::new(MemoryMarkerStore::new()), GatedProcessor(Arc::clone(&gate)));
    h.upload("numbers1.txt", NUMBERS1).await;
    let shutdown = CancellationToken::new();

    let running = tokio::spawn({
        let poller = Arc::clone(&h.poller);
        let shutdown = shutdown.clone();
        async move { poller.run(shutdown).await }
    });
    while !gate.entered.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Still inside processing: nothing resolved, nothing torn down.
    assert!(!running.is_finished());
    assert!(!h.pool.is_closed());
    assert_eq!(h.poller.monitor().inspect("numbers1.txt"), None);
    assert!(h.local_copy("numbers1.txt").exists());

    gate.open.store(true, Ordering::SeqCst);
    running.await.unwrap().unwrap();
    assert!(h.pool.is_closed());
    assert_eq!(h.poller.monitor().inspect("numbers1.txt"), Some(Outcome::Committed));
    assert!(!h.local_copy("numbers1.txt").exists());
    let markers = h.store.markers().await.unwrap();
    assert_eq!(markers[0].state, MarkerState::Consumed);
}

#[tokio::test]
async fn test_failed_selection_leaves_no_file_behind() {
    let store = Arc::new(FlakyStore {
        inner: MemoryMarkerStore::new(),
        marks: AtomicUsize::new(0),
        fail_on: 2,
    });
    let h = harness_with(options, store);
    h.upload("a.txt", "2\n").await;
    h.upload("b.txt", "3\n").await;

    let err = h.poller.poll_once().await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Ledger));
    // The entry marked before the failure is released with the rest.
    assert!(h.store.markers().await.unwrap().is_empty());

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.selected, 2);
    assert_eq!(report.committed(), 2);
    for name in ["a.txt", "b.txt"] {
        assert_eq!(h.fetches(name), 1);
        assert_eq!(h.poller.monitor().inspect(name), Some(Outcome::Committed));
    }
}

#[tokio::test]
async fn test_restart_reclaims_interrupted_transfers() {
    let h = harness();
    let modified = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap();
    for name in ["a.txt", "b.txt"] {
        h.remote.put_with_modified(format!("/upload/{name}"), "2\n", modified).await.unwrap();
        // Left in flight by a previous process.
        h.store.mark(&RemoteFileRef::new("/upload", name, 2, modified)).await.unwrap();
    }
    // b.txt reached the local root before the interruption; a.txt did not.
    std::fs::create_dir_all(h.local.join(STAGING_DIR)).unwrap();
    std::fs::write(h.local.join(STAGING_DIR).join("a.txt"), "2").unwrap();
    std::fs::write(h.local_copy("b.txt"), "2\n").unwrap();
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    std::fs::File::options().write(true).open(h.local_copy("b.txt")).unwrap().set_modified(mtime).unwrap();

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.selected, 1);
    assert_eq!(report.committed(), 2);
    assert_eq!(h.fetches("a.txt"), 1);
    assert_eq!(h.fetches("b.txt"), 0);
    assert!(std::fs::read_dir(h.local.join(STAGING_DIR)).unwrap().next().is_none());
    let markers = h.store.markers().await.unwrap();
    assert!(markers.iter().all(|marker| marker.state == MarkerState::Consumed));
}

#[tokio::test]
async fn test_commit_settles_the_listed_fingerprint() {
    let h = build(options, Arc::new(MemoryMarkerStore::new()), TouchingProcessor);
    let modified = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap();
    let touch = format!("touch {}\n", h.local_copy("b.txt").display());
    h.remote.put_with_modified("/upload/a.txt", touch, modified).await.unwrap();
    h.remote.put_with_modified("/upload/b.txt", "3\n", modified).await.unwrap();

    // a.txt is dispatched first and changes b.txt's local timestamp.
    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.committed(), 2);

    let listed = RemoteFileRef::new("/upload", "b.txt", 2, modified);
    let markers = h.store.markers().await.unwrap();
    let marker = markers.iter().find(|marker| marker.key == "/upload/b.txt").unwrap();
    assert_eq!(marker.fingerprint, listed.fingerprint());

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.selected, 0);
    assert_eq!(h.fetches("b.txt"), 1);
}

#[tokio::test]
async fn test_file_named_like_a_partial_copy_is_delivered() {
    let h = harness();
    h.upload("report.writing", "7\n").await;

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.resolutions, vec![("report.writing".to_string(), Resolution::Commit)]);
    assert_eq!(h.store.markers().await.unwrap()[0].state, MarkerState::Consumed);
}
