use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use stratus_cache::{
    ArtifactCache, CacheError, Fetcher, IndexLock, ObjectSource, RemoteStore, UreqFetcher,
};
use stratus_schema::{LocationKind, OsTarget};

/// Real file fetcher that also counts transport calls.
#[derive(Clone, Default)]
struct CountingFileFetcher {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl Fetcher for CountingFileFetcher {
    fn fetch(&self, source: &str, dest: &Path) -> Result<u64, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        UreqFetcher::new().fetch(source, dest)
    }
}

#[derive(Clone, Default)]
struct CountingRemote {
    calls: Arc<AtomicUsize>,
}

impl RemoteStore for CountingRemote {
    fn upload(&self, kind: LocationKind, name: &str, path: &Path) -> Result<String, CacheError> {
        assert!(path.is_file(), "uploads read from the local copy");
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{kind}:{name}:{n}"))
    }
}

fn iso_source(dir: &Path) -> ObjectSource {
    let iso = dir.join("Fedora-20-x86_64-DVD.iso");
    fs::write(&iso, b"ISO9660 payload").unwrap();
    ObjectSource::Url(format!("file://{}", iso.display()))
}

#[test]
fn install_iso_local_then_remote_scenario() {
    let cache_dir = tempfile::tempdir().unwrap();
    let media_dir = tempfile::tempdir().unwrap();
    let fetcher = CountingFileFetcher::default();
    let remote = CountingRemote::default();
    let cache = ArtifactCache::open(cache_dir.path())
        .unwrap()
        .with_fetcher(fetcher.clone())
        .with_remote(remote.clone());
    let target = OsTarget::new("fedora20", "x86_64");
    let source = iso_source(media_dir.path());

    let local = cache
        .retrieve_and_cache_object("install-iso", &target, &source, false)
        .unwrap();
    assert_eq!(local.len(), 1);
    let local_path = local.get(LocationKind::Local).unwrap().to_owned();
    assert_eq!(fs::read(&local_path).unwrap(), b"ISO9660 payload");

    let both = cache
        .retrieve_and_cache_object("install-iso", &target, &source, true)
        .unwrap();
    assert_eq!(both.len(), 2);
    assert_eq!(both.get(LocationKind::Local), Some(local_path.as_str()));
    assert_eq!(
        both.get(LocationKind::Volume),
        Some("volume:fedora20-x86_64-install-iso:0")
    );
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

    let again = cache
        .retrieve_and_cache_object("install-iso", &target, &source, true)
        .unwrap();
    assert_eq!(again, both);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn lock_then_unlock_leaves_file_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::open(dir.path()).unwrap();

    let mut txn = cache.lock_and_get_index().unwrap();
    txn.set_index_value("TestOS1", "Test", Some("nowhere"), json!(true))
        .unwrap();
    txn.write_index_and_unlock().unwrap();
    let before = fs::read(cache.layout().index_file()).unwrap();

    let mut txn = cache.lock_and_get_index().unwrap();
    txn.remove_bucket("TestOS1");
    txn.unlock_index();

    assert_eq!(fs::read(cache.layout().index_file()).unwrap(), before);
    assert!(IndexLock::try_acquire(&cache.layout().lock_file())
        .unwrap()
        .is_some());
}

#[test]
fn write_persists_and_releases() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::open(dir.path()).unwrap();

    let mut txn = cache.lock_and_get_index().unwrap();
    txn.set_index_value("TestOS2", "Test", None, json!({"aTest": true}))
        .unwrap();
    assert!(txn
        .set_index_value("TestOS3", "Test", None, json!(0))
        .is_err());
    txn.write_index_and_unlock().unwrap();

    assert!(IndexLock::try_acquire(&cache.layout().lock_file())
        .unwrap()
        .is_some());
    let txn = cache.lock_and_get_index().unwrap();
    assert_eq!(
        txn.get_index_value("TestOS2", "Test", Some("aTest")),
        Some(&json!(true))
    );
    assert!(txn.index().bucket("TestOS3").is_none());
}

#[test]
fn second_contender_blocks_until_release() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let cache = ArtifactCache::open(&root).unwrap();
    let txn = cache.lock_and_get_index().unwrap();

    let acquired = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&acquired);
    let handle = thread::spawn(move || {
        let cache = ArtifactCache::open(&root).unwrap();
        let mut txn = cache.lock_and_get_index().unwrap();
        flag.store(1, Ordering::SeqCst);
        txn.set_index_value("b", "from-thread", Some("local"), json!("/t"))
            .unwrap();
        txn.write_index_and_unlock().unwrap();
    });

    thread::sleep(Duration::from_millis(200));
    assert_eq!(acquired.load(Ordering::SeqCst), 0, "lock must block");
    txn.unlock_index();
    handle.join().unwrap();

    assert_eq!(acquired.load(Ordering::SeqCst), 1);
    let txn = cache.lock_and_get_index().unwrap();
    assert!(txn.get_index_value("b", "from-thread", None).is_some());
}

#[test]
fn concurrent_misses_for_same_key_fetch_once() {
    let cache_dir = tempfile::tempdir().unwrap();
    let media_dir = tempfile::tempdir().unwrap();
    let source = iso_source(media_dir.path());
    let fetcher = CountingFileFetcher {
        calls: Arc::new(AtomicUsize::new(0)),
        delay: Duration::from_millis(50),
    };
    let target = OsTarget::new("fedora20", "x86_64");

    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let root = cache_dir.path().to_path_buf();
            let fetcher = fetcher.clone();
            let barrier = Arc::clone(&barrier);
            let source = source.clone();
            let target = target.clone();
            thread::spawn(move || {
                let cache = ArtifactCache::open(root).unwrap().with_fetcher(fetcher);
                barrier.wait();
                cache
                    .retrieve_and_cache_object("install-iso", &target, &source, false)
                    .unwrap()
            })
        })
        .collect();

    let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert!(entries.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn concurrent_misses_for_different_keys_all_land_in_index() {
    let cache_dir = tempfile::tempdir().unwrap();
    let media_dir = tempfile::tempdir().unwrap();
    let source = iso_source(media_dir.path());

    let handles: Vec<_> = ["fedora19", "fedora20", "rhel6.5", "ubuntu12.04"]
        .into_iter()
        .map(|os| {
            let root = cache_dir.path().to_path_buf();
            let source = source.clone();
            thread::spawn(move || {
                let cache = ArtifactCache::open(root)
                    .unwrap()
                    .with_fetcher(CountingFileFetcher::default());
                cache
                    .retrieve_and_cache_object(
                        "install-iso",
                        &OsTarget::new(os, "x86_64"),
                        &source,
                        false,
                    )
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let cache = ArtifactCache::open(cache_dir.path()).unwrap();
    let rows = cache.list_entries().unwrap();
    assert_eq!(rows.len(), 4, "no update may be lost between contenders");
}
