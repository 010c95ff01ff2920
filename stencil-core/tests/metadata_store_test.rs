//! Metadata store behaviour against scripted and on-disk remotes

mod common;

use chrono::Utc;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::{init_test_logging, write_mirror, ScriptedSource, CATALOG_2_0_1};
use stencil_core::metadata::{
    FetchError, FileSource, LastUpdate, Marker, MetadataCache, MetadataError, MetadataPolicy,
    MetadataStore, CATALOG_FILE, PROPERTIES_FILE, VERSIONS_PATH,
};
use stencil_core::{Catalog, Version};

fn version(text: &str) -> Version {
    Version::parse(text).unwrap()
}

fn store(source: Arc<ScriptedSource>, cache: &TempDir) -> MetadataStore {
    MetadataStore::new(source, cache.path(), MetadataPolicy::default()).unwrap()
}

fn seed_marker(cache: &TempDir, latest: &str, age: chrono::Duration) {
    MetadataCache::open(cache.path())
        .unwrap()
        .write_marker(&Marker {
            last_update_time: Utc::now() - age,
            latest_version: version(latest),
        })
        .unwrap();
}

#[tokio::test]
async fn test_fresh_marker_is_served_without_fetching() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    seed_marker(&cache, "2.0.0", chrono::Duration::minutes(5));

    let source = Arc::new(ScriptedSource::with_versions(&["2.0.0", "2.0.1"]));
    let store = store(source.clone(), &cache);

    let latest = store.latest_version().await.unwrap();
    assert_eq!(latest.value, version("2.0.0"));
    assert!(!latest.is_degraded());
    assert_eq!(source.total_fetches(), 0);
}

#[tokio::test]
async fn test_stale_marker_refreshes_once() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    seed_marker(&cache, "2.0.0", chrono::Duration::hours(48));

    let source = Arc::new(ScriptedSource::with_versions(&["2.0.0", "2.0.1", "2.0.1-M1"]));
    let store = store(source.clone(), &cache);

    let latest = store.latest_version().await.unwrap();
    assert_eq!(latest.value, version("2.0.1"));
    assert!(!latest.is_degraded());
    assert_eq!(source.fetch_count(VERSIONS_PATH), 1);

    // The refreshed marker is fresh now
    let again = store.latest_version().await.unwrap();
    assert_eq!(again.value, version("2.0.1"));
    assert_eq!(source.fetch_count(VERSIONS_PATH), 1);

    let updated = store.last_update_time().time().unwrap();
    assert!(Utc::now().signed_duration_since(updated) < chrono::Duration::minutes(1));
}

#[tokio::test]
async fn test_stale_marker_with_remote_down_is_degraded() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    seed_marker(&cache, "2.0.0", chrono::Duration::hours(48));
    let before = store(Arc::new(ScriptedSource::new()), &cache).last_update_time();

    let source = Arc::new(ScriptedSource::with_versions(&["2.0.1"]));
    source.set_offline(true);
    let store = store(source.clone(), &cache);

    let latest = store.latest_version().await.unwrap();
    assert_eq!(latest.value, version("2.0.0"));
    let degraded = latest.degraded.expect("refresh failure should be reported");
    assert_eq!(degraded.last_update, before);
    assert!(degraded.reason.contains("network is down"));
    assert_eq!(source.fetch_count(VERSIONS_PATH), 1);

    // A failed refresh leaves the marker untouched
    assert_eq!(store.last_update_time(), before);
}

#[tokio::test]
async fn test_no_cache_and_remote_down_is_unavailable() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::with_versions(&["2.0.1"]));
    source.set_offline(true);
    let store = store(source, &cache);

    assert_eq!(store.last_update_time(), LastUpdate::Never);
    let err = store.latest_version().await.unwrap_err();
    assert!(matches!(err, MetadataError::MetadataUnavailable(_)));

    let err = store.properties_of(&version("2.0.1")).await.unwrap_err();
    assert!(matches!(err, MetadataError::MetadataUnavailable(_)));
}

#[tokio::test]
async fn test_concurrent_properties_lookups_share_one_fetch() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(
        ScriptedSource::with_versions(&["2.0.1"]).with_delay(Duration::from_millis(50)),
    );
    let store = store(source.clone(), &cache);
    let v = version("2.0.1");

    let results = join_all((0..8).map(|_| store.properties_of(&v))).await;

    assert_eq!(source.fetch_count(&format!("2.0.1/{PROPERTIES_FILE}")), 1);
    let first = results[0].as_ref().unwrap();
    assert_eq!(first.get("helidon.version"), Some("4.1.0"));
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), first);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_catalog_lookups_across_tasks() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(
        ScriptedSource::with_versions(&["2.0.1"]).with_delay(Duration::from_millis(50)),
    );
    let store = Arc::new(store(source.clone(), &cache));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.catalog_of(&version("2.0.1")).await })
        })
        .collect();

    let mut catalogs = Vec::new();
    for handle in handles {
        catalogs.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(source.fetch_count(&format!("2.0.1/{CATALOG_FILE}")), 1);
    assert!(catalogs.iter().all(|c| c == &catalogs[0]));
    assert_eq!(catalogs[0].len(), 2);
}

#[tokio::test]
async fn test_truncated_cached_catalog_is_refetched_once() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::with_versions(&["2.0.1"]));
    let store = store(source.clone(), &cache);
    let v = version("2.0.1");
    let catalog_path = format!("2.0.1/{CATALOG_FILE}");

    let original = store.catalog_of(&v).await.unwrap();
    assert_eq!(source.fetch_count(&catalog_path), 1);

    let cached_file = MetadataCache::open(cache.path()).unwrap().catalog_path(&v);
    let content = std::fs::read(&cached_file).unwrap();
    std::fs::write(&cached_file, &content[..content.len() / 3]).unwrap();

    let recovered = store.catalog_of(&v).await.unwrap();
    assert_eq!(recovered, original);
    assert_eq!(source.fetch_count(&catalog_path), 2);

    // Healed on disk
    let _ = store.catalog_of(&v).await.unwrap();
    assert_eq!(source.fetch_count(&catalog_path), 2);
}

#[tokio::test]
async fn test_catalog_cut_at_entry_boundary_is_refetched() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::with_versions(&["2.0.1"]));
    let store = store(source.clone(), &cache);
    let v = version("2.0.1");
    let catalog_path = format!("2.0.1/{CATALOG_FILE}");

    let original = store.catalog_of(&v).await.unwrap();
    assert_eq!(original.len(), 2);

    // Dropping the whole second entry still leaves well-formed YAML
    let cached_file = MetadataCache::open(cache.path()).unwrap().catalog_path(&v);
    let content = std::fs::read_to_string(&cached_file).unwrap();
    let boundary = content.find("- artifactId: database-mp").unwrap();
    let line_start = content[..boundary].rfind('\n').map_or(0, |i| i + 1);
    std::fs::write(&cached_file, &content[..line_start]).unwrap();
    assert!(Catalog::from_yaml(v.clone(), &content[..line_start]).is_ok());

    let recovered = store.catalog_of(&v).await.unwrap();
    assert_eq!(recovered, original);
    assert_eq!(source.fetch_count(&catalog_path), 2);
}

#[tokio::test]
async fn test_properties_missing_tail_are_refetched() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::with_versions(&["2.0.1"]));
    let store = store(source.clone(), &cache);
    let v = version("2.0.1");
    let properties_path = format!("2.0.1/{PROPERTIES_FILE}");

    let original = store.properties_of(&v).await.unwrap();

    let cached_file = MetadataCache::open(cache.path())
        .unwrap()
        .properties_path(&v);
    let content = std::fs::read(&cached_file).unwrap();
    std::fs::write(&cached_file, &content[..content.len() - 3]).unwrap();

    let recovered = store.properties_of(&v).await.unwrap();
    assert_eq!(recovered, original);
    assert_eq!(source.fetch_count(&properties_path), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_readers_of_corrupt_entry_keep_healed_copy() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(
        ScriptedSource::with_versions(&["2.0.1"]).with_delay(Duration::from_millis(100)),
    );
    let store = Arc::new(store(source.clone(), &cache));
    let v = version("2.0.1");
    let disk = MetadataCache::open(cache.path()).unwrap();

    std::fs::create_dir_all(disk.properties_path(&v).parent().unwrap()).unwrap();
    std::fs::write(disk.properties_path(&v), "garbage").unwrap();

    // Readers arrive throughout the fetch window and just after it
    let handles: Vec<_> = (0..12u64)
        .map(|i| {
            let store = Arc::clone(&store);
            let v = v.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(i * 10)).await;
                store.properties_of(&v).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(source.fetch_count(&format!("2.0.1/{PROPERTIES_FILE}")), 1);
    assert!(matches!(
        disk.read_properties(&v),
        stencil_core::metadata::CacheRead::Hit(_)
    ));
}

#[tokio::test]
async fn test_unparseable_versions_list_is_unavailable() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::new());
    source.set(VERSIONS_PATH, Ok(b"2.0.1\n???\n".to_vec()));
    let store = store(source.clone(), &cache);

    let err = store.latest_version().await.unwrap_err();
    assert!(
        matches!(&err, MetadataError::MetadataUnavailable(reason) if reason.contains("???")),
        "unexpected error: {err:?}"
    );
    assert_eq!(source.fetch_count(VERSIONS_PATH), 2);
}

#[tokio::test]
async fn test_malformed_remote_catalog_fails_after_two_fetches() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::with_versions(&["2.0.1"]));
    let catalog_path = format!("2.0.1/{CATALOG_FILE}");
    source.set(
        &catalog_path,
        Ok(b"entries:\n  - artifactId: quickstart-se\n    name: quick".to_vec()),
    );
    let store = store(source.clone(), &cache);
    let v = version("2.0.1");

    let err = store.catalog_of(&v).await.unwrap_err();
    assert!(matches!(err, MetadataError::CorruptCatalog { .. }));
    assert_eq!(source.fetch_count(&catalog_path), 2);

    let cached_file = MetadataCache::open(cache.path()).unwrap().catalog_path(&v);
    assert!(!cached_file.exists());
}

#[tokio::test]
async fn test_malformed_payload_recovers_on_second_fetch() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::new());
    let properties_path = format!("2.0.1/{PROPERTIES_FILE}");
    source.respond(&properties_path, Ok(b"no separator here\n".to_vec()));
    source.respond(&properties_path, Ok(b"helidon.version=4.1.0\n".to_vec()));
    let store = store(source.clone(), &cache);

    let properties = store.properties_of(&version("2.0.1")).await.unwrap();
    assert_eq!(properties.get("helidon.version"), Some("4.1.0"));
    assert_eq!(source.fetch_count(&properties_path), 2);
}

#[tokio::test]
async fn test_unknown_version() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::with_versions(&["2.0.1"]));
    let store = store(source, &cache);

    let err = store.catalog_of(&version("9.9.9")).await.unwrap_err();
    assert_eq!(err, MetadataError::UnknownVersion("9.9.9".to_string()));
}

#[tokio::test]
async fn test_remote_transport_errors_map_to_unavailable() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::new());
    source.set(
        &format!("2.0.1/{CATALOG_FILE}"),
        Err(FetchError::Unreachable("connection reset".to_string())),
    );
    let store = store(source, &cache);

    let err = store.catalog_of(&version("2.0.1")).await.unwrap_err();
    assert_eq!(
        err,
        MetadataError::MetadataUnavailable("connection reset".to_string())
    );
}

#[tokio::test]
async fn test_cached_entries_survive_across_stores() {
    init_test_logging();
    let cache = TempDir::new().unwrap();
    let v = version("2.0.1");

    let online = Arc::new(ScriptedSource::with_versions(&["2.0.1"]));
    let first = store(online, &cache);
    let properties = first.properties_of(&v).await.unwrap();
    let catalog = first.catalog_of(&v).await.unwrap();

    let offline = Arc::new(ScriptedSource::new());
    offline.set_offline(true);
    let second = store(offline.clone(), &cache);

    assert_eq!(second.properties_of(&v).await.unwrap(), properties);
    let cached = second.catalog_of(&v).await.unwrap();
    assert_eq!(cached, catalog);
    assert_eq!(
        cached.entries()[0].tags(),
        &["se".to_string(), "rest".to_string(), "starter".to_string()]
    );
    assert_eq!(offline.total_fetches(), 0);
}

#[tokio::test]
async fn test_file_mirror_end_to_end() {
    init_test_logging();
    let mirror = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    write_mirror(mirror.path(), &["2.0.0", "2.0.1", "2.0.1-RC1"]).unwrap();

    let store = MetadataStore::new(
        Arc::new(FileSource::new(mirror.path())),
        cache.path(),
        MetadataPolicy::default(),
    )
    .unwrap();

    let latest = store.latest_version().await.unwrap().into_value();
    assert_eq!(latest.as_str(), "2.0.1");

    let catalog = store.catalog_of(&latest).await.unwrap();
    let expected = Catalog::parse(latest.clone(), CATALOG_2_0_1.as_bytes()).unwrap();
    assert_eq!(catalog, expected);

    let flat = catalog.flatten();
    assert!(flat.contains(&("archetype.1.artifactId".to_string(), "quickstart-se".to_string())));
    assert!(flat.contains(&("archetype.2.tags".to_string(), "mp,jpa".to_string())));
}

#[test]
fn test_unusable_cache_root_fails_at_open() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let not_a_dir = temp_dir.path().join("cache");
    std::fs::write(&not_a_dir, "occupied").unwrap();

    let result = MetadataStore::new(
        Arc::new(ScriptedSource::new()),
        &not_a_dir,
        MetadataPolicy::default(),
    );
    assert!(matches!(result, Err(MetadataError::CacheInit { .. })));
}
