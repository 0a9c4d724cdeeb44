#[path = "common/mod.rs"]
mod common;

use common::Results;
use drum::{key_for_str, Drum, MemoryStore, ResultKind, SortedStore, Utf8Codec};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

/// The canonical workload: URLs hashed to keys, the URL itself riding as aux
/// so the dispatcher can route unique hits back to a fetch queue.
#[test]
fn url_seen_filter() {
    let base = tempfile::tempdir().unwrap();
    let results: Results<String, String> = Results::new();

    let drum = Drum::builder("url-seen")
        .base_dir(base.path())
        .num_buckets(8)
        .buffer_size(1 << 40)
        .value_codec(Utf8Codec)
        .aux_codec(Utf8Codec)
        .dispatcher(results.clone())
        .store_factory(|_| Ok(Box::new(MemoryStore::new()) as Box<dyn SortedStore>))
        .build()
        .unwrap();

    let urls = [
        "https://example.com/",
        "https://example.com/a",
        "https://example.com/",
        "https://example.org/",
        "https://example.com/a",
    ];
    for url in urls {
        drum.check_update(key_for_str(url), &String::new(), Some(&url.to_string()))
            .unwrap();
    }
    drum.synchronize().unwrap();
    drum.dispose().unwrap();

    let got = results.snapshot();
    assert_eq!(got.len(), urls.len());

    // First sighting of each URL is unique, repeats are duplicates; the aux
    // payload always echoes the URL.
    let mut verdicts: HashMap<String, Vec<bool>> = HashMap::new();
    for r in &got {
        let url = r.aux.clone().expect("aux echoed");
        assert_eq!(r.key, key_for_str(&url));
        verdicts.entry(url).or_default().push(r.kind.is_duplicate());
    }
    assert_eq!(verdicts["https://example.com/"], vec![false, true]);
    assert_eq!(verdicts["https://example.com/a"], vec![false, true]);
    assert_eq!(verdicts["https://example.org/"], vec![false]);
}

/// Key derivation is deterministic and spreads across buckets.
#[test]
fn keys_are_stable() {
    assert_eq!(key_for_str("https://example.com/"), key_for_str("https://example.com/"));
    assert_ne!(key_for_str("https://example.com/"), key_for_str("https://example.com/a"));
    assert_eq!(
        drum::key_for_bytes(b"payload"),
        drum::key_for_bytes(b"payload".to_vec())
    );
}

/// Invariant: callbacks dispatched == operations drained, with producers
/// racing from several threads.
#[test]
fn concurrent_producers_all_dispatch() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 100;

    let base = tempfile::tempdir().unwrap();
    let results: Results<String, String> = Results::new();

    let drum = Arc::new(
        Drum::builder("concurrent-producers")
            .base_dir(base.path())
            .num_buckets(16)
            .buffer_size(256)
            .value_codec(Utf8Codec)
            .aux_codec(Utf8Codec)
            .dispatcher(results.clone())
            .build()
            .unwrap(),
    );

    let mut handles = Vec::new();
    for p in 0..PRODUCERS {
        let drum = Arc::clone(&drum);
        handles.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                let key = p * PER_PRODUCER + i;
                drum.update(key, &format!("v{key}"), None).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    drum.synchronize().unwrap();
    assert_eq!(results.len(), (PRODUCERS * PER_PRODUCER) as usize);
    drum.dispose().unwrap();

    let mut keys: Vec<u64> = results.snapshot().iter().map(|r| r.key).collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<u64>>());
    assert!(results
        .snapshot()
        .iter()
        .all(|r| r.kind == ResultKind::UniqueKeyUpdate));
}

/// N = 1 degenerates cleanly: everything lands in one bucket and the
/// guarantees hold unchanged.
#[test]
fn single_bucket_degenerate() {
    let base = tempfile::tempdir().unwrap();
    let results: Results<String, String> = Results::new();

    let drum = Drum::builder("single-bucket")
        .base_dir(base.path())
        .num_buckets(1)
        .buffer_size(64)
        .value_codec(Utf8Codec)
        .aux_codec(Utf8Codec)
        .dispatcher(results.clone())
        .build()
        .unwrap();

    for key in 0..20u64 {
        drum.check_update(key % 5, &format!("v{key}"), None).unwrap();
    }
    drum.synchronize().unwrap();
    drum.dispose().unwrap();

    assert_eq!(results.len(), 20);
    // Each of the five distinct keys is unique exactly once.
    let uniques = results
        .snapshot()
        .iter()
        .filter(|r| r.kind == ResultKind::UniqueKeyUpdate)
        .count();
    assert_eq!(uniques, 5);
}