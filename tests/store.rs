use drum::{FlatFileStore, MemoryStore, Resolution, SortedStore};

fn exercise_store(store: &mut dyn SortedStore) {
    assert_eq!(store.get(10).unwrap(), None);

    store.put(10, b"ten").unwrap();
    store.put(5, b"five").unwrap();
    store.put(20, b"twenty").unwrap();
    assert_eq!(store.get(5).unwrap().as_deref(), Some(b"five".as_slice()));
    assert_eq!(store.get(10).unwrap().as_deref(), Some(b"ten".as_slice()));
    assert_eq!(store.get(15).unwrap(), None);

    store.put(10, b"ten again").unwrap();
    assert_eq!(store.get(10).unwrap().as_deref(), Some(b"ten again".as_slice()));

    // One ascending pass: update 5, skip 10, insert 12, probe 99 absent.
    let mut seen = Vec::new();
    store
        .merge(&[5, 10, 12, 99], &mut |key, old| {
            seen.push((key, old.map(|b| b.to_vec())));
            match key {
                5 => Resolution::Put(b"FIVE".to_vec()),
                12 => Resolution::Put(b"twelve".to_vec()),
                _ => Resolution::Keep,
            }
        })
        .unwrap();
    assert_eq!(
        seen,
        vec![
            (5, Some(b"five".to_vec())),
            (10, Some(b"ten again".to_vec())),
            (12, None),
            (99, None),
        ]
    );

    assert_eq!(store.get(5).unwrap().as_deref(), Some(b"FIVE".as_slice()));
    assert_eq!(store.get(10).unwrap().as_deref(), Some(b"ten again".as_slice()));
    assert_eq!(store.get(12).unwrap().as_deref(), Some(b"twelve".as_slice()));
    assert_eq!(store.get(20).unwrap().as_deref(), Some(b"twenty".as_slice()));
    assert_eq!(store.get(99).unwrap(), None);
}

#[test]
fn memory_store_contract() {
    let mut store = MemoryStore::new();
    exercise_store(&mut store);
    assert_eq!(store.len(), 4);
}

#[test]
fn flat_file_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FlatFileStore::open(dir.path().join("store.db"));
    exercise_store(&mut store);
}

/// The flat file survives reopen: merges promote a complete new generation.
#[test]
fn flat_file_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let mut store = FlatFileStore::open(&path);
        store
            .merge(&[1, 2, 3], &mut |key, _| Resolution::Put(vec![key as u8]))
            .unwrap();
    }
    let mut reopened = FlatFileStore::open(&path);
    assert_eq!(reopened.get(1).unwrap(), Some(vec![1]));
    assert_eq!(reopened.get(2).unwrap(), Some(vec![2]));
    assert_eq!(reopened.get(3).unwrap(), Some(vec![3]));
    assert_eq!(reopened.get(4).unwrap(), None);
}

/// Keep on an absent key stores nothing.
#[test]
fn keep_on_absent_key_is_a_noop() {
    let mut store = MemoryStore::new();
    store.merge(&[7], &mut |_, old| {
        assert!(old.is_none());
        Resolution::Keep
    })
    .unwrap();
    assert_eq!(store.get(7).unwrap(), None);
    assert!(store.is_empty());
}
