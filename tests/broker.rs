use drum::{BucketBroker, InMemoryEntry, OpKind};
use std::sync::Arc;
use std::thread;

fn entry(key: u64, value: &[u8], aux: &[u8]) -> InMemoryEntry {
    InMemoryEntry::new(
        OpKind::Update,
        key,
        Some(value.to_vec()),
        if aux.is_empty() { None } else { Some(aux.to_vec()) },
    )
}

/// Byte sums always equal the totals over the queued entries, and positions
/// index the snapshot in append order.
#[test]
fn append_tracks_sums_and_positions() {
    let broker = BucketBroker::new();

    broker.append(entry(1, b"ab", b""));
    broker.append(entry(2, b"", b"xyz"));
    let stats = broker.append(entry(3, b"cdef", b"g"));

    assert_eq!(stats.entries, 3);
    assert_eq!(stats.key_bytes, 24);
    assert_eq!(stats.val_bytes, 6);
    assert_eq!(stats.aux_bytes, 4);

    let drained = broker.take_now();
    assert_eq!(drained.len(), 3);
    assert_eq!(drained.key_bytes, 24);
    assert_eq!(drained.val_bytes, 6);
    assert_eq!(drained.aux_bytes, 4);
    let positions: Vec<u32> = drained.queue.iter().map(|e| e.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    let keys: Vec<u64> = drained.queue.iter().map(|e| e.key).collect();
    assert_eq!(keys, vec![1, 2, 3]);
}

/// A drain leaves an empty buffer behind, and positions restart in the next
/// epoch.
#[test]
fn positions_reset_across_flips() {
    let broker = BucketBroker::new();
    broker.append(entry(1, b"a", b""));
    broker.append(entry(2, b"b", b""));
    assert_eq!(broker.take_now().len(), 2);

    let empty = broker.take_now();
    assert!(empty.is_empty());
    assert_eq!(empty.key_bytes, 0);

    broker.append(entry(3, b"c", b""));
    let next = broker.take_now();
    assert_eq!(next.queue[0].position, 0);
    assert_eq!(next.queue[0].key, 3);
}

/// Many producers race one drainer; nothing is lost or duplicated.
#[test]
fn concurrent_appends_survive_drains() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 250;

    let broker = Arc::new(BucketBroker::new());
    let mut handles = Vec::new();
    for p in 0..PRODUCERS {
        let broker = Arc::clone(&broker);
        handles.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                broker.append(entry(p * PER_PRODUCER + i, b"v", b""));
            }
        }));
    }

    // Drain concurrently while producers run.
    let drainer = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || {
            let mut collected = Vec::new();
            while collected.len() < (PRODUCERS * PER_PRODUCER) as usize {
                let drained = broker.take_now();
                collected.extend(drained.queue.into_iter().map(|e| e.key));
                thread::yield_now();
            }
            collected
        })
    };

    for handle in handles {
        handle.join().unwrap();
    }
    let mut collected = drainer.join().unwrap();
    collected.sort_unstable();
    let expected: Vec<u64> = (0..PRODUCERS * PER_PRODUCER).collect();
    assert_eq!(collected, expected);
}

/// Producer-local order survives the lock-free appends: one producer's keys
/// stay in submission order within and across snapshots.
#[test]
fn producer_fifo_is_preserved() {
    let broker = Arc::new(BucketBroker::new());
    let writer = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || {
            for i in 0..500u64 {
                broker.append(entry(i, b"", b""));
            }
        })
    };

    let mut seen = Vec::new();
    while seen.len() < 500 {
        seen.extend(broker.take_now().queue.into_iter().map(|e| e.key));
        thread::yield_now();
    }
    writer.join().unwrap();
    assert_eq!(seen, (0..500).collect::<Vec<u64>>());
}

/// Shutdown wakes a blocked waiter with nothing to drain.
#[test]
fn shutdown_releases_waiter() {
    let broker = Arc::new(BucketBroker::new());
    let waiter = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || broker.wait_for_data())
    };
    broker.shutdown();
    assert!(!waiter.join().unwrap());
}
