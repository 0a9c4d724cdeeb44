use drum::{
    decode_aux_records, decode_kv_records, BucketDisk, InMemoryEntry, KvRecord, OpKind,
};
use std::fs;

/// Exact byte image of one update record with a two-byte value and no aux:
/// kv is exactly 15 bytes, aux exactly 4.
#[test]
fn update_record_byte_image() {
    let dir = tempfile::tempdir().unwrap();
    let mut disk = BucketDisk::open(dir.path(), 0).unwrap();

    disk.feed(&[InMemoryEntry::new(
        OpKind::Update,
        0x0102030405060708,
        Some(vec![0xAA, 0xBB]),
        None,
    )])
    .unwrap();

    let kv = fs::read(dir.path().join("bucket0.kv")).unwrap();
    assert_eq!(
        kv,
        vec![
            b'U', // op tag
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // key, big-endian
            0x00, 0x00, 0x00, 0x02, // value length
            0xAA, 0xBB,
        ]
    );
    assert_eq!(kv.len(), 15);
    assert_eq!(disk.kv_bytes_written, 15);

    let aux = fs::read(dir.path().join("bucket0.aux")).unwrap();
    assert_eq!(aux, vec![0x00, 0x00, 0x00, 0x00]);
    assert_eq!(disk.aux_bytes_written, 4);
}

/// Writing then reading a batch yields the original tuples, with kv and aux
/// staying position-parallel.
#[test]
fn feed_then_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut disk = BucketDisk::open(dir.path(), 3).unwrap();

    let entries = vec![
        InMemoryEntry::new(OpKind::Check, 10, None, Some(b"first".to_vec())),
        InMemoryEntry::new(OpKind::Update, 2, Some(b"value".to_vec()), None),
        InMemoryEntry::new(OpKind::CheckUpdate, 10, Some(b"x".to_vec()), Some(b"third".to_vec())),
        InMemoryEntry::new(OpKind::AppendUpdate, 7, Some(vec![]), None),
    ];
    disk.feed(&entries).unwrap();

    let kv = disk.read_kv().unwrap();
    assert_eq!(
        kv,
        vec![
            KvRecord { op: OpKind::Check, key: 10, value: vec![] },
            KvRecord { op: OpKind::Update, key: 2, value: b"value".to_vec() },
            KvRecord { op: OpKind::CheckUpdate, key: 10, value: b"x".to_vec() },
            KvRecord { op: OpKind::AppendUpdate, key: 7, value: vec![] },
        ]
    );

    let aux = disk.read_aux().unwrap();
    assert_eq!(aux.len(), kv.len());
    assert_eq!(
        aux,
        vec![Some(b"first".to_vec()), None, Some(b"third".to_vec()), None]
    );
}

/// Cumulative byte counters match the record arithmetic across batches, and
/// reset snaps both files and counters to zero.
#[test]
fn counters_track_and_reset() {
    let dir = tempfile::tempdir().unwrap();
    let mut disk = BucketDisk::open(dir.path(), 1).unwrap();

    disk.feed(&[InMemoryEntry::new(OpKind::Update, 1, Some(vec![1, 2, 3]), Some(vec![9]))])
        .unwrap();
    disk.feed(&[InMemoryEntry::new(OpKind::Check, 2, None, None)]).unwrap();

    // (13 + 3) + (13 + 0) and (4 + 1) + (4 + 0)
    assert_eq!(disk.kv_bytes_written, 29);
    assert_eq!(disk.aux_bytes_written, 9);

    disk.reset().unwrap();
    assert_eq!(disk.kv_bytes_written, 0);
    assert_eq!(disk.aux_bytes_written, 0);
    assert_eq!(fs::metadata(dir.path().join("bucket1.kv")).unwrap().len(), 0);
    assert_eq!(fs::metadata(dir.path().join("bucket1.aux")).unwrap().len(), 0);

    // The pair keeps working after a reset.
    disk.feed(&[InMemoryEntry::new(OpKind::Update, 3, Some(vec![7]), None)]).unwrap();
    assert_eq!(disk.kv_bytes_written, 14);
    assert_eq!(disk.read_kv().unwrap().len(), 1);
}

/// Truncated or garbage bytes decode to errors, not panics.
#[test]
fn decode_rejects_garbage() {
    assert!(decode_kv_records(&[0xFF, 0, 0]).is_err());
    // Valid header claiming more value bytes than present.
    let mut bytes = vec![b'U'];
    bytes.extend_from_slice(&5u64.to_be_bytes());
    bytes.extend_from_slice(&100u32.to_be_bytes());
    assert!(decode_kv_records(&bytes).is_err());
    assert!(decode_aux_records(&[0, 0]).is_err());
    assert!(decode_aux_records(&3u32.to_be_bytes()).is_err());

    assert!(decode_kv_records(&[]).unwrap().is_empty());
    assert!(decode_aux_records(&[]).unwrap().is_empty());
}
