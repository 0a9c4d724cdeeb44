use crate::entry::InMemoryEntry;
use arc_swap::ArcSwap;
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An immutable snapshot of one bucket's pending operations.
///
/// Invariant: the byte sums equal the totals over `queue` (8 bytes of key per
/// entry plus each entry's value/aux lengths). Snapshots are replaced
/// wholesale on every append and on drain, never mutated in place.
#[derive(Clone, Debug, Default)]
pub struct BucketBuffer {
    pub queue: Vec<InMemoryEntry>,
    pub key_bytes: u64,
    pub val_bytes: u64,
    pub aux_bytes: u64,
}

impl BucketBuffer {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// A fresh snapshot with `entry` appended. The entry's `position` is its
    /// index within the new snapshot.
    fn with(&self, mut entry: InMemoryEntry) -> Self {
        let mut queue = Vec::with_capacity(self.queue.len() + 1);
        queue.extend_from_slice(&self.queue);
        entry.position = queue.len() as u32;
        let val_len = entry.value_len();
        let aux_len = entry.aux_len();
        queue.push(entry);
        Self {
            queue,
            key_bytes: self.key_bytes + 8,
            val_bytes: self.val_bytes + val_len,
            aux_bytes: self.aux_bytes + aux_len,
        }
    }
}

/// Fill level published after an append, for buffer state events.
#[derive(Clone, Copy, Debug)]
pub struct BufferStats {
    pub entries: usize,
    pub key_bytes: u64,
    pub val_bytes: u64,
    pub aux_bytes: u64,
}

/// Per-bucket accumulator between producers and the bucket's disk writer.
///
/// Producers append lock-free: each append RCUs a fresh snapshot in, so the
/// losing side of a race retries against the winner's snapshot and no entry
/// is ever dropped or double-counted (every snapshot is a new allocation, so
/// there is no ABA hazard). The writer drains by swapping an empty snapshot
/// in; whatever it displaced is exclusively its own.
///
/// The pad keeps neighbouring brokers in the router's array off each other's
/// cache lines.
pub struct BucketBroker {
    current: CachePadded<ArcSwap<BucketBuffer>>,
    wake: Mutex<()>,
    data_ready: Condvar,
    shutdown: AtomicBool,
}

impl Default for BucketBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketBroker {
    pub fn new() -> Self {
        Self {
            current: CachePadded::new(ArcSwap::from_pointee(BucketBuffer::default())),
            wake: Mutex::new(()),
            data_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Constant-time from the caller's perspective; never touches I/O.
    pub fn append(&self, entry: InMemoryEntry) -> BufferStats {
        let mut stats = BufferStats { entries: 0, key_bytes: 0, val_bytes: 0, aux_bytes: 0 };
        self.current.rcu(|cur| {
            let next = cur.with(entry.clone());
            stats = BufferStats {
                entries: next.queue.len(),
                key_bytes: next.key_bytes,
                val_bytes: next.val_bytes,
                aux_bytes: next.aux_bytes,
            };
            Arc::new(next)
        });
        let _hold = self.wake.lock();
        drop(_hold);
        self.data_ready.notify_one();
        stats
    }

    /// Swap the current snapshot for an empty one and return what was there.
    /// An empty drain is an empty buffer, not an error.
    pub fn take_now(&self) -> BucketBuffer {
        let old = self.current.swap(Arc::new(BucketBuffer::default()));
        Arc::try_unwrap(old).unwrap_or_else(|arc| (*arc).clone())
    }

    /// Block until data is visible or shutdown. Returns `false` only on
    /// shutdown with nothing left; the caller still drains via `take_now`,
    /// under whatever lock serialises its downstream.
    pub fn wait_for_data(&self) -> bool {
        loop {
            if !self.current.load().queue.is_empty() {
                return true;
            }
            if self.shutdown.load(Ordering::Acquire) {
                return false;
            }
            let mut guard = self.wake.lock();
            // Re-check under the wake lock, then wait with a timeout as a
            // backstop against the append-before-wait window.
            if self.current.load().queue.is_empty() && !self.shutdown.load(Ordering::Acquire) {
                self.data_ready.wait_for(&mut guard, Duration::from_millis(100));
            }
        }
    }

    /// Current fill without draining (fast size check via the byte sums).
    pub fn fill(&self) -> BufferStats {
        let cur = self.current.load();
        BufferStats {
            entries: cur.queue.len(),
            key_bytes: cur.key_bytes,
            val_bytes: cur.val_bytes,
            aux_bytes: cur.aux_bytes,
        }
    }

    /// Wake the writer for its final drain.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _hold = self.wake.lock();
        drop(_hold);
        self.data_ready.notify_all();
    }
}
