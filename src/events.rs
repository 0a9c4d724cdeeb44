use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Disk-writer lifecycle, published on every transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterState {
    Empty,
    DataReceived,
    WaitingOnLock,
    Writing,
    WaitingOnMerge,
    WaitingOnData,
    Finished,
    FinishedWithError,
}

/// Merger lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergerState {
    WaitingOnMergeRequest,
    Merging,
    Finished,
}

/// Which subsystem a fault event originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    Io,
    Codec,
    Store,
}

/// State-change events: buffer fill, writer and merger transitions, faults.
///
/// These are advisory. The dispatcher may drop the oldest of them under
/// queue pressure; result callbacks are never dropped.
#[derive(Clone, Debug, PartialEq)]
pub enum StateEvent {
    Buffer {
        bucket: usize,
        entries: usize,
        key_bytes: u64,
        val_bytes: u64,
        aux_bytes: u64,
    },
    Writer {
        bucket: usize,
        state: WriterState,
        kv_bytes_written: u64,
        aux_bytes_written: u64,
    },
    Merger {
        state: MergerState,
    },
    Fault {
        kind: FaultKind,
        bucket: Option<usize>,
        detail: String,
    },
}

/// Outcome class delivered for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultKind {
    UniqueKey,
    DuplicateKey,
    UniqueKeyUpdate,
    DuplicateKeyUpdate,
}

impl ResultKind {
    #[inline]
    pub fn is_duplicate(self) -> bool {
        matches!(self, Self::DuplicateKey | Self::DuplicateKeyUpdate)
    }
}

/// Raw (byte-level) operation result, as produced by the merger.
#[derive(Clone, Debug)]
pub struct ResultEvent {
    pub key: u64,
    pub kind: ResultKind,
    /// For update-family operations: the value now stored for the key
    /// (the merged value for `append_update`). `None` for plain checks.
    pub value: Option<Vec<u8>>,
    pub aux: Option<Vec<u8>>,
}

/// A decoded operation result, as delivered to the caller's dispatcher.
#[derive(Clone, Debug)]
pub struct DrumResult<V, A> {
    pub key: u64,
    pub kind: ResultKind,
    pub value: Option<V>,
    pub aux: Option<A>,
}

/// Caller-supplied sink for operation results. Invoked on the dispatcher
/// thread; keep it quick or hand off to your own queue.
pub trait ResultDispatcher<V, A>: Send + Sync {
    fn on_result(&self, result: DrumResult<V, A>);
}

/// Caller-supplied sink for state-change events.
pub trait StateListener: Send + Sync {
    fn on_state(&self, event: &StateEvent);
}

/// Default sinks: discard everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDispatcher;

impl<V, A> ResultDispatcher<V, A> for NoopDispatcher {
    fn on_result(&self, _result: DrumResult<V, A>) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl StateListener for NoopListener {
    fn on_state(&self, _event: &StateEvent) {}
}

enum BusItem {
    State(StateEvent),
    Result(ResultEvent),
    Flush(u64),
}

struct BusQueue {
    items: VecDeque<BusItem>,
    next_flush_seq: u64,
    flushed_seq: u64,
    closed: bool,
}

/// Single in-process event bus: bounded queue, one consumer thread.
///
/// State events coalesce when the previous queued event is identical, and the
/// oldest queued state event is shed on overflow. Result publication blocks
/// until there is room; it is the only point where a producer can stall on
/// the dispatcher.
pub(crate) struct EventBus {
    queue: Mutex<BusQueue>,
    not_empty: Condvar,
    not_full: Condvar,
    flushed: Condvar,
    capacity: usize,
}

impl EventBus {
    /// Spawn the dispatcher thread. `deliver_result` decodes and forwards to
    /// the caller's typed dispatcher.
    pub fn start(
        capacity: usize,
        listener: Arc<dyn StateListener>,
        deliver_result: Box<dyn Fn(ResultEvent) + Send>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let bus = Arc::new(Self {
            queue: Mutex::new(BusQueue {
                items: VecDeque::with_capacity(capacity.min(4096)),
                next_flush_seq: 0,
                flushed_seq: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            flushed: Condvar::new(),
            capacity,
        });
        let consumer = Arc::clone(&bus);
        let handle = std::thread::Builder::new()
            .name("drum-dispatch".into())
            .spawn(move || consumer.run(listener, deliver_result))
            .expect("spawn dispatcher thread");
        (bus, handle)
    }

    fn run(&self, listener: Arc<dyn StateListener>, deliver_result: Box<dyn Fn(ResultEvent) + Send>) {
        loop {
            let item = {
                let mut q = self.queue.lock();
                loop {
                    if let Some(item) = q.items.pop_front() {
                        break item;
                    }
                    if q.closed {
                        return;
                    }
                    self.not_empty.wait(&mut q);
                }
            };
            self.not_full.notify_all();
            // Deliver outside the lock so slow listeners cannot stall producers
            // beyond the bounded-queue contract.
            match item {
                BusItem::State(ev) => listener.on_state(&ev),
                BusItem::Result(ev) => deliver_result(ev),
                BusItem::Flush(seq) => {
                    let mut q = self.queue.lock();
                    q.flushed_seq = q.flushed_seq.max(seq);
                    self.flushed.notify_all();
                }
            }
        }
    }

    /// Non-blocking. Coalesces with an identical event at the back of the
    /// queue; sheds the oldest queued state event when full.
    pub fn publish_state(&self, event: StateEvent) {
        let mut q = self.queue.lock();
        if q.closed {
            return;
        }
        if let Some(BusItem::State(last)) = q.items.back() {
            if *last == event {
                return;
            }
        }
        if q.items.len() >= self.capacity {
            let victim = q.items.iter().position(|i| matches!(i, BusItem::State(_)));
            match victim {
                Some(idx) => {
                    q.items.remove(idx);
                }
                // Queue is saturated with results; this update is the one shed.
                None => return,
            }
        }
        q.items.push_back(BusItem::State(event));
        self.not_empty.notify_one();
    }

    /// Blocks while the queue is full. Results are never shed.
    pub fn publish_result(&self, event: ResultEvent) {
        let mut q = self.queue.lock();
        while q.items.len() >= self.capacity && !q.closed {
            self.not_full.wait(&mut q);
        }
        if q.closed {
            return;
        }
        q.items.push_back(BusItem::Result(event));
        self.not_empty.notify_one();
    }

    /// Wait until every event published before this call has been delivered.
    pub fn flush(&self) {
        let mut q = self.queue.lock();
        if q.closed {
            return;
        }
        q.next_flush_seq += 1;
        let seq = q.next_flush_seq;
        q.items.push_back(BusItem::Flush(seq));
        self.not_empty.notify_one();
        while q.flushed_seq < seq && !q.closed {
            self.flushed.wait(&mut q);
        }
    }

    /// Stop accepting events; the consumer drains what is queued and exits.
    pub fn close(&self) {
        let mut q = self.queue.lock();
        q.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.flushed.notify_all();
    }
}
