use crate::bucket_file::BucketDisk;
use crate::entry::{Classification, OpKind};
use crate::events::{EventBus, FaultKind, MergerState, ResultEvent, ResultKind, StateEvent, WriterState};
use crate::store::{Resolution, SortedStore};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Byte-level append hook, built by the facade from the caller's append
/// codec: `merge(old, incoming) -> folded`.
pub(crate) type MergeFn = Arc<dyn Fn(&[u8], &[u8]) -> anyhow::Result<Vec<u8>> + Send + Sync>;

struct Signal {
    requested: bool,
    pass_gen: u64,
    completed_gen: u64,
    shutdown: bool,
}

/// Singleton merge coordinator.
///
/// Writers (and `synchronize`) call [`do_merge`], which raises a request and
/// waits for a pass that started no earlier than the request. Exactly one
/// pass runs at a time on the dedicated merger thread; concurrent callers
/// pile onto the same upcoming pass.
///
/// [`do_merge`]: Merger::do_merge
pub(crate) struct Merger {
    signal: Mutex<Signal>,
    request_cv: Condvar,
    done_cv: Condvar,
}

/// What the merger thread works with. The store is exclusively its own.
pub(crate) struct MergerCtx {
    pub disks: Vec<Arc<Mutex<BucketDisk>>>,
    pub merge_fn: Option<MergeFn>,
    pub bus: Arc<EventBus>,
}

impl Merger {
    pub fn new() -> Self {
        Self {
            signal: Mutex::new(Signal {
                requested: false,
                pass_gen: 0,
                completed_gen: 0,
                shutdown: false,
            }),
            request_cv: Condvar::new(),
            done_cv: Condvar::new(),
        }
    }

    /// Non-blocking: flag that a pass is wanted and return.
    pub fn request_merge(&self) {
        let mut s = self.signal.lock();
        if s.shutdown {
            return;
        }
        s.requested = true;
        self.request_cv.notify_one();
    }

    /// Request a pass and block until one that covers this request finishes.
    /// Returns immediately once the merger has been shut down. Failures do
    /// not propagate here; they surface as fault events.
    pub fn do_merge(&self) {
        let mut s = self.signal.lock();
        if s.shutdown {
            return;
        }
        let observed = s.pass_gen;
        s.requested = true;
        self.request_cv.notify_one();
        while s.completed_gen <= observed && !s.shutdown {
            self.done_cv.wait(&mut s);
        }
    }

    pub fn shutdown(&self) {
        let mut s = self.signal.lock();
        s.shutdown = true;
        self.request_cv.notify_all();
        self.done_cv.notify_all();
    }

    pub fn spawn(self: Arc<Self>, store: Box<dyn SortedStore>, ctx: MergerCtx) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("drum-merger".into())
            .spawn(move || self.run(store, ctx))
            .expect("spawn merger thread")
    }

    fn run(&self, mut store: Box<dyn SortedStore>, ctx: MergerCtx) {
        ctx.bus.publish_state(StateEvent::Merger { state: MergerState::WaitingOnMergeRequest });
        loop {
            {
                let mut s = self.signal.lock();
                while !s.requested && !s.shutdown {
                    self.request_cv.wait(&mut s);
                }
                // A request raised before shutdown still gets its pass.
                if !s.requested {
                    break;
                }
                s.requested = false;
                s.pass_gen += 1;
            }
            ctx.bus.publish_state(StateEvent::Merger { state: MergerState::Merging });
            tracing::debug!("merge pass starting");
            match merge_pass(store.as_mut(), &ctx) {
                Ok(dispatched) => tracing::debug!(dispatched, "merge pass complete"),
                Err(fault) => {
                    tracing::warn!(detail = %fault.detail, "merge pass aborted");
                    ctx.bus.publish_state(StateEvent::Fault {
                        kind: fault.kind,
                        bucket: fault.bucket,
                        detail: fault.detail,
                    });
                }
            }
            {
                let mut s = self.signal.lock();
                s.completed_gen = s.pass_gen;
                self.done_cv.notify_all();
            }
            ctx.bus.publish_state(StateEvent::Merger { state: MergerState::WaitingOnMergeRequest });
        }
        ctx.bus.publish_state(StateEvent::Merger { state: MergerState::Finished });
    }
}

struct PassFault {
    kind: FaultKind,
    bucket: Option<usize>,
    detail: String,
}

/// One pass over every bucket, in bucket order. Aborts on the first bucket
/// that fails, leaving that bucket's files in place for the next trigger.
fn merge_pass(store: &mut dyn SortedStore, ctx: &MergerCtx) -> Result<usize, PassFault> {
    let mut dispatched = 0usize;
    for (bucket, disk) in ctx.disks.iter().enumerate() {
        dispatched += merge_bucket(store, ctx, bucket, disk).map_err(|mut fault| {
            fault.bucket = Some(bucket);
            fault
        })?;
    }
    Ok(dispatched)
}

#[derive(Default)]
struct Outcome {
    classification: Classification,
    dispatch_value: Option<Vec<u8>>,
}

fn merge_bucket(
    store: &mut dyn SortedStore,
    ctx: &MergerCtx,
    bucket: usize,
    disk: &Arc<Mutex<BucketDisk>>,
) -> Result<usize, PassFault> {
    let io_fault = |e: std::io::Error| PassFault {
        kind: FaultKind::Io,
        bucket: None,
        detail: e.to_string(),
    };

    let mut disk_guard = disk.lock();
    if disk_guard.kv_bytes_written == 0 {
        return Ok(0);
    }

    let records = disk_guard.read_kv().map_err(io_fault)?;
    let auxes = disk_guard.read_aux().map_err(io_fault)?;
    if auxes.len() != records.len() {
        return Err(PassFault {
            kind: FaultKind::Io,
            bucket: None,
            detail: format!(
                "bucket file pair out of step: {} kv records vs {} aux records",
                records.len(),
                auxes.len()
            ),
        });
    }

    // File order is submission order within the bucket; sorting an index by
    // (key, file position) gives the merge order while keeping the original
    // order for dispatch.
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_unstable_by_key(|&i| (records[i].key, i));
    let mut keys: Vec<u64> = order.iter().map(|&i| records[i].key).collect();
    keys.dedup();

    let mut outcomes: Vec<Outcome> = Vec::with_capacity(records.len());
    outcomes.resize_with(records.len(), Outcome::default);

    let mut cursor = 0usize;
    let mut codec_fault: Option<String> = None;
    let mut resolve = |key: u64, old: Option<&[u8]>| -> Resolution {
        // A codec failure aborts this bucket's merge; once one is recorded,
        // leave the store untouched for the remaining keys.
        if codec_fault.is_some() {
            return Resolution::Keep;
        }
        let mut current: Option<Vec<u8>> = old.map(<[u8]>::to_vec);
        let mut wrote = false;
        // Apply the whole same-key run in submission order against the
        // evolving value, so later checks in the run see earlier updates.
        while cursor < order.len() && records[order[cursor]].key == key {
            let idx = order[cursor];
            cursor += 1;
            let record = &records[idx];
            let outcome = &mut outcomes[idx];
            outcome.classification = if current.is_some() {
                Classification::Duplicate
            } else {
                Classification::Unique
            };
            match record.op {
                OpKind::Check => {}
                OpKind::Update | OpKind::CheckUpdate => {
                    current = Some(record.value.clone());
                    wrote = true;
                    outcome.dispatch_value = current.clone();
                }
                OpKind::AppendUpdate => {
                    let folded = match (&current, &ctx.merge_fn) {
                        (Some(existing), Some(merge)) => match merge(existing, &record.value) {
                            Ok(folded) => folded,
                            Err(e) => {
                                codec_fault =
                                    Some(format!("append merge failed for key {key}: {e:#}"));
                                // Withhold this key entirely; the next trigger
                                // replays the whole bucket.
                                return Resolution::Keep;
                            }
                        },
                        // Nothing stored yet (or no append codec): plain update.
                        _ => record.value.clone(),
                    };
                    current = Some(folded);
                    wrote = true;
                    outcome.dispatch_value = current.clone();
                }
            }
        }
        if wrote {
            Resolution::Put(current.expect("value present after a value-bearing op"))
        } else {
            Resolution::Keep
        }
    };

    store.merge(&keys, &mut resolve).map_err(|e| PassFault {
        kind: FaultKind::Store,
        bucket: None,
        detail: format!("{e:#}"),
    })?;
    // Codec trouble is a pass failure like any other: no reset, no dispatch,
    // the bucket file stays for the next trigger.
    if let Some(detail) = codec_fault {
        return Err(PassFault { kind: FaultKind::Codec, bucket: None, detail });
    }

    // Results go out in file order, paired with the position-parallel aux
    // records, before the files are rewound.
    let mut dispatched = 0usize;
    for (idx, record) in records.iter().enumerate() {
        let outcome = &mut outcomes[idx];
        let duplicate = outcome.classification == Classification::Duplicate;
        let kind = match (record.op, duplicate) {
            (OpKind::Check, true) => ResultKind::DuplicateKey,
            (OpKind::Check, false) => ResultKind::UniqueKey,
            (_, true) => ResultKind::DuplicateKeyUpdate,
            (_, false) => ResultKind::UniqueKeyUpdate,
        };
        ctx.bus.publish_result(ResultEvent {
            key: record.key,
            kind,
            value: outcome.dispatch_value.take(),
            aux: auxes[idx].clone(),
        });
        dispatched += 1;
    }

    disk_guard.reset().map_err(io_fault)?;
    ctx.bus.publish_state(StateEvent::Writer {
        bucket,
        state: WriterState::Empty,
        kv_bytes_written: 0,
        aux_bytes_written: 0,
    });
    Ok(dispatched)
}
