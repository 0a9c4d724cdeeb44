use crate::broker::BucketBroker;
use crate::bucket_file::BucketDisk;
use crate::events::{EventBus, FaultKind, StateEvent, WriterState};
use crate::merger::Merger;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

/// Everything one bucket's writer thread needs.
pub(crate) struct WriterCtx {
    pub bucket: usize,
    pub broker: Arc<BucketBroker>,
    pub disk: Arc<Mutex<BucketDisk>>,
    pub merger: Arc<Merger>,
    pub bus: Arc<EventBus>,
    pub threshold: u64,
}

/// Writer state publisher. Transitions are edge-triggered: re-announcing the
/// state the bucket is already in is suppressed here, before the bus's own
/// coalescing gets a say.
struct Transitions<'a> {
    ctx: &'a WriterCtx,
    last: Option<WriterState>,
    kv_bytes: u64,
    aux_bytes: u64,
}

impl<'a> Transitions<'a> {
    fn new(ctx: &'a WriterCtx) -> Self {
        Self { ctx, last: None, kv_bytes: 0, aux_bytes: 0 }
    }

    fn counters(&mut self, kv_bytes: u64, aux_bytes: u64) {
        self.kv_bytes = kv_bytes;
        self.aux_bytes = aux_bytes;
    }

    fn emit(&mut self, state: WriterState) {
        if self.last == Some(state) {
            return;
        }
        self.last = Some(state);
        self.ctx.bus.publish_state(StateEvent::Writer {
            bucket: self.ctx.bucket,
            state,
            kv_bytes_written: self.kv_bytes,
            aux_bytes_written: self.aux_bytes,
        });
    }
}

/// Thread main for one bucket: drain the broker, spill to the file pair,
/// hand off to the merger when the bucket outgrows its threshold.
///
/// The drain itself happens under the disk-file lock, so at any instant an
/// accepted entry is either still in the broker or already on disk; there is
/// no in-flight window for `synchronize` or the merger to miss.
pub(crate) fn run_writer(ctx: WriterCtx) {
    let mut t = Transitions::new(&ctx);
    t.emit(WriterState::Empty);

    while ctx.broker.wait_for_data() {
        if let Err(e) = drain_and_feed(&ctx, &mut t) {
            fail(&ctx, &mut t, e);
            return;
        }
    }

    // Shutdown: one final drain, then a final merge if the bucket spilled
    // anything that has not been reconciled yet.
    let final_kv_bytes = {
        let mut disk_guard = ctx.disk.lock();
        let leftover = ctx.broker.take_now();
        if !leftover.is_empty() {
            if let Err(e) = disk_guard.feed(&leftover.queue) {
                drop(disk_guard);
                fail(&ctx, &mut t, e);
                return;
            }
        }
        t.counters(disk_guard.kv_bytes_written, disk_guard.aux_bytes_written);
        disk_guard.kv_bytes_written
    };
    if final_kv_bytes > 0 {
        ctx.merger.do_merge();
    }
    tracing::debug!(bucket = ctx.bucket, "bucket writer finished");
    t.emit(WriterState::Finished);
}

fn drain_and_feed(ctx: &WriterCtx, t: &mut Transitions<'_>) -> io::Result<()> {
    t.emit(WriterState::DataReceived);
    t.emit(WriterState::WaitingOnLock);
    let mut disk_guard = ctx.disk.lock();
    let buffer = ctx.broker.take_now();
    if buffer.is_empty() {
        // Someone (synchronize, most likely) drained first.
        drop(disk_guard);
        t.emit(WriterState::WaitingOnData);
        return Ok(());
    }
    t.counters(disk_guard.kv_bytes_written, disk_guard.aux_bytes_written);
    t.emit(WriterState::Writing);
    disk_guard.feed(&buffer.queue)?;
    let kv_bytes = disk_guard.kv_bytes_written;
    let aux_bytes = disk_guard.aux_bytes_written;
    // Cumulative counts against the threshold; a failed merge leaves them
    // high, so every later batch re-triggers until one succeeds.
    let merge_required = kv_bytes > ctx.threshold || aux_bytes > ctx.threshold;
    drop(disk_guard);
    t.counters(kv_bytes, aux_bytes);

    if merge_required {
        t.emit(WriterState::WaitingOnMerge);
        ctx.merger.do_merge();
    } else {
        t.emit(WriterState::WaitingOnData);
    }
    t.emit(WriterState::Empty);
    Ok(())
}

fn fail(ctx: &WriterCtx, t: &mut Transitions<'_>, e: io::Error) {
    tracing::error!(bucket = ctx.bucket, error = %e, "bucket writer terminating");
    ctx.bus.publish_state(StateEvent::Fault {
        kind: FaultKind::Io,
        bucket: Some(ctx.bucket),
        detail: e.to_string(),
    });
    t.emit(WriterState::FinishedWithError);
}
