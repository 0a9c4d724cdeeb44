use crate::broker::BucketBroker;
use crate::bucket_file::BucketDisk;
use crate::codec::{AppendCodec, ByteCodec};
use crate::config::DrumOptions;
use crate::entry::{InMemoryEntry, OpKind};
use crate::error::{DrumError, Result};
use crate::events::{
    EventBus, FaultKind, NoopDispatcher, NoopListener, DrumResult, ResultDispatcher, ResultEvent,
    StateEvent, StateListener,
};
use crate::merger::{MergeFn, Merger, MergerCtx};
use crate::store::{FlatFileStore, SortedStore, StoreFactory};
use crate::util::init_tracing_once;
use crate::writer::{run_writer, WriterCtx};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Staged builder for a [`Drum`] engine.
///
/// Codecs are mandatory; everything else has a default. The append codec is
/// only needed when the caller uses `append_update`.
pub struct DrumBuilder<V, A> {
    name: String,
    opts: DrumOptions,
    value_codec: Option<Arc<dyn ByteCodec<V>>>,
    aux_codec: Option<Arc<dyn ByteCodec<A>>>,
    merge_fn: Option<MergeFn>,
    store_factory: Option<StoreFactory>,
    dispatcher: Arc<dyn ResultDispatcher<V, A>>,
    listener: Arc<dyn StateListener>,
}

impl<V: 'static, A: 'static> DrumBuilder<V, A> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opts: DrumOptions::default(),
            value_codec: None,
            aux_codec: None,
            merge_fn: None,
            store_factory: None,
            dispatcher: Arc::new(NoopDispatcher),
            listener: Arc::new(NoopListener),
        }
    }

    // -------- Builder methods --------
    pub fn options(mut self, opts: DrumOptions) -> Self { self.opts = opts; self }
    pub fn num_buckets(mut self, n: usize) -> Self { self.opts = self.opts.with_num_buckets(n); self }
    pub fn buffer_size(mut self, bytes: u64) -> Self { self.opts = self.opts.with_buffer_size(bytes); self }
    pub fn base_dir(mut self, dir: impl AsRef<std::path::Path>) -> Self { self.opts = self.opts.with_base_dir(dir); self }
    pub fn event_queue_capacity(mut self, cap: usize) -> Self { self.opts = self.opts.with_event_queue_capacity(cap); self }
    pub fn io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self { self.opts = self.opts.with_io_buffers(read_bytes, write_bytes); self }

    pub fn value_codec(mut self, codec: impl ByteCodec<V> + 'static) -> Self {
        self.value_codec = Some(Arc::new(codec));
        self
    }

    /// Install a value codec that also supports `append_update` folding.
    pub fn value_append_codec(mut self, codec: impl AppendCodec<V> + Clone + 'static) -> Self {
        let folder = Arc::new(codec.clone());
        self.value_codec = Some(Arc::new(codec));
        self.merge_fn = Some(Arc::new(move |existing, incoming| {
            let existing = folder.from_bytes(existing)?;
            let incoming = folder.from_bytes(incoming)?;
            folder.to_bytes(&folder.merge(existing, incoming)?)
        }));
        self
    }

    pub fn aux_codec(mut self, codec: impl ByteCodec<A> + 'static) -> Self {
        self.aux_codec = Some(Arc::new(codec));
        self
    }

    /// Replace the default flat-file store.
    pub fn store_factory(
        mut self,
        factory: impl FnOnce(&std::path::Path) -> anyhow::Result<Box<dyn SortedStore>> + Send + 'static,
    ) -> Self {
        self.store_factory = Some(Box::new(factory));
        self
    }

    pub fn dispatcher(mut self, dispatcher: impl ResultDispatcher<V, A> + 'static) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    pub fn listener(mut self, listener: impl StateListener + 'static) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    /// Validate options, create the cache directory and bucket files, open
    /// the store, and start every worker thread.
    pub fn build(self) -> Result<Drum<V, A>> {
        init_tracing_once();

        if !self.opts.num_buckets.is_power_of_two() {
            return Err(DrumError::ConfigInvalid(format!(
                "num_buckets must be a power of two, got {}",
                self.opts.num_buckets
            )));
        }
        if !self.opts.buffer_size.is_power_of_two() {
            return Err(DrumError::ConfigInvalid(format!(
                "buffer_size must be a power of two, got {}",
                self.opts.buffer_size
            )));
        }
        let value_codec = self
            .value_codec
            .ok_or_else(|| DrumError::ConfigInvalid("a value codec is required".into()))?;
        let aux_codec = self
            .aux_codec
            .ok_or_else(|| DrumError::ConfigInvalid("an aux codec is required".into()))?;

        let dir = self.opts.cache_dir(&self.name);
        fs::create_dir_all(&dir)?;

        let store: Box<dyn SortedStore> = match self.store_factory {
            Some(factory) => factory(&dir).map_err(DrumError::Store)?,
            None => Box::new(FlatFileStore::with_io_buffers(
                dir.join("store.db"),
                self.opts.read_buffer_bytes,
                self.opts.write_buffer_bytes,
            )),
        };

        let n = self.opts.num_buckets;
        let mut brokers = Vec::with_capacity(n);
        let mut disks = Vec::with_capacity(n);
        for bucket in 0..n {
            brokers.push(Arc::new(BucketBroker::new()));
            disks.push(Arc::new(Mutex::new(BucketDisk::open(&dir, bucket)?)));
        }

        // Dispatcher thread: decode on delivery; a value or aux that fails to
        // decode skips the callback and surfaces as a codec fault.
        let deliver = {
            let value_codec = Arc::clone(&value_codec);
            let aux_codec = Arc::clone(&aux_codec);
            let dispatcher = Arc::clone(&self.dispatcher);
            let listener = Arc::clone(&self.listener);
            Box::new(move |event: ResultEvent| {
                let ResultEvent { key, kind, value, aux } = event;
                let value = match value.map(|b| value_codec.from_bytes(&b)).transpose() {
                    Ok(v) => v,
                    Err(e) => {
                        listener.on_state(&StateEvent::Fault {
                            kind: FaultKind::Codec,
                            bucket: None,
                            detail: format!("value decode failed for key {key}: {e:#}"),
                        });
                        return;
                    }
                };
                let aux = match aux.map(|b| aux_codec.from_bytes(&b)).transpose() {
                    Ok(a) => a,
                    Err(e) => {
                        listener.on_state(&StateEvent::Fault {
                            kind: FaultKind::Codec,
                            bucket: None,
                            detail: format!("aux decode failed for key {key}: {e:#}"),
                        });
                        return;
                    }
                };
                dispatcher.on_result(DrumResult { key, kind, value, aux });
            }) as Box<dyn Fn(ResultEvent) + Send>
        };
        let (bus, bus_handle) =
            EventBus::start(self.opts.event_queue_capacity, Arc::clone(&self.listener), deliver);

        let merger = Arc::new(Merger::new());
        let merger_handle = Arc::clone(&merger).spawn(
            store,
            MergerCtx {
                disks: disks.clone(),
                merge_fn: self.merge_fn.clone(),
                bus: Arc::clone(&bus),
            },
        );

        let mut writer_handles = Vec::with_capacity(n);
        for bucket in 0..n {
            let ctx = WriterCtx {
                bucket,
                broker: Arc::clone(&brokers[bucket]),
                disk: Arc::clone(&disks[bucket]),
                merger: Arc::clone(&merger),
                bus: Arc::clone(&bus),
                threshold: self.opts.buffer_size,
            };
            writer_handles.push(
                std::thread::Builder::new()
                    .name(format!("drum-writer-{bucket}"))
                    .spawn(move || run_writer(ctx))
                    .expect("spawn writer thread"),
            );
        }

        tracing::info!(
            name = %self.name,
            buckets = n,
            threshold = self.opts.buffer_size,
            dir = %dir.display(),
            "drum engine started"
        );

        Ok(Drum {
            value_codec,
            aux_codec,
            append_enabled: self.merge_fn.is_some(),
            brokers,
            disks,
            merger,
            bus,
            disposed: RwLock::new(false),
            handles: Mutex::new(Some(Handles {
                writers: writer_handles,
                merger: merger_handle,
                bus: bus_handle,
            })),
            mask: (n - 1) as u64,
            dir,
        })
    }
}

struct Handles {
    writers: Vec<JoinHandle<()>>,
    merger: JoinHandle<()>,
    bus: JoinHandle<()>,
}

/// The engine facade.
///
/// All four submit operations are constant-time enqueues; results arrive on
/// the dispatcher. `V` is the caller's value type, `A` the auxiliary payload
/// (a URL-seen filter typically uses the URL itself as aux).
pub struct Drum<V, A> {
    value_codec: Arc<dyn ByteCodec<V>>,
    aux_codec: Arc<dyn ByteCodec<A>>,
    append_enabled: bool,
    brokers: Vec<Arc<BucketBroker>>,
    disks: Vec<Arc<Mutex<BucketDisk>>>,
    merger: Arc<Merger>,
    bus: Arc<EventBus>,
    // Read side taken by every enqueue; the write side is dispose's barrier
    // against in-flight submissions.
    disposed: RwLock<bool>,
    handles: Mutex<Option<Handles>>,
    mask: u64,
    dir: PathBuf,
}

impl<V, A> std::fmt::Debug for Drum<V, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drum").field("dir", &self.dir).finish()
    }
}

impl<V: 'static, A: 'static> Drum<V, A> {
    pub fn builder(name: impl Into<String>) -> DrumBuilder<V, A> {
        DrumBuilder::new(name)
    }

    /// Where this engine keeps its bucket files and default store.
    pub fn cache_dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Membership probe. Callback: `UniqueKey` or `DuplicateKey`.
    pub fn check(&self, key: u64, aux: Option<&A>) -> Result<()> {
        self.enqueue(OpKind::Check, key, None, aux)
    }

    /// Overwrite. Callback: `UniqueKeyUpdate` or `DuplicateKeyUpdate`, with
    /// the stored value echoed back.
    pub fn update(&self, key: u64, value: &V, aux: Option<&A>) -> Result<()> {
        self.enqueue(OpKind::Update, key, Some(value), aux)
    }

    /// Classify and overwrite in one operation, one callback.
    pub fn check_update(&self, key: u64, value: &V, aux: Option<&A>) -> Result<()> {
        self.enqueue(OpKind::CheckUpdate, key, Some(value), aux)
    }

    /// Fold into the existing value via the append codec. Requires
    /// [`DrumBuilder::value_append_codec`].
    pub fn append_update(&self, key: u64, value: &V, aux: Option<&A>) -> Result<()> {
        if !self.append_enabled {
            return Err(DrumError::ConfigInvalid(
                "append_update requires value_append_codec".into(),
            ));
        }
        self.enqueue(OpKind::AppendUpdate, key, Some(value), aux)
    }

    fn enqueue(&self, op: OpKind, key: u64, value: Option<&V>, aux: Option<&A>) -> Result<()> {
        let value = value
            .map(|v| self.value_codec.to_bytes(v))
            .transpose()
            .map_err(DrumError::Codec)?;
        let aux = aux
            .map(|a| self.aux_codec.to_bytes(a))
            .transpose()
            .map_err(DrumError::Codec)?;

        let gate = self.disposed.read();
        if *gate {
            return Err(DrumError::ShuttingDown);
        }
        let bucket = (key & self.mask) as usize;
        let stats = self.brokers[bucket].append(InMemoryEntry::new(op, key, value, aux));
        self.bus.publish_state(StateEvent::Buffer {
            bucket,
            entries: stats.entries,
            key_bytes: stats.key_bytes,
            val_bytes: stats.val_bytes,
            aux_bytes: stats.aux_bytes,
        });
        Ok(())
    }

    /// Non-blocking nudge: ask the merger for a pass over whatever the
    /// writers have already spilled, without draining buffers or waiting.
    pub fn request_merge(&self) -> Result<()> {
        let gate = self.disposed.read();
        if *gate {
            return Err(DrumError::ShuttingDown);
        }
        self.merger.request_merge();
        Ok(())
    }

    /// Force every bucket to disk, run one merge pass, and wait until the
    /// callbacks for it have been delivered.
    pub fn synchronize(&self) -> Result<()> {
        {
            let gate = self.disposed.read();
            if *gate {
                return Err(DrumError::ShuttingDown);
            }
            for (bucket, broker) in self.brokers.iter().enumerate() {
                // Same discipline as the writer: drain only while holding the
                // disk lock, so a racing writer cannot spill a later entry
                // ahead of one already pulled from the broker.
                let mut disk = self.disks[bucket].lock();
                let buffer = broker.take_now();
                if buffer.is_empty() {
                    continue;
                }
                disk.feed(&buffer.queue)?;
            }
        }
        self.merger.do_merge();
        self.bus.flush();
        Ok(())
    }

}

impl<V, A> Drum<V, A> {
    /// Ordered shutdown: refuse new intake, let every writer finish its final
    /// drain, run a final merge for anything still on disk, then stop the
    /// merger and the dispatcher. Idempotent.
    pub fn dispose(&self) -> Result<()> {
        {
            let mut gate = self.disposed.write();
            if *gate {
                return Ok(());
            }
            *gate = true;
        }
        let Some(handles) = self.handles.lock().take() else { return Ok(()) };

        for broker in &self.brokers {
            broker.shutdown();
        }
        for handle in handles.writers {
            let _ = handle.join();
        }
        // Writers with spilled data already forced a merge on their way out;
        // this covers buckets whose writer died on an error path.
        if self.disks.iter().any(|d| d.lock().kv_bytes_written > 0) {
            self.merger.do_merge();
        }
        self.merger.shutdown();
        let _ = handles.merger.join();

        self.bus.flush();
        self.bus.close();
        let _ = handles.bus.join();
        tracing::info!("drum engine disposed");
        Ok(())
    }
}

impl<V, A> Drop for Drum<V, A> {
    fn drop(&mut self) {
        // Safety net for callers that skip dispose().
        let _ = self.dispose();
    }
}
