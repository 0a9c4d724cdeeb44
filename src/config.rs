use std::path::{Path, PathBuf};

/// Construction-time knobs with sensible defaults and builder chaining.
///
/// `num_buckets` and `buffer_size` must both be powers of two; that is
/// checked when the engine is built, not here.
#[derive(Clone, Debug)]
pub struct DrumOptions {
    pub num_buckets: usize,      // partitioning fan-out (one broker/writer/file pair each)
    pub buffer_size: u64,        // per-bucket file byte threshold triggering a merge
    pub base_dir: PathBuf,       // bucket files land under <base_dir>/cache/<name>/
    pub event_queue_capacity: usize, // bounded dispatcher queue

    // IO tuning
    pub read_buffer_bytes: usize,  // BufReader capacity (merge + store reads)
    pub write_buffer_bytes: usize, // BufWriter capacity (store rewrites)
}

impl Default for DrumOptions {
    fn default() -> Self {
        // Defaults mirror the classic crawler deployment: wide fan-out,
        // 64 KiB spill threshold per bucket.
        Self {
            num_buckets: 512,
            buffer_size: 64 * 1024,
            base_dir: PathBuf::from("."),
            event_queue_capacity: 1024,
            read_buffer_bytes: 256 * 1024,
            write_buffer_bytes: 256 * 1024,
        }
    }
}

impl DrumOptions {
    pub fn with_num_buckets(mut self, n: usize) -> Self {
        self.num_buckets = n.max(1);
        self
    }
    pub fn with_buffer_size(mut self, bytes: u64) -> Self {
        self.buffer_size = bytes.max(1);
        self
    }
    pub fn with_base_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.base_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_event_queue_capacity(mut self, cap: usize) -> Self {
        self.event_queue_capacity = cap.max(16);
        self
    }
    pub fn with_io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self {
        self.read_buffer_bytes = read_bytes.max(8 * 1024);
        self.write_buffer_bytes = write_bytes.max(8 * 1024);
        self
    }

    /// The directory holding one bucket file pair per bucket plus the default
    /// store, namespaced by engine name.
    pub fn cache_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join("cache").join(name)
    }
}
