//! DRUM: disk repository with update management.
//!
//! A high-throughput key/value update engine for workloads that issue far
//! more updates than the backing store can absorb as random I/O (the classic
//! case is the URL-seen test of a web crawler). Operations are bucketed in
//! memory, spilled to per-bucket scratch files, and reconciled with a sorted
//! backing store in single-pass merges; per-operation results (unique vs.
//! duplicate, merged values) come back out-of-band on a dispatcher.
//!
//! ```no_run
//! use drum::{Drum, DrumResult, ResultDispatcher, Utf8Codec};
//!
//! struct Print;
//! impl ResultDispatcher<String, String> for Print {
//!     fn on_result(&self, r: DrumResult<String, String>) {
//!         println!("{:?} key={}", r.kind, r.key);
//!     }
//! }
//!
//! # fn main() -> Result<(), drum::DrumError> {
//! let drum = Drum::builder("url-seen")
//!     .num_buckets(16)
//!     .value_codec(Utf8Codec)
//!     .aux_codec(Utf8Codec)
//!     .dispatcher(Print)
//!     .build()?;
//!
//! let url = "https://example.com/";
//! drum.check_update(drum::key_for_str(url), &String::new(), Some(&url.to_string()))?;
//! drum.synchronize()?;
//! drum.dispose()?;
//! # Ok(())
//! # }
//! ```

mod broker;
mod bucket_file;
mod codec;
mod config;
mod drum;
mod entry;
mod error;
mod events;
mod keys;
mod merger;
mod store;
mod util;
mod writer;

pub use crate::config::DrumOptions;
pub use crate::drum::{Drum, DrumBuilder};
pub use crate::error::{DrumError, Result};

// Operations and results.
pub use crate::entry::{Classification, InMemoryEntry, OpKind};
pub use crate::events::{
    DrumResult, FaultKind, MergerState, NoopDispatcher, NoopListener, ResultDispatcher,
    ResultKind, StateEvent, StateListener, WriterState,
};

// Codec plugin surface.
pub use crate::codec::{AppendCodec, ByteCodec, JsonCodec, RawBytesCodec, Utf8Codec};

// Sorted-store plugin surface and bundled backends.
pub use crate::store::{FlatFileStore, MemoryStore, Resolution, SortedStore, StoreFactory};

// Key derivation for callers hashing URLs or other payloads.
pub use crate::keys::{key_for_bytes, key_for_str};

// Engine internals exposed for embedders and tests: the lock-free broker and
// the bucket file pair with its record codecs.
pub use crate::broker::{BucketBroker, BucketBuffer, BufferStats};
pub use crate::bucket_file::{
    decode_aux_records, decode_kv_records, encode_aux_record, encode_kv_record, BucketDisk,
    KvRecord,
};

// Robust file ops shared with embedders.
pub use crate::util::{create_with_backoff, open_with_backoff, replace_file_atomic};
