use crate::util::{create_with_backoff, open_with_backoff, replace_file_atomic};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Resolver verdict for one key during a bulk merge.
pub enum Resolution {
    /// Store this value for the key (insert or overwrite).
    Put(Vec<u8>),
    /// Leave the key untouched (absent keys stay absent).
    Keep,
}

/// The backing map `key: u64 -> value bytes`.
///
/// `merge` is the engine's hot path: `keys` arrive strictly ascending and
/// deduplicated, and the resolver is invoked exactly once per key with the
/// currently stored value. Implementations walk their own keys in the same
/// ascending order, so one merge is one sequential pass. The merger owns the
/// store exclusively; `get`/`put` exist for standalone use and tests.
pub trait SortedStore: Send {
    fn get(&mut self, key: u64) -> Result<Option<Vec<u8>>>;
    fn put(&mut self, key: u64, value: &[u8]) -> Result<()>;
    fn merge(
        &mut self,
        keys: &[u64],
        resolve: &mut dyn FnMut(u64, Option<&[u8]>) -> Resolution,
    ) -> Result<()>;
}

/// Builds the backing store once the engine's cache directory exists.
pub type StoreFactory = Box<dyn FnOnce(&Path) -> Result<Box<dyn SortedStore>> + Send>;

// --------- default backend: sorted flat file ---------

// record framing: [key:8 BE][len:4 BE][bytes], keys strictly ascending.

/// The default backing store: a single sorted flat file.
///
/// A merge streams the current file against the ascending input keys into a
/// temp file that is promoted atomically, so an interrupted merge leaves the
/// previous generation intact. `get` is a sequential scan with sorted early
/// exit; workloads that need faster point reads should plug in their own
/// store.
pub struct FlatFileStore {
    path: PathBuf,
    read_buffer_bytes: usize,
    write_buffer_bytes: usize,
}

impl FlatFileStore {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::with_io_buffers(path, 256 * 1024, 256 * 1024)
    }

    pub fn with_io_buffers(
        path: impl AsRef<Path>,
        read_buffer_bytes: usize,
        write_buffer_bytes: usize,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            read_buffer_bytes: read_buffer_bytes.max(8 * 1024),
            write_buffer_bytes: write_buffer_bytes.max(8 * 1024),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> Result<Option<RecordReader>> {
        match open_with_backoff(&self.path, 16, 50) {
            Ok(f) => Ok(Some(RecordReader {
                inner: BufReader::with_capacity(self.read_buffer_bytes, f),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("open {}", self.path.display())),
        }
    }
}

struct RecordReader {
    inner: BufReader<File>,
}

impl RecordReader {
    fn next(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        let mut header = [0u8; 12];
        match self.inner.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("read store record header"),
        }
        let key = u64::from_be_bytes(header[0..8].try_into().unwrap());
        let len = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;
        let mut value = vec![0u8; len];
        self.inner.read_exact(&mut value).context("read store record value")?;
        Ok(Some((key, value)))
    }
}

fn write_record(out: &mut BufWriter<File>, key: u64, value: &[u8]) -> io::Result<()> {
    out.write_all(&key.to_be_bytes())?;
    out.write_all(&(value.len() as u32).to_be_bytes())?;
    out.write_all(value)
}

impl SortedStore for FlatFileStore {
    fn get(&mut self, key: u64) -> Result<Option<Vec<u8>>> {
        let Some(mut reader) = self.reader()? else { return Ok(None) };
        while let Some((k, v)) = reader.next()? {
            if k == key {
                return Ok(Some(v));
            }
            if k > key {
                break;
            }
        }
        Ok(None)
    }

    fn put(&mut self, key: u64, value: &[u8]) -> Result<()> {
        self.merge(&[key], &mut |_, _| Resolution::Put(value.to_vec()))
    }

    fn merge(
        &mut self,
        keys: &[u64],
        resolve: &mut dyn FnMut(u64, Option<&[u8]>) -> Resolution,
    ) -> Result<()> {
        debug_assert!(keys.windows(2).all(|w| w[0] < w[1]), "merge keys must ascend");

        let tmp = self.path.with_extension("db.inprogress");
        let out_file = create_with_backoff(&tmp, 16, 50)
            .with_context(|| format!("create {}", tmp.display()))?;
        let mut out = BufWriter::with_capacity(self.write_buffer_bytes, out_file);

        let mut reader = self.reader()?;
        let mut pending = match reader.as_mut() {
            Some(r) => r.next()?,
            None => None,
        };

        for &key in keys {
            // Copy through everything the store holds below this key.
            while let Some((k, v)) = pending.take() {
                if k < key {
                    write_record(&mut out, k, &v)?;
                    pending = reader.as_mut().unwrap().next()?;
                } else {
                    pending = Some((k, v));
                    break;
                }
            }
            let old = match &pending {
                Some((k, v)) if *k == key => Some(v.as_slice()),
                _ => None,
            };
            match resolve(key, old) {
                Resolution::Put(value) => write_record(&mut out, key, &value)?,
                Resolution::Keep => {
                    if let Some(v) = old {
                        write_record(&mut out, key, v)?;
                    }
                }
            }
            if old.is_some() {
                pending = reader.as_mut().unwrap().next()?;
            }
        }

        // Tail of the store above the last input key.
        while let Some((k, v)) = pending.take() {
            write_record(&mut out, k, &v)?;
            pending = reader.as_mut().unwrap().next()?;
        }

        out.flush().context("flush store merge output")?;
        drop(out);
        drop(reader);
        replace_file_atomic(&tmp, &self.path)
            .with_context(|| format!("promote {}", self.path.display()))?;
        Ok(())
    }
}

// --------- test/ephemeral backend ---------

/// In-memory store over a `BTreeMap`. Nothing survives the process; useful
/// for tests and short-lived dedup sets.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: BTreeMap<u64, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl SortedStore for MemoryStore {
    fn get(&mut self, key: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(&key).cloned())
    }

    fn put(&mut self, key: u64, value: &[u8]) -> Result<()> {
        self.map.insert(key, value.to_vec());
        Ok(())
    }

    fn merge(
        &mut self,
        keys: &[u64],
        resolve: &mut dyn FnMut(u64, Option<&[u8]>) -> Resolution,
    ) -> Result<()> {
        debug_assert!(keys.windows(2).all(|w| w[0] < w[1]), "merge keys must ascend");
        for &key in keys {
            let verdict = resolve(key, self.map.get(&key).map(|v| v.as_slice()));
            if let Resolution::Put(value) = verdict {
                self.map.insert(key, value);
            }
        }
        Ok(())
    }
}
