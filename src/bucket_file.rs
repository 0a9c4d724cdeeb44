use crate::entry::{InMemoryEntry, OpKind};
use crate::util::open_rw_with_backoff;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

// kv record: [op:1][key:8 BE][vlen:4 BE][value]
// aux record: [alen:4 BE][aux]
// The two files are position-parallel: record n in kv pairs with record n in
// aux. No header, no checksum; these are scratch files.
pub const KV_HEADER_BYTES: u64 = 1 + 8 + 4;
pub const AUX_HEADER_BYTES: u64 = 4;

pub fn encode_kv_record(out: &mut Vec<u8>, op: OpKind, key: u64, value: Option<&[u8]>) {
    let value = value.unwrap_or(&[]);
    out.push(op.tag());
    out.extend_from_slice(&key.to_be_bytes());
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
}

pub fn encode_aux_record(out: &mut Vec<u8>, aux: Option<&[u8]>) {
    let aux = aux.unwrap_or(&[]);
    out.extend_from_slice(&(aux.len() as u32).to_be_bytes());
    out.extend_from_slice(aux);
}

/// One record read back from a bucket kv file. The record's index in the
/// file is the merger's stable position tie-breaker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvRecord {
    pub op: OpKind,
    pub key: u64,
    pub value: Vec<u8>,
}

fn corrupt(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("corrupt bucket file: {what}"))
}

pub fn decode_kv_records(bytes: &[u8]) -> io::Result<Vec<KvRecord>> {
    let mut records = Vec::new();
    let mut at = 0usize;
    while at < bytes.len() {
        if bytes.len() - at < KV_HEADER_BYTES as usize {
            return Err(corrupt("truncated kv header"));
        }
        let op = OpKind::from_tag(bytes[at]).ok_or_else(|| corrupt("unknown op tag"))?;
        let key = u64::from_be_bytes(bytes[at + 1..at + 9].try_into().unwrap());
        let vlen = u32::from_be_bytes(bytes[at + 9..at + 13].try_into().unwrap()) as usize;
        at += KV_HEADER_BYTES as usize;
        if bytes.len() - at < vlen {
            return Err(corrupt("truncated kv value"));
        }
        records.push(KvRecord { op, key, value: bytes[at..at + vlen].to_vec() });
        at += vlen;
    }
    Ok(records)
}

/// Zero-length aux decodes as absent; the format does not distinguish.
pub fn decode_aux_records(bytes: &[u8]) -> io::Result<Vec<Option<Vec<u8>>>> {
    let mut records = Vec::new();
    let mut at = 0usize;
    while at < bytes.len() {
        if bytes.len() - at < AUX_HEADER_BYTES as usize {
            return Err(corrupt("truncated aux header"));
        }
        let alen = u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
        at += AUX_HEADER_BYTES as usize;
        if bytes.len() - at < alen {
            return Err(corrupt("truncated aux payload"));
        }
        records.push(if alen == 0 { None } else { Some(bytes[at..at + alen].to_vec()) });
        at += alen;
    }
    Ok(records)
}

/// One bucket's append-only file pair plus cumulative byte counters.
///
/// Counter invariant: `kv_bytes_written` equals the sum of `13 + vlen` over
/// appended records, `aux_bytes_written` the sum of `4 + alen`; both snap to
/// zero on reset. Callers serialise access through the bucket's disk-file
/// lock; this type itself is single-threaded.
pub struct BucketDisk {
    bucket: usize,
    kv: File,
    aux: File,
    pub kv_bytes_written: u64,
    pub aux_bytes_written: u64,
}

impl BucketDisk {
    /// Open (and truncate) `bucket{i}.kv` / `bucket{i}.aux` under `dir`.
    /// Scratch semantics: leftovers from a previous process are discarded.
    pub fn open(dir: &Path, bucket: usize) -> io::Result<Self> {
        let kv = open_rw_with_backoff(&dir.join(format!("bucket{bucket}.kv")), 16, 50)?;
        let aux = open_rw_with_backoff(&dir.join(format!("bucket{bucket}.aux")), 16, 50)?;
        kv.set_len(0)?;
        aux.set_len(0)?;
        Ok(Self { bucket, kv, aux, kv_bytes_written: 0, aux_bytes_written: 0 })
    }

    #[inline]
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// Append a drained batch, kv and aux in lockstep.
    pub fn feed(&mut self, entries: &[InMemoryEntry]) -> io::Result<()> {
        let mut kv_buf = Vec::new();
        let mut aux_buf = Vec::new();
        for entry in entries {
            encode_kv_record(&mut kv_buf, entry.op, entry.key, entry.value.as_deref());
            encode_aux_record(&mut aux_buf, entry.aux.as_deref());
        }
        self.kv.seek(SeekFrom::End(0))?;
        self.kv.write_all(&kv_buf)?;
        self.aux.seek(SeekFrom::End(0))?;
        self.aux.write_all(&aux_buf)?;
        self.kv_bytes_written += kv_buf.len() as u64;
        self.aux_bytes_written += aux_buf.len() as u64;
        Ok(())
    }

    pub fn read_kv(&mut self) -> io::Result<Vec<KvRecord>> {
        let bytes = read_back(&mut self.kv, self.kv_bytes_written)?;
        decode_kv_records(&bytes)
    }

    pub fn read_aux(&mut self) -> io::Result<Vec<Option<Vec<u8>>>> {
        let bytes = read_back(&mut self.aux, self.aux_bytes_written)?;
        decode_aux_records(&bytes)
    }

    /// Rewind both files to offset zero and zero the counters.
    pub fn reset(&mut self) -> io::Result<()> {
        self.kv.seek(SeekFrom::Start(0))?;
        self.kv.set_len(0)?;
        self.aux.seek(SeekFrom::Start(0))?;
        self.aux.set_len(0)?;
        self.kv_bytes_written = 0;
        self.aux_bytes_written = 0;
        Ok(())
    }
}

fn read_back(file: &mut File, len: u64) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = vec![0u8; len as usize];
    file.read_exact(&mut bytes)?;
    Ok(bytes)
}
