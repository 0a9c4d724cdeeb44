use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

static INIT_ONCE: std::sync::Once = std::sync::Once::new();

/// Install a tracing subscriber once, honoring `RUST_LOG`.
pub fn init_tracing_once() {
    INIT_ONCE.call_once(|| {
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
    });
}

/// Transient errors worth retrying: sharing/lock violations and access-denied
/// flaps from AV and backup filter drivers, mostly seen on Windows volumes.
fn is_retriable_io_error(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(5) | Some(32) | Some(33) | Some(1224))
}

fn with_backoff<T>(
    mut attempt: impl FnMut() -> io::Result<T>,
    tries: usize,
    delay_ms: u64,
) -> io::Result<T> {
    let mut last_err: Option<io::Error> = None;
    for i in 0..tries.max(1) {
        match attempt() {
            Ok(v) => return Ok(v),
            Err(e) if is_retriable_io_error(&e) => {
                last_err = Some(e);
                sleep(Duration::from_millis(delay_ms.saturating_mul((i + 1) as u64)));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::other("retries exhausted")))
}

/// Open a file read-only with retries for transient errors.
pub fn open_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> io::Result<File> {
    with_backoff(|| File::open(path), tries, delay_ms)
}

/// Create (truncate) a file with retries for transient errors.
pub fn create_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> io::Result<File> {
    with_backoff(|| File::create(path), tries, delay_ms)
}

/// Open a file for read+write, creating it if absent, with retries.
pub fn open_rw_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> io::Result<File> {
    with_backoff(
        || OpenOptions::new().read(true).write(true).create(true).open(path),
        tries,
        delay_ms,
    )
}

/// Remove a file with retries. Succeeds if the file does not exist.
pub fn remove_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> io::Result<()> {
    with_backoff(
        || match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
        tries,
        delay_ms,
    )
}

/// Atomically promote `tmp` over `dest`, falling back to copy+remove when the
/// rename is refused (sharing violation on the destination).
pub fn replace_file_atomic(tmp: &Path, dest: &Path) -> io::Result<()> {
    const TRIES: usize = 20;
    const DELAY_MS: u64 = 50;
    match with_backoff(|| fs::rename(tmp, dest), TRIES, DELAY_MS) {
        Ok(()) => Ok(()),
        Err(_) => {
            with_backoff(|| fs::copy(tmp, dest).map(|_| ()), TRIES, DELAY_MS)?;
            remove_with_backoff(tmp, TRIES, DELAY_MS)
        }
    }
}
