use thiserror::Error;

/// Errors returned synchronously from the engine facade.
///
/// Worker-side failures (writer I/O, merge-time codec or store trouble) are
/// never surfaced here; they arrive as [`StateEvent::Fault`] on the listener.
///
/// [`StateEvent::Fault`]: crate::StateEvent::Fault
#[derive(Debug, Error)]
pub enum DrumError {
    /// Rejected at construction: bad bucket count, threshold, or capability.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A file or directory operation failed on the caller's path.
    #[error("i/o failure")]
    Io(#[from] std::io::Error),

    /// A value or aux codec failed while encoding on the caller thread.
    #[error("codec failure")]
    Codec(#[source] anyhow::Error),

    /// The backing sorted store reported a failure.
    #[error("store failure")]
    Store(#[source] anyhow::Error),

    /// The operation was submitted after `dispose()`.
    #[error("engine is shutting down")]
    ShuttingDown,
}

impl DrumError {
    /// Returns `true` if the engine refused the operation but remains usable.
    #[inline]
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::ConfigInvalid(_))
    }
}

pub type Result<T> = std::result::Result<T, DrumError>;
