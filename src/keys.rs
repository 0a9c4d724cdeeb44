use ahash::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

// Fixed seeds so keys are stable across runs and hosts. Changing them
// invalidates every store built with the old ones.
fn key_state() -> RandomState {
    RandomState::with_seeds(
        0x6472_756d_6b65_7931,
        0x9e37_79b9_7f4a_7c15,
        0xc2b2_ae3d_27d4_eb4f,
        0x1656_6791_9e37_79f9,
    )
}

/// Derives the engine's 64-bit key from an arbitrary payload.
///
/// The canonical caller is a URL-seen filter: hash the normalized URL once,
/// submit `check`/`update` against the resulting key, and keep the URL itself
/// in the aux payload. Deterministic across processes.
pub fn key_for_bytes(payload: impl AsRef<[u8]>) -> u64 {
    let mut h = key_state().build_hasher();
    payload.as_ref().hash(&mut h);
    h.finish()
}

/// Convenience wrapper for string payloads (URLs, canonical names).
#[inline]
pub fn key_for_str(payload: &str) -> u64 {
    key_for_bytes(payload.as_bytes())
}
