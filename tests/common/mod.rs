use drum::{
    AppendCodec, ByteCodec, DrumResult, ResultDispatcher, StateEvent, StateListener,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Dispatcher that records every callback, in delivery order.
#[derive(Clone, Default)]
pub struct Results<V, A>(pub Arc<Mutex<Vec<DrumResult<V, A>>>>);

impl<V, A> Results<V, A> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl<V: Clone, A: Clone> Results<V, A> {
    pub fn snapshot(&self) -> Vec<DrumResult<V, A>> {
        self.0.lock().unwrap().clone()
    }
}

impl<V: Send, A: Send> ResultDispatcher<V, A> for Results<V, A> {
    fn on_result(&self, result: DrumResult<V, A>) {
        self.0.lock().unwrap().push(result);
    }
}

/// Listener that records every state event, in delivery order.
#[derive(Clone, Default)]
pub struct Events(pub Arc<Mutex<Vec<StateEvent>>>);

impl Events {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn snapshot(&self) -> Vec<StateEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl StateListener for Events {
    fn on_state(&self, event: &StateEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

/// Sorted set of u64 as concatenated big-endian words; appending unions.
/// The aggregation workload from the crawler: key -> set of referrers.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetCodec;

impl ByteCodec<BTreeSet<u64>> for SetCodec {
    fn to_bytes(&self, value: &BTreeSet<u64>) -> anyhow::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(value.len() * 8);
        for k in value {
            out.extend_from_slice(&k.to_be_bytes());
        }
        Ok(out)
    }

    fn from_bytes(&self, bytes: &[u8]) -> anyhow::Result<BTreeSet<u64>> {
        anyhow::ensure!(bytes.len() % 8 == 0, "set payload not a multiple of 8");
        Ok(bytes
            .chunks_exact(8)
            .map(|c| u64::from_be_bytes(c.try_into().unwrap()))
            .collect())
    }
}

impl AppendCodec<BTreeSet<u64>> for SetCodec {
    fn merge(&self, mut existing: BTreeSet<u64>, incoming: BTreeSet<u64>) -> anyhow::Result<BTreeSet<u64>> {
        existing.extend(incoming);
        Ok(existing)
    }
}

pub fn set_of(keys: &[u64]) -> BTreeSet<u64> {
    keys.iter().copied().collect()
}
