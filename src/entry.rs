/// The four operations a caller can submit.
///
/// The discriminants are the one-byte tags written to the bucket kv files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpKind {
    /// Membership probe; classified UNIQUE or DUPLICATE at merge time.
    Check = b'C',
    /// Unconditional overwrite of the stored value.
    Update = b'U',
    /// Both: classify and overwrite in one operation, one callback.
    CheckUpdate = b'B',
    /// Overwrite, folding into the existing value via the append codec.
    AppendUpdate = b'A',
}

impl OpKind {
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'C' => Some(Self::Check),
            b'U' => Some(Self::Update),
            b'B' => Some(Self::CheckUpdate),
            b'A' => Some(Self::AppendUpdate),
            _ => None,
        }
    }

    /// True for operations that carry a value into the store.
    #[inline]
    pub fn writes_value(self) -> bool {
        !matches!(self, Self::Check)
    }
}

/// Merge-time verdict for a key: was it present in the store before the
/// operation was applied?
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Classification {
    #[default]
    Unknown,
    Unique,
    Duplicate,
}

/// One buffered operation, from router acceptance until dispatch.
///
/// `position` is the entry's index within the broker snapshot that produced
/// it; it resets on every flip and is only meaningful inside one snapshot.
/// The merger derives its own stable tie-breaker from file order.
#[derive(Clone, Debug)]
pub struct InMemoryEntry {
    pub op: OpKind,
    pub key: u64,
    pub value: Option<Vec<u8>>,
    pub aux: Option<Vec<u8>>,
    pub position: u32,
    pub classification: Classification,
}

impl InMemoryEntry {
    pub fn new(op: OpKind, key: u64, value: Option<Vec<u8>>, aux: Option<Vec<u8>>) -> Self {
        Self { op, key, value, aux, position: 0, classification: Classification::Unknown }
    }

    #[inline]
    pub fn value_len(&self) -> u64 {
        self.value.as_ref().map_or(0, |v| v.len() as u64)
    }

    #[inline]
    pub fn aux_len(&self) -> u64 {
        self.aux.as_ref().map_or(0, |a| a.len() as u64)
    }
}
