/// One delimited record.
///
/// The store owns an `Entry` from `add` until it is evicted (ownership goes
/// back to the caller of `add`) or the store is cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    data: Box<[u8]>,
}

impl Entry {
    #[must_use]
    pub fn new(data: impl Into<Box<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Logical length as a stream offset.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_bytes(self) -> Box<[u8]> {
        self.data
    }
}

impl From<Vec<u8>> for Entry {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for Entry {
    fn from(data: &[u8]) -> Self {
        Self::new(data)
    }
}

impl From<&str> for Entry {
    fn from(data: &str) -> Self {
        Self::new(data.as_bytes())
    }
}
