use std::fmt;
use std::sync::Arc;

/// An immutable view over a segment of a shared byte buffer.
///
/// This is the unit of data handed between producers and consumers
/// everywhere in the import pipeline. Slices are cheap to clone and may
/// alias the same backing storage as other slices; the storage itself is
/// never mutated after a slice is created over it.
#[derive(Clone)]
pub struct DataSlice {
    buf: Arc<[u8]>,
    start: usize,
    len: usize,
}

impl DataSlice {
    /// Create a slice over `buf[start..start + len]`.
    ///
    /// Panics if the range falls outside the buffer.
    pub fn new(buf: Arc<[u8]>, start: usize, len: usize) -> Self {
        assert!(
            start + len <= buf.len(),
            "slice range {}..{} outside buffer of length {}",
            start,
            start + len,
            buf.len()
        );
        DataSlice { buf, start, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.len]
    }

    /// A sub-view of this slice; `start` and `len` are relative to this
    /// slice, not to the backing buffer.
    pub fn slice(&self, start: usize, len: usize) -> DataSlice {
        assert!(start + len <= self.len, "sub-slice outside parent slice");
        DataSlice {
            buf: self.buf.clone(),
            start: self.start + start,
            len,
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl From<Vec<u8>> for DataSlice {
    fn from(data: Vec<u8>) -> Self {
        let len = data.len();
        DataSlice {
            buf: data.into(),
            start: 0,
            len,
        }
    }
}

impl AsRef<[u8]> for DataSlice {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for DataSlice {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for DataSlice {}

impl fmt::Debug for DataSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSlice")
            .field("start", &self.start)
            .field("len", &self.len)
            .finish()
    }
}
