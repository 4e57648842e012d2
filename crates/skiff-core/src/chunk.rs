//! Chunking and reassembly.
//!
//! The sender splits the file into fixed-size chunks numbered from 0; the
//! receiver collects them into a [`ChunkBuffer`] sized from the chunk count
//! announced in SendReq, then concatenates them in index order.

use bytes::{Bytes, BytesMut};

use crate::digest::Hasher;

/// Default chunk size in bytes. Also the largest chunk a frame may carry,
/// since the receive buffer is sized for one header plus one chunk.
pub const CHUNK_SIZE: usize = 1024;

/// Number of chunks `len` bytes split into: `ceil(len / chunk_size)`.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size)
}

/// Split `data` into `chunk_size` pieces; the last piece may be shorter.
///
/// The pieces share `data`'s allocation. An empty input yields no chunks.
///
/// # Panics
/// Panics if `chunk_size` is zero.
pub fn split(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    assert!(chunk_size > 0, "chunk size must be non-zero");
    (0..chunk_count(data.len(), chunk_size))
        .map(|i| {
            let start = i * chunk_size;
            let end = (start + chunk_size).min(data.len());
            data.slice(start..end)
        })
        .collect()
}

/// Receive-side chunk slots, indexed by chunk number.
///
/// A slot is `None` until its chunk arrives. "Absent" and "present but
/// empty" are distinct. Writing a slot twice keeps the last write.
#[derive(Debug, Clone, Default)]
pub struct ChunkBuffer {
    slots: Vec<Option<Bytes>>,
}

impl ChunkBuffer {
    pub fn new(chunk_count: usize) -> Self {
        Self {
            slots: vec![None; chunk_count],
        }
    }

    /// Total number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Store `data` at `index`. Returns the chunk it replaced, if any.
    /// Returns `Err(data)` if `index` is outside the buffer.
    pub fn insert(&mut self, index: usize, data: Bytes) -> Result<Option<Bytes>, Bytes> {
        match self.slots.get_mut(index) {
            Some(slot) => Ok(slot.replace(data)),
            None => Err(data),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Number of slots holding a chunk.
    pub fn received(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Indexes of slots still waiting for a chunk.
    pub fn missing(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
    }

    /// Concatenate the present chunks in index order.
    ///
    /// Absent slots contribute nothing; a caller that needs the complete
    /// file verifies the result against the announced digest.
    pub fn assemble(&self) -> Bytes {
        let total = self.slots.iter().flatten().map(Bytes::len).sum();
        let mut file = BytesMut::with_capacity(total);
        for chunk in self.slots.iter().flatten() {
            file.extend_from_slice(chunk);
        }
        file.freeze()
    }

    /// Digest of [`assemble`](Self::assemble) without building the file.
    pub fn digest(&self) -> crate::digest::Digest {
        let mut hasher = Hasher::new();
        for chunk in self.slots.iter().flatten() {
            hasher.update(chunk);
        }
        hasher.finalize()
    }
}
