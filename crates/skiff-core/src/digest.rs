//! Content digests for skiff.
//!
//! One function covers every integrity check in the protocol: the
//! whole-file checksum announced in SendReq, the per-chunk checksum echoed
//! in FilePktAck, and the recomputed whole-file checksum in EOFPkt.
//!
//! BLAKE3 in extended-output mode, truncated to [`DIGEST_LEN`] bytes.
//! Integrity only; nothing here authenticates a peer.

/// Digest size in bytes. Fixed by the wire format.
pub const DIGEST_LEN: usize = 16;

/// A 16-byte content digest.
pub type Digest = [u8; DIGEST_LEN];

/// Digest a byte slice.
pub fn digest(data: &[u8]) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Incremental digest for data that is held in pieces.
///
/// # Example
/// ```
/// use skiff_core::digest::{digest, Hasher};
/// let mut h = Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// assert_eq!(h.finalize(), digest(b"hello world"));
/// ```
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Digest {
        let mut out = [0u8; DIGEST_LEN];
        self.0.finalize_xof().fill(&mut out);
        out
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compare a received checksum field against a locally computed digest.
/// Checksums of the wrong length never match.
pub fn matches(received: &[u8], expected: &Digest) -> bool {
    received == expected.as_slice()
}
