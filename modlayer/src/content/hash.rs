//! Content hashing.
//!
//! Every blob is identified by the BLAKE3 digest of its raw (decompressed)
//! bytes, encoded as unpadded base64url. The encoded form is used directly as
//! the filename stem inside a mod's `files/` directory.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

/// Length of an encoded content hash (32 digest bytes, unpadded base64).
pub const HASH_LEN: usize = 43;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Encode a finished digest into its filename form.
pub fn encode_digest(digest: &blake3::Hash) -> String {
    URL_SAFE_NO_PAD.encode(digest.as_bytes())
}

/// Hash an in-memory buffer.
///
/// # Examples
///
/// ```
/// use modlayer::content::hash_bytes;
///
/// let hash = hash_bytes(b"hello");
/// assert_eq!(hash.len(), 43);
/// assert!(!hash.contains('='));
/// ```
pub fn hash_bytes(data: &[u8]) -> String {
    encode_digest(&blake3::hash(data))
}

/// Hash a file on disk by streaming it through the hasher.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(encode_digest(&hasher.finalize()))
}

/// Whether `hash` has the exact shape of an encoded content hash.
///
/// Hashes come from the network and end up in filesystem paths, so anything
/// outside the base64url alphabet is refused before it reaches a path join.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_LEN
        && hash
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// A writer that hashes everything passing through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            written: 0,
        }
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Consume the writer, returning the inner writer, the encoded hash and
    /// the number of bytes written.
    pub fn finish(self) -> (W, String, u64) {
        let hash = encode_digest(&self.hasher.finalize());
        (self.inner, hash, self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
