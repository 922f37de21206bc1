//! Non-secret hashing. Hash outputs here are content identifiers, not
//! secrets: they may be logged, compared, or stored directly on disk.

use sha2::{Digest, Sha256};

/// Full 32-byte SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    buf
}

/// First `N` bytes of SHA-256(data). `N` is a const generic so callers get
/// a fixed-size array back instead of a slice they have to re-validate.
pub fn sha256_prefix<const N: usize>(data: &[u8]) -> [u8; N] {
    assert!(N <= 32, "sha256 digest is only 32 bytes long");
    let full = sha256(data);
    let mut out = [0u8; N];
    out.copy_from_slice(&full[..N]);
    out
}
