//! Zeroizing container for a single Ed25519 signing seed.

use core::fmt;
use zeroize::Zeroize;

/// Owns a 32-byte secret and wipes it on drop.
///
/// Not `Clone`/`Copy` and not `Debug` (the redacted impl below is the only
/// one) so a seed can't silently leak into a log line or a derived struct.
#[must_use = "a secret dropped without use is almost certainly a bug"]
pub struct SecretBytes {
    inner: [u8; 32],
}

impl SecretBytes {
    pub fn new(inner: [u8; 32]) -> Self {
        Self { inner }
    }

    pub fn borrow(&self) -> &[u8; 32] {
        &self.inner
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBytes(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_the_seed() {
        let s = SecretBytes::new([0xAA; 32]);
        assert_eq!(format!("{s:?}"), "SecretBytes(..)");
    }
}
