//! Signature primitive boundary.
//!
//! Out of scope per the engine's own design: packet signing/verification
//! calls only the two traits below, never `ed25519_dalek` directly, so the
//! concrete primitive stays swappable (the spec explicitly leaves it
//! unspecified — Ed25519 here is the one default, not a hard requirement).

mod ed25519;

pub use ed25519::{Ed25519Signer, Ed25519Verifier};

/// Anything that can sign a message with a single feed's secret key.
pub trait Signer {
    fn sign(&self, msg: &[u8]) -> [u8; 64];
}

/// Anything that can verify a signature against a 32-byte public key.
///
/// `Send + Sync` because the repository and node share one verifier across
/// worker threads (see the single-lock contract in the node's design).
pub trait Verifier: Send + Sync {
    fn verify(&self, pk: &[u8; 32], sig: &[u8; 64], msg: &[u8]) -> bool;
}
