//! Default signature primitive: Ed25519.

use super::{Signer, Verifier};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};

/// Signs with one feed's secret key. Built fresh from the seed on every
/// call site that needs it rather than cached, since [`crate::memory::SecretBytes`]
/// deliberately doesn't hand out the seed bytes for longer than that.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signing_key.sign(msg).to_bytes()
    }
}

/// Stateless verifier — holds no key, takes the public key per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn verify(&self, pk: &[u8; 32], sig: &[u8; 64], msg: &[u8]) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(pk) else {
            return false;
        };
        let sig = Signature::from_bytes(sig);
        vk.verify(msg, &sig).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    #[test]
    fn sign_then_verify_roundtrips() {
        let sk = SigningKey::generate(&mut OsRng);
        let seed = sk.to_bytes();
        let pk = sk.verifying_key().to_bytes();

        let signer = Ed25519Signer::from_seed(&seed);
        let sig = signer.sign(b"hello tinyssb");

        assert!(Ed25519Verifier.verify(&pk, &sig, b"hello tinyssb"));
        assert!(!Ed25519Verifier.verify(&pk, &sig, b"tampered"));
    }
}
