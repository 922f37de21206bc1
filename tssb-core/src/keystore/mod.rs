//! Opaque key→sign/verify store.
//!
//! The keystore is the only thing in the process that ever sees a secret
//! seed. Everything else — packets, the repository, the node — holds a
//! feed ID and asks the keystore to sign or verify on its behalf.

use std::collections::HashMap;

use thiserror::Error;

use crate::crypto::{Ed25519Signer, Ed25519Verifier, Signer, Verifier};
use crate::memory::SecretBytes;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeystoreError {
    #[error("no secret key registered for this feed id")]
    UnknownKey,
}

struct Entry {
    secret: SecretBytes,
    name: String,
}

/// Process-wide map from feed ID (public key) to secret key + label.
///
/// `KeyStore` owns secret material exclusively; nothing downstream ever
/// gets a borrow of the raw seed, only the ability to sign through it.
#[derive(Default)]
pub struct KeyStore {
    kv: HashMap<[u8; 32], Entry>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh Ed25519 keypair, register it under `name`, and
    /// return its feed ID (the public key).
    pub fn generate(&mut self, name: impl Into<String>) -> [u8; 32] {
        use ed25519_dalek::SigningKey;
        use rand_core::OsRng;

        let sk = SigningKey::generate(&mut OsRng);
        let pk = sk.verifying_key().to_bytes();
        self.add(sk.to_bytes(), pk, name);
        pk
    }

    pub fn add(&mut self, sk: [u8; 32], pk: [u8; 32], name: impl Into<String>) {
        self.kv.insert(
            pk,
            Entry {
                secret: SecretBytes::new(sk),
                name: name.into(),
            },
        );
    }

    pub fn remove(&mut self, pk: &[u8; 32]) {
        self.kv.remove(pk);
    }

    pub fn contains(&self, pk: &[u8; 32]) -> bool {
        self.kv.contains_key(pk)
    }

    pub fn name_of(&self, pk: &[u8; 32]) -> Option<&str> {
        self.kv.get(pk).map(|e| e.name.as_str())
    }

    pub fn sign(&self, pk: &[u8; 32], msg: &[u8]) -> Result<[u8; 64], KeystoreError> {
        let entry = self.kv.get(pk).ok_or(KeystoreError::UnknownKey)?;
        Ok(Ed25519Signer::from_seed(entry.secret.borrow()).sign(msg))
    }

    /// A standalone signer closure, useful where an API wants `impl Fn(&[u8]) -> [u8; 64]`
    /// rather than a keystore + key pair (mirrors the original's `get_signFct`).
    pub fn signer_for(&self, pk: &[u8; 32]) -> Result<Ed25519Signer, KeystoreError> {
        let entry = self.kv.get(pk).ok_or(KeystoreError::UnknownKey)?;
        Ok(Ed25519Signer::from_seed(entry.secret.borrow()))
    }

    pub fn verify(&self, pk: &[u8; 32], sig: &[u8; 64], msg: &[u8]) -> bool {
        Ed25519Verifier.verify(pk, sig, msg)
    }

    /// Serializable snapshot: `hex(pk) -> {sk, name}`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (pk, entry) in &self.kv {
            out.insert(
                hex::encode(pk),
                serde_json::json!({
                    "sk": hex::encode(entry.secret.borrow()),
                    "name": entry.name,
                }),
            );
        }
        serde_json::Value::Object(out)
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut ks = Self::new();
        let Some(obj) = value.as_object() else {
            return ks;
        };
        for (pk_hex, rec) in obj {
            let (Some(pk), Some(sk), Some(name)) = (
                decode_32(pk_hex),
                rec.get("sk").and_then(|v| v.as_str()).and_then(decode_32),
                rec.get("name").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            ks.add(sk, pk, name);
        }
        ks
    }
}

fn decode_32(s: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_sign_verify_roundtrip() {
        let mut ks = KeyStore::new();
        let fid = ks.generate("alice");
        let sig = ks.sign(&fid, b"hello").unwrap();
        assert!(ks.verify(&fid, &sig, b"hello"));
        assert!(!ks.verify(&fid, &sig, b"goodbye"));
    }

    #[test]
    fn unknown_key_errors() {
        let ks = KeyStore::new();
        let fid = [0u8; 32];
        assert_eq!(ks.sign(&fid, b"x"), Err(KeystoreError::UnknownKey));
    }

    #[test]
    fn json_roundtrip_preserves_signing_capability() {
        let mut ks = KeyStore::new();
        let fid = ks.generate("bob");
        let dumped = ks.to_json();

        let ks2 = KeyStore::from_json(&dumped);
        let sig = ks2.sign(&fid, b"payload").unwrap();
        assert!(ks2.verify(&fid, &sig, b"payload"));
        assert_eq!(ks2.name_of(&fid), Some("bob"));
    }
}
