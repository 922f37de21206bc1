//! The 120-byte signed wire record and its demultiplexing coordinates.

mod sidechain;
mod types;

pub use sidechain::{Blob, BLOB_LEN};
pub use types::PacketType;

use crate::crypto::{Signer, Verifier};
use crate::integrity::{dmx, sha256_prefix};

pub const WIRE_LEN: usize = 120;
pub const PAYLOAD_LEN: usize = 48;

/// `fid ‖ seq(4, big-endian) ‖ prev(20)` — the unique coordinates of a
/// packet within its feed.
fn name(fid: &[u8; 32], seq: u32, prev: &[u8; 20]) -> [u8; 56] {
    let mut buf = [0u8; 56];
    buf[..32].copy_from_slice(fid);
    buf[32..36].copy_from_slice(&seq.to_be_bytes());
    buf[36..].copy_from_slice(prev);
    buf
}

/// The DMX a node should arm to catch `(fid, seq, prev)`'s entry before it
/// has a `Packet` in hand to ask [`Packet::predict_next_dmx`] for one —
/// e.g. the very first pull request for a feed it doesn't hold yet.
pub fn dmx_for(fid: &[u8; 32], seq: u32, prev: &[u8; 20]) -> [u8; 7] {
    dmx(&name(fid, seq, prev))
}

fn mid_of(name: &[u8; 56], wire: &[u8; WIRE_LEN]) -> [u8; 20] {
    let mut buf = Vec::with_capacity(56 + WIRE_LEN);
    buf.extend_from_slice(name);
    buf.extend_from_slice(wire);
    sha256_prefix::<20>(&buf)
}

/// A signed, hash-chained log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub fid: [u8; 32],
    pub seq: u32,
    pub prev: [u8; 20],
    pub dmx: [u8; 7],
    pub typ: PacketType,
    pub payload: [u8; PAYLOAD_LEN],
    pub signature: [u8; 64],
    pub wire: [u8; WIRE_LEN],
    mid: [u8; 20],
}

impl Packet {
    /// Build and sign a new packet at `(fid, seq, prev)`. `payload` is
    /// zero-padded to 48 bytes if shorter; longer payloads are a caller
    /// bug (use [`Packet::sign_chain`] for content over 48 bytes).
    pub fn sign(fid: [u8; 32], seq: u32, prev: [u8; 20], typ: PacketType, payload: &[u8], signer: &dyn Signer) -> Self {
        assert!(payload.len() <= PAYLOAD_LEN, "payload does not fit a single packet");
        let mut payload48 = [0u8; PAYLOAD_LEN];
        payload48[..payload.len()].copy_from_slice(payload);
        Self::sign_raw(fid, seq, prev, typ, payload48, signer)
    }

    fn sign_raw(fid: [u8; 32], seq: u32, prev: [u8; 20], typ: PacketType, payload: [u8; PAYLOAD_LEN], signer: &dyn Signer) -> Self {
        let nm = name(&fid, seq, &prev);
        let dmx_val = dmx(&nm);

        let mut msg = [0u8; 56];
        msg[..7].copy_from_slice(&dmx_val);
        msg[7] = typ.as_byte();
        msg[8..].copy_from_slice(&payload);

        let mut to_sign = Vec::with_capacity(56 + 56);
        to_sign.extend_from_slice(&nm);
        to_sign.extend_from_slice(&msg);
        let signature = signer.sign(&to_sign);

        let mut wire = [0u8; WIRE_LEN];
        wire[..56].copy_from_slice(&msg);
        wire[56..].copy_from_slice(&signature);
        let mid = mid_of(&nm, &wire);

        Self {
            fid,
            seq,
            prev,
            dmx: dmx_val,
            typ,
            payload,
            signature,
            wire,
            mid,
        }
    }

    /// Reconstruct a packet from its wire bytes at known coordinates.
    ///
    /// `verifier == None` means "trust this buffer" — used when reading an
    /// entry back out of a log file that was already verified on write.
    /// `verifier == Some(v)` checks both the DMX match and the signature,
    /// failing closed on either mismatch.
    pub fn from_wire(wire: &[u8; WIRE_LEN], fid: [u8; 32], seq: u32, prev: [u8; 20], verifier: Option<&dyn Verifier>) -> Option<Self> {
        let nm = name(&fid, seq, &prev);
        let mut dmx_val = [0u8; 7];
        dmx_val.copy_from_slice(&wire[..7]);

        let typ = PacketType::from_byte(wire[7])?;
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&wire[8..56]);
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&wire[56..WIRE_LEN]);

        if let Some(v) = verifier {
            let expected = dmx(&nm);
            if expected != dmx_val {
                return None;
            }
            let mut signed_msg = Vec::with_capacity(56 + 56);
            signed_msg.extend_from_slice(&nm);
            signed_msg.extend_from_slice(&wire[..56]);
            if !v.verify(&fid, &signature, &signed_msg) {
                return None;
            }
        }

        let mid = mid_of(&nm, wire);
        Some(Self {
            fid,
            seq,
            prev,
            dmx: dmx_val,
            typ,
            payload,
            signature,
            wire: *wire,
            mid,
        })
    }

    pub fn mid(&self) -> [u8; 20] {
        self.mid
    }

    /// The DMX a node should arm to catch this feed's *next* entry,
    /// without constructing a throwaway `Packet` for it.
    pub fn predict_next_dmx(&self) -> [u8; 7] {
        let nm = name(&self.fid, self.seq + 1, &self.mid);
        dmx(&nm)
    }

    pub fn has_sidechain(&self) -> bool {
        matches!(self.typ, PacketType::Chain20)
    }

    /// Pointer to the first blob of this chain20 entry's sidechain, or
    /// `None` if the content fit entirely inline.
    pub fn chain_head_ptr(&self) -> Option<[u8; 20]> {
        if !self.has_sidechain() {
            return None;
        }
        sidechain::head_ptr(&self.payload)
    }

    /// Sign a chain20 entry carrying `content` (of any length) and return
    /// the packet plus the blob chain that must be persisted alongside it,
    /// in the order they should be written to the blob store.
    pub fn sign_chain(fid: [u8; 32], seq: u32, prev: [u8; 20], content: &[u8], signer: &dyn Signer) -> (Self, Vec<Blob>) {
        let (payload, blobs) = sidechain::encode(content);
        (Self::sign_raw(fid, seq, prev, PacketType::Chain20, payload, signer), blobs)
    }

    /// Reassemble the content of a chain20 packet, fetching blobs through
    /// `get_blob`. Returns `None` if a blob in the chain is missing.
    pub fn undo_chain(&self, get_blob: impl FnMut(&[u8; 20]) -> Option<Blob>) -> Option<Vec<u8>> {
        assert!(self.has_sidechain(), "undo_chain called on a non-chain20 packet");
        sidechain::decode(&self.payload, get_blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Ed25519Signer, Ed25519Verifier};
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    fn keypair() -> ([u8; 32], [u8; 32]) {
        let sk = SigningKey::generate(&mut OsRng);
        (sk.to_bytes(), sk.verifying_key().to_bytes())
    }

    #[test]
    fn sign_then_from_wire_roundtrips() {
        let (seed, fid) = keypair();
        let signer = Ed25519Signer::from_seed(&seed);
        let prev = {
            let mut p = [0u8; 20];
            p.copy_from_slice(&fid[..20]);
            p
        };

        let pkt = Packet::sign(fid, 1, prev, PacketType::Plain48, b"hello", &signer);
        let back = Packet::from_wire(&pkt.wire, fid, 1, prev, Some(&Ed25519Verifier)).unwrap();

        assert_eq!(pkt, back);
        assert_eq!(&back.payload[..5], b"hello");
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let (seed, fid) = keypair();
        let signer = Ed25519Signer::from_seed(&seed);
        let prev = [0u8; 20];
        let pkt = Packet::sign(fid, 1, prev, PacketType::Plain48, b"hi", &signer);

        let mut tampered = pkt.wire;
        tampered[60] ^= 0xff;
        assert!(Packet::from_wire(&tampered, fid, 1, prev, Some(&Ed25519Verifier)).is_none());
    }

    #[test]
    fn dmx_mismatch_is_rejected() {
        let (seed, fid) = keypair();
        let signer = Ed25519Signer::from_seed(&seed);
        let prev = [0u8; 20];
        let pkt = Packet::sign(fid, 1, prev, PacketType::Plain48, b"hi", &signer);

        // A packet signed for seq=1 presented as if it were seq=2.
        assert!(Packet::from_wire(&pkt.wire, fid, 2, prev, Some(&Ed25519Verifier)).is_none());
    }
}
