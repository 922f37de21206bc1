//! The authoritative append-only store for one feed ID.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use tssb_core::crypto::Verifier;
use tssb_core::packet::{Blob, Packet, PacketType, WIRE_LEN};

use crate::error::LogError;

pub const HEADER_LEN: u64 = 128;
pub const ENTRY_LEN: u64 = 128;
const ENTRY_RESERVED: usize = 8;

type AppendCallback = Box<dyn FnMut(&Packet) + Send>;

/// One feed's on-disk append-only log.
pub struct Log {
    file: File,
    pub fid: [u8; 32],
    pub parent_fid: [u8; 32],
    pub parent_seq: u32,
    pub anchor_seq: u32,
    pub anchor_mid: [u8; 20],
    pub front_seq: u32,
    pub front_mid: [u8; 20],
    /// `mids[i]` is the MID of entry `anchor_seq + 1 + i`. Kept in memory so
    /// random-access reads can reconstruct each entry's `prev` exactly,
    /// rather than trusting an unauthenticated on-disk copy of it.
    mids: Vec<[u8; 20]>,
    verifier: Arc<dyn Verifier>,
    append_cb: Option<AppendCallback>,
    pub subscription: u32,
}

impl Log {
    pub(crate) fn open(path: &Path, verifier: Arc<dyn Verifier>) -> Result<Self, LogError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut hdr = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut hdr)?;

        let fid: [u8; 32] = hdr[12..44].try_into().expect("slice is 32 bytes");
        let parent_fid: [u8; 32] = hdr[44..76].try_into().expect("slice is 32 bytes");
        let parent_seq = u32::from_be_bytes(hdr[76..80].try_into().unwrap());
        let anchor_seq = u32::from_be_bytes(hdr[80..84].try_into().unwrap());
        let anchor_mid: [u8; 20] = hdr[84..104].try_into().expect("slice is 20 bytes");
        let front_seq = u32::from_be_bytes(hdr[104..108].try_into().unwrap());
        let front_mid: [u8; 20] = hdr[108..128].try_into().expect("slice is 20 bytes");

        let found = file.metadata()?.len();
        let expected = HEADER_LEN + ENTRY_LEN * (front_seq - anchor_seq) as u64;
        if found != expected {
            return Err(LogError::Corrupt { expected, found });
        }

        let mut log = Self {
            file,
            fid,
            parent_fid,
            parent_seq,
            anchor_seq,
            anchor_mid,
            front_seq,
            front_mid,
            mids: Vec::with_capacity((front_seq - anchor_seq) as usize),
            verifier,
            append_cb: None,
            subscription: 0,
        };
        log.rebuild_mid_index()?;
        Ok(log)
    }

    fn rebuild_mid_index(&mut self) -> Result<(), LogError> {
        let mut prev = self.anchor_mid;
        for seq in (self.anchor_seq + 1)..=self.front_seq {
            let wire = self.read_wire_at(seq)?;
            let pkt = Packet::from_wire(&wire, self.fid, seq, prev, None).ok_or(LogError::BadPacket)?;
            prev = pkt.mid();
            self.mids.push(prev);
        }
        Ok(())
    }

    fn entry_offset(&self, seq: u32) -> u64 {
        HEADER_LEN + ENTRY_LEN * (seq - self.anchor_seq - 1) as u64
    }

    fn read_wire_at(&mut self, seq: u32) -> Result<[u8; WIRE_LEN], LogError> {
        self.file.seek(SeekFrom::Start(self.entry_offset(seq)))?;
        let mut entry = [0u8; ENTRY_LEN as usize];
        self.file.read_exact(&mut entry)?;
        let mut wire = [0u8; WIRE_LEN];
        wire.copy_from_slice(&entry[ENTRY_RESERVED..]);
        Ok(wire)
    }

    /// MID of the entry immediately preceding `seq` (the anchor MID if
    /// `seq` is the first stored entry).
    fn prev_of(&self, seq: u32) -> [u8; 20] {
        if seq == self.anchor_seq + 1 {
            self.anchor_mid
        } else {
            self.mids[(seq - self.anchor_seq - 2) as usize]
        }
    }

    pub fn len(&self) -> u32 {
        self.front_seq
    }

    pub fn is_empty(&self) -> bool {
        self.front_seq == self.anchor_seq
    }

    pub fn front(&self) -> (u32, [u8; 20]) {
        (self.front_seq, self.front_mid)
    }

    /// Random access by sequence number. `seq < 0` counts back from the
    /// front (`-1` is the most recent entry), matching the reference
    /// implementation's negative-index convention.
    pub fn read(&mut self, seq: i64) -> Result<Packet, LogError> {
        let seq = if seq < 0 {
            self.front_seq as i64 + seq + 1
        } else {
            seq
        };
        if seq <= self.anchor_seq as i64 || seq > self.front_seq as i64 {
            return Err(LogError::OutOfRange {
                requested: seq,
                anchor: self.anchor_seq,
                front: self.front_seq,
            });
        }
        let seq = seq as u32;
        let prev = self.prev_of(seq);
        let wire = self.read_wire_at(seq)?;
        Packet::from_wire(&wire, self.fid, seq, prev, None).ok_or(LogError::BadPacket)
    }

    /// Verify and append a packet received from the network. Fails closed
    /// on DMX mismatch, bad signature, or a sequence gap.
    pub fn append(&mut self, wire: &[u8; WIRE_LEN]) -> Result<Packet, LogError> {
        let seq = self.front_seq + 1;
        let prev = self.front_mid;
        let pkt = Packet::from_wire(wire, self.fid, seq, prev, Some(self.verifier.as_ref())).ok_or(LogError::BadPacket)?;
        self.append_trusted(pkt)
    }

    /// Append a packet this process signed itself (no verification needed
    /// — the keystore already vouched for it).
    pub(crate) fn append_trusted(&mut self, pkt: Packet) -> Result<Packet, LogError> {
        if pkt.seq != self.front_seq + 1 {
            return Err(LogError::OutOfSequence);
        }
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&[0u8; ENTRY_RESERVED])?;
        self.file.write_all(&pkt.wire)?;

        self.front_seq = pkt.seq;
        self.front_mid = pkt.mid();
        self.mids.push(self.front_mid);

        self.file.seek(SeekFrom::Start(104))?;
        self.file.write_all(&self.front_seq.to_be_bytes())?;
        self.file.write_all(&self.front_mid)?;
        self.file.flush()?;

        if let Some(cb) = &mut self.append_cb {
            cb(&pkt);
        }
        Ok(pkt)
    }

    pub fn write_typed_48b(&mut self, typ: PacketType, payload: &[u8], signer: &dyn tssb_core::crypto::Signer) -> Result<Packet, LogError> {
        let seq = self.front_seq + 1;
        let prev = self.front_mid;
        let pkt = Packet::sign(self.fid, seq, prev, typ, payload, signer);
        self.append_trusted(pkt)
    }

    pub fn write_eof(&mut self, signer: &dyn tssb_core::crypto::Signer) -> Result<Packet, LogError> {
        self.write_typed_48b(PacketType::Contdas, &[0u8; 48], signer)
    }

    /// Build (but do not yet append) a chain20 entry plus its blobs. The
    /// caller persists the blobs first, then calls [`Log::append_trusted`]
    /// — see `Repository::persist_chain`.
    pub fn prepare_chain(&self, content: &[u8], signer: &dyn tssb_core::crypto::Signer) -> (Packet, Vec<Blob>) {
        let seq = self.front_seq + 1;
        let prev = self.front_mid;
        Packet::sign_chain(self.fid, seq, prev, content, signer)
    }

    pub fn set_append_cb(&mut self, cb: Option<AppendCallback>) {
        self.append_cb = cb;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Repository;
    use tssb_core::crypto::{Ed25519Signer, Ed25519Verifier};
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    fn keypair() -> ([u8; 32], [u8; 32]) {
        let sk = SigningKey::generate(&mut OsRng);
        (sk.to_bytes(), sk.verifying_key().to_bytes())
    }

    #[test]
    fn append_five_plain_entries() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path(), Arc::new(Ed25519Verifier)).unwrap();
        let (seed, fid) = keypair();
        let signer = Ed25519Signer::from_seed(&seed);

        repo.mk_generic_log(fid, PacketType::Plain48, &[0u8; 48], &signer, [0u8; 32], 0).unwrap();
        let log = repo.get_log(&fid).unwrap();

        for i in 1u8..=5 {
            let mut l = log.lock().unwrap();
            let payload = [b'0' + i; 48];
            l.write_typed_48b(PacketType::Plain48, &payload, &signer).unwrap();
        }

        let mut l = log.lock().unwrap();
        assert_eq!(l.len(), 6); // genesis + 5
        for i in 1u8..=5 {
            let pkt = l.read((i + 1) as i64).unwrap();
            assert_eq!(pkt.payload[0], b'0' + i);
        }
    }

    #[test]
    fn prev_chain_invariant_holds_on_reread() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path(), Arc::new(Ed25519Verifier)).unwrap();
        let (seed, fid) = keypair();
        let signer = Ed25519Signer::from_seed(&seed);
        repo.mk_generic_log(fid, PacketType::Plain48, &[0u8; 48], &signer, [0u8; 32], 0).unwrap();
        let log = repo.get_log(&fid).unwrap();
        {
            let mut l = log.lock().unwrap();
            for _ in 0..4 {
                l.write_typed_48b(PacketType::Plain48, &[1u8; 48], &signer).unwrap();
            }
        }
        let mut l = log.lock().unwrap();
        for s in (l.anchor_seq + 2)..=l.front_seq {
            let prev_mid = l.read((s - 1) as i64).unwrap().mid();
            let pkt = l.read(s as i64).unwrap();
            assert_eq!(pkt.prev, prev_mid);
        }
    }
}
