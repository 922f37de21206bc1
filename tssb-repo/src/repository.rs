//! Directory layout and lifecycle for a node's set of feeds.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tssb_core::crypto::{Signer, Verifier};
use tssb_core::integrity::sha256_prefix;
use tssb_core::packet::{Blob, PacketType};

use crate::error::{LogError, RepoError};
use crate::log::{Log, ENTRY_LEN, HEADER_LEN};

const LOGS_DIR: &str = "_logs";
const BLOB_DIR: &str = "_blob";

/// A node's on-disk store: one append-only log per feed, plus a
/// content-addressed blob pool shared across all of them.
pub struct Repository {
    base: PathBuf,
    verifier: Arc<dyn Verifier>,
    logs: Mutex<HashMap<[u8; 32], Arc<Mutex<Log>>>>,
}

impl Repository {
    /// Open (creating if absent) the repository rooted at `base`.
    pub fn open(base: &Path, verifier: Arc<dyn Verifier>) -> Result<Self, RepoError> {
        fs::create_dir_all(base.join(LOGS_DIR))?;
        fs::create_dir_all(base.join(BLOB_DIR))?;
        Ok(Self {
            base: base.to_path_buf(),
            verifier,
            logs: Mutex::new(HashMap::new()),
        })
    }

    fn log_path(&self, fid: &[u8; 32]) -> PathBuf {
        self.base.join(LOGS_DIR).join(format!("{}.log", hex::encode(fid)))
    }

    fn blob_path(&self, hash: &[u8; 20]) -> PathBuf {
        self.base.join(BLOB_DIR).join(hex::encode(&hash[..1])).join(hex::encode(&hash[1..]))
    }

    pub fn list_logs(&self) -> Result<Vec<[u8; 32]>, RepoError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.base.join(LOGS_DIR))? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(hexpart) = name.strip_suffix(".log") {
                if let Ok(bytes) = hex::decode(hexpart) {
                    if let Ok(fid) = <[u8; 32]>::try_from(bytes.as_slice()) {
                        out.push(fid);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Open the log for `fid`, loading it from disk the first time it's
    /// touched and caching the handle for subsequent callers.
    pub fn get_log(&self, fid: &[u8; 32]) -> Result<Arc<Mutex<Log>>, RepoError> {
        let mut logs = self.logs.lock().expect("log table lock poisoned");
        if let Some(existing) = logs.get(fid) {
            return Ok(existing.clone());
        }
        let path = self.log_path(fid);
        if !path.exists() {
            return Err(RepoError::NoSuchLog);
        }
        let log = Log::open(&path, self.verifier.clone())?;
        let handle = Arc::new(Mutex::new(log));
        logs.insert(*fid, handle.clone());
        Ok(handle)
    }

    fn create_log_file(&self, fid: [u8; 32], parent_fid: [u8; 32], parent_seq: u32) -> Result<PathBuf, RepoError> {
        let path = self.log_path(&fid);
        if path.exists() {
            return Err(RepoError::DuplicateLog);
        }
        let mut hdr = [0u8; HEADER_LEN as usize];
        hdr[12..44].copy_from_slice(&fid);
        hdr[44..76].copy_from_slice(&parent_fid);
        hdr[76..80].copy_from_slice(&parent_seq.to_be_bytes());
        // anchor_seq and front_seq start at zero; anchor_mid and front_mid
        // both start at fid[:20] — the genesis entry's `prev` is the feed's
        // own id truncated to a MID, not an all-zero value.
        hdr[84..104].copy_from_slice(&fid[..20]);
        hdr[108..128].copy_from_slice(&fid[..20]);
        let mut file = fs::OpenOptions::new().create_new(true).write(true).open(&path)?;
        file.write_all(&hdr)?;
        file.flush()?;
        Ok(path)
    }

    fn open_fresh(&self, fid: [u8; 32]) -> Result<Arc<Mutex<Log>>, RepoError> {
        let path = self.log_path(&fid);
        let log = Log::open(&path, self.verifier.clone())?;
        let handle = Arc::new(Mutex::new(log));
        self.logs.lock().expect("log table lock poisoned").insert(fid, handle.clone());
        Ok(handle)
    }

    /// Open an empty, header-only placeholder log for a feed this node has
    /// only just heard about (e.g. a newly-added peer) — an empty anchor,
    /// ready to receive whatever genesis entry arrives over the wire.
    /// Mirrors the reference implementation's `allocate_log`.
    pub fn mk_placeholder(&self, fid: [u8; 32]) -> Result<Arc<Mutex<Log>>, RepoError> {
        if self.log_path(&fid).exists() {
            return self.get_log(&fid);
        }
        self.create_log_file(fid, [0u8; 32], 0)?;
        self.open_fresh(fid)
    }

    /// Create a brand-new, parentless log and append its genesis entry.
    pub fn mk_generic_log(
        &self,
        fid: [u8; 32],
        typ: PacketType,
        payload: &[u8],
        signer: &dyn Signer,
        parent_fid: [u8; 32],
        parent_seq: u32,
    ) -> Result<Arc<Mutex<Log>>, RepoError> {
        self.create_log_file(fid, parent_fid, parent_seq)?;
        let handle = self.open_fresh(fid)?;
        handle.lock().expect("log lock poisoned").write_typed_48b(typ, payload, signer)?;
        Ok(handle)
    }

    /// Create a child feed: its genesis entry is an `IsChild` packet naming
    /// `(parent_fid, parent_seq, sha256(parent_wire)[:12])` as its birth
    /// certificate, the full-hash canonical form. `usage16` is an opaque
    /// 16-byte tag the caller attaches to the parent's `mkchild` entry
    /// (e.g. to label what the child feed is for); pass `[0u8; 16]` when
    /// there's nothing to say.
    pub fn mk_child_log(
        &self,
        parent: &mut Log,
        child_fid: [u8; 32],
        child_signer: &dyn Signer,
        parent_signer: &dyn Signer,
        usage16: [u8; 16],
    ) -> Result<Arc<Mutex<Log>>, RepoError> {
        let mut mkchild_payload = [0u8; 48];
        mkchild_payload[..32].copy_from_slice(&child_fid);
        mkchild_payload[32..48].copy_from_slice(&usage16);
        parent.write_typed_48b(PacketType::MkChild, &mkchild_payload, parent_signer)?;
        let proof_pkt = parent.read(-1)?;

        self.create_log_file(child_fid, parent.fid, proof_pkt.seq)?;
        let handle = self.open_fresh(child_fid)?;
        let proof = birth_certificate(&proof_pkt.fid, proof_pkt.seq, &proof_pkt.wire);
        handle
            .lock()
            .expect("log lock poisoned")
            .write_typed_48b(PacketType::IsChild, &proof, child_signer)?;
        Ok(handle)
    }

    /// Terminate `old`, replacing it with a continuation feed whose genesis
    /// entry proves descent the same way a child feed does.
    pub fn mk_continuation_log(
        &self,
        old: &mut Log,
        next_fid: [u8; 32],
        next_signer: &dyn Signer,
        old_signer: &dyn Signer,
    ) -> Result<Arc<Mutex<Log>>, RepoError> {
        let mut contdas_payload = [0u8; 48];
        contdas_payload[..32].copy_from_slice(&next_fid);
        old.write_typed_48b(PacketType::Contdas, &contdas_payload[..32], old_signer)?;
        let proof_pkt = old.read(-1)?;

        self.create_log_file(next_fid, old.fid, proof_pkt.seq)?;
        let handle = self.open_fresh(next_fid)?;
        let proof = birth_certificate(&proof_pkt.fid, proof_pkt.seq, &proof_pkt.wire);
        handle
            .lock()
            .expect("log lock poisoned")
            .write_typed_48b(PacketType::IsContn, &proof, next_signer)?;
        Ok(handle)
    }

    /// Drop a log from the in-memory cache and delete it from disk. Blobs
    /// referenced only by this log are left behind; they're unreachable
    /// garbage, not corruption, and a future sweep can reclaim them.
    pub fn del_log(&self, fid: &[u8; 32]) -> Result<(), RepoError> {
        self.logs.lock().expect("log table lock poisoned").remove(fid);
        let path = self.log_path(fid);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn add_blob(&self, content: &[u8]) -> Result<[u8; 20], RepoError> {
        let hash = sha256_prefix::<20>(content);
        let path = self.blob_path(&hash);
        if !path.exists() {
            fs::create_dir_all(path.parent().expect("blob path always has a parent"))?;
            fs::write(&path, content)?;
        }
        Ok(hash)
    }

    pub fn get_blob(&self, hash: &[u8; 20]) -> Result<Option<Vec<u8>>, RepoError> {
        let path = self.blob_path(hash);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    fn get_blob_fixed(&self, hash: &[u8; 20]) -> Option<Blob> {
        let bytes = self.get_blob(hash).ok().flatten()?;
        Blob::try_from(bytes).ok()
    }

    /// Fetch a chain20 entry's reassembled content, pulling blobs from this
    /// repository's blob pool.
    pub fn undo_chain(&self, pkt: &tssb_core::packet::Packet) -> Option<Vec<u8>> {
        pkt.undo_chain(|h| self.get_blob_fixed(h))
    }

    /// Persist a prepared chain20 entry: write every blob first (so a crash
    /// mid-write never leaves a dangling pointer reachable from the log),
    /// then append the head packet.
    pub fn persist_chain(&self, log: &Arc<Mutex<Log>>, content: &[u8], signer: &dyn Signer) -> Result<tssb_core::packet::Packet, RepoError> {
        let (pkt, blobs) = {
            let l = log.lock().expect("log lock poisoned");
            l.prepare_chain(content, signer)
        };
        for blob in &blobs {
            let path = self.blob_path(&sha256_prefix::<20>(blob));
            if !path.exists() {
                fs::create_dir_all(path.parent().expect("blob path always has a parent"))?;
                fs::write(&path, blob)?;
            }
        }
        let mut l = log.lock().expect("log lock poisoned");
        Ok(l.append_trusted(pkt)?)
    }
}

fn birth_certificate(fid: &[u8; 32], seq: u32, wire: &[u8; tssb_core::packet::WIRE_LEN]) -> Vec<u8> {
    let mut proof = Vec::with_capacity(48);
    proof.extend_from_slice(fid);
    proof.extend_from_slice(&seq.to_be_bytes());
    proof.extend_from_slice(&sha256_prefix::<12>(wire));
    proof
}

#[allow(dead_code)]
fn entry_count(front_seq: u32, anchor_seq: u32) -> u64 {
    ENTRY_LEN * (front_seq - anchor_seq) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tssb_core::crypto::{Ed25519Signer, Ed25519Verifier};
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    fn keypair() -> ([u8; 32], [u8; 32]) {
        let sk = SigningKey::generate(&mut OsRng);
        (sk.to_bytes(), sk.verifying_key().to_bytes())
    }

    #[test]
    fn blob_store_is_content_addressed_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path(), Arc::new(Ed25519Verifier)).unwrap();
        let h1 = repo.add_blob(b"hello world").unwrap();
        let h2 = repo.add_blob(b"hello world").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(repo.get_blob(&h1).unwrap().unwrap(), b"hello world");
    }

    #[test]
    fn child_log_proof_references_parent_entry() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path(), Arc::new(Ed25519Verifier)).unwrap();
        let (pseed, pfid) = keypair();
        let psigner = Ed25519Signer::from_seed(&pseed);
        repo.mk_generic_log(pfid, PacketType::Plain48, &[0u8; 48], &psigner, [0u8; 32], 0).unwrap();
        let parent = repo.get_log(&pfid).unwrap();

        let (cseed, cfid) = keypair();
        let csigner = Ed25519Signer::from_seed(&cseed);
        let child = {
            let mut p = parent.lock().unwrap();
            repo.mk_child_log(&mut p, cfid, &csigner, &psigner, [0u8; 16]).unwrap()
        };

        let mut c = child.lock().unwrap();
        let genesis = c.read(1).unwrap();
        assert_eq!(genesis.typ, PacketType::IsChild);
        assert_eq!(&genesis.payload[..32], &pfid[..]);
    }

    #[test]
    fn chain_content_survives_persist_and_undo() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path(), Arc::new(Ed25519Verifier)).unwrap();
        let (seed, fid) = keypair();
        let signer = Ed25519Signer::from_seed(&seed);
        repo.mk_generic_log(fid, PacketType::Plain48, &[0u8; 48], &signer, [0u8; 32], 0).unwrap();
        let log = repo.get_log(&fid).unwrap();

        let content = vec![7u8; 500];
        let pkt = repo.persist_chain(&log, &content, &signer).unwrap();
        assert_eq!(repo.undo_chain(&pkt).unwrap(), content);
    }
}
