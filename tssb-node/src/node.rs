//! Peering and replication: DMX/blob filter banks, want/blob request
//! handling, and the ARQ loop that keeps feeds converging.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use tssb_core::integrity::dmx;
use tssb_core::packet::{dmx_for, Packet, PacketType};
use tssb_repo::Repository;
use tssb_transport::Face;

use crate::error::{log_face_error, NodeError};

const WANT_TAG: &[u8] = b"want";
const BLOBS_TAG: &[u8] = b"blobs";
const BLOB_BATCH: u16 = 4;

/// What a DMX entry in the filter bank is waiting for.
enum DmxAction {
    /// The next entry of `fid`, which will carry sequence `seq`.
    AwaitEntry { fid: [u8; 32], seq: u32 },
    /// `dmx(me ‖ "want")` — pull requests addressed to this node.
    WantRequest,
    /// `dmx("blobs")` — blob chain pull requests addressed to anyone.
    BlobRequest,
}

/// How many more blobs remain before the requester needs to re-pull.
struct BlobWait {
    remaining: u16,
}

pub type EntryListener = Arc<dyn Fn(&Packet) + Send + Sync>;

struct Inner {
    dmxt: HashMap<[u8; 7], DmxAction>,
    blbt: HashMap<[u8; 20], BlobWait>,
    pending_chains: Vec<([u8; 32], u32)>,
    next_timeout: std::time::Instant,
    listeners: Vec<EntryListener>,
}

/// A participant in the tinySSB forwarding fabric: a set of faces, a
/// repository of feeds, and the filter banks that drive replication.
///
/// All mutable node state lives behind one `Mutex` — the single-lock
/// contract the repository and its callers are built around.
pub struct Node {
    faces: Vec<Arc<dyn Face>>,
    repo: Arc<Repository>,
    me: [u8; 32],
    peers: Vec<[u8; 32]>,
    inner: Mutex<Inner>,
}

impl Node {
    pub fn new(faces: Vec<Arc<dyn Face>>, repo: Arc<Repository>, me: [u8; 32], peers: Vec<[u8; 32]>) -> Self {
        let node = Self {
            faces,
            repo,
            me,
            peers,
            inner: Mutex::new(Inner {
                dmxt: HashMap::new(),
                blbt: HashMap::new(),
                pending_chains: Vec::new(),
                next_timeout: std::time::Instant::now(),
                listeners: Vec::new(),
            }),
        };
        node.arm_standing_handlers();
        node
    }

    fn arm_standing_handlers(&self) {
        let mut want_name = self.me.to_vec();
        want_name.extend_from_slice(WANT_TAG);
        let want_dmx = dmx(&want_name);
        let blob_dmx = dmx(BLOBS_TAG);

        let mut inner = self.inner.lock().expect("node lock poisoned");
        inner.dmxt.insert(want_dmx, DmxAction::WantRequest);
        inner.dmxt.insert(blob_dmx, DmxAction::BlobRequest);
    }

    pub fn arm_dmx(&self, dmx: [u8; 7], action: Option<DmxActionSpec>) {
        let mut inner = self.inner.lock().expect("node lock poisoned");
        match action {
            None => {
                inner.dmxt.remove(&dmx);
            }
            Some(spec) => {
                inner.dmxt.insert(dmx, spec.into());
            }
        }
    }

    pub fn arm_blob(&self, hptr: [u8; 20], remaining: Option<u16>) {
        let mut inner = self.inner.lock().expect("node lock poisoned");
        match remaining {
            None => {
                inner.blbt.remove(&hptr);
            }
            Some(remaining) => {
                inner.blbt.insert(hptr, BlobWait { remaining });
            }
        }
    }

    /// Route one inbound datagram from `reply` (the face it arrived on,
    /// used to answer want/blob requests).
    pub fn on_rx(&self, buf: &[u8], reply: &dyn Face) {
        if buf.len() < 7 {
            return;
        }
        let mut dmx_val = [0u8; 7];
        dmx_val.copy_from_slice(&buf[..7]);

        let action = {
            let inner = self.inner.lock().expect("node lock poisoned");
            match inner.dmxt.get(&dmx_val) {
                Some(DmxAction::WantRequest) => Some(Dispatch::Want),
                Some(DmxAction::BlobRequest) => Some(Dispatch::Blob),
                Some(DmxAction::AwaitEntry { fid, seq }) => Some(Dispatch::Entry { fid: *fid, seq: *seq }),
                None => None,
            }
        };

        match action {
            Some(Dispatch::Want) => self.incoming_want_request(buf, reply),
            Some(Dispatch::Blob) => self.incoming_blob_request(buf, reply),
            Some(Dispatch::Entry { fid, seq }) => self.incoming_logentry(fid, dmx_val, seq, buf),
            None => {
                let hptr = tssb_core::integrity::sha256_prefix::<20>(buf);
                let waiting = self.inner.lock().expect("node lock poisoned").blbt.contains_key(&hptr);
                if waiting {
                    self.incoming_chainedblob(hptr, buf);
                }
            }
        }
    }

    /// Forward already-verified, locally-held packets to peers that have
    /// subscribed to their feed (or unconditionally if `forced`).
    pub fn push(&self, packets: &[Packet], forced: bool) {
        for pkt in packets {
            let Ok(log) = self.repo.get_log(&pkt.fid) else {
                continue;
            };
            let should_send = {
                let mut l = log.lock().expect("log lock poisoned");
                if !forced && l.subscription == 0 {
                    false
                } else {
                    l.subscription = 0;
                    true
                }
            };
            if !should_send {
                continue;
            }
            self.broadcast(&pkt.wire);
        }
    }

    fn broadcast(&self, buf: &[u8]) {
        for (i, face) in self.faces.iter().enumerate() {
            if let Err(e) = face.send(buf) {
                log_face_error(i, e);
            }
        }
    }

    pub fn write_typed_48b(
        &self,
        fid: [u8; 32],
        typ: PacketType,
        payload: &[u8],
        signer: &dyn tssb_core::crypto::Signer,
    ) -> Result<Packet, NodeError> {
        let log = self.repo.get_log(&fid)?;
        let pkt = log.lock().expect("log lock poisoned").write_typed_48b(typ, payload, signer)?;
        self.arm_dmx(pkt.dmx, None);
        self.broadcast(&pkt.wire);
        Ok(pkt)
    }

    pub fn write_plain_48b(&self, fid: [u8; 32], payload: &[u8], signer: &dyn tssb_core::crypto::Signer) -> Result<Packet, NodeError> {
        self.write_typed_48b(fid, PacketType::Plain48, payload, signer)
    }

    pub fn write_blob_chain(&self, fid: [u8; 32], content: &[u8], signer: &dyn tssb_core::crypto::Signer) -> Result<Packet, NodeError> {
        let log = self.repo.get_log(&fid)?;
        let pkt = self.repo.persist_chain(&log, content, signer)?;
        self.broadcast(&pkt.wire);
        Ok(pkt)
    }

    /// `dmx(me ‖ "want")` handler: answer each `(fid, seq)` request this
    /// node can satisfy locally; bump `subscription` on what it can't, so a
    /// later arrival gets forwarded unprompted.
    fn incoming_want_request(&self, buf: &[u8], reply: &dyn Face) {
        let body = &buf[7..];
        for chunk in body.chunks_exact(36) {
            let fid: [u8; 32] = chunk[..32].try_into().expect("chunk is 36 bytes");
            let seq = u32::from_be_bytes(chunk[32..36].try_into().expect("chunk is 36 bytes"));
            let Ok(log) = self.repo.get_log(&fid) else { continue };
            let mut l = log.lock().expect("log lock poisoned");
            match l.read(seq as i64) {
                Ok(pkt) => {
                    if let Err(e) = reply.send(&pkt.wire) {
                        debug!(error = %e, "reply face rejected want response");
                    }
                }
                Err(_) => {
                    if seq == l.front_seq + 1 {
                        l.subscription += 1;
                    }
                }
            }
        }
    }

    /// `dmx("blobs")` handler: walk each requested blob chain up to
    /// `BLOB_BATCH` hops, forwarding every blob found.
    fn incoming_blob_request(&self, buf: &[u8], reply: &dyn Face) {
        let body = &buf[7..];
        for chunk in body.chunks_exact(22) {
            let mut hptr: [u8; 20] = chunk[..20].try_into().expect("chunk is 22 bytes");
            let mut cnt = u16::from_be_bytes(chunk[20..22].try_into().expect("chunk is 22 bytes"));
            while cnt > 0 {
                let Ok(Some(blob)) = self.repo.get_blob(&hptr) else { break };
                if let Err(e) = reply.send(&blob) {
                    debug!(error = %e, "reply face rejected blob response");
                }
                cnt -= 1;
                let next: [u8; 20] = blob[100..120].try_into().expect("blob is 120 bytes");
                if next == [0u8; 20] {
                    break;
                }
                hptr = next;
            }
        }
    }

    /// Try to append the entry this DMX was armed for. On success, arm the
    /// next slot in the feed and react to control packet types.
    fn incoming_logentry(&self, fid: [u8; 32], armed_dmx: [u8; 7], _expected_seq: u32, buf: &[u8]) {
        let Ok(log) = self.repo.get_log(&fid) else { return };
        let Ok(wire): Result<[u8; 120], _> = buf.try_into() else { return };

        let pkt = {
            let mut l = log.lock().expect("log lock poisoned");
            match l.append(&wire) {
                Ok(pkt) => pkt,
                Err(e) => {
                    debug!(error = %e, "rejected incoming log entry");
                    return;
                }
            }
        };

        self.arm_dmx(armed_dmx, None);
        info!(fid = %hex::encode(fid), seq = pkt.seq, typ = ?pkt.typ, "appended entry");

        match pkt.typ {
            PacketType::Chain20 => {
                self.request_chain(&pkt);
            }
            PacketType::Contdas | PacketType::MkChild => {
                // Following the announced child/continuation requires the
                // caller (session layer or CLI) to call
                // `Repository::mk_child_log`/`mk_continuation_log` once it
                // decides to adopt it — the node only reports the
                // announcement, it doesn't auto-adopt new feeds.
                info!(fid = %hex::encode(fid), seq = pkt.seq, "feed announced a child/continuation");
            }
            _ => {}
        }

        for listener in self.inner.lock().expect("node lock poisoned").listeners.clone() {
            listener(&pkt);
        }

        self.request_latest(fid);
    }

    /// Register a callback invoked with every entry successfully appended
    /// via [`Node::incoming_logentry`] — the hook the session layer rides
    /// to receive live feed content without the node knowing about
    /// sessions at all.
    pub fn add_listener(&self, listener: EntryListener) {
        self.inner.lock().expect("node lock poisoned").listeners.push(listener);
    }

    fn incoming_chainedblob(&self, hptr: [u8; 20], buf: &[u8]) {
        if buf.len() != 120 {
            return;
        }
        self.arm_blob(hptr, None);
        let _ = self.repo.add_blob(buf);
        let next: [u8; 20] = buf[100..120].try_into().expect("blob is 120 bytes");
        if next == [0u8; 20] {
            return;
        }
        let remaining = {
            let inner = self.inner.lock().expect("node lock poisoned");
            inner.blbt.get(&hptr).map(|w| w.remaining).unwrap_or(BLOB_BATCH)
        };
        let remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            let d = dmx(BLOBS_TAG);
            let mut wire = Vec::with_capacity(7 + 20 + 2);
            wire.extend_from_slice(&d);
            wire.extend_from_slice(&next);
            wire.extend_from_slice(&BLOB_BATCH.to_be_bytes());
            self.broadcast(&wire);
            self.arm_blob(next, Some(BLOB_BATCH));
        } else {
            self.arm_blob(next, Some(remaining));
        }
    }

    /// Arm a handler for `fid`'s next entry and ask every peer for it.
    pub fn request_latest(&self, fid: [u8; 32]) {
        if fid == self.me {
            return;
        }
        let Ok(log) = self.repo.get_log(&fid) else { return };
        let (front_seq, front_mid) = log.lock().expect("log lock poisoned").front();
        let seq = front_seq + 1;
        let d = dmx_for(&fid, seq, &front_mid);
        self.arm_dmx(d, Some(DmxActionSpec::AwaitEntry { fid, seq }));

        for peer in &self.peers {
            let mut want_name = peer.to_vec();
            want_name.extend_from_slice(WANT_TAG);
            let want_dmx = dmx(&want_name);
            let mut wire = Vec::with_capacity(7 + 36);
            wire.extend_from_slice(&want_dmx);
            wire.extend_from_slice(&fid);
            wire.extend_from_slice(&seq.to_be_bytes());
            self.broadcast(&wire);
        }
    }

    fn request_chain(&self, pkt: &Packet) {
        let Some(hptr) = pkt.chain_head_ptr() else { return };
        self.arm_blob(hptr, Some(BLOB_BATCH));
        let d = dmx(BLOBS_TAG);
        let mut wire = Vec::with_capacity(7 + 20 + 2);
        wire.extend_from_slice(&d);
        wire.extend_from_slice(&hptr);
        wire.extend_from_slice(&BLOB_BATCH.to_be_bytes());
        self.broadcast(&wire);
        self.inner
            .lock()
            .expect("node lock poisoned")
            .pending_chains
            .push((pkt.fid, pkt.seq));
    }

    /// One step of the ARQ loop: re-request the latest entry of every feed
    /// that isn't terminated, and re-pull any chain still incomplete.
    pub fn arq_tick(&self) {
        let Ok(fids) = self.repo.list_logs() else { return };
        for fid in fids {
            if fid == self.me {
                continue;
            }
            let Ok(log) = self.repo.get_log(&fid) else { continue };
            let terminated = {
                let mut l = log.lock().expect("log lock poisoned");
                l.front_seq > 0 && matches!(l.read(-1).map(|p| p.typ), Ok(PacketType::Contdas))
            };
            if terminated {
                continue;
            }
            self.request_latest(fid);
        }

        let pending = self.inner.lock().expect("node lock poisoned").pending_chains.clone();
        for (fid, seq) in pending {
            let Ok(log) = self.repo.get_log(&fid) else { continue };
            let Ok(pkt) = log.lock().expect("log lock poisoned").read(seq as i64) else {
                continue;
            };
            if self.repo.undo_chain(&pkt).is_some() {
                self.inner
                    .lock()
                    .expect("node lock poisoned")
                    .pending_chains
                    .retain(|p| *p != (fid, seq));
            } else {
                self.request_chain(&pkt);
            }
        }
    }

    /// Run [`Node::arq_tick`] on a fixed period until the returned handle
    /// is dropped/aborted.
    pub fn run_arq_loop(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.arq_tick();
            }
        })
    }

    pub fn faces(&self) -> &[Arc<dyn Face>] {
        &self.faces
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn me(&self) -> [u8; 32] {
        self.me
    }
}

enum Dispatch {
    Want,
    Blob,
    Entry { fid: [u8; 32], seq: u32 },
}

/// Public spec for arming a DMX entry (keeps `DmxAction` itself private).
pub enum DmxActionSpec {
    AwaitEntry { fid: [u8; 32], seq: u32 },
}

impl From<DmxActionSpec> for DmxAction {
    fn from(spec: DmxActionSpec) -> Self {
        match spec {
            DmxActionSpec::AwaitEntry { fid, seq } => DmxAction::AwaitEntry { fid, seq },
        }
    }
}
