//! Sliding-window segmentation of one logical stream across a chain of
//! continuation feeds, with acknowledgment-driven garbage collection.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use tssb_core::keystore::KeyStore;
use tssb_core::packet::{Packet, PacketType};

use crate::error::SessionError;
use crate::node::Node;

/// Default window length: the log is rolled over to a fresh continuation
/// feed once it grows past this many entries (the value used by the most
/// mature reference proof-of-concept).
pub const DEFAULT_WINDOW_LEN: u32 = 7;

type ContentCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

struct State {
    local_fid: [u8; 32],
    pending_fid: Option<[u8; 32]>,
    remotes: HashSet<[u8; 32]>,
}

/// One side of a two-party (or small-group) exchange: a local feed the
/// caller writes to, and a set of remote feeds it consumes, all trimmed to
/// `window_len` entries per segment before rolling to a continuation.
pub struct SlidingWindow {
    node: Arc<Node>,
    keystore: Arc<Mutex<KeyStore>>,
    window_len: u32,
    state: Mutex<State>,
    started: Mutex<bool>,
    callback: ContentCallback,
}

impl SlidingWindow {
    pub fn new(node: Arc<Node>, keystore: Arc<Mutex<KeyStore>>, local_fid: [u8; 32], callback: ContentCallback) -> Self {
        Self::with_window_len(node, keystore, local_fid, callback, DEFAULT_WINDOW_LEN)
    }

    pub fn with_window_len(
        node: Arc<Node>,
        keystore: Arc<Mutex<KeyStore>>,
        local_fid: [u8; 32],
        callback: ContentCallback,
        window_len: u32,
    ) -> Self {
        Self {
            node,
            keystore,
            window_len,
            state: Mutex::new(State {
                local_fid,
                pending_fid: None,
                remotes: HashSet::new(),
            }),
            started: Mutex::new(false),
            callback,
        }
    }

    /// Add a peer's feed to the set this window consumes, and kick off
    /// replication for it.
    pub fn add_remote(&self, remote_fid: [u8; 32]) -> Result<(), SessionError> {
        self.node
            .repo()
            .get_log(&remote_fid)
            .map_err(|e| SessionError::Node(e.into()))?;
        self.state.lock().expect("session lock poisoned").remotes.insert(remote_fid);
        self.node.request_latest(remote_fid);
        Ok(())
    }

    /// Write `payload` to the local feed, rolling to a continuation feed
    /// first if the current segment has reached `window_len`.
    pub fn write(&self, payload: &[u8], typ: PacketType) -> Result<Packet, SessionError> {
        let local_fid = {
            let mut state = self.state.lock().expect("session lock poisoned");
            let len = self
                .node
                .repo()
                .get_log(&state.local_fid)
                .map_err(|e| SessionError::Node(e.into()))?
                .lock()
                .expect("log lock poisoned")
                .len();

            if len > self.window_len {
                if state.pending_fid.is_none() {
                    state.pending_fid = Some(state.local_fid);
                }
                let next_fid = self.roll_continuation(state.local_fid)?;
                state.local_fid = next_fid;
            }
            state.local_fid
        };

        let signer = self
            .keystore
            .lock()
            .expect("keystore lock poisoned")
            .signer_for(&local_fid)
            .map_err(|_| SessionError::NotStarted)?;
        self.node
            .write_typed_48b(local_fid, typ, payload, &signer)
            .map_err(SessionError::from)
    }

    /// Delete an acknowledged feed's log and erase its secret from the
    /// keystore. If the feed had itself already rolled to a continuation
    /// before the ack arrived (a second rollover racing the first ack),
    /// that continuation's fid becomes the new pending feed so it still
    /// gets collected once its own ack arrives.
    fn collect_acked_feed(&self, fid: [u8; 32]) -> Option<[u8; 32]> {
        let next_pending = self.node.repo().get_log(&fid).ok().and_then(|log| {
            let mut l = log.lock().expect("log lock poisoned");
            match l.read(-1) {
                Ok(pkt) if pkt.typ == PacketType::Contdas => {
                    let mut next_fid = [0u8; 32];
                    next_fid.copy_from_slice(&pkt.payload[..32]);
                    Some(next_fid)
                }
                _ => None,
            }
        });

        if let Err(e) = self.node.repo().del_log(&fid) {
            warn!(error = %e, "failed to delete acknowledged feed");
        }
        self.keystore.lock().expect("keystore lock poisoned").remove(&fid);

        next_pending
    }

    fn roll_continuation(&self, old_fid: [u8; 32]) -> Result<[u8; 32], SessionError> {
        let next_fid = self.keystore.lock().expect("keystore lock poisoned").generate("session-continuation");
        let old_log = self.node.repo().get_log(&old_fid).map_err(|e| SessionError::Node(e.into()))?;
        let (old_signer, next_signer) = {
            let ks = self.keystore.lock().expect("keystore lock poisoned");
            let old = ks.signer_for(&old_fid).map_err(|_| SessionError::NotStarted)?;
            let next = ks.signer_for(&next_fid).map_err(|_| SessionError::NotStarted)?;
            (old, next)
        };
        let mut old_log = old_log.lock().expect("log lock poisoned");
        self.node
            .repo()
            .mk_continuation_log(&mut old_log, next_fid, &next_signer, &old_signer)
            .map_err(|e| SessionError::Node(e.into()))?;
        Ok(next_fid)
    }

    pub fn set_callback(&mut self, callback: ContentCallback) {
        self.callback = callback;
    }

    /// Feed an entry from a followed remote feed through the session's
    /// state machine. A no-op until [`SlidingWindow::start`] has run.
    pub fn on_incoming(&self, pkt: &Packet) {
        if !*self.started.lock().expect("session lock poisoned") {
            debug!("session not started yet, dropping incoming entry");
            return;
        }
        self.process(pkt);
    }

    fn process(&self, pkt: &Packet) {
        match pkt.typ {
            PacketType::Contdas => {
                let mut next_fid = [0u8; 32];
                next_fid.copy_from_slice(&pkt.payload[..32]);
                info!(old = %hex::encode(pkt.fid), new = %hex::encode(next_fid), "remote rolled to continuation feed");
                if let Err(e) = self.add_remote(next_fid) {
                    warn!(error = %e, "failed to follow continuation feed");
                }
            }
            PacketType::IsContn => {
                let mut old_fid = [0u8; 32];
                old_fid.copy_from_slice(&pkt.payload[..32]);
                let Ok(old_log) = self.node.repo().get_log(&old_fid) else {
                    return;
                };
                let (old_front_seq, _) = old_log.lock().expect("log lock poisoned").front();
                let claimed_seq = u32::from_be_bytes(pkt.payload[32..36].try_into().expect("4 bytes"));
                if old_front_seq != claimed_seq {
                    warn!(expected = old_front_seq, claimed = claimed_seq, "continuation proof sequence mismatch");
                    return;
                }
                if let Err(e) = self.write(&old_fid, PacketType::Acknldg) {
                    warn!(error = %e, "failed to acknowledge continuation");
                }
            }
            PacketType::Acknldg => {
                let mut acked_fid = [0u8; 32];
                acked_fid.copy_from_slice(&pkt.payload[..32]);
                let pending = self.state.lock().expect("session lock poisoned").pending_fid;
                match pending {
                    Some(fid) if fid == acked_fid => {
                        let next_pending = self.collect_acked_feed(fid);
                        self.state.lock().expect("session lock poisoned").pending_fid = next_pending;
                    }
                    Some(fid) => {
                        debug!(pending = %hex::encode(fid), acked = %hex::encode(acked_fid), "ack does not name the pending feed, ignoring");
                    }
                    None => debug!("received ack with no pending feed to collect"),
                }
            }
            PacketType::IsChild => {}
            PacketType::MkChild => {
                warn!(fid = %hex::encode(pkt.fid), "unexpected mkchild in a session feed");
            }
            PacketType::Set | PacketType::Delete => {
                warn!(fid = %hex::encode(pkt.fid), "unexpected set/delete in a session feed");
            }
            PacketType::Chain20 => {
                if let Some(content) = self.node.repo().undo_chain(pkt) {
                    (self.callback)(&content);
                }
            }
            PacketType::Plain48 => {
                (self.callback)(&pkt.payload);
            }
        }
    }

    /// Replay everything already stored in every followed remote feed
    /// (including its continuation chain), then switch to live delivery
    /// via the node's entry listener.
    pub fn start(self: &Arc<Self>) {
        let mut started = self.started.lock().expect("session lock poisoned");
        if *started {
            return;
        }
        let remotes: Vec<[u8; 32]> = self.state.lock().expect("session lock poisoned").remotes.iter().copied().collect();
        if remotes.is_empty() {
            return;
        }

        for remote_fid in remotes {
            let mut fid = remote_fid;
            loop {
                let Ok(log) = self.node.repo().get_log(&fid) else { break };
                let mut seq = 1i64;
                let mut next_fid = None;
                loop {
                    let pkt = {
                        let mut l = log.lock().expect("log lock poisoned");
                        match l.read(seq) {
                            Ok(pkt) => pkt,
                            Err(_) => break,
                        }
                    };
                    if pkt.typ == PacketType::Contdas {
                        let mut nf = [0u8; 32];
                        nf.copy_from_slice(&pkt.payload[..32]);
                        next_fid = Some(nf);
                    }
                    self.process(&pkt);
                    seq += 1;
                }
                match next_fid {
                    Some(nf) => fid = nf,
                    None => break,
                }
            }
        }

        let weak_self = Arc::downgrade(self);
        self.node.add_listener(Arc::new(move |pkt: &Packet| {
            if let Some(session) = weak_self.upgrade() {
                let is_remote = session.state.lock().expect("session lock poisoned").remotes.contains(&pkt.fid);
                if is_remote {
                    session.process(pkt);
                }
            }
        }));

        *started = true;
    }
}
