use std::sync::Arc;

use ed25519_dalek::SigningKey;
use rand_core::OsRng;

use tssb_core::crypto::{Ed25519Signer, Ed25519Verifier};
use tssb_core::packet::PacketType;
use tssb_node::Node;
use tssb_repo::Repository;
use tssb_transport::{Face, LoopbackFace};

fn keypair() -> ([u8; 32], [u8; 32]) {
    let sk = SigningKey::generate(&mut OsRng);
    (sk.to_bytes(), sk.verifying_key().to_bytes())
}

fn pump(node: Arc<Node>, face: Arc<dyn Face>) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    face.clone().spawn_recv(tx);
    let _handle = tokio::spawn(async move {
        while let Some(buf) = rx.recv().await {
            node.on_rx(&buf, face.as_ref());
        }
    });
}

#[tokio::test]
async fn a_genesis_entry_replicates_to_a_peer() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let repo_a = Arc::new(Repository::open(dir_a.path(), Arc::new(Ed25519Verifier)).unwrap());
    let repo_b = Arc::new(Repository::open(dir_b.path(), Arc::new(Ed25519Verifier)).unwrap());

    let (seed_a, fid_a) = keypair();
    let signer_a = Ed25519Signer::from_seed(&seed_a);
    repo_a.mk_generic_log(fid_a, PacketType::Plain48, b"hello from a", &signer_a, [0u8; 32], 0).unwrap();

    // B has only just heard of A's feed — an empty placeholder, no content yet.
    repo_b.mk_placeholder(fid_a).unwrap();

    let (face_a, face_b) = LoopbackFace::pair();
    let face_a: Arc<dyn Face> = Arc::new(face_a);
    let face_b: Arc<dyn Face> = Arc::new(face_b);

    let (_, fid_me_a) = keypair();
    let node_a = Arc::new(Node::new(vec![face_a.clone()], repo_a.clone(), fid_me_a, vec![]));
    let node_b = Arc::new(Node::new(vec![face_b.clone()], repo_b.clone(), [0xffu8; 32], vec![fid_me_a]));

    pump(node_a.clone(), face_a.clone());
    pump(node_b.clone(), face_b.clone());

    node_b.request_latest(fid_a);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let log_b = repo_b.get_log(&fid_a).unwrap();
    let pkt = log_b.lock().unwrap().read(1).unwrap();
    assert_eq!(&pkt.payload[..12], b"hello from a");
}

#[tokio::test]
async fn blob_store_round_trips_through_persist_chain() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::open(dir.path(), Arc::new(Ed25519Verifier)).unwrap();
    let (seed, fid) = keypair();
    let signer = Ed25519Signer::from_seed(&seed);
    repo.mk_generic_log(fid, PacketType::Plain48, &[0u8; 48], &signer, [0u8; 32], 0).unwrap();
    let log = repo.get_log(&fid).unwrap();

    let content = vec![42u8; 1000];
    let pkt = repo.persist_chain(&log, &content, &signer).unwrap();
    assert_eq!(repo.undo_chain(&pkt).unwrap(), content);
}
