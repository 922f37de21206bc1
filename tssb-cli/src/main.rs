mod config;
mod error;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use tssb_core::crypto::Ed25519Verifier;
use tssb_core::keystore::KeyStore;
use tssb_core::packet::PacketType;
use tssb_node::Node;
use tssb_repo::Repository;
use tssb_transport::{Face, UdpMulticastFace};

use config::{Config, FaceConfig};
use error::CliError;

#[derive(Parser)]
#[command(author, version, about = "tinySSB log replication node")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh repository, generate the local keypair, and write a config file.
    Init {
        #[arg(long)]
        repo: PathBuf,
        #[arg(long, default_value = "local")]
        name: String,
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Run the node: open the repo, bring up faces, start replicating.
    Run {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Print the sequence number and length of every feed in the repo.
    Status {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Init { repo, name, config } => cmd_init(repo, name, config),
        Command::Run { config } => cmd_run(config).await,
        Command::Status { config } => cmd_status(config),
    }
}

fn cmd_init(repo: PathBuf, name: String, config_path: PathBuf) -> Result<(), CliError> {
    Repository::open(&repo, Arc::new(Ed25519Verifier))?;

    let mut keystore = KeyStore::new();
    let fid = keystore.generate(name.clone());
    std::fs::write(repo.join("keystore.json"), serde_json::to_string_pretty(&keystore.to_json())?)?;

    let cfg = Config {
        repo_path: repo.clone(),
        local_feed_name: name,
        local_fid: hex::encode(fid),
        peers: Vec::new(),
        faces: vec![FaceConfig::Loopback],
    };
    cfg.save(&config_path)?;

    info!(fid = %hex::encode(fid), repo = %repo.display(), "initialized tinyssb node");
    Ok(())
}

async fn cmd_run(config_path: PathBuf) -> Result<(), CliError> {
    let cfg = Config::load(&config_path)?;
    let verifier = Arc::new(Ed25519Verifier);
    let repo = Arc::new(Repository::open(&cfg.repo_path, verifier)?);

    let keystore_raw = std::fs::read_to_string(cfg.repo_path.join("keystore.json"))?;
    let keystore = Arc::new(Mutex::new(KeyStore::from_json(&serde_json::from_str(&keystore_raw)?)));

    let local_fid = cfg.local_fid_bytes()?;
    let peers = cfg.peer_fids()?;

    if repo.get_log(&local_fid).is_err() {
        let signer = keystore
            .lock()
            .expect("keystore lock poisoned")
            .signer_for(&local_fid)
            .map_err(|_| CliError::UnknownFeedName(cfg.local_feed_name.clone()))?;
        repo.mk_generic_log(local_fid, PacketType::Plain48, &[0u8; 48], &signer, [0u8; 32], 0)?;
    }

    for peer in &peers {
        let _ = repo.mk_placeholder(*peer);
    }

    let mut faces: Vec<Arc<dyn Face>> = Vec::new();
    for face_cfg in &cfg.faces {
        match face_cfg {
            FaceConfig::UdpMulticast { group, port } => {
                let face = UdpMulticastFace::join(*group, *port, Duration::ZERO).await?;
                faces.push(Arc::new(face));
            }
            FaceConfig::Loopback => {
                // A standalone loopback face has no peer to talk to; it
                // only exists so `run` works with an empty face list too.
                let (a, _b) = tssb_transport::LoopbackFace::pair();
                faces.push(Arc::new(a));
            }
        }
    }

    let node = Arc::new(Node::new(faces.clone(), repo.clone(), local_fid, peers));

    for face in &faces {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        face.clone().spawn_recv(tx);
        let node = node.clone();
        let face = face.clone();
        let _pump_handle = tokio::spawn(async move {
            while let Some(buf) = rx.recv().await {
                node.on_rx(&buf, face.as_ref());
            }
        });
    }

    let _arq_handle = node.clone().run_arq_loop(Duration::from_secs(10));

    info!(fid = %hex::encode(local_fid), "node running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.ok();
    Ok(())
}

fn cmd_status(config_path: PathBuf) -> Result<(), CliError> {
    let cfg = Config::load(&config_path)?;
    let repo = Repository::open(&cfg.repo_path, Arc::new(Ed25519Verifier))?;

    for fid in repo.list_logs()? {
        let log = repo.get_log(&fid)?;
        let l = log.lock().expect("log lock poisoned");
        println!("{}  seq={}  len={}", hex::encode(fid), l.front_seq, l.len());
    }
    Ok(())
}

