//! On-disk node configuration: repo path, local keypair name, peers, faces.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CliError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub repo_path: PathBuf,
    pub local_feed_name: String,
    pub local_fid: String,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub faces: Vec<FaceConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaceConfig {
    UdpMulticast { group: Ipv4Addr, port: u16 },
    Loopback,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), CliError> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn local_fid_bytes(&self) -> Result<[u8; 32], CliError> {
        decode_fid(&self.local_fid)
    }

    pub fn peer_fids(&self) -> Result<Vec<[u8; 32]>, CliError> {
        self.peers.iter().map(|p| decode_fid(p)).collect()
    }
}

fn decode_fid(s: &str) -> Result<[u8; 32], CliError> {
    let bytes = hex::decode(s)?;
    bytes.try_into().map_err(|_| CliError::BadFidLength("feed id"))
}
