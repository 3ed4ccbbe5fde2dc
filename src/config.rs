//! Run configuration loaded from `Common.cfg` and `PeerInfo.cfg`.
//!
//! Both files are whitespace-delimited with one directive per line.
//! Blank lines and short lines are skipped; unknown keys in
//! `Common.cfg` are ignored. Roster order in `PeerInfo.cfg` defines
//! dial order.

use crate::peer::PeerId;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing key in Common.cfg: {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("malformed peer record: {0}")]
    MalformedPeer(String),
}

/// Immutable run parameters shared by every peer in the swarm.
#[derive(Debug, Clone)]
pub struct CommonConfig {
    /// Preferred-neighbor count `k`.
    pub preferred_neighbors: usize,
    /// Unchoking interval in seconds.
    pub unchoking_interval: u64,
    /// Optimistic-unchoking interval in seconds.
    pub optimistic_unchoking_interval: u64,
    pub file_name: String,
    pub file_size: u64,
    pub piece_size: u64,
}

impl CommonConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut preferred_neighbors = None;
        let mut unchoking_interval = None;
        let mut optimistic_unchoking_interval = None;
        let mut file_name = None;
        let mut file_size = None;
        let mut piece_size = None;

        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };

            match key {
                "NumberOfPreferredNeighbors" => {
                    preferred_neighbors = Some(parse_number(key, value)?);
                }
                "UnchokingInterval" => {
                    unchoking_interval = Some(parse_number(key, value)?);
                }
                "OptimisticUnchokingInterval" => {
                    optimistic_unchoking_interval = Some(parse_number(key, value)?);
                }
                "FileName" => {
                    file_name = Some(value.to_string());
                }
                "FileSize" => {
                    file_size = Some(parse_number(key, value)?);
                }
                "PieceSize" => {
                    piece_size = Some(parse_number(key, value)?);
                }
                _ => {}
            }
        }

        Ok(Self {
            preferred_neighbors: preferred_neighbors
                .ok_or(ConfigError::MissingKey("NumberOfPreferredNeighbors"))?
                as usize,
            unchoking_interval: unchoking_interval
                .ok_or(ConfigError::MissingKey("UnchokingInterval"))?,
            optimistic_unchoking_interval: optimistic_unchoking_interval
                .ok_or(ConfigError::MissingKey("OptimisticUnchokingInterval"))?,
            file_name: file_name.ok_or(ConfigError::MissingKey("FileName"))?,
            file_size: file_size.ok_or(ConfigError::MissingKey("FileSize"))?,
            piece_size: piece_size.ok_or(ConfigError::MissingKey("PieceSize"))?,
        })
    }

    /// Number of pieces the shared file divides into.
    pub fn piece_count(&self) -> u32 {
        self.file_size.div_ceil(self.piece_size) as u32
    }
}

/// One roster entry from `PeerInfo.cfg`.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub id: PeerId,
    pub host: String,
    pub port: u16,
    pub has_file: bool,
}

pub fn load_roster(path: &Path) -> Result<Vec<PeerEntry>, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_roster(&text)
}

pub fn parse_roster(text: &str) -> Result<Vec<PeerEntry>, ConfigError> {
    let mut peers = Vec::new();

    for line in text.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        if parts.len() < 4 {
            return Err(ConfigError::MalformedPeer(line.to_string()));
        }

        let id = parts[0]
            .parse()
            .map_err(|_| ConfigError::MalformedPeer(line.to_string()))?;
        let port = parts[2]
            .parse()
            .map_err(|_| ConfigError::MalformedPeer(line.to_string()))?;

        peers.push(PeerEntry {
            id,
            host: parts[1].to_string(),
            port,
            has_file: parts[3] == "1",
        });
    }

    Ok(peers)
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
