//! # meridian-checkpoints
//!
//! An append-only height-to-hash map pinning the main chain.
//!
//! Checkpoints come from three places: the hard-coded per-network table, a
//! JSON file (`{"hashlines": [{"height": …, "hash": "…"}]}`), and DNS TXT
//! records of the form `<height>:<hex-hash>` served from DNSSEC-validated
//! domains. Conflicting entries for a height are refused; identical
//! re-insertion is idempotent.

use meridian_consensus::Network;
use meridian_types::Hash;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Checkpoint errors.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// A different hash is already pinned at the height.
    #[error("checkpoint conflict at height {height}: have {have}, got {got}")]
    Conflict {
        height: u64,
        have: Hash,
        got: Hash,
    },

    /// The hash string failed to parse.
    #[error("invalid checkpoint hash: {0}")]
    InvalidHash(String),

    /// The checkpoint file failed to read or parse.
    #[error("failed to load checkpoint file: {0}")]
    File(#[from] std::io::Error),

    /// The checkpoint file is not valid JSON of the expected shape.
    #[error("malformed checkpoint file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[derive(Deserialize)]
struct HashLine {
    height: u64,
    hash: String,
}

#[derive(Deserialize)]
struct HashFile {
    hashlines: Vec<HashLine>,
}

/// The checkpoint set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointSet {
    points: BTreeMap<u64, Hash>,
}

impl CheckpointSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set preloaded with the hard-coded table for a network.
    pub fn with_defaults(network: Network) -> Self {
        let mut set = Self::new();
        if matches!(network, Network::Testnet | Network::Stagenet) {
            return set;
        }
        for (height, hash) in [
            (0u64, "85bb9128c170896673aa1b47f2c7d238f77b6c6f06cd7f25b399747d5015577e"),
            (1, "ed1dd5a452b32bdc13cd11aee5e2485ca69d2a2ae8beb1e28e7da2d30959c799"),
            (8, "5311cf4bd7a02cb267f89bf9e727aeaf27f669468979876fbd42c3f6a2ed0808"),
            (100, "a46c1f2818fe83cb65b6a83dc9c4c50eb7eaa00e6a8acf3716549c220f5815cc"),
            (45_000, "e632e631eeb62c94c40c19c9eb5f04d11f634477e9293cde889a4478c85ef16f"),
            (106_950, "c00fa5ecd7c2e08f6b88f39a3fd3acc31e9ee5ef2872e0543324d2c58ad2c57c"),
            (181_056, "180d0ac84048d1dd57126c38b53c353df90fa73aeb60def9359e21e55b4b2946"),
        ] {
            // The hard-coded table cannot conflict with itself.
            if let Err(e) = set.add_checkpoint_str(height, hash) {
                warn!(height, error = %e, "skipping malformed built-in checkpoint");
            }
        }
        set
    }

    /// Pin a hash at a height. Idempotent for an identical hash, an error
    /// for a different one.
    pub fn add_checkpoint(&mut self, height: u64, hash: Hash) -> CheckpointResult<()> {
        if let Some(&existing) = self.points.get(&height) {
            if existing != hash {
                return Err(CheckpointError::Conflict {
                    height,
                    have: existing,
                    got: hash,
                });
            }
            return Ok(());
        }
        self.points.insert(height, hash);
        Ok(())
    }

    /// Pin a hex-encoded hash at a height.
    pub fn add_checkpoint_str(&mut self, height: u64, hash: &str) -> CheckpointResult<()> {
        let hash =
            Hash::from_hex(hash).map_err(|_| CheckpointError::InvalidHash(hash.to_string()))?;
        self.add_checkpoint(height, hash)
    }

    /// Whether the height is at or below the highest checkpoint.
    pub fn is_in_checkpoint_zone(&self, height: u64) -> bool {
        self.points
            .last_key_value()
            .is_some_and(|(&max, _)| height <= max)
    }

    /// A block passes when its height is not checkpointed or the hash
    /// matches the pin.
    pub fn check_block(&self, height: u64, hash: &Hash) -> bool {
        match self.points.get(&height) {
            None => true,
            Some(expected) if expected == hash => {
                info!(height, %hash, "checkpoint passed");
                true
            }
            Some(expected) => {
                warn!(height, %expected, got = %hash, "checkpoint failed");
                false
            }
        }
    }

    /// Whether an alternative block at `block_height` may attach when the
    /// main chain is at `blockchain_height`: only above the last
    /// checkpoint at or below the current chain height, and never at the
    /// genesis height.
    pub fn is_alternative_block_allowed(&self, blockchain_height: u64, block_height: u64) -> bool {
        if block_height == 0 {
            return false;
        }
        let last_checkpoint = self
            .points
            .range(..=blockchain_height)
            .next_back()
            .map(|(&height, _)| height);
        match last_checkpoint {
            None => true,
            Some(checkpoint_height) => checkpoint_height < block_height,
        }
    }

    /// The highest checkpointed height (zero when empty).
    pub fn max_height(&self) -> u64 {
        self.points
            .last_key_value()
            .map(|(&height, _)| height)
            .unwrap_or(0)
    }

    /// The pinned points.
    pub fn points(&self) -> &BTreeMap<u64, Hash> {
        &self.points
    }

    /// Check that another set carries no conflicting pins.
    pub fn check_for_conflicts(&self, other: &CheckpointSet) -> bool {
        other.points.iter().all(|(height, hash)| {
            self.points
                .get(height)
                .map_or(true, |existing| existing == hash)
        })
    }

    /// Load checkpoints from a JSON file. Entries at or below the current
    /// maximum height are ignored. A missing file is not an error.
    pub fn load_from_json(&mut self, path: impl AsRef<Path>) -> CheckpointResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no checkpoint file present");
            return Ok(());
        }

        let prev_max_height = self.max_height();
        let raw = std::fs::read(path)?;
        let file: HashFile = serde_json::from_slice(&raw)?;
        for line in file.hashlines {
            if line.height <= prev_max_height {
                debug!(height = line.height, "ignoring checkpoint below the current maximum");
                continue;
            }
            self.add_checkpoint_str(line.height, &line.hash)?;
            info!(height = line.height, hash = %line.hash, "added checkpoint from file");
        }
        Ok(())
    }

    /// Consume DNS TXT records of the form `<height>:<hex-hash>`. Invalid
    /// records are skipped. Fails only on a conflicting valid record.
    pub fn load_from_dns_records<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a str>,
    ) -> CheckpointResult<()> {
        for record in records {
            let Some((height_part, hash_part)) = record.split_once(':') else {
                continue;
            };
            let Ok(height) = height_part.trim().parse::<u64>() else {
                continue;
            };
            let Ok(hash) = Hash::from_hex(hash_part.trim()) else {
                continue;
            };
            self.add_checkpoint(height, hash)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn h(byte: u8) -> Hash {
        Hash::from_bytes([byte; 32])
    }

    #[test]
    fn add_is_idempotent_and_conflicts_fail() {
        let mut set = CheckpointSet::new();
        set.add_checkpoint(10, h(1)).unwrap();
        set.add_checkpoint(10, h(1)).unwrap();
        let err = set.add_checkpoint(10, h(2)).unwrap_err();
        assert!(matches!(err, CheckpointError::Conflict { height: 10, .. }));
    }

    #[test]
    fn check_block_only_fails_on_mismatch() {
        let mut set = CheckpointSet::new();
        set.add_checkpoint(10, h(1)).unwrap();
        assert!(set.check_block(9, &h(9)));
        assert!(set.check_block(10, &h(1)));
        assert!(!set.check_block(10, &h(2)));
    }

    #[test]
    fn zone_and_max_height() {
        let mut set = CheckpointSet::new();
        assert!(!set.is_in_checkpoint_zone(0));
        set.add_checkpoint(5, h(1)).unwrap();
        set.add_checkpoint(50, h(2)).unwrap();
        assert!(set.is_in_checkpoint_zone(50));
        assert!(!set.is_in_checkpoint_zone(51));
        assert_eq!(set.max_height(), 50);
    }

    #[test]
    fn alternative_blocks_above_last_checkpoint() {
        let mut set = CheckpointSet::new();
        set.add_checkpoint(10, h(1)).unwrap();
        set.add_checkpoint(20, h(2)).unwrap();

        // Never at genesis.
        assert!(!set.is_alternative_block_allowed(30, 0));
        // Last checkpoint at or below a chain height of 15 is 10.
        assert!(set.is_alternative_block_allowed(15, 11));
        assert!(!set.is_alternative_block_allowed(15, 10));
        // Chain past both checkpoints: must fork above 20.
        assert!(!set.is_alternative_block_allowed(30, 15));
        assert!(set.is_alternative_block_allowed(30, 21));
        // Chain before the first checkpoint: anything goes.
        assert!(set.is_alternative_block_allowed(5, 3));
    }

    #[test]
    fn default_mainnet_table() {
        let set = CheckpointSet::with_defaults(Network::Mainnet);
        assert_eq!(set.max_height(), 181_056);
        assert_eq!(set.points().len(), 7);
        assert!(CheckpointSet::with_defaults(Network::Testnet)
            .points()
            .is_empty());
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"hashlines": [
                {{"height": 5, "hash": "{}"}},
                {{"height": 7, "hash": "{}"}}
            ]}}"#,
            h(5),
            h(7)
        )
        .unwrap();

        let mut set = CheckpointSet::new();
        set.load_from_json(&path).unwrap();
        assert_eq!(set.points().len(), 2);
        assert!(set.check_block(5, &h(5)));
        assert!(set.check_block(7, &h(7)));
    }

    #[test]
    fn json_file_ignores_entries_below_current_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        std::fs::write(
            &path,
            format!(r#"{{"hashlines": [{{"height": 3, "hash": "{}"}}]}}"#, h(3)),
        )
        .unwrap();

        let mut set = CheckpointSet::new();
        set.add_checkpoint(10, h(1)).unwrap();
        set.load_from_json(&path).unwrap();
        assert_eq!(set.points().len(), 1);
    }

    #[test]
    fn missing_file_is_fine() {
        let mut set = CheckpointSet::new();
        set.load_from_json("/nonexistent/checkpoints.json").unwrap();
        assert!(set.points().is_empty());
    }

    #[test]
    fn dns_records_skip_garbage() {
        let mut set = CheckpointSet::new();
        let good = format!("12:{}", h(4));
        let records = [
            good.as_str(),
            "not-a-record",
            "abc:def",
            "13:deadbeef", // wrong hash length
        ];
        set.load_from_dns_records(records).unwrap();
        assert_eq!(set.points().len(), 1);
        assert!(set.check_block(12, &h(4)));
    }
}
