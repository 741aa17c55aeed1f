//! Versioned binary persistence of the registry state.
//!
//! The snapshot carries the cursor height, every node entry, the retained
//! quorum states and the rollback journal, in the declared field order.
//! Storage backends are swappable behind [`RegistryStore`]; the heavy
//! database engine lives outside this crate.

use crate::info::ServiceNodeInfo;
use crate::quorum::QuorumState;
use crate::rollback::RollbackEvent;
use crate::{RegistryError, RegistryResult};
use meridian_types::{ByteReader, ByteWriter, PublicKey};
use parking_lot::Mutex;
use std::io;
use std::path::PathBuf;

/// Current snapshot format version.
const FORMAT_VERSION: u64 = 1;

/// Blob storage for the registry snapshot.
pub trait RegistryStore: Send + Sync {
    /// Replace the stored snapshot.
    fn save(&self, blob: &[u8]) -> io::Result<()>;
    /// Fetch the stored snapshot, if any.
    fn load(&self) -> io::Result<Option<Vec<u8>>>;
    /// Drop the stored snapshot.
    fn clear(&self) -> io::Result<()>;
}

/// In-memory store for tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryStore {
    blob: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    /// Fresh empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for MemoryStore {
    fn save(&self, blob: &[u8]) -> io::Result<()> {
        *self.blob.lock() = Some(blob.to_vec());
        Ok(())
    }

    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.blob.lock().clone())
    }

    fn clear(&self) -> io::Result<()> {
        *self.blob.lock() = None;
        Ok(())
    }
}

/// Single-file store.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RegistryStore for FileStore {
    fn save(&self, blob: &[u8]) -> io::Result<()> {
        // Write-then-rename so a crash never leaves a torn snapshot.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// A decoded snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersistedState {
    /// Registry cursor height.
    pub height: u64,
    /// Node entries.
    pub infos: Vec<(PublicKey, ServiceNodeInfo)>,
    /// Retained quorum states by height.
    pub quorum_states: Vec<(u64, QuorumState)>,
    /// The rollback journal, oldest first.
    pub events: Vec<RollbackEvent>,
}

/// Serialize a snapshot.
pub fn serialize_state(state: &PersistedState) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.put_varint(FORMAT_VERSION);
    w.put_varint(state.height);
    w.put_varint(state.infos.len() as u64);
    for (key, info) in &state.infos {
        w.put_bytes(key.as_bytes());
        info.write(&mut w);
    }
    w.put_varint(state.quorum_states.len() as u64);
    for (height, quorum) in &state.quorum_states {
        w.put_varint(*height);
        quorum.write(&mut w);
    }
    w.put_varint(state.events.len() as u64);
    for event in &state.events {
        event.write(&mut w);
    }
    w.into_bytes()
}

/// Parse a snapshot.
pub fn deserialize_state(blob: &[u8]) -> RegistryResult<PersistedState> {
    let mut r = ByteReader::new(blob);
    let version = r.get_varint("format version").map_err(RegistryError::CorruptState)?;
    if version != FORMAT_VERSION {
        return Err(RegistryError::UnsupportedVersion(version));
    }
    let height = r.get_varint("height").map_err(RegistryError::CorruptState)?;

    let info_count = r.get_varint("info count").map_err(RegistryError::CorruptState)? as usize;
    let mut infos = Vec::with_capacity(info_count);
    for _ in 0..info_count {
        let key = PublicKey(r.get_array32("node key").map_err(RegistryError::CorruptState)?);
        let info = ServiceNodeInfo::read(&mut r).map_err(RegistryError::CorruptState)?;
        infos.push((key, info));
    }

    let quorum_count = r
        .get_varint("quorum count")
        .map_err(RegistryError::CorruptState)? as usize;
    let mut quorum_states = Vec::with_capacity(quorum_count);
    for _ in 0..quorum_count {
        let height = r
            .get_varint("quorum height")
            .map_err(RegistryError::CorruptState)?;
        let state = QuorumState::read(&mut r).map_err(RegistryError::CorruptState)?;
        quorum_states.push((height, state));
    }

    let event_count = r
        .get_varint("event count")
        .map_err(RegistryError::CorruptState)? as usize;
    let mut events = Vec::with_capacity(event_count);
    for _ in 0..event_count {
        events.push(RollbackEvent::read(&mut r).map_err(RegistryError::CorruptState)?);
    }

    Ok(PersistedState {
        height,
        infos,
        quorum_states,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::Contribution;
    use meridian_types::{AccountAddress, Hash};

    fn sample_state() -> PersistedState {
        let key = PublicKey::from_bytes([1; 32]);
        let info = ServiceNodeInfo {
            registration_height: 10,
            contributors: vec![Contribution::reserved(500, AccountAddress::NULL)],
            total_reserved: 500,
            staking_requirement: 500,
            ..Default::default()
        };
        let quorum = QuorumState::select(&[key], &Hash::from_bytes([2; 32]));
        PersistedState {
            height: 42,
            infos: vec![(key, info.clone())],
            quorum_states: vec![(41, quorum)],
            events: vec![
                RollbackEvent::PreventBefore { block_height: 12 },
                RollbackEvent::Change {
                    block_height: 41,
                    key,
                    prior: info,
                },
            ],
        }
    }

    #[test]
    fn snapshot_round_trip() {
        let state = sample_state();
        let blob = serialize_state(&state);
        assert_eq!(deserialize_state(&blob).unwrap(), state);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut blob = serialize_state(&sample_state());
        blob[0] = 0x63;
        assert!(matches!(
            deserialize_state(&blob),
            Err(RegistryError::UnsupportedVersion(0x63))
        ));
    }

    #[test]
    fn truncated_snapshot_is_corrupt() {
        let blob = serialize_state(&sample_state());
        assert!(matches!(
            deserialize_state(&blob[..blob.len() - 3]),
            Err(RegistryError::CorruptState(_))
        ));
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(b"blob").unwrap();
        assert_eq!(store.load().unwrap().unwrap(), b"blob");
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("registry.bin"));
        assert!(store.load().unwrap().is_none());
        store.save(b"snapshot").unwrap();
        assert_eq!(store.load().unwrap().unwrap(), b"snapshot");
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }
}
