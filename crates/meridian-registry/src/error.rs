//! Error types for the service-node registry.

use thiserror::Error;

/// Registry errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A block arrived at a height other than the registry cursor. This is
    /// a fatal programming error in the driver.
    #[error("height invariant broken: registry is at {cursor}, block is at {block}")]
    HeightInvariantBroken { cursor: u64, block: u64 },

    /// A detach walked past the journal horizon. The caller must rebuild
    /// the registry from the activation height.
    #[error("rollback horizon exceeded at height {0}, registry must be rebuilt")]
    UnreachableRollback(u64),

    /// Coinbase validation failed.
    #[error(transparent)]
    Consensus(#[from] meridian_consensus::ConsensusError),

    /// Persisted state failed to decode.
    #[error("corrupt registry blob: {0}")]
    CorruptState(meridian_types::TypeError),

    /// Persisted state carries an unknown format version.
    #[error("unsupported registry blob version {0}")]
    UnsupportedVersion(u64),

    /// The backing store failed.
    #[error("registry store error: {0}")]
    Store(#[from] std::io::Error),

    /// There is no persisted state to load.
    #[error("no persisted registry state")]
    NoPersistedState,
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
