use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tandem_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No payload provided for a {0} change")]
    EmptyPayload(String),
    #[error("Identifier cannot be empty")]
    EmptyIdentifier,
    #[error("Change not found for id/prefix: {0}")]
    ChangeNotFound(String),
    #[error("Conflict not found for id/prefix: {0}")]
    ConflictNotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Simulation needs at least one peer")]
    NoPeers,
    #[error("A sync cycle was already running")]
    CycleSkipped,
}
