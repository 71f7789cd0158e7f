//! Vault error taxonomy

use std::path::PathBuf;
use thiserror::Error;

/// Vault-specific errors
///
/// Operations return `anyhow::Result` and raise these with `bail!`, so
/// callers that care about the kind use `err.downcast_ref::<VaultError>()`.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Store not initialized at {} - run 'vaultbox init' first", .0.display())]
    NotInitialized(PathBuf),

    #[error("No such password: {0}")]
    NoSuchSlot(String),

    #[error("Password list for {0} is empty")]
    EmptySlot(String),

    #[error("Version already exists: {} (two writes within the same second?)", .0.display())]
    VersionCollision(PathBuf),

    #[error("Audit log error: {0}")]
    AuditLog(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Random generator exhausted after {0} attempts")]
    GeneratorExhausted(u32),

    #[error("Invalid slot name: {0}")]
    InvalidName(String),
}
