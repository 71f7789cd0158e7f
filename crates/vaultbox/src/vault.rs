//! Vault - the user-facing store operations
//!
//! Composes the slot store and the audit log. The codec is supplied by the
//! caller for reads and writes, so listing and initializing never need key
//! material.
//!
//! A write is: encrypt, append a version, commit. The last two steps are
//! not transactional; if the commit fails the version file stays on disk
//! without an audit entry, and the error says so.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[cfg(unix)]
use std::fs::Permissions;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::audit::{self, AuditLog, GitAuditLog};
use crate::codec::SecretCodec;
use crate::config::Config;
use crate::error::VaultError;
use crate::store::{self, SlotStore};

/// Result of `Vault::init`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    AlreadyExists,
    /// The root existed but had no audit log; one was created
    AuditLogCreated,
}

/// The secret store
pub struct Vault {
    store: SlotStore,
    audit: Box<dyn AuditLog>,
    clock: Box<dyn Fn() -> DateTime<Utc>>,
}

impl Vault {
    pub fn new(root: &Path, audit: Box<dyn AuditLog>) -> Self {
        Self {
            store: SlotStore::new(root),
            audit,
            clock: Box::new(Utc::now),
        }
    }

    /// Open the store described by `config`, auditing with git
    ///
    /// The host name is resolved here, once per process.
    pub fn from_config(config: &Config) -> Self {
        let mut log = GitAuditLog::new(&config.dir, &audit::hostname());
        if let Some(author) = config.author() {
            log = log.with_author(author);
        }

        Self::new(&config.dir, Box::new(log))
    }

    /// Replace the time source used for version ids
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// The store root
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Check if the store root exists
    pub fn is_initialized(&self) -> bool {
        self.root().is_dir()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.is_initialized() {
            bail!(VaultError::NotInitialized(self.root().to_path_buf()));
        }
        Ok(())
    }

    fn ensure_audit_log(&self) -> Result<()> {
        if !self.audit.is_initialized() {
            bail!(VaultError::AuditLog(format!(
                "{} has no audit log - run 'vaultbox init'",
                self.root().display()
            )));
        }
        Ok(())
    }

    /// Create the store root and its audit log
    ///
    /// Existing secrets are never touched. A root that is missing its audit
    /// log only gets the log created.
    pub fn init(&self) -> Result<InitOutcome> {
        if self.is_initialized() {
            if self.audit.is_initialized() {
                return Ok(InitOutcome::AlreadyExists);
            }

            self.audit.init()?;
            warn!(root = %self.root().display(), "created missing audit log");
            return Ok(InitOutcome::AuditLogCreated);
        }

        fs::create_dir_all(self.root())
            .with_context(|| format!("Failed to create {}", self.root().display()))?;
        #[cfg(unix)]
        fs::set_permissions(self.root(), Permissions::from_mode(0o700))?;

        if let Err(e) = self.audit.init() {
            // Remove the fresh root so the next init starts over
            let _ = fs::remove_dir_all(self.root());
            return Err(e);
        }

        info!(root = %self.root().display(), "initialized store");
        Ok(InitOutcome::Created)
    }

    /// Names of all stored secrets
    pub fn list(&self) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        self.store.list_slot_names()
    }

    /// Version ids of a secret, oldest first
    pub fn versions(&self, name: &str) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        let mut versions = self.store.list_versions(name)?;
        versions.sort();
        Ok(versions)
    }

    /// Path of a secret's newest version
    pub fn latest_path(&self, name: &str) -> Result<PathBuf> {
        self.ensure_initialized()?;
        self.store.latest_version_path(name)
    }

    /// Decrypt one version file
    pub fn read_version(&self, path: &Path, codec: &dyn SecretCodec) -> Result<Vec<u8>> {
        let ciphertext =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        codec.decrypt(&ciphertext)
    }

    /// Decrypt the newest version of a secret
    pub fn read(&self, name: &str, codec: &dyn SecretCodec) -> Result<Vec<u8>> {
        let path = self.latest_path(name)?;
        self.read_version(&path, codec)
    }

    /// Encrypt and store a new version of a secret, then record it
    pub fn write(&self, name: &str, plaintext: &[u8], codec: &dyn SecretCodec) -> Result<PathBuf> {
        self.ensure_initialized()?;
        self.ensure_audit_log()?;
        store::validate_name(name)?;

        let ciphertext = codec.encrypt(plaintext)?;
        let path = self
            .store
            .append_version_at(name, &ciphertext, (self.clock)())?;

        self.audit
            .commit(&[self.store.slot_dir(name), path.clone()])
            .with_context(|| format!("{} was written but not recorded", path.display()))?;

        info!(slot = name, "stored new version");
        Ok(path)
    }

    /// Recent audit entries, newest first
    pub fn history(&self, limit: usize) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        self.audit.history(limit)
    }
}
