//! Slot store - versioned, append-only secret files
//!
//! Each slot is a directory under the store root. Each version is a file
//! inside it named by the UTC second it was written, so lexicographic
//! order of version ids is chronological order. Entries whose names begin
//! with a dot are never slots or versions (the git directory lives here).

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[cfg(unix)]
use std::fs::Permissions;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use crate::error::VaultError;

/// Format of version ids: ISO-8601 UTC at second resolution
pub const VERSION_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Whether a directory entry is hidden from slot and version listings
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Version id for a point in time
pub fn version_id(at: DateTime<Utc>) -> String {
    at.format(VERSION_FORMAT).to_string()
}

/// Check that a slot name is a single safe path segment
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!(VaultError::InvalidName("name cannot be empty".to_string()));
    }

    if is_hidden(name) {
        bail!(VaultError::InvalidName(format!(
            "{} (names starting with '.' are reserved)",
            name
        )));
    }

    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        bail!(VaultError::InvalidName(format!(
            "{} (must be a single path segment)",
            name
        )));
    }

    Ok(())
}

/// Directory-backed store of named, versioned slots
#[derive(Debug, Clone)]
pub struct SlotStore {
    root: PathBuf,
}

impl SlotStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// The store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a slot's versions
    pub fn slot_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Names of all slots, in filesystem order
    pub fn list_slot_names(&self) -> Result<Vec<String>> {
        visible_entries(&self.root)
            .with_context(|| format!("Failed to list store {}", self.root.display()))
    }

    /// Version ids of a slot, in filesystem order
    pub fn list_versions(&self, name: &str) -> Result<Vec<String>> {
        validate_name(name)?;

        let dir = self.slot_dir(name);
        if !dir.is_dir() {
            bail!(VaultError::NoSuchSlot(name.to_string()));
        }

        visible_entries(&dir).with_context(|| format!("Failed to list slot {}", name))
    }

    /// Path of the newest version of a slot
    pub fn latest_version_path(&self, name: &str) -> Result<PathBuf> {
        let versions = self.list_versions(name)?;

        match versions.into_iter().max() {
            Some(latest) => Ok(self.slot_dir(name).join(latest)),
            None => bail!(VaultError::EmptySlot(name.to_string())),
        }
    }

    /// Write a new version stamped with the current time
    pub fn append_version(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.append_version_at(name, bytes, Utc::now())
    }

    /// Write a new version stamped with `at`
    ///
    /// Creates the slot on first write. Never replaces an existing version:
    /// a second write in the same second fails with `VersionCollision`.
    pub fn append_version_at(&self, name: &str, bytes: &[u8], at: DateTime<Utc>) -> Result<PathBuf> {
        validate_name(name)?;

        let dir = self.slot_dir(name);
        if !dir.is_dir() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create slot {}", dir.display()))?;
            #[cfg(unix)]
            fs::set_permissions(&dir, Permissions::from_mode(0o700))?;
            info!(slot = name, "created slot");
        }

        let path = dir.join(version_id(at));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = match options.open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                bail!(VaultError::VersionCollision(path));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()));
            }
        };

        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!(slot = name, path = %path.display(), size = bytes.len(), "appended version");

        Ok(path)
    }
}

/// Non-hidden entry names of a directory
fn visible_entries(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = vec![];

    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if !is_hidden(&name) {
            names.push(name);
        }
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, secs).unwrap()
    }

    fn kind(err: &anyhow::Error) -> Option<&VaultError> {
        err.downcast_ref::<VaultError>()
    }

    #[test]
    fn test_version_id_format() {
        assert_eq!(version_id(at(0)), "2024-05-01T12:00:00Z");
        assert!(version_id(at(9)) < version_id(at(10)));
    }

    #[test]
    fn test_empty_store_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = SlotStore::new(tmp.path());
        assert!(store.list_slot_names().unwrap().is_empty());
    }

    #[test]
    fn test_hidden_entries_excluded() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join(".DS_Store"), b"").unwrap();

        let store = SlotStore::new(tmp.path());
        store.append_version_at("email", b"one", at(0)).unwrap();

        assert_eq!(store.list_slot_names().unwrap(), vec!["email"]);
    }

    #[test]
    fn test_append_and_latest() {
        let tmp = TempDir::new().unwrap();
        let store = SlotStore::new(tmp.path());

        let first = store.append_version_at("email", b"one", at(5)).unwrap();
        let second = store.append_version_at("email", b"two", at(30)).unwrap();

        assert_eq!(first, tmp.path().join("email").join("2024-05-01T12:00:05Z"));
        assert_eq!(store.latest_version_path("email").unwrap(), second);
        assert_eq!(fs::read(&second).unwrap(), b"two");
        assert_eq!(fs::read(&first).unwrap(), b"one");

        let mut versions = store.list_versions("email").unwrap();
        versions.sort();
        assert_eq!(versions, vec!["2024-05-01T12:00:05Z", "2024-05-01T12:00:30Z"]);
    }

    #[test]
    fn test_latest_ignores_write_order() {
        let tmp = TempDir::new().unwrap();
        let store = SlotStore::new(tmp.path());

        store.append_version_at("db", b"new", at(40)).unwrap();
        store.append_version_at("db", b"old", at(1)).unwrap();

        let latest = store.latest_version_path("db").unwrap();
        assert_eq!(fs::read(latest).unwrap(), b"new");
    }

    #[test]
    fn test_no_such_slot() {
        let tmp = TempDir::new().unwrap();
        let store = SlotStore::new(tmp.path());

        let err = store.latest_version_path("missing").unwrap_err();
        assert!(matches!(kind(&err), Some(VaultError::NoSuchSlot(n)) if n == "missing"));

        // Reads never create slots
        assert!(!tmp.path().join("missing").exists());
    }

    #[test]
    fn test_empty_slot_with_only_hidden_entries() {
        let tmp = TempDir::new().unwrap();
        let slot = tmp.path().join("email");
        fs::create_dir(&slot).unwrap();
        fs::write(slot.join(".keep"), b"").unwrap();

        let store = SlotStore::new(tmp.path());
        let err = store.latest_version_path("email").unwrap_err();
        assert!(matches!(kind(&err), Some(VaultError::EmptySlot(_))));
    }

    #[test]
    fn test_same_second_collision() {
        let tmp = TempDir::new().unwrap();
        let store = SlotStore::new(tmp.path());

        let path = store.append_version_at("email", b"first", at(0)).unwrap();
        let err = store.append_version_at("email", b"second", at(0)).unwrap_err();

        assert!(matches!(kind(&err), Some(VaultError::VersionCollision(p)) if *p == path));
        assert_eq!(fs::read(&path).unwrap(), b"first");
    }

    #[test]
    fn test_existing_slot_dir_is_reused() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("email")).unwrap();

        let store = SlotStore::new(tmp.path());
        store.append_version_at("email", b"x", at(0)).unwrap();
        assert_eq!(store.list_versions("email").unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_names() {
        let tmp = TempDir::new().unwrap();
        let store = SlotStore::new(tmp.path());

        for name in ["", ".git", "..", "a/b", "../escape"] {
            let err = store.append_version_at(name, b"x", at(0)).unwrap_err();
            assert!(
                matches!(kind(&err), Some(VaultError::InvalidName(_))),
                "accepted {:?}",
                name
            );
        }

        assert!(store.list_slot_names().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_version_permissions() {
        let tmp = TempDir::new().unwrap();
        let store = SlotStore::new(tmp.path());

        let path = store.append_version_at("email", b"x", at(0)).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
