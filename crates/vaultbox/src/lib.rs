//! vaultbox - Versioned secret store
//!
//! "Never lose an old password, never forget who changed it."
//!
//! Every secret lives in a named slot. Writing a slot never replaces
//! anything: each write adds a new encrypted version file named by its
//! UTC timestamp, and the whole store is a git repository so every write
//! also leaves a commit saying when and from which host it happened.
//!
//! Layout:
//!
//! ```text
//! <root>/.git/                        audit trail (hidden from listings)
//! <root>/<slot>/2024-05-01T12:00:00Z  one ciphertext per version
//! ```
//!
//! Known leaks: slot names, number of versions per slot, approximate
//! secret sizes and write timestamps are all visible without the key.

pub mod audit;
pub mod codec;
pub mod config;
pub mod error;
pub mod generator;
pub mod store;
pub mod vault;

pub use audit::{AuditLog, GitAuditLog};
pub use codec::{AgeCodec, GpgCodec, SecretCodec};
pub use config::{CodecKind, Config};
pub use error::VaultError;
pub use generator::generate;
pub use store::SlotStore;
pub use vault::{InitOutcome, Vault};
