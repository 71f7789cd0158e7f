//! Secret codecs - wrap and unwrap secret payloads
//!
//! The store only ever sees ciphertext. A codec is bound to one recipient
//! key id when it is built; any failure surfaces as `VaultError::Codec`
//! before the store is touched.

use age::armor::{ArmoredReader, ArmoredWriter, Format};
use anyhow::{bail, Context, Result};
use std::fmt::Display;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::{CodecKind, Config};
use crate::error::VaultError;

/// Encrypts plaintext for a configured recipient and decrypts it again
pub trait SecretCodec {
    /// Short name for messages
    fn name(&self) -> &str;

    /// Encrypt plaintext for the configured recipient
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a blob produced by `encrypt`
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

fn codec_err<E: Display>(e: E) -> VaultError {
    VaultError::Codec(e.to_string())
}

/// age encryption (X25519 + ChaCha20-Poly1305), ASCII-armored
pub struct AgeCodec {
    recipient: age::x25519::Recipient,
    identity: Option<age::x25519::Identity>,
}

impl AgeCodec {
    /// Build from a recipient key id (`age1...`) and an optional identity file
    ///
    /// Without an identity the codec can still encrypt; decrypting fails.
    pub fn new(key: &str, identity_path: Option<&Path>) -> Result<Self> {
        let recipient = key
            .trim()
            .parse::<age::x25519::Recipient>()
            .map_err(|e| VaultError::Codec(format!("Invalid recipient {}: {}", key, e)))?;

        let identity = match identity_path {
            Some(path) if path.exists() => Some(load_identity(path)?),
            _ => None,
        };

        Ok(Self {
            recipient,
            identity,
        })
    }

    /// Build from an identity file alone, encrypting to its own public key
    pub fn from_identity_file(path: &Path) -> Result<Self> {
        Ok(Self::from_identity(load_identity(path)?))
    }

    /// Build from an identity, encrypting to its own public key
    pub fn from_identity(identity: age::x25519::Identity) -> Self {
        Self {
            recipient: identity.to_public(),
            identity: Some(identity),
        }
    }
}

/// Load an X25519 identity, skipping `age-keygen` comment lines
fn load_identity(path: &Path) -> Result<age::x25519::Identity> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read identity key {}", path.display()))?;

    let line = content
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("AGE-SECRET-KEY-"))
        .ok_or_else(|| VaultError::Codec(format!("No identity found in {}", path.display())))?;

    line.parse::<age::x25519::Identity>()
        .map_err(|e| VaultError::Codec(format!("Failed to parse identity: {}", e)).into())
}

impl SecretCodec for AgeCodec {
    fn name(&self) -> &str {
        "age"
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let recipients: Vec<Box<dyn age::Recipient + Send>> =
            vec![Box::new(self.recipient.clone())];
        let encryptor = age::Encryptor::with_recipients(recipients)
            .ok_or_else(|| VaultError::Codec("No recipients".to_string()))?;

        let mut encrypted = vec![];
        let armored =
            ArmoredWriter::wrap_output(&mut encrypted, Format::AsciiArmor).map_err(codec_err)?;
        let mut writer = encryptor.wrap_output(armored).map_err(codec_err)?;

        writer.write_all(plaintext).map_err(codec_err)?;
        writer
            .finish()
            .and_then(|armor| armor.finish())
            .map_err(codec_err)?;

        Ok(encrypted)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let identity = match &self.identity {
            Some(identity) => identity,
            None => bail!(VaultError::Codec(
                "No identity key configured for decryption".to_string()
            )),
        };

        // Accepts both armored and binary age files
        let decryptor = match age::Decryptor::new(ArmoredReader::new(ciphertext))
            .map_err(codec_err)?
        {
            age::Decryptor::Recipients(d) => d,
            _ => bail!(VaultError::Codec(
                "Unexpected passphrase encryption".to_string()
            )),
        };

        let mut decrypted = vec![];
        let mut reader = decryptor
            .decrypt(std::iter::once(identity as &dyn age::Identity))
            .map_err(codec_err)?;
        reader.read_to_end(&mut decrypted).map_err(codec_err)?;

        Ok(decrypted)
    }
}

/// GnuPG, driven through the `gpg` binary
pub struct GpgCodec {
    key: String,
    homedir: Option<PathBuf>,
}

impl GpgCodec {
    pub fn new(key: &str, homedir: Option<&Path>) -> Self {
        Self {
            key: key.to_string(),
            homedir: homedir.map(Path::to_path_buf),
        }
    }

    fn gpg(&self, args: &[&str], input: &[u8]) -> Result<Vec<u8>> {
        let mut cmd = Command::new("gpg");
        cmd.args(["--quiet", "--yes", "--batch"]);

        if let Some(dir) = &self.homedir {
            cmd.arg("--homedir").arg(dir);
        }

        let mut child = cmd
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VaultError::Codec(format!("Failed to run gpg: {}", e)))?;

        // Feed stdin from a thread so a large output can't block the write
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VaultError::Codec("gpg stdin unavailable".to_string()))?;
        let input = input.to_vec();
        let feeder = std::thread::spawn(move || stdin.write_all(&input));

        let output = child.wait_with_output().map_err(codec_err)?;
        let fed = feeder
            .join()
            .map_err(|_| VaultError::Codec("gpg input thread panicked".to_string()))?;

        if !output.status.success() {
            bail!(VaultError::Codec(format!(
                "gpg failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        fed.map_err(codec_err)?;

        Ok(output.stdout)
    }
}

impl SecretCodec for GpgCodec {
    fn name(&self) -> &str {
        "gpg"
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.gpg(&["--armor", "--encrypt", "--recipient", &self.key], plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.gpg(&["--decrypt"], ciphertext)
    }
}

/// Build the codec a configuration asks for
///
/// With age and no `key`, secrets are encrypted to the identity's own
/// public key.
pub fn from_config(config: &Config) -> Result<Box<dyn SecretCodec>> {
    match config.codec {
        CodecKind::Age => match config.key.as_deref() {
            Some(key) => Ok(Box::new(AgeCodec::new(key, Some(&config.identity))?)),
            None if config.identity.exists() => {
                Ok(Box::new(AgeCodec::from_identity_file(&config.identity)?))
            }
            None => bail!(
                "No encryption key configured - set `key` or create an age identity at {}",
                config.identity.display()
            ),
        },
        CodecKind::Gpg => Ok(Box::new(GpgCodec::new(
            config.require_key()?,
            config.gpg_homedir.as_deref(),
        ))),
    }
}
