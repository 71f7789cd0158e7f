//! Random secret generation
//!
//! Draws bytes from the OS random source and keeps only those that are
//! already in the `[A-Za-z0-9_]` alphabet. Rejection rather than modulo
//! reduction keeps every accepted character equally likely.

use anyhow::{bail, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;

use crate::error::VaultError;

/// Default length for generated secrets
pub const DEFAULT_LENGTH: usize = 12;

/// Longest secret `generate` will produce
pub const MAX_LENGTH: usize = 4096;

/// Random bytes drawn per requested character
const OVERSAMPLE: usize = 24;

/// Fresh draws attempted before giving up
pub const MAX_ATTEMPTS: u32 = 1000;

/// Whether a byte belongs to the generated alphabet
pub fn is_allowed(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Generate a random string of exactly `length` characters from `[A-Za-z0-9_]`
pub fn generate(length: usize) -> Result<String> {
    generate_with(&mut OsRng, length)
}

/// Generate from an explicit random source
pub fn generate_with<R: RngCore + ?Sized>(rng: &mut R, length: usize) -> Result<String> {
    if length == 0 {
        bail!("Secret length must be positive");
    }
    if length > MAX_LENGTH {
        bail!("Secret length {} exceeds the maximum of {}", length, MAX_LENGTH);
    }

    let pool_size = match length.checked_mul(OVERSAMPLE) {
        Some(size) => size,
        None => bail!("Secret length {} is too large", length),
    };
    let mut pool = vec![0u8; pool_size];

    for attempt in 1..=MAX_ATTEMPTS {
        rng.fill_bytes(&mut pool);

        let accepted: String = pool
            .iter()
            .copied()
            .filter(|b| is_allowed(*b))
            .take(length)
            .map(char::from)
            .collect();

        if accepted.len() == length {
            return Ok(accepted);
        }

        warn!(attempt, "random draw yielded too few usable characters, retrying");
    }

    bail!(VaultError::GeneratorExhausted(MAX_ATTEMPTS))
}
