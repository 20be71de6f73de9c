//! License key generation and validation.
//!
//! Keys have the form `XXXXXXXX-XXXXXXXX-XXXXXXXX-XXXXXXXX`: 32 uppercase hex
//! characters in four groups of eight, 35 characters in total.
//!
//! # Derivation
//!
//! 32 bytes are drawn from the operating system's secure random source and
//! passed through SHA-256. The first 32 hex characters of the digest are
//! uppercased and grouped. The key therefore carries no information about when
//! or for whom it was generated, and collisions are bounded by the 128 bits
//! of digest that survive truncation.
//!
//! ```rust,ignore
//! use tollgate::license_key::{generate_license_key, validate_license_key_format};
//!
//! let key = generate_license_key()?;
//! assert!(validate_license_key_format(&key));
//! ```

use std::future::Future;
use std::sync::OnceLock;

use rand::rngs::OsRng;
use rand::TryRngCore;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::errors::{LicenseError, LicenseResult};

/// Number of hyphen-separated groups in a key.
pub const KEY_GROUPS: usize = 4;

/// Characters per group.
pub const GROUP_LENGTH: usize = 8;

/// Total key length including separators.
pub const KEY_LENGTH: usize = KEY_GROUPS * GROUP_LENGTH + (KEY_GROUPS - 1);

/// Bytes of randomness drawn per key.
const SEED_BYTES: usize = 32;

/// Bytes of randomness behind a synthesized hardware identifier.
const HARDWARE_ID_BYTES: usize = 16;

fn key_regex() -> &'static Regex {
    static KEY_REGEX: OnceLock<Regex> = OnceLock::new();
    KEY_REGEX.get_or_init(|| {
        Regex::new(r"^[0-9A-F]{8}(-[0-9A-F]{8}){3}$").expect("license key pattern is valid")
    })
}

/// Hash raw seed bytes and format the digest as a license key.
///
/// This is the deterministic half of key generation: the same seed always
/// yields the same key.
pub fn format_license_key(seed: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(seed)).to_uppercase();
    let body = &digest[..KEY_GROUPS * GROUP_LENGTH];

    body.as_bytes()
        .chunks(GROUP_LENGTH)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

fn fill_random(buf: &mut [u8]) -> LicenseResult<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| LicenseError::KeyGeneration(format!("secure random source unavailable: {e}")))
}

/// Generate a fresh license key from secure randomness.
///
/// # Errors
///
/// Returns [`LicenseError::KeyGeneration`] if the OS random source fails.
pub fn generate_license_key() -> LicenseResult<String> {
    let mut seed = [0u8; SEED_BYTES];
    fill_random(&mut seed)?;
    Ok(format_license_key(&seed))
}

/// Generate a key that `exists_fn` reports as unused.
///
/// Retries up to `max_retries` times before giving up.
pub async fn generate_unique_license_key<F, Fut>(
    exists_fn: F,
    max_retries: u32,
) -> LicenseResult<String>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = LicenseResult<bool>>,
{
    for _ in 0..max_retries {
        let key = generate_license_key()?;
        if !exists_fn(key.clone()).await? {
            return Ok(key);
        }
    }

    Err(LicenseError::KeyGeneration(format!(
        "failed to generate unique license key after {max_retries} attempts"
    )))
}

/// Synthesize a hardware identifier for activation requests that omit one.
pub fn generate_hardware_id() -> LicenseResult<String> {
    let mut bytes = [0u8; HARDWARE_ID_BYTES];
    fill_random(&mut bytes)?;
    Ok(hex::encode(bytes))
}

/// Check that `key` has the `XXXXXXXX-XXXXXXXX-XXXXXXXX-XXXXXXXX` shape.
pub fn validate_license_key_format(key: &str) -> bool {
    key_regex().is_match(key)
}

/// Hide all but the first group of a key, for logs.
pub fn mask_key(key: &str) -> String {
    match key.split_once('-') {
        Some((head, _)) => format!("{head}-****"),
        None => "****".to_string(),
    }
}
