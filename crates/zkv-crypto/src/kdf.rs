//! Key derivation: PBKDF2-HMAC-SHA256 password → master key

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::SymmetricKey;
use crate::{KEY_SIZE, SALT_SIZE};

/// KDF version 1: PBKDF2-HMAC-SHA256, 256-bit output.
pub const KDF_VERSION_PBKDF2_SHA256: u32 = 1;

/// Iteration count for new registrations.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Largest accepted iteration count. The count is read back from the
/// server's record at login, so it is bounded to keep derivation to seconds.
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// A 256-bit master key derived from a password via PBKDF2.
///
/// Never serialized. Zeroized on drop to prevent secrets lingering in memory.
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }
}

impl SymmetricKey for MasterKey {
    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Versioned KDF parameters.
///
/// Recorded next to every registration: changing the iteration count for new
/// users must never change how an existing user's master key is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub version: u32,
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            version: KDF_VERSION_PBKDF2_SHA256,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl KdfParams {
    pub fn with_iterations(iterations: u32) -> Self {
        Self {
            version: KDF_VERSION_PBKDF2_SHA256,
            iterations,
        }
    }

    pub fn validate(&self) -> CryptoResult<()> {
        if self.version != KDF_VERSION_PBKDF2_SHA256 {
            return Err(CryptoError::Validation(format!(
                "unsupported KDF version {}",
                self.version
            )));
        }
        if self.iterations == 0 {
            return Err(CryptoError::Validation(
                "KDF iteration count must be > 0".into(),
            ));
        }
        if self.iterations > MAX_ITERATIONS {
            return Err(CryptoError::Validation(format!(
                "KDF iteration count {} exceeds maximum {MAX_ITERATIONS}",
                self.iterations
            )));
        }
        Ok(())
    }
}

/// Generate a random 32-byte salt. Not secret; stored server-side.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit master key from a password and salt.
///
/// Deterministic for a given `(password, salt, params)`; cost scales linearly
/// with `params.iterations`.
pub fn derive_master_key(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> CryptoResult<MasterKey> {
    params.validate()?;

    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        salt,
        params.iterations,
        &mut key,
    );

    Ok(MasterKey::from_bytes(key))
}
