//! Resource keys and key wrapping
//!
//! Every project and file gets its own random 256-bit key. The key only
//! leaves the client wrapped (encrypted) under the master key.

use rand::RngCore;
use zeroize::Zeroize;

use crate::envelope::{open, seal, Envelope};
use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// A 256-bit AES key usable by the envelope codec.
pub trait SymmetricKey {
    fn as_bytes(&self) -> &[u8; KEY_SIZE];
}

/// A per-resource (project or file) encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct ResourceKey {
    bytes: [u8; KEY_SIZE],
}

impl ResourceKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }
}

impl SymmetricKey for ResourceKey {
    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ResourceKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit resource key.
pub fn generate_resource_key() -> ResourceKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    ResourceKey::from_bytes(bytes)
}

/// Wrap (encrypt) a key's raw bytes under another key.
pub fn wrap_key<S, W>(subject: &S, wrapping: &W) -> CryptoResult<Envelope>
where
    S: SymmetricKey + ?Sized,
    W: SymmetricKey + ?Sized,
{
    seal(wrapping, subject.as_bytes())
}

/// Unwrap (decrypt) a key produced by [`wrap_key`] and re-import it.
///
/// Fails with `Authentication` if the wrapping key is wrong or the envelope
/// was tampered with.
pub fn unwrap_key<W>(wrapped: &Envelope, wrapping: &W) -> CryptoResult<ResourceKey>
where
    W: SymmetricKey + ?Sized,
{
    let mut plaintext = open(wrapping, wrapped)?;

    if plaintext.len() != KEY_SIZE {
        let len = plaintext.len();
        plaintext.zeroize();
        return Err(CryptoError::Validation(format!(
            "unwrapped key has wrong size: {len} bytes (expected {KEY_SIZE})"
        )));
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(ResourceKey::from_bytes(key_bytes))
}
