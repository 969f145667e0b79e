//! P-256 identity keypair
//!
//! Generated once at registration. The private scalar leaves the client only
//! wrapped under the master key; the public key (SEC1 uncompressed, 65 bytes)
//! is published in the clear.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::SecretKey;
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::envelope::{open, seal, Envelope};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::SymmetricKey;
use crate::KEY_SIZE;

/// Length of a SEC1 uncompressed P-256 public key.
pub const PUBLIC_KEY_SIZE: usize = 65;

/// The user's asymmetric identity. The secret scalar is zeroized on drop.
pub struct IdentityKeyPair {
    secret: SecretKey,
    public: Vec<u8>,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        Self { secret, public }
    }

    /// SEC1 uncompressed public key bytes.
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    pub fn matches_public_key(&self, public: &[u8]) -> bool {
        self.public.as_slice() == public
    }

    /// Wrap the private scalar under `wrapping` (normally the master key).
    pub fn wrap_private_key<W: SymmetricKey + ?Sized>(&self, wrapping: &W) -> CryptoResult<Envelope> {
        let mut raw = [0u8; KEY_SIZE];
        raw.copy_from_slice(&self.secret.to_bytes());
        let wrapped = seal(wrapping, &raw);
        raw.zeroize();
        wrapped
    }

    /// Unwrap a private key produced by [`wrap_private_key`](Self::wrap_private_key).
    ///
    /// A wrong wrapping key surfaces as `Authentication`.
    pub fn unwrap_private_key<W: SymmetricKey + ?Sized>(
        wrapped: &Envelope,
        wrapping: &W,
    ) -> CryptoResult<Self> {
        let mut raw = open(wrapping, wrapped)?;
        let secret = SecretKey::from_slice(&raw);
        raw.zeroize();

        let secret = secret.map_err(|_| {
            CryptoError::Validation("unwrapped identity key is not a valid P-256 scalar".into())
        })?;
        Ok(Self::from_secret(secret))
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("secret", &"[REDACTED]")
            .field("public_len", &self.public.len())
            .finish()
    }
}
