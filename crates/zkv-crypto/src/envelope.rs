//! AES-256-GCM envelope codec
//!
//! An [`Envelope`] is the only serialized form of any encrypted value:
//! ```text
//! { "ciphertext": [u8, ...],   // ciphertext || 16-byte GCM tag
//!   "iv":         [u8; 12] }   // random per call, never reused
//! ```
//! Byte sequences serialize as JSON arrays of unsigned 8-bit integers.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::SymmetricKey;
use crate::IV_SIZE;

/// Ciphertext plus the IV it was sealed with.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("iv_len", &self.iv.len())
            .finish()
    }
}

/// Seal raw bytes under `key` with a fresh random IV.
pub fn seal<K: SymmetricKey + ?Sized>(key: &K, plaintext: &[u8]) -> CryptoResult<Envelope> {
    seal_with_aad(key, plaintext, &[])
}

/// Open an envelope produced by [`seal`].
///
/// Fails with `Authentication` if the tag does not verify: wrong key,
/// tampered ciphertext and corrupted IV are indistinguishable.
pub fn open<K: SymmetricKey + ?Sized>(key: &K, envelope: &Envelope) -> CryptoResult<Vec<u8>> {
    open_with_aad(key, envelope, &[])
}

/// Serialize `value` to JSON and seal it.
pub fn encrypt<K, T>(key: &K, value: &T) -> CryptoResult<Envelope>
where
    K: SymmetricKey + ?Sized,
    T: Serialize + ?Sized,
{
    let plaintext =
        serde_json::to_vec(value).map_err(|e| CryptoError::Serialization(e.to_string()))?;
    seal(key, &plaintext)
}

/// Open an envelope and parse the JSON plaintext.
pub fn decrypt<K, T>(key: &K, envelope: &Envelope) -> CryptoResult<T>
where
    K: SymmetricKey + ?Sized,
    T: DeserializeOwned,
{
    let plaintext = open(key, envelope)?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| CryptoError::Validation(format!("decrypted payload is not valid JSON: {e}")))
}

pub(crate) fn seal_with_aad<K: SymmetricKey + ?Sized>(
    key: &K,
    plaintext: &[u8],
    aad: &[u8],
) -> CryptoResult<Envelope> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::Validation(format!("encryption failed: {e}")))?;

    Ok(Envelope {
        ciphertext,
        iv: iv.to_vec(),
    })
}

pub(crate) fn open_with_aad<K: SymmetricKey + ?Sized>(
    key: &K,
    envelope: &Envelope,
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    if envelope.iv.len() != IV_SIZE {
        return Err(CryptoError::Validation(format!(
            "IV must be {IV_SIZE} bytes, got {}",
            envelope.iv.len()
        )));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(
            Nonce::from_slice(&envelope.iv),
            Payload {
                msg: &envelope.ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_resource_key, ResourceKey};
    use crate::{KEY_SIZE, TAG_SIZE};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_encrypt_decrypt_json_roundtrip() {
        let key = generate_resource_key();
        let value = json!({"name": "Proj1", "tags": ["a", "b"], "n": 3});

        let envelope = encrypt(&key, &value).unwrap();
        let decrypted: serde_json::Value = decrypt(&key, &envelope).unwrap();

        assert_eq!(decrypted, value);
    }

    #[test]
    fn test_seal_open_empty() {
        let key = generate_resource_key();
        let envelope = seal(&key, b"").unwrap();
        assert_eq!(envelope.ciphertext.len(), TAG_SIZE);
        assert_eq!(open(&key, &envelope).unwrap(), b"");
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let key = generate_resource_key();
        let a = seal(&key, b"same plaintext").unwrap();
        let b = seal(&key, b"same plaintext").unwrap();

        assert_eq!(a.iv.len(), IV_SIZE);
        assert_ne!(a.iv, b.iv, "IV must never repeat under one key");
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let k1 = generate_resource_key();
        let k2 = generate_resource_key();

        let envelope = seal(&k1, b"secret data").unwrap();
        let result = open(&k2, &envelope);

        assert!(matches!(result, Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let key = generate_resource_key();
        let mut envelope = seal(&key, b"secret data").unwrap();
        envelope.ciphertext[0] ^= 0xFF;

        assert!(matches!(open(&key, &envelope), Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_tampered_tag() {
        let key = generate_resource_key();
        let mut envelope = seal(&key, b"secret data").unwrap();
        let last = envelope.ciphertext.len() - 1;
        envelope.ciphertext[last] ^= 0x01;

        assert!(matches!(open(&key, &envelope), Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_corrupted_iv() {
        let key = generate_resource_key();
        let mut envelope = seal(&key, b"secret data").unwrap();
        envelope.iv[3] ^= 0x80;

        assert!(matches!(open(&key, &envelope), Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_truncated_ciphertext() {
        let key = generate_resource_key();
        let mut envelope = seal(&key, b"secret data").unwrap();
        envelope.ciphertext.truncate(4);

        assert!(matches!(open(&key, &envelope), Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_wrong_iv_length_is_validation() {
        let key = generate_resource_key();
        let mut envelope = seal(&key, b"secret data").unwrap();
        envelope.iv.push(0);

        assert!(matches!(open(&key, &envelope), Err(CryptoError::Validation(_))));
    }

    #[test]
    fn test_aad_mismatch_fails() {
        let key = generate_resource_key();
        let envelope = seal_with_aad(&key, b"chunk", &1u64.to_be_bytes()).unwrap();

        assert!(open_with_aad(&key, &envelope, &2u64.to_be_bytes()).is_err());
        assert!(open(&key, &envelope).is_err());
    }

    #[test]
    fn test_wire_format_is_byte_arrays() {
        let key = ResourceKey::from_bytes([5u8; KEY_SIZE]);
        let envelope = seal(&key, b"x").unwrap();

        let wire = serde_json::to_value(&envelope).unwrap();
        let iv = wire["iv"].as_array().unwrap();
        assert_eq!(iv.len(), IV_SIZE);
        assert!(iv.iter().all(|b| b.as_u64().is_some_and(|v| v <= 255)));

        let restored: Envelope = serde_json::from_value(wire).unwrap();
        assert_eq!(open(&key, &restored).unwrap(), b"x");
    }

    #[test]
    fn test_debug_hides_bytes() {
        let envelope = Envelope {
            ciphertext: vec![0xAB; 20],
            iv: vec![0; IV_SIZE],
        };
        let rendered = format!("{envelope:?}");
        assert!(rendered.contains("ciphertext_len: 20"));
    }

    proptest! {
        /// Round-trip: decrypt(encrypt(P, K), K) == P
        #[test]
        fn seal_open_roundtrip(
            key_bytes in any::<[u8; KEY_SIZE]>(),
            data in proptest::collection::vec(any::<u8>(), 0..=4096),
        ) {
            let key = ResourceKey::from_bytes(key_bytes);
            let envelope = seal(&key, &data).unwrap();
            prop_assert_eq!(open(&key, &envelope).unwrap(), data);
        }

        #[test]
        fn string_values_roundtrip(s in ".*") {
            let key = generate_resource_key();
            let envelope = encrypt(&key, &s).unwrap();
            let back: String = decrypt(&key, &envelope).unwrap();
            prop_assert_eq!(back, s);
        }
    }
}
