//! Chunked file encryption
//!
//! Files are split into fixed-size chunks (the last one may be shorter and is
//! never padded). Each chunk is sealed independently:
//! ```text
//! { "ciphertext": [...], "iv": [12 random bytes], "index": n }
//! AAD = index (8 bytes, big-endian)
//! ```
//! Binding the index into the AAD means a chunk cannot be relabelled to a
//! different position. Storage and transport may deliver chunks in any order;
//! `index` is the only ordering contract.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::envelope::{open_with_aad, seal_with_aad, Envelope};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::SymmetricKey;
use crate::DEFAULT_CHUNK_SIZE;

/// One independently encrypted slice of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedChunk {
    #[serde(flatten)]
    pub envelope: Envelope,
    /// Zero-based position of this chunk within the file
    pub index: u64,
}

/// An encrypted file: chunk list plus cleartext descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedFile {
    pub chunks: Vec<EncryptedChunk>,
    /// Original plaintext size in bytes
    pub total_size: u64,
    pub file_name: String,
    pub file_type: String,
}

/// How chunks are scheduled. Chunks share no state, so both modes produce
/// interchangeable output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    #[default]
    Sequential,
    /// Fan chunks out over the rayon thread pool
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub mode: ChunkMode,
}

impl ChunkOptions {
    pub fn validate(&self) -> CryptoResult<()> {
        if self.chunk_size == 0 {
            return Err(CryptoError::Validation("chunk size must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            mode: ChunkMode::Sequential,
        }
    }
}

/// Encrypt a single chunk at `index`.
pub fn encrypt_chunk<K>(key: &K, index: u64, plaintext: &[u8]) -> CryptoResult<EncryptedChunk>
where
    K: SymmetricKey + ?Sized,
{
    let envelope = seal_with_aad(key, plaintext, &index.to_be_bytes())?;
    Ok(EncryptedChunk { envelope, index })
}

/// Decrypt a single chunk, verifying it in isolation from the rest of the file.
///
/// Fails with `ChunkAuthentication` naming the chunk's index.
pub fn decrypt_chunk<K>(key: &K, chunk: &EncryptedChunk) -> CryptoResult<Vec<u8>>
where
    K: SymmetricKey + ?Sized,
{
    open_with_aad(key, &chunk.envelope, &chunk.index.to_be_bytes()).map_err(|e| match e {
        CryptoError::Authentication => CryptoError::ChunkAuthentication { index: chunk.index },
        other => other,
    })
}

/// Split `data` into chunks and encrypt each one with a fresh IV.
///
/// Zero-length input produces zero chunks.
pub fn encrypt_file<K>(
    key: &K,
    data: &[u8],
    file_name: &str,
    file_type: &str,
    options: &ChunkOptions,
) -> CryptoResult<EncryptedFile>
where
    K: SymmetricKey + Sync + ?Sized,
{
    options.validate()?;

    let chunks = match options.mode {
        ChunkMode::Sequential => data
            .chunks(options.chunk_size)
            .enumerate()
            .map(|(i, piece)| encrypt_chunk(key, i as u64, piece))
            .collect::<CryptoResult<Vec<_>>>()?,
        ChunkMode::Parallel => data
            .par_chunks(options.chunk_size)
            .enumerate()
            .map(|(i, piece)| encrypt_chunk(key, i as u64, piece))
            .collect::<CryptoResult<Vec<_>>>()?,
    };

    tracing::debug!(
        file_name,
        total_size = data.len(),
        chunks = chunks.len(),
        mode = ?options.mode,
        "encrypted file"
    );

    Ok(EncryptedFile {
        chunks,
        total_size: data.len() as u64,
        file_name: file_name.to_string(),
        file_type: file_type.to_string(),
    })
}

/// Decrypt an [`EncryptedFile`], reassembling chunks by index.
///
/// The chunk list may be in any order. Every index in `0..chunks.len()` must
/// appear exactly once, and the reassembled length must equal `total_size`.
pub fn decrypt_file<K>(key: &K, file: &EncryptedFile, mode: ChunkMode) -> CryptoResult<Vec<u8>>
where
    K: SymmetricKey + Sync + ?Sized,
{
    let ordered = order_chunks(&file.chunks)?;

    let pieces = match mode {
        ChunkMode::Sequential => ordered
            .iter()
            .map(|chunk| decrypt_chunk(key, chunk))
            .collect::<CryptoResult<Vec<_>>>(),
        ChunkMode::Parallel => ordered
            .par_iter()
            .map(|chunk| decrypt_chunk(key, chunk))
            .collect::<CryptoResult<Vec<_>>>(),
    };
    let pieces = pieces.inspect_err(|e| tracing::warn!(file_name = %file.file_name, "{e}"))?;

    let mut output = Vec::with_capacity(pieces.iter().map(Vec::len).sum());
    for piece in pieces {
        output.extend_from_slice(&piece);
    }

    if output.len() as u64 != file.total_size {
        return Err(CryptoError::Validation(format!(
            "reassembled size {} does not match recorded total size {}",
            output.len(),
            file.total_size
        )));
    }

    Ok(output)
}

/// Sort chunks by index and check the indices form `0..n` with no gaps.
fn order_chunks(chunks: &[EncryptedChunk]) -> CryptoResult<Vec<&EncryptedChunk>> {
    let mut ordered: Vec<&EncryptedChunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.index);

    for (expected, chunk) in ordered.iter().enumerate() {
        let expected = expected as u64;
        if chunk.index != expected {
            return Err(CryptoError::Validation(if chunk.index < expected {
                format!("duplicate chunk index {}", chunk.index)
            } else {
                format!("missing chunk index {expected}")
            }));
        }
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_resource_key, ResourceKey};
    use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};
    use proptest::prelude::*;

    fn opts(chunk_size: usize) -> ChunkOptions {
        ChunkOptions {
            chunk_size,
            mode: ChunkMode::Sequential,
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8).collect()
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let key = generate_resource_key();
        let file = encrypt_file(&key, &[], "empty.bin", "application/octet-stream", &opts(16))
            .unwrap();

        assert!(file.chunks.is_empty());
        assert_eq!(file.total_size, 0);
        assert_eq!(decrypt_file(&key, &file, ChunkMode::Sequential).unwrap(), b"");
    }

    #[test]
    fn final_chunk_is_not_padded() {
        let key = generate_resource_key();
        let data = sample(25);
        let file = encrypt_file(&key, &data, "f", "t", &opts(10)).unwrap();

        let sizes: Vec<usize> = file
            .chunks
            .iter()
            .map(|c| c.envelope.ciphertext.len() - TAG_SIZE)
            .collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(
            file.chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_chunk() {
        let key = generate_resource_key();
        let file = encrypt_file(&key, &sample(30), "f", "t", &opts(10)).unwrap();
        assert_eq!(file.chunks.len(), 3);
    }

    #[test]
    fn every_chunk_gets_a_distinct_iv() {
        let key = generate_resource_key();
        // identical plaintext in every chunk
        let file = encrypt_file(&key, &[0u8; 64], "f", "t", &opts(8)).unwrap();

        let mut ivs: Vec<&Vec<u8>> = file.chunks.iter().map(|c| &c.envelope.iv).collect();
        assert!(ivs.iter().all(|iv| iv.len() == IV_SIZE));
        ivs.sort();
        ivs.dedup();
        assert_eq!(ivs.len(), 8, "IVs must not repeat across chunks");
    }

    #[test]
    fn reversed_chunks_still_decrypt() {
        let key = generate_resource_key();
        let data = sample(1000);
        let mut file = encrypt_file(&key, &data, "f", "t", &opts(64)).unwrap();
        file.chunks.reverse();

        assert_eq!(decrypt_file(&key, &file, ChunkMode::Sequential).unwrap(), data);
    }

    #[test]
    fn corrupted_chunk_is_named() {
        let key = generate_resource_key();
        let mut file = encrypt_file(&key, &sample(100), "f", "t", &opts(10)).unwrap();
        file.chunks[6].envelope.ciphertext[0] ^= 0x01;

        let err = decrypt_file(&key, &file, ChunkMode::Sequential).unwrap_err();
        assert!(matches!(err, CryptoError::ChunkAuthentication { index: 6 }));
        assert!(err.is_authentication());
    }

    #[test]
    fn relabelled_chunk_index_fails() {
        let key = generate_resource_key();
        let mut file = encrypt_file(&key, &sample(20), "f", "t", &opts(10)).unwrap();
        // swap labels: positions stay contiguous but AAD no longer matches
        file.chunks[0].index = 1;
        file.chunks[1].index = 0;

        let err = decrypt_file(&key, &file, ChunkMode::Sequential).unwrap_err();
        assert!(matches!(err, CryptoError::ChunkAuthentication { .. }));
    }

    #[test]
    fn wrong_key_fails_on_first_chunk() {
        let file = encrypt_file(&generate_resource_key(), &sample(50), "f", "t", &opts(10)).unwrap();
        let err = decrypt_file(&generate_resource_key(), &file, ChunkMode::Sequential).unwrap_err();
        assert!(matches!(err, CryptoError::ChunkAuthentication { index: 0 }));
    }

    #[test]
    fn missing_chunk_is_validation() {
        let key = generate_resource_key();
        let mut file = encrypt_file(&key, &sample(30), "f", "t", &opts(10)).unwrap();
        file.chunks.remove(1);

        let err = decrypt_file(&key, &file, ChunkMode::Sequential).unwrap_err();
        assert!(matches!(err, CryptoError::Validation(ref m) if m.contains("missing chunk index 1")));
    }

    #[test]
    fn duplicate_chunk_is_validation() {
        let key = generate_resource_key();
        let mut file = encrypt_file(&key, &sample(30), "f", "t", &opts(10)).unwrap();
        let dup = file.chunks[0].clone();
        file.chunks.push(dup);

        let err = decrypt_file(&key, &file, ChunkMode::Sequential).unwrap_err();
        assert!(matches!(err, CryptoError::Validation(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn total_size_mismatch_is_validation() {
        let key = generate_resource_key();
        let mut file = encrypt_file(&key, &sample(30), "f", "t", &opts(10)).unwrap();
        file.total_size = 31;

        assert!(matches!(
            decrypt_file(&key, &file, ChunkMode::Sequential),
            Err(CryptoError::Validation(_))
        ));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let key = generate_resource_key();
        assert!(matches!(
            encrypt_file(&key, b"abc", "f", "t", &opts(0)),
            Err(CryptoError::Validation(_))
        ));
    }

    #[test]
    fn parallel_and_sequential_interoperate() {
        let key = generate_resource_key();
        let data = sample(10_000);

        let par = encrypt_file(
            &key,
            &data,
            "f",
            "t",
            &ChunkOptions {
                chunk_size: 333,
                mode: ChunkMode::Parallel,
            },
        )
        .unwrap();
        assert_eq!(decrypt_file(&key, &par, ChunkMode::Sequential).unwrap(), data);

        let seq = encrypt_file(&key, &data, "f", "t", &opts(333)).unwrap();
        assert_eq!(decrypt_file(&key, &seq, ChunkMode::Parallel).unwrap(), data);
    }

    #[test]
    fn wire_format_field_names() {
        let key = ResourceKey::from_bytes([1u8; KEY_SIZE]);
        let file = encrypt_file(&key, b"hello", "a.txt", "text/plain", &opts(4)).unwrap();

        let wire = serde_json::to_value(&file).unwrap();
        assert_eq!(wire["totalSize"], 5);
        assert_eq!(wire["fileName"], "a.txt");
        assert_eq!(wire["fileType"], "text/plain");
        let chunk = &wire["chunks"][1];
        assert_eq!(chunk["index"], 1);
        assert!(chunk["ciphertext"].is_array());
        assert_eq!(chunk["iv"].as_array().unwrap().len(), IV_SIZE);

        let restored: EncryptedFile = serde_json::from_value(wire).unwrap();
        assert_eq!(restored, file);
    }

    proptest! {
        /// Shuffled chunk order never changes the reconstructed bytes
        #[test]
        fn reorder_invariance(
            data in proptest::collection::vec(any::<u8>(), 0..=2048),
            chunk_size in 1usize..=97,
            seed in any::<u64>(),
        ) {
            let key = generate_resource_key();
            let mut file = encrypt_file(&key, &data, "f", "t", &opts(chunk_size)).unwrap();

            // deterministic Fisher-Yates driven by the seed
            let mut state = seed | 1;
            for i in (1..file.chunks.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let j = (state % (i as u64 + 1)) as usize;
                file.chunks.swap(i, j);
            }

            prop_assert_eq!(decrypt_file(&key, &file, ChunkMode::Sequential).unwrap(), data);
        }

        #[test]
        fn chunk_count_matches_ceiling(len in 0usize..=4096, chunk_size in 1usize..=512) {
            let key = generate_resource_key();
            let file = encrypt_file(&key, &vec![0u8; len], "f", "t", &opts(chunk_size)).unwrap();
            prop_assert_eq!(file.chunks.len(), len.div_ceil(chunk_size));
        }
    }
}
