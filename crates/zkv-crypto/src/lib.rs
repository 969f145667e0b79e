//! zkv-crypto: client-side key hierarchy and encryption engine for zkvault
//!
//! The server only ever sees ciphertext, salts and wrapped keys. Passwords
//! and unwrapped keys stay in the client's session memory.
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, PBKDF2-HMAC-SHA256 from password + 32-byte salt)
//!   ├── Identity private key (P-256, wrapped by master key)
//!   └── Resource Key (per project / per file, 256-bit random, wrapped by master key)
//!       ├── Metadata envelope: AES-256-GCM (random 96-bit IV)
//!       └── File chunks: AES-256-GCM per chunk (random 96-bit IV, AAD = chunk index)
//! ```

pub mod chunk;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod records;
pub mod session;

pub use chunk::{decrypt_file, encrypt_file, ChunkMode, ChunkOptions, EncryptedChunk, EncryptedFile};
pub use envelope::{decrypt, encrypt, open, seal, Envelope};
pub use error::{CryptoError, CryptoResult};
pub use identity::IdentityKeyPair;
pub use kdf::{derive_master_key, generate_salt, KdfParams, MasterKey};
pub use keys::{generate_resource_key, unwrap_key, wrap_key, ResourceKey, SymmetricKey};
pub use records::{canonical_email, FileRecord, ProjectMetadata, ProjectRecord, UserRecord};
pub use session::{CacheStats, KeyManager, SessionConfig, SessionState};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the per-user PBKDF2 salt
pub const SALT_SIZE: usize = 32;

/// Default file chunk size (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;
