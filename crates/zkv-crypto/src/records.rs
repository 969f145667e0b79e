//! Records exchanged with the server.
//!
//! Everything here is safe to hand to an untrusted store: keys appear only
//! wrapped, content only as envelopes. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::chunk::EncryptedFile;
use crate::envelope::Envelope;
use crate::kdf::KdfParams;

/// Canonical form of an email for identity comparisons and lookup keys:
/// trimmed and Unicode-lowercased.
pub fn canonical_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// What registration sends to the server, and what login gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub email: String,
    /// 32-byte PBKDF2 salt (not secret)
    pub salt: Vec<u8>,
    /// KDF parameters the master key was derived with
    pub kdf: KdfParams,
    /// P-256 private scalar wrapped under the master key
    pub wrapped_private_key: Envelope,
    /// SEC1 uncompressed P-256 public key
    pub public_key: Vec<u8>,
}

/// Plaintext project metadata. Only ever stored encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    /// RFC 3339 creation timestamp
    pub created: String,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub project_id: String,
    /// [`ProjectMetadata`] sealed under the project key
    pub encrypted_metadata: Envelope,
    /// Project key wrapped under the master key
    pub encrypted_project_key: Envelope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub encrypted_file: EncryptedFile,
    /// File key wrapped under the master key
    pub encrypted_file_key: Envelope,
    pub file_name: String,
    pub file_size: u64,
}
