//! Key Manager: the per-session key hierarchy
//!
//! A [`KeyManager`] is an explicit session object owned by the caller. It
//! holds the master key, the unwrapped identity and a cache of resolved
//! resource keys, and walks this lifecycle:
//!
//! ```text
//! Anonymous ──register──▶ Registering ──▶ Authenticated ──lock──▶ Locked
//!     │                                     ▲     │                 │
//!     └──────────────login──────────────────┘     └─logout─▶ LoggedOut
//!                           ▲                                       │
//!                           └────────────login──────────────────────┘
//! ```
//!
//! Leaving `Authenticated` for any reason drops (and zeroizes) every key the
//! session holds. Resource-key resolution is async so that concurrent first
//! resolutions of one id share a single unwrap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::chunk::{decrypt_file, encrypt_file, ChunkOptions, EncryptedFile};
use crate::envelope::{decrypt, encrypt, Envelope};
use crate::error::{CryptoError, CryptoResult};
use crate::identity::IdentityKeyPair;
use crate::kdf::{derive_master_key, generate_salt, KdfParams, MasterKey};
use crate::keys::{generate_resource_key, unwrap_key, wrap_key, ResourceKey};
use crate::records::{canonical_email, FileRecord, ProjectMetadata, ProjectRecord, UserRecord};
use crate::SALT_SIZE;

/// Tunables for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// KDF parameters applied to new registrations
    pub kdf: KdfParams,
    /// Minimum password length in characters
    pub min_password_len: usize,
    pub chunks: ChunkOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            min_password_len: 8,
            chunks: ChunkOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Registering,
    Authenticated,
    Locked,
    LoggedOut,
}

/// Resource-key cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Resolutions answered from the cache
    pub hits: u64,
    /// Unwraps actually performed
    pub unwraps: u64,
}

/// Key material held while authenticated.
struct Unlocked {
    email: String,
    master: MasterKey,
    identity: IdentityKeyPair,
}

type Slot = Arc<OnceCell<ResourceKey>>;

/// resource id → resolved key. One slot per id; the slot's `OnceCell`
/// serializes concurrent first resolutions.
#[derive(Default)]
struct KeyCache {
    slots: Mutex<HashMap<String, Slot>>,
    hits: AtomicU64,
    unwraps: AtomicU64,
}

impl KeyCache {
    fn slot(&self, resource_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(resource_id.to_string()).or_default().clone()
    }

    fn get(&self, resource_id: &str) -> Option<ResourceKey> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(resource_id).and_then(|slot| slot.get().cloned())
    }

    fn forget(&self, resource_id: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(resource_id);
    }

    fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|slot| slot.initialized()).count()
    }

    fn clear(&mut self) {
        self.slots
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.hits.get_mut() = 0;
        *self.unwraps.get_mut() = 0;
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            unwraps: self.unwraps.load(Ordering::Relaxed),
        }
    }
}

/// The client's key custody for one user session.
pub struct KeyManager {
    config: SessionConfig,
    state: SessionState,
    unlocked: Option<Unlocked>,
    locked_email: Option<String>,
    cache: KeyCache,
}

impl KeyManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Anonymous,
            unlocked: None,
            locked_email: None,
            cache: KeyCache::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Email of the authenticated (or locked) account.
    pub fn email(&self) -> Option<&str> {
        self.unlocked
            .as_ref()
            .map(|u| u.email.as_str())
            .or(self.locked_email.as_deref())
    }

    /// Public identity key of the authenticated account.
    pub fn public_key(&self) -> Option<&[u8]> {
        self.unlocked.as_ref().map(|u| u.identity.public_key())
    }

    /// Number of resource keys currently resolved.
    pub fn cached_keys(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Create a new account: salt, master key, identity keypair.
    ///
    /// The password policy is checked before any key material is generated.
    /// Returns the record to persist server-side. CPU-bound (runs the KDF).
    pub fn register(&mut self, email: &str, password: &SecretString) -> CryptoResult<UserRecord> {
        match self.state {
            SessionState::Anonymous | SessionState::LoggedOut => {}
            other => {
                return Err(CryptoError::Validation(format!(
                    "cannot register from a {other:?} session; log out first"
                )))
            }
        }
        let email = normalize_email(email)?;
        self.check_password_policy(password)?;

        self.state = SessionState::Registering;
        match provision(&email, password, &self.config.kdf) {
            Ok((unlocked, record)) => {
                self.install(unlocked);
                info!(email = %email, kdf_iterations = record.kdf.iterations, "registered");
                Ok(record)
            }
            Err(e) => {
                self.teardown(SessionState::Anonymous);
                Err(e)
            }
        }
    }

    /// Unlock the session from a stored [`UserRecord`].
    ///
    /// A wrong password and a corrupted record both surface as
    /// `InvalidCredentials`. On failure the session keeps its previous state
    /// and holds no key material. CPU-bound (runs the KDF).
    pub fn login(
        &mut self,
        email: &str,
        password: &SecretString,
        record: &UserRecord,
    ) -> CryptoResult<()> {
        match self.state {
            SessionState::Authenticated | SessionState::Registering => {
                return Err(CryptoError::Validation(
                    "session already authenticated; log out first".into(),
                ))
            }
            SessionState::Locked => {
                if let Some(locked) = &self.locked_email {
                    if !same_email(locked, email) {
                        return Err(CryptoError::Validation(
                            "session is locked for a different account".into(),
                        ));
                    }
                }
            }
            SessionState::Anonymous | SessionState::LoggedOut => {}
        }

        let email = normalize_email(email)?;
        if !same_email(&record.email, &email) {
            return Err(CryptoError::Validation(
                "user record does not belong to this email".into(),
            ));
        }
        let salt: [u8; SALT_SIZE] = record.salt.as_slice().try_into().map_err(|_| {
            CryptoError::Validation(format!(
                "salt must be {SALT_SIZE} bytes, got {}",
                record.salt.len()
            ))
        })?;

        let master = derive_master_key(password, &salt, &record.kdf)?;
        let identity = IdentityKeyPair::unwrap_private_key(&record.wrapped_private_key, &master)
            .ok()
            .filter(|identity| identity.matches_public_key(&record.public_key))
            .ok_or_else(|| {
                warn!(email = %email, "login failed: identity key did not unwrap");
                CryptoError::InvalidCredentials
            })?;

        self.install(Unlocked {
            email: email.clone(),
            master,
            identity,
        });
        info!(email = %email, "logged in");
        Ok(())
    }

    /// Drop all key material but remember the account; `login` unlocks again.
    pub fn lock(&mut self) -> CryptoResult<()> {
        let unlocked = self.unlocked.take().ok_or(CryptoError::NotAuthenticated)?;
        info!(email = %unlocked.email, "session locked");
        self.locked_email = Some(unlocked.email.clone());
        drop(unlocked);
        self.teardown(SessionState::Locked);
        Ok(())
    }

    /// Discard the master key, identity and every cached resource key.
    pub fn logout(&mut self) {
        if let Some(email) = self.email() {
            info!(email = %email, "logged out");
        }
        self.locked_email = None;
        self.teardown(SessionState::LoggedOut);
    }

    fn install(&mut self, unlocked: Unlocked) {
        self.cache.clear();
        self.unlocked = Some(unlocked);
        self.locked_email = None;
        self.state = SessionState::Authenticated;
    }

    fn teardown(&mut self, next: SessionState) {
        self.unlocked = None;
        self.cache.clear();
        self.state = next;
    }

    fn check_password_policy(&self, password: &SecretString) -> CryptoResult<()> {
        let len = password.expose_secret().chars().count();
        if len < self.config.min_password_len {
            return Err(CryptoError::Validation(format!(
                "password must be at least {} characters",
                self.config.min_password_len
            )));
        }
        Ok(())
    }

    fn unlocked(&self) -> CryptoResult<&Unlocked> {
        self.unlocked.as_ref().ok_or(CryptoError::NotAuthenticated)
    }

    // ── Resource keys ────────────────────────────────────────────────────────

    /// Generate a key for a new resource, cache it, and return it wrapped
    /// under the master key for the server.
    pub fn create_resource_key(&self, resource_id: &str) -> CryptoResult<Envelope> {
        let unlocked = self.unlocked()?;
        check_resource_id(resource_id)?;

        let key = generate_resource_key();
        let wrapped = wrap_key(&key, &unlocked.master)?;
        self.cache.slot(resource_id).set(key).map_err(|_| {
            CryptoError::Validation(format!(
                "resource {resource_id} already has a key in this session"
            ))
        })?;

        debug!(resource_id, "created resource key");
        Ok(wrapped)
    }

    /// Resolve a resource key: cached if already known, otherwise unwrapped
    /// with the master key and cached.
    ///
    /// A cached id is never unwrapped again. Concurrent first resolutions of
    /// the same id wait on one unwrap; a failed unwrap leaves the id
    /// unresolved.
    pub async fn resolve_resource_key(
        &self,
        resource_id: &str,
        wrapped: &Envelope,
    ) -> CryptoResult<ResourceKey> {
        let unlocked = self.unlocked()?;
        check_resource_id(resource_id)?;

        let slot = self.cache.slot(resource_id);
        if let Some(key) = slot.get() {
            self.cache.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(key.clone());
        }

        let key = slot
            .get_or_try_init(|| async {
                self.cache.unwraps.fetch_add(1, Ordering::Relaxed);
                unwrap_key(wrapped, &unlocked.master)
            })
            .await
            .inspect_err(|e| warn!(resource_id, "resource key unwrap failed: {e}"))?;

        debug!(resource_id, "resolved resource key");
        Ok(key.clone())
    }

    fn cached_key(&self, resource_id: &str) -> CryptoResult<ResourceKey> {
        self.unlocked()?;
        self.cache
            .get(resource_id)
            .ok_or_else(|| CryptoError::KeyNotAvailable(resource_id.to_string()))
    }

    /// Encrypt a value under a created/resolved resource key.
    pub fn encrypt_for<T: Serialize + ?Sized>(
        &self,
        resource_id: &str,
        value: &T,
    ) -> CryptoResult<Envelope> {
        let key = self.cached_key(resource_id)?;
        encrypt(&key, value)
    }

    pub fn decrypt_for<T: DeserializeOwned>(
        &self,
        resource_id: &str,
        envelope: &Envelope,
    ) -> CryptoResult<T> {
        let key = self.cached_key(resource_id)?;
        decrypt(&key, envelope)
    }

    /// Chunk-encrypt file contents under a created/resolved resource key.
    pub fn encrypt_file_for(
        &self,
        resource_id: &str,
        data: &[u8],
        file_name: &str,
        file_type: &str,
    ) -> CryptoResult<EncryptedFile> {
        let key = self.cached_key(resource_id)?;
        encrypt_file(&key, data, file_name, file_type, &self.config.chunks)
    }

    pub fn decrypt_file_for(&self, resource_id: &str, file: &EncryptedFile) -> CryptoResult<Vec<u8>> {
        let key = self.cached_key(resource_id)?;
        decrypt_file(&key, file, self.config.chunks.mode)
    }

    // ── Projects and files ───────────────────────────────────────────────────

    /// Create a project with its own key and encrypted metadata.
    pub fn create_project(&self, name: &str) -> CryptoResult<ProjectRecord> {
        let owner = self.unlocked()?.email.clone();
        let name = name.trim();
        if name.is_empty() {
            return Err(CryptoError::Validation("project name must not be empty".into()));
        }

        let project_id = new_project_id();
        let encrypted_project_key = self.create_resource_key(&project_id)?;
        let metadata = ProjectMetadata {
            name: name.to_string(),
            created: chrono::Utc::now().to_rfc3339(),
            owner,
        };
        let encrypted_metadata = self.encrypt_for(&project_id, &metadata)?;

        info!(project_id = %project_id, "created project");
        Ok(ProjectRecord {
            project_id,
            encrypted_metadata,
            encrypted_project_key,
        })
    }

    /// Resolve a project's key and decrypt its metadata.
    pub async fn open_project(&self, record: &ProjectRecord) -> CryptoResult<ProjectMetadata> {
        self.resolve_resource_key(&record.project_id, &record.encrypted_project_key)
            .await?;
        self.decrypt_for(&record.project_id, &record.encrypted_metadata)
    }

    /// Encrypt file contents under a fresh per-file key.
    ///
    /// On failure the new key is discarded, so the same id can be sealed again.
    pub fn seal_file(
        &self,
        file_id: &str,
        project_id: Option<&str>,
        data: &[u8],
        file_name: &str,
        file_type: &str,
    ) -> CryptoResult<FileRecord> {
        self.unlocked()?;
        self.config.chunks.validate()?;

        let encrypted_file_key = self.create_resource_key(file_id)?;
        let encrypted_file = self
            .encrypt_file_for(file_id, data, file_name, file_type)
            .inspect_err(|_| self.cache.forget(file_id))?;

        Ok(FileRecord {
            file_id: file_id.to_string(),
            project_id: project_id.map(str::to_string),
            encrypted_file,
            encrypted_file_key,
            file_name: file_name.to_string(),
            file_size: data.len() as u64,
        })
    }

    /// Resolve a file's key and decrypt its contents.
    pub async fn open_file(&self, record: &FileRecord) -> CryptoResult<Vec<u8>> {
        self.resolve_resource_key(&record.file_id, &record.encrypted_file_key)
            .await?;
        self.decrypt_file_for(&record.file_id, &record.encrypted_file)
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("state", &self.state)
            .field("email", &self.email())
            .field("cached_keys", &self.cached_keys())
            .finish()
    }
}

fn provision(
    email: &str,
    password: &SecretString,
    kdf: &KdfParams,
) -> CryptoResult<(Unlocked, UserRecord)> {
    let salt = generate_salt();
    let master = derive_master_key(password, &salt, kdf)?;
    let identity = IdentityKeyPair::generate();
    let wrapped_private_key = identity.wrap_private_key(&master)?;

    let record = UserRecord {
        email: email.to_string(),
        salt: salt.to_vec(),
        kdf: *kdf,
        wrapped_private_key,
        public_key: identity.public_key().to_vec(),
    };
    let unlocked = Unlocked {
        email: email.to_string(),
        master,
        identity,
    };
    Ok((unlocked, record))
}

fn normalize_email(email: &str) -> CryptoResult<String> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(CryptoError::Validation(format!("invalid email: {email:?}")));
    }
    Ok(email.to_string())
}

fn same_email(a: &str, b: &str) -> bool {
    canonical_email(a) == canonical_email(b)
}

fn check_resource_id(resource_id: &str) -> CryptoResult<()> {
    if resource_id.is_empty() {
        return Err(CryptoError::Validation("resource id must not be empty".into()));
    }
    Ok(())
}

/// `proj_<unix millis>_<9 random base36 chars>`
fn new_project_id() -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("proj_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}
